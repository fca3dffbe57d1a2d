//! Wire-level framing for the RDB payload sent immediately after
//! `+FULLRESYNC ...\r\n`: `$<len>\r\n<len bytes>` with **no** trailing CRLF
//! (see `storage::rdb` for the file-format decoder itself).

use super::resp::{find_first_crlf, ParseError, Result};

pub struct RdbParseResult {
    pub rdb: Vec<u8>,
    pub len: usize,
}

pub fn parse_rdb_payload(message: &[u8]) -> Result<RdbParseResult> {
    if message.first() != Some(&b'$') {
        return Err(ParseError::Invalid(
            "RDB payload must start with a bulk string length".to_string(),
        ));
    }
    match find_first_crlf(message) {
        Some(len) => {
            let n = std::str::from_utf8(&message[1..len])?.parse::<usize>()?;
            let rdb_start = len + 2;
            if rdb_start + n > message.len() {
                return Err(ParseError::Incomplete);
            }
            Ok(RdbParseResult {
                rdb: message[rdb_start..rdb_start + n].to_vec(),
                len: rdb_start + n,
            })
        }
        None => Err(ParseError::Incomplete),
    }
}
