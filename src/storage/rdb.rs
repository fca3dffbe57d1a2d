//! RDB file decoder (C4): header, metadata, database section, and the
//! length/string encodings needed to reconstruct a keyspace. Grounded in
//! `original_source/src/RdbFileReader.hpp` (structure and byte markers) and
//! in the length-encoding bit patterns used by the other example parsers in
//! this lineage.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use thiserror::Error;

const HEADER_MAGIC: &[u8] = b"REDIS";
const HEADER_LEN: usize = 9;

const OP_METADATA: u8 = 0xFA;
const OP_DB_SELECTOR: u8 = 0xFE;
const OP_RESIZE_DB: u8 = 0xFB;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EXPIRE_S: u8 = 0xFD;
const OP_EOF: u8 = 0xFF;
const VALUE_TYPE_STRING: u8 = 0x00;

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("unexpected end of RDB file")]
    UnexpectedEof,
    #[error("RDB header missing REDIS magic prefix")]
    BadHeader,
    #[error("unsupported RDB value type byte {0:#04x}")]
    UnsupportedValueType(u8),
    #[error("unexpected byte {0:#04x} while parsing RDB database section")]
    UnexpectedByte(u8),
    #[error("LZF-compressed strings are not supported")]
    LzfUnsupported,
    #[error("failed to read RDB file: {0}")]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, RdbError>;

/// One decoded key with its (already string-ified) value and an absolute
/// expiry instant translated from the on-disk epoch-millisecond timestamp.
pub struct RdbEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub deadline: Option<Instant>,
}

struct Cursor<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Cursor { buffer, pos: 0 }
    }

    fn peek(&self) -> Result<u8> {
        self.buffer.get(self.pos).copied().ok_or(RdbError::UnexpectedEof)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buffer.len() {
            return Err(RdbError::UnexpectedEof);
        }
        let slice = &self.buffer[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_uint_le(&mut self, n: usize) -> Result<u64> {
        let bytes = self.read_exact(n)?;
        let mut value = 0u64;
        for (i, byte) in bytes.iter().enumerate() {
            value |= (*byte as u64) << (i * 8);
        }
        Ok(value)
    }

    /// Decodes an RDB length per the two-top-bit mode switch in spec §4.4:
    /// `00` six-bit length, `01` fourteen-bit length, `10` 4-byte
    /// big-endian length. Mode `11` (special-integer-string) is handled by
    /// the caller since it changes the meaning of the whole field.
    fn read_length(&mut self) -> Result<u64> {
        let first = self.read_u8()?;
        match first >> 6 {
            0b00 => Ok((first & 0x3F) as u64),
            0b01 => {
                let second = self.read_u8()?;
                Ok(((first & 0x3F) as u64) << 8 | second as u64)
            }
            0b10 => {
                let bytes = self.read_exact(4)?;
                Ok(u32::from_be_bytes(bytes.try_into().unwrap()) as u64)
            }
            _ => Err(RdbError::UnexpectedByte(first)),
        }
    }

    /// Decodes a length-encoded string, including the special-integer and
    /// rejected-LZF cases of mode `11`.
    fn read_string(&mut self) -> Result<Vec<u8>> {
        let first = self.peek()?;
        if first >> 6 == 0b11 {
            self.pos += 1;
            return match first & 0x3F {
                0 => Ok(self.read_uint_le(1)?.to_string().into_bytes()),
                1 => Ok(self.read_uint_le(2)?.to_string().into_bytes()),
                2 => Ok(self.read_uint_le(4)?.to_string().into_bytes()),
                3 => Err(RdbError::LzfUnsupported),
                _ => Err(RdbError::UnexpectedByte(first)),
            };
        }
        let len = self.read_length()?;
        Ok(self.read_exact(len as usize)?.to_vec())
    }
}

fn epoch_ms_to_instant(epoch_ms: u64) -> Instant {
    let now_system = SystemTime::now();
    let now_epoch = now_system
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i128;
    let delta_ms = epoch_ms as i128 - now_epoch;
    if delta_ms <= 0 {
        // Already expired; any past instant satisfies "deadline <= now".
        Instant::now() - Duration::from_millis(1)
    } else {
        Instant::now() + Duration::from_millis(delta_ms as u64)
    }
}

/// Parses the full RDB byte stream into a flat list of entries. Partial
/// loads are not committed: on any error the caller receives `Err` and the
/// entries decoded so far are simply dropped (staging-then-swap, per
/// spec §4.4's first offered choice).
pub fn parse(buffer: &[u8]) -> Result<Vec<RdbEntry>> {
    if buffer.len() < HEADER_LEN || &buffer[..HEADER_MAGIC.len()] != HEADER_MAGIC {
        return Err(RdbError::BadHeader);
    }
    let mut cursor = Cursor::new(buffer);
    cursor.pos = HEADER_LEN;

    while cursor.peek()? == OP_METADATA {
        cursor.read_u8()?;
        let _meta_key = cursor.read_string()?;
        let _meta_value = cursor.read_string()?;
    }

    let mut entries = Vec::new();

    match cursor.read_u8()? {
        OP_DB_SELECTOR => {}
        other => return Err(RdbError::UnexpectedByte(other)),
    }
    let _db_index = cursor.read_length()?;

    match cursor.read_u8()? {
        OP_RESIZE_DB => {}
        other => return Err(RdbError::UnexpectedByte(other)),
    }
    let total = cursor.read_length()?;
    let _with_expiry = cursor.read_length()?;

    for _ in 0..total {
        let mut next = cursor.read_u8()?;
        let deadline = match next {
            OP_EXPIRE_MS => {
                let epoch_ms = cursor.read_uint_le(8)?;
                next = cursor.read_u8()?;
                Some(epoch_ms_to_instant(epoch_ms))
            }
            OP_EXPIRE_S => {
                let epoch_s = cursor.read_uint_le(4)?;
                next = cursor.read_u8()?;
                Some(epoch_ms_to_instant(epoch_s * 1000))
            }
            _ => None,
        };

        if next != VALUE_TYPE_STRING {
            return Err(RdbError::UnsupportedValueType(next));
        }
        let key = cursor.read_string()?;
        let value = cursor.read_string()?;
        entries.push(RdbEntry { key, value, deadline });
    }

    match cursor.read_u8()? {
        OP_EOF => Ok(entries),
        other => Err(RdbError::UnexpectedByte(other)),
    }
}

pub fn load_file(path: &Path) -> Result<Vec<RdbEntry>> {
    let buffer = fs::read(path)?;
    parse(&buffer)
}

const EMPTY_RDB_HEX: &str = "\
52 45 44 49 53 30 30 31 31 FA 09 72 65 64 69 73 \
2D 76 65 72 05 37 2E 32 2E 30 FA 0A 72 65 64 69 \
73 2D 62 69 74 73 C0 40 FA 05 63 74 69 6D 65 C2 \
6D 08 BC 65 FA 08 75 73 65 64 2D 6D 65 6D C2 B0 \
C4 10 00 FA 08 61 6F 66 2D 62 61 73 65 C0 00 FF \
F0 6E 3B FE C0 FF 5A A2";

/// The fixed empty-RDB payload emitted by a master during FULLRESYNC (spec
/// §6.3). Decoded once from the hex constant above rather than hand-copied
/// as a byte array literal, so the source carries the same documentation
/// the spec does.
pub fn empty_payload() -> Vec<u8> {
    EMPTY_RDB_HEX
        .split_whitespace()
        .map(|byte| u8::from_str_radix(byte, 16).expect("hex literal is well-formed"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_matches_documented_byte_count() {
        assert_eq!(empty_payload().len(), 88);
    }

    #[test]
    fn empty_payload_parses_to_zero_entries() {
        let entries = parse(&empty_payload()).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn rejects_bad_header() {
        let err = parse(b"NOTREDIS1").unwrap_err();
        assert!(matches!(err, RdbError::BadHeader));
    }

    fn build_minimal_rdb(entries: &[(&[u8], &[u8], Option<u64>)]) -> Vec<u8> {
        let mut buf = b"REDIS0011".to_vec();
        buf.push(OP_DB_SELECTOR);
        buf.push(0x00);
        buf.push(OP_RESIZE_DB);
        buf.push(entries.len() as u8);
        buf.push(entries.iter().filter(|(_, _, ttl)| ttl.is_some()).count() as u8);
        for (key, value, ttl_ms) in entries {
            if let Some(ttl_ms) = ttl_ms {
                buf.push(OP_EXPIRE_MS);
                buf.extend_from_slice(&ttl_ms.to_le_bytes());
            }
            buf.push(VALUE_TYPE_STRING);
            buf.push(key.len() as u8);
            buf.extend_from_slice(key);
            buf.push(value.len() as u8);
            buf.extend_from_slice(value);
        }
        buf.push(OP_EOF);
        buf.extend_from_slice(&[0u8; 8]);
        buf
    }

    #[test]
    fn parses_entries_without_expiry() {
        let now_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let rdb = build_minimal_rdb(&[(b"foo", b"bar", None)]);
        let entries = parse(&rdb).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"foo");
        assert_eq!(entries[0].value, b"bar");
        assert!(entries[0].deadline.is_none());
        let _ = now_epoch_ms;
    }

    #[test]
    fn parses_entry_with_future_expiry() {
        let now_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let future = now_epoch_ms + 60_000;
        let rdb = build_minimal_rdb(&[(b"k", b"v", Some(future))]);
        let entries = parse(&rdb).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].deadline.unwrap() > Instant::now());
    }

    #[test]
    fn parses_entry_with_past_expiry_as_already_expired() {
        let rdb = build_minimal_rdb(&[(b"k", b"v", Some(1))]);
        let entries = parse(&rdb).unwrap();
        assert!(entries[0].deadline.unwrap() <= Instant::now());
    }

    #[test]
    fn rejects_lzf_compressed_strings() {
        let mut rdb = b"REDIS0011".to_vec();
        rdb.push(OP_DB_SELECTOR);
        rdb.push(0x00);
        rdb.push(OP_RESIZE_DB);
        rdb.push(1);
        rdb.push(0);
        rdb.push(VALUE_TYPE_STRING);
        rdb.push(0xC3); // special-integer mode, subtype 3 = LZF
        let err = parse(&rdb).unwrap_err();
        assert!(matches!(err, RdbError::LzfUnsupported));
    }

    #[test]
    fn decodes_special_integer_strings() {
        let mut rdb = b"REDIS0011".to_vec();
        rdb.push(OP_DB_SELECTOR);
        rdb.push(0x00);
        rdb.push(OP_RESIZE_DB);
        rdb.push(1);
        rdb.push(0);
        rdb.push(VALUE_TYPE_STRING);
        rdb.push(1);
        rdb.push(b'k');
        rdb.push(0xC0); // 1-byte integer string
        rdb.push(42);
        rdb.push(OP_EOF);
        rdb.extend_from_slice(&[0u8; 8]);

        let entries = parse(&rdb).unwrap();
        assert_eq!(entries[0].value, b"42");
    }
}
