//! Framing the RDB payload for the wire, as opposed to decoding the RDB
//! file format itself (`storage::rdb` owns that). Kept as its own module
//! because the two concerns have different failure domains: this one can
//! never fail, `storage::rdb` can.

use crate::common::CRLF;
use crate::storage::rdb;

/// The empty-database payload a master sends immediately after
/// `+FULLRESYNC ...` for every replica, since no real dataset transfer is
/// implemented.
pub fn empty_rdb() -> Vec<u8> {
    rdb::empty_payload()
}

/// Frames `payload` as a RESP bulk string with **no** trailing CRLF — the
/// one place the RDB transfer deviates from normal bulk-string framing.
pub fn serialize_rdb(payload: &[u8]) -> Vec<u8> {
    let mut out = format!("${}{CRLF}", payload.len()).into_bytes();
    out.extend_from_slice(payload);
    out
}
