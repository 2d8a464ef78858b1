//! Codecs used at the storage boundary.
//!
//! Two independent encodings meet at the B-tree: rowid keys, which must
//! compare byte-wise in the same order as their numeric values, and value
//! records, which carry an ordered list of dynamically typed cells.

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult};
use types::Value;

/// Width in bytes of an encoded rowid key.
pub const KEY_SIZE: usize = 8;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Encode a rowid so that byte-wise lexicographic comparison of encoded
/// keys matches numeric comparison. Rowids are restricted to positive
/// integers; big-endian fixed width gives the ordering property.
pub fn encode_key(rowid: i64) -> DbResult<[u8; KEY_SIZE]> {
    if rowid < 0 {
        return Err(DbError::Codec(format!(
            "rowid must be non-negative, got {rowid}"
        )));
    }
    Ok((rowid as u64).to_be_bytes())
}

/// Decode a key produced by [`encode_key`].
pub fn decode_key(bytes: &[u8]) -> DbResult<i64> {
    let arr: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| DbError::Codec(format!("key must be {KEY_SIZE} bytes, got {}", bytes.len())))?;
    let raw = u64::from_be_bytes(arr);
    i64::try_from(raw).map_err(|_| DbError::Codec(format!("key {raw} out of rowid range")))
}

/// Serialize an ordered list of cells into a self-describing byte string.
pub fn encode_record(cells: &[Value]) -> DbResult<Vec<u8>> {
    encode_to_vec(cells, bincode_config())
        .map_err(|e| DbError::Codec(format!("record encode failed: {e}")))
}

/// Decode a record produced by [`encode_record`].
pub fn decode_record(bytes: &[u8]) -> DbResult<Vec<Value>> {
    let (cells, read) = decode_from_slice(bytes, bincode_config())
        .map_err(|e| DbError::Codec(format!("record decode failed: {e}")))?;
    if read != bytes.len() {
        return Err(DbError::Codec(format!(
            "record has {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(cells)
}
