//! Hex <-> binary helpers for wire-boundary fields (spec.md §9: "Fixed-size
//! embedded hex buffers in the source should be replaced by typed
//! fixed-length byte arrays plus explicit hex serialisers at the wire
//! boundary; internal code operates on binary.").

use crate::error::DecodeError;

/// Decode a hex string into bytes, rejecting odd-length input explicitly
/// (spec.md §4.3: "`ntime_hex` and `enonce2_hex` must be valid hex of even
/// length").
pub fn decode_hex(s: &str) -> Result<Vec<u8>, DecodeError> {
    if s.len() % 2 != 0 {
        return Err(DecodeError::OddLengthHex);
    }
    hex::decode(s).map_err(|_| DecodeError::InvalidHex)
}

/// Decode a hex string into a fixed-size byte array.
pub fn decode_hex_exact<const N: usize>(s: &str) -> Result<[u8; N], DecodeError> {
    let bytes = decode_hex(s)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| DecodeError::WrongLength {
            expected: N,
            got: v.len(),
        })
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
