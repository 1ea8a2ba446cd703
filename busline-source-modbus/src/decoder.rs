//! Register decoding.
//!
//! Every value is an IEEE-754 single precision float spread over two
//! holding registers, most significant word first, each word big-endian.

use thiserror::Error;

/// Number of 16-bit registers per value.
pub const REGISTERS_PER_VALUE: u16 = 2;

/// The register block did not hold a complete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected} registers, got {actual}")]
pub struct DecodeError {
    pub expected: usize,
    pub actual: usize,
}

/// Decode exactly [`REGISTERS_PER_VALUE`] words into a float.
///
/// NaN and infinities are returned as decoded.
pub fn decode_f32(words: &[u16]) -> Result<f32, DecodeError> {
    match words {
        [high, low] => Ok(f32::from_bits((u32::from(*high) << 16) | u32::from(*low))),
        _ => Err(DecodeError {
            expected: REGISTERS_PER_VALUE as usize,
            actual: words.len(),
        }),
    }
}

/// Decode the value starting `offset` registers into a larger block.
pub fn decode_at(block: &[u16], offset: usize) -> Result<f32, DecodeError> {
    let end = offset + REGISTERS_PER_VALUE as usize;
    match block.get(offset..end) {
        Some(words) => decode_f32(words),
        None => Err(DecodeError {
            expected: end,
            actual: block.len(),
        }),
    }
}

/// Split a float into the two words a device would hold for it.
pub fn encode_f32(value: f32) -> [u16; 2] {
    let bits = value.to_bits();
    [(bits >> 16) as u16, bits as u16]
}
