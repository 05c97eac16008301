//! The `LengthValue` signed-bytes encoding (spec.md section 4.1).
//!
//! Canonical length-prefixed serialization of an ordered list of UTF-8
//! strings: for each string, a 4-byte little-endian length of its UTF-8 byte
//! length, followed by those bytes. No delimiters, no terminator. This is the
//! exact byte string ECDSA signs and verifies over, so the argument order
//! here must match the sender bit-for-bit.

/// Encode `parts` as the length-prefixed concatenation described above.
pub fn encode(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        parts.iter().map(|p| 4 + p.len()).sum(),
    );
    for part in parts {
        let bytes = part.as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    out
}
