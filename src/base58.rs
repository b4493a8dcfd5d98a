//! Base58 encoding of JSON documents
//! Used when a config feed is requested in one of the base58 output formats

use serde_json::Value;
use thiserror::Error;

/// Base58 alphabet (no `0`, `O`, `I` or `l`)
pub const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Error returned by [`decode`] on malformed input
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid base58 character {character:?} at position {position}")]
pub struct DecodeError {
    pub character: char,
    pub position: usize,
}

/// Serialize a JSON value with serde_json's default formatting and encode
/// the resulting UTF-8 bytes as base58.
pub fn encode_value(value: &Value) -> serde_json::Result<String> {
    let text = serde_json::to_string(value)?;
    Ok(encode(text.as_bytes()))
}

/// Encode a byte sequence as base58.
///
/// The bytes are read as one big-endian base-256 unsigned integer and
/// converted by repeated division by 58. Each leading 0x00 byte of the
/// input contributes one extra `'1'` in front of the digits.
pub fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();

    // Long division in base 58; digits accumulate least-significant first.
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 138 / 100 + 1);
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    for _ in 0..zeros {
        out.push(ALPHABET[0] as char);
    }
    for &digit in digits.iter().rev() {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

/// Decode a base58 string back to the original byte sequence.
///
/// Exact inverse of [`encode`], including the leading-`'1'` convention.
/// Only needed for round-trip verification; nothing in the request path
/// decodes.
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    let zeros = input.bytes().take_while(|&b| b == ALPHABET[0]).count();

    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for (position, character) in input.char_indices().skip(zeros) {
        let digit = ALPHABET
            .iter()
            .position(|&a| a as char == character)
            .ok_or(DecodeError {
                character,
                position,
            })? as u32;

        let mut carry = digit;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}
