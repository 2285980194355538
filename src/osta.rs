//! OSTA Compressed Unicode aka dstring handling.
//!
//! see UncompressUnicode / CompressUnicode
//! http://www.osta.org/specs/pdf/udf260.pdf#page=116

use log::error;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DstringError {
    #[error("encoded string does not fit into a {0} byte field")]
    TooLong(usize),
    #[error("byte-order mark is not allowed at a character boundary")]
    IllegalBom,
    #[error("unknown compression identifier {0}")]
    UnknownCompression(u8),
    #[error("dstring length byte {length} is invalid for a {field} byte field")]
    InvalidLength { length: u8, field: usize },
}

/// Decode a sequence of dchars. Byte 0 is the compression identifier:
/// 8 (Latin1-like single byte) or 16 (big-endian UCS-2); 0 means empty.
/// Undecodable input decodes lossily to the empty string with a logged error.
pub fn decode(bytes: &[u8]) -> String {
    if bytes.is_empty() || bytes[0] == 0 {
        return String::new();
    }

    let mut result = String::new();
    let compression_id = bytes[0];
    let mut i = 1; // Skip compression ID byte

    match compression_id {
        8 => {
            while i < bytes.len() {
                if bytes[i] == 0 {
                    break;
                }
                result.push(bytes[i] as char);
                i += 1;
            }
        }
        16 => {
            while i + 1 < bytes.len() {
                let unicode = ((bytes[i] as u16) << 8) | (bytes[i + 1] as u16);
                if unicode == 0 {
                    break;
                }
                if let Some(c) = char::from_u32(unicode as u32) {
                    result.push(c);
                }
                i += 2;
            }
        }
        _ => {
            error!(
                "could not decode dstring: unknown compression ID: {}",
                compression_id
            );
        }
    }

    result
}

/// Decode a fixed-length dstring field. The final byte carries the used
/// length in bytes including the compression identifier.
pub fn decode_dstring(field: &[u8]) -> String {
    if field.is_empty() {
        return String::new();
    }
    let used = field[field.len() - 1] as usize;
    if used == 0 {
        return String::new();
    }
    if used >= field.len() {
        error!(
            "dstring length byte {} exceeds field of {} bytes",
            used,
            field.len()
        );
        return String::new();
    }
    decode(&field[..used])
}

/// Encode a host string as dchars. Tries 8-bit compression first and
/// restarts with 16-bit on the first code point above 0xFF.
pub fn encode(s: &str) -> Result<Vec<u8>, DstringError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }

    let needs_16bit = s.chars().any(|c| c as u32 > 0xFF);
    let compression_id: u8 = if needs_16bit { 16 } else { 8 };

    let mut result = Vec::new();
    result.push(compression_id);

    match compression_id {
        8 => {
            for c in s.chars() {
                result.push(c as u8);
            }
        }
        16 => {
            for c in s.chars() {
                let unicode = c as u32;
                // Characters land on character boundaries, where a
                // byte-order mark is illegal. ECMA-167 1/7.2.2.
                if unicode == 0xFEFF || unicode == 0xFFFE {
                    return Err(DstringError::IllegalBom);
                }
                if unicode > 0xFFFF {
                    // outside UCS-2
                    return Err(DstringError::TooLong(0));
                }
                result.push((unicode >> 8) as u8);
                result.push((unicode & 0xFF) as u8);
            }
        }
        _ => unreachable!(),
    }

    Ok(result)
}

/// Encode a host string into a fixed-length dstring field: dchars padded
/// with zeros, the used length stored in the final byte.
pub fn encode_dstring(s: &str, field_len: usize) -> Result<Vec<u8>, DstringError> {
    let chars = encode(s)?;
    if chars.len() + 1 > field_len {
        return Err(DstringError::TooLong(field_len));
    }
    let mut field = vec![0u8; field_len];
    field[..chars.len()].copy_from_slice(&chars);
    field[field_len - 1] = chars.len() as u8;
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_osta_unicode() {
        let input = "Hello, 世界!";
        let encoded = encode(input).unwrap();
        assert_eq!(encoded[0], 16);
        let decoded = decode(&encoded);
        assert_eq!(input, decoded);
    }

    #[test]
    fn test_osta_ascii() {
        let input = "Hello, World!";
        let encoded = encode(input).unwrap();
        assert_eq!(encoded[0], 8); // Should use 8-bit compression
        let decoded = decode(&encoded);
        assert_eq!(input, decoded);
    }

    #[test]
    fn test_osta_empty() {
        let encoded = encode("").unwrap();
        assert!(encoded.is_empty());
        assert_eq!(decode(&encoded), "");
    }

    #[test]
    fn test_dstring_roundtrip() {
        let field = encode_dstring("LinuxUDF", 32).unwrap();
        assert_eq!(field.len(), 32);
        assert_eq!(field[31], 9); // compression byte + 8 characters
        assert_eq!(decode_dstring(&field), "LinuxUDF");

        let reencoded = encode_dstring(&decode_dstring(&field), 32).unwrap();
        assert_eq!(field, reencoded);
    }

    #[test]
    fn test_dstring_roundtrip_16bit() {
        let field = encode_dstring("disk-диск", 64).unwrap();
        assert_eq!(field[0], 16);
        assert_eq!(field[63], 1 + 2 * 9);
        assert_eq!(decode_dstring(&field), "disk-диск");
        let reencoded = encode_dstring(&decode_dstring(&field), 64).unwrap();
        assert_eq!(field, reencoded);
    }

    #[test]
    fn test_too_long_rejected() {
        // 31 eight-bit characters need 32 bytes of dchars plus a length byte
        let input: String = std::iter::repeat('x').take(31).collect();
        assert_eq!(
            encode_dstring(&input, 32),
            Err(DstringError::TooLong(32))
        );
        assert!(encode_dstring(&input, 33).is_ok());
    }

    #[test]
    fn test_bom_rejected_at_character_boundary() {
        assert_eq!(encode("disk\u{FEFF}name"), Err(DstringError::IllegalBom));
    }

    #[test]
    fn test_invalid_length_byte_decodes_empty() {
        let mut field = encode_dstring("abc", 16).unwrap();
        field[15] = 16; // length byte must be < field length
        assert_eq!(decode_dstring(&field), "");
    }
}
