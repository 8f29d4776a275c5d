//! Formatting and conversion helpers for byte payloads.
//!
//! Binary writes and flushed chunks are rendered as hex in log lines, and
//! the CLI accepts hex on the command line.

use crate::error::{Error, Result};

/// Render bytes as upper-case hex with no separators.
///
/// # Example
///
/// ```
/// use cmdlink_core::format_hex;
///
/// assert_eq!(format_hex(&[0x01, 0xAB, 0xFF]), "01ABFF");
/// assert_eq!(format_hex(&[]), "");
/// ```
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parse a hex string into bytes.
///
/// ASCII whitespace and an optional `0x` prefix are ignored, so
/// `"0x01 ab ff"` and `"01ABFF"` both parse to `[0x01, 0xAB, 0xFF]`.
///
/// # Example
///
/// ```
/// use cmdlink_core::parse_hex;
///
/// assert_eq!(parse_hex("0x01 ab ff").unwrap(), vec![0x01, 0xAB, 0xFF]);
/// assert!(parse_hex("abc").is_err());
/// ```
pub fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let trimmed = s.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let compact: String = trimmed.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(&compact)
        .map_err(|e| Error::InvalidParameter(format!("invalid hex '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_hex_upper_case() {
        assert_eq!(format_hex(&[0xde, 0xad, 0xbe, 0xef]), "DEADBEEF");
    }

    #[test]
    fn parse_hex_with_spaces() {
        assert_eq!(parse_hex("fe fe 94 e0").unwrap(), vec![0xFE, 0xFE, 0x94, 0xE0]);
    }

    #[test]
    fn parse_hex_empty() {
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn parse_hex_rejects_non_hex() {
        let err = parse_hex("zz").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }
}
