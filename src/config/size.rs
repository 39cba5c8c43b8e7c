//! Human-readable byte sizes.

use crate::{Error, Result};
use serde::Deserialize;

/// Multiplier suffixes, each a further factor of 1024.
const SUFFIXES: [char; 7] = ['b', 'k', 'm', 'g', 't', 'p', 'e'];

/// Parses a byte size such as `4096`, `64k`, `16g` or `1GB`.
///
/// The number accepts decimal or `0x` hexadecimal. An optional suffix from
/// `b, k, m, g, t, p, e` (case-insensitive) multiplies by a power of 1024 and
/// may itself be followed by a single `b`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unknown suffixes, trailing garbage or
/// values that overflow `u64`.
///
/// # Examples
///
/// ```rust
/// use uq::config::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("64k").unwrap(), 64 * 1024);
/// assert_eq!(parse_size("1GB").unwrap(), 1 << 30);
/// assert!(parse_size("12q").is_err());
/// ```
pub fn parse_size(input: &str) -> Result<u64> {
    let text = input.trim();
    let invalid = || Error::InvalidInput(format!("invalid size '{input}'"));

    let (digits, suffix) = if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        let end = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        let value = u64::from_str_radix(&hex[..end], 16).map_err(|_| invalid())?;
        (value, &hex[end..])
    } else {
        let end = text
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(text.len());
        let value = text[..end].parse::<u64>().map_err(|_| invalid())?;
        (value, &text[end..])
    };

    let mut chars = suffix.chars().map(|c| c.to_ascii_lowercase());
    let Some(unit) = chars.next() else {
        return Ok(digits);
    };
    let shift = SUFFIXES
        .iter()
        .position(|&s| s == unit)
        .ok_or_else(invalid)?;
    match (chars.next(), chars.next()) {
        (None, _) => {},
        (Some('b'), None) if unit != 'b' => {},
        _ => return Err(invalid()),
    }

    digits.checked_mul(1u64 << (10 * shift)).ok_or_else(invalid)
}

/// A size given either as a plain integer or as a suffixed string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    /// Raw byte count.
    Bytes(u64),
    /// String accepted by [`parse_size`].
    Text(String),
}

impl SizeValue {
    /// Resolves the value to a byte count.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a string value does not parse.
    pub fn bytes(&self) -> Result<u64> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Text(s) => parse_size(s),
        }
    }
}

/// Converts a byte count to `usize`, rejecting values the platform cannot hold.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the value exceeds `usize::MAX`.
pub fn size_to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::InvalidInput(format!("{what} {value} is too large for this platform")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("0", 0)]
    #[test_case("4096", 4096)]
    #[test_case("0x100", 256)]
    #[test_case("10b", 10)]
    #[test_case("64k", 65_536)]
    #[test_case("64K", 65_536)]
    #[test_case("3m", 3 * 1024 * 1024)]
    #[test_case("16g", 16 << 30)]
    #[test_case("16GB", 16 << 30)]
    #[test_case("2t", 2 << 40)]
    #[test_case(" 8kb ", 8192)]
    fn test_parse_size_accepts(input: &str, expected: u64) {
        assert_eq!(parse_size(input).unwrap(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("k" ; "no digits")]
    #[test_case("12q" ; "unknown suffix")]
    #[test_case("12kx" ; "garbage after suffix")]
    #[test_case("12bb" ; "double b")]
    #[test_case("12kbb" ; "trailing extra")]
    #[test_case("99999999999e" ; "overflow")]
    fn test_parse_size_rejects(input: &str) {
        assert!(matches!(parse_size(input), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_size_value_variants() {
        assert_eq!(SizeValue::Bytes(12).bytes().unwrap(), 12);
        assert_eq!(SizeValue::Text("1k".to_string()).bytes().unwrap(), 1024);
    }
}
