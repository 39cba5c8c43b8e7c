//! Fingerprints and index keys.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Width of a full fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 16;

/// A fixed 16-byte key fingerprint derived from a record.
///
/// Byte-prefix ordering of fingerprints is what the index and the presort
/// buffer sort by; in URL mode the first three bytes come from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Wraps raw fingerprint bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Truncates the fingerprint to the index key width.
    #[must_use]
    pub fn index_key(&self, size: KeySize) -> IndexKey {
        IndexKey::from_slice(&self.0[..size.bytes()])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Width of the keys stored in the persistent index.
///
/// Smaller keys make a more compact index at the cost of a higher collision
/// probability. The width is fixed when an index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum KeySize {
    /// 1 byte.
    One,
    /// 2 bytes.
    Two,
    /// 4 bytes.
    Four,
    /// 8 bytes (default).
    #[default]
    Eight,
    /// 16 bytes, the full fingerprint.
    Sixteen,
}

impl KeySize {
    /// Number of key bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    /// Maps a byte width back to a key size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for widths other than 1, 2, 4, 8 or 16.
    pub fn from_bytes(width: usize) -> Result<Self> {
        match width {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            other => Err(Error::InvalidInput(format!(
                "key size must be in (1, 2, 4, 8, 16), got {other}"
            ))),
        }
    }
}

impl FromStr for KeySize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let width = s
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::InvalidInput(format!("key size must be a number, got '{s}'")))?;
        Self::from_bytes(width)
    }
}

impl fmt::Display for KeySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// The leading `keySize` bytes of a fingerprint, as stored in the index.
///
/// Ordering compares the key bytes lexicographically; keys of one index always
/// share the same width.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexKey {
    bytes: [u8; FINGERPRINT_LEN],
    len: u8,
}

impl IndexKey {
    /// Builds a key from at most 16 bytes; longer input is truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // len <= 16
    pub fn from_slice(bytes: &[u8]) -> Self {
        let len = bytes.len().min(FINGERPRINT_LEN);
        let mut buf = [0u8; FINGERPRINT_LEN];
        buf[..len].copy_from_slice(&bytes[..len]);
        Self {
            bytes: buf,
            len: len as u8,
        }
    }

    /// The key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    /// Key width in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true for the zero-width key.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Leading `width` bytes of the key (the whole key if it is shorter).
    #[must_use]
    pub fn prefix(&self, width: usize) -> &[u8] {
        &self.bytes[..width.min(self.len())]
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexKey({})", hex::encode(self.as_bytes()))
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.as_bytes()))
    }
}
