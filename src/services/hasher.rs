//! Content hashing for key fingerprints.
//!
//! The fingerprint hash is treated as an opaque 128-bit function of the
//! input bytes: SHA-256 truncated to its first 16 bytes.

use sha2::{Digest, Sha256};

/// Width of a content hash in bytes.
pub const CONTENT_HASH_LEN: usize = 16;

/// Content hasher for fingerprints.
///
/// # Example
///
/// ```rust
/// use uq::services::ContentHasher;
///
/// let a = ContentHasher::digest(b"http://example.com/");
/// let b = ContentHasher::digest(b"http://example.com/");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 16);
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the 128-bit content hash of `bytes`.
    #[must_use]
    pub fn digest(bytes: &[u8]) -> [u8; CONTENT_HASH_LEN] {
        let full = Sha256::digest(bytes);
        let mut out = [0u8; CONTENT_HASH_LEN];
        out.copy_from_slice(&full[..CONTENT_HASH_LEN]);
        out
    }

    /// Hex rendering of [`digest`](Self::digest), for logs.
    #[must_use]
    pub fn digest_hex(bytes: &[u8]) -> String {
        hex::encode(Self::digest(bytes))
    }
}
