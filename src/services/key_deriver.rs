//! Fingerprint derivation.

use super::hasher::{CONTENT_HASH_LEN, ContentHasher};
use crate::models::{FINGERPRINT_LEN, Fingerprint};

/// Bytes of the host hash that lead a URL-mode fingerprint.
pub const HOST_PREFIX_LEN: usize = 3;

/// Longest host collected by [`extract_host`].
pub const MAX_HOST_LEN: usize = 127;

/// Returns the host part of a `scheme://host/path` string.
///
/// Scans for the second `/` and collects bytes up to the next `/`, the end of
/// input or [`MAX_HOST_LEN`] bytes. Input with fewer than two `/` yields an
/// empty host.
///
/// # Examples
///
/// ```rust
/// use uq::services::extract_host;
///
/// assert_eq!(extract_host(b"http://a.com/p/q"), b"a.com");
/// assert_eq!(extract_host(b"https://b.org"), b"b.org");
/// assert_eq!(extract_host(b"no slashes"), b"");
/// ```
#[must_use]
pub fn extract_host(url: &[u8]) -> &[u8] {
    let mut slashes = 0;
    let mut start = None;
    for (i, &b) in url.iter().enumerate() {
        if let Some(from) = start {
            if b == b'/' {
                return &url[from..i];
            }
            if i + 1 - from >= MAX_HOST_LEN {
                return &url[from..=i];
            }
            continue;
        }
        if b == b'/' {
            slashes += 1;
            if slashes == 2 {
                start = Some(i + 1);
            }
        }
    }
    start.map_or(&[], |from| &url[from.min(url.len())..])
}

/// Turns key fields into fingerprints.
///
/// Stateless and deterministic: the same bytes produce the same fingerprint
/// across calls and across processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyDeriver {
    url_mode: bool,
}

impl KeyDeriver {
    /// Creates a deriver; `url_mode` enables the host-clustered layout.
    #[must_use]
    pub const fn new(url_mode: bool) -> Self {
        Self { url_mode }
    }

    /// Returns true in URL mode.
    #[must_use]
    pub const fn url_mode(&self) -> bool {
        self.url_mode
    }

    /// Derives the fingerprint of a key field.
    ///
    /// In plain mode this is the content hash of `field`. In URL mode the
    /// first [`HOST_PREFIX_LEN`] bytes are taken from the hash of the host and
    /// the remaining bytes from the leading bytes of the content hash, so keys
    /// of one host sort next to each other.
    #[must_use]
    pub fn fingerprint(&self, field: &[u8]) -> Fingerprint {
        let content = ContentHasher::digest(field);
        if !self.url_mode {
            return Fingerprint::from_bytes(content);
        }

        let host = ContentHasher::digest(extract_host(field));
        let mut window = [0u8; HOST_PREFIX_LEN + CONTENT_HASH_LEN];
        window[..CONTENT_HASH_LEN].copy_from_slice(&host);
        window[HOST_PREFIX_LEN..].copy_from_slice(&content);

        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&window[..FINGERPRINT_LEN]);
        Fingerprint::from_bytes(bytes)
    }
}
