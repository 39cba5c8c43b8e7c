//! Record-level services: fingerprint derivation and presort staging.

mod hasher;
mod key_deriver;
mod presort;

pub use hasher::{CONTENT_HASH_LEN, ContentHasher};
pub use key_deriver::{HOST_PREFIX_LEN, KeyDeriver, MAX_HOST_LEN, extract_host};
pub use presort::{OfferResult, PresortBuffer, PresortEntry};
