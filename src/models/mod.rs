//! Data models for uq.
//!
//! This module contains the fixed-width key types and the small enums that
//! describe how a run resolves and emits records.

mod key;
mod mode;

pub use key::{FINGERPRINT_LEN, Fingerprint, IndexKey, KeySize};
pub use mode::{OutputFormat, RunMode};
