//! # uq
//!
//! Streaming deduplication against a persistent index.
//!
//! `uq` reads delimiter-terminated records, derives a fixed-width key
//! fingerprint for each one and passes through only the records whose key has
//! never been seen before. "Seen" is tracked in a durable index that survives
//! restarts and may be far larger than memory, so the same index can be reused
//! across many invocations over multi-terabyte streams.
//!
//! ## Features
//!
//! - Two interchangeable index backends behind [`PersistentSet`]: a custom
//!   block-organized B-tree file and an embedded `SQLite` database
//! - URL mode that clusters keys of the same host next to each other
//! - Optional presort buffer that reorders writes and drops bursts of
//!   duplicates in memory
//! - Batched, crash-consistent commits
//! - Check (read-only), invert and `<line> <0|1>` diagnostic modes
//!
//! ## Example
//!
//! ```rust,ignore
//! use uq::{CancellationToken, IngestionPipeline, LineSource, UqConfig, storage};
//!
//! let config = UqConfig::for_path("seen.uq");
//! config.validate()?;
//! let set = storage::open_persistent_set(&config.storage, config.open_mode())?;
//! let pipeline = IngestionPipeline::new(&config, set, std::io::stdout().lock())?;
//! let token = CancellationToken::new();
//! let mut source = LineSource::buffered(std::io::stdin(), &config.pipeline, token);
//! let stats = pipeline.run(&mut source)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

// Module declarations
pub mod cli;
pub mod config;
pub mod input;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use config::{
    BackendKind, DerivationConfig, OpenMode, PipelineConfig, StorageConfig, UqConfig,
};
pub use input::{CancellationToken, FieldExtractor, LineSource, SignalCounter};
pub use models::{Fingerprint, IndexKey, KeySize, OutputFormat, RunMode};
pub use pipeline::{IngestionPipeline, PipelineStats, run_pipeline};
pub use services::{KeyDeriver, OfferResult, PresortBuffer, PresortEntry};
pub use storage::{PersistentSet, open_persistent_set};

/// Error type for uq operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Bad or missing options; rejected before any index I/O |
/// | `IndexNotFound` | Read-only or load open of a path that does not exist |
/// | `IndexCorrupt` | Bad magic, truncated file, not a database, hot journal on read-only open |
/// | `IncompatibleParameters` | Key width or block size differs from the stored index |
/// | `ReadOnly` | A mutation on an index opened in check mode |
/// | `OperationFailed` | Input/output stream I/O, file I/O, `SQLite` calls |
/// | `AtLine` | Any failure while resolving a specific record |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Key size is not one of 1, 2, 4, 8, 16
    /// - Block size is too small for the key width
    /// - Presort is combined with check mode
    /// - A size option has an unknown suffix
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The index does not exist at the given path.
    #[error("index not found: {}", path.display())]
    IndexNotFound {
        /// Location that was probed.
        path: PathBuf,
    },

    /// The index exists but cannot be interpreted.
    #[error("index {} is corrupt: {reason}", path.display())]
    IndexCorrupt {
        /// Location of the index.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The index was created with parameters that differ from the requested ones.
    #[error(
        "index {} has {parameter}={found}, but {expected} was requested",
        path.display()
    )]
    IncompatibleParameters {
        /// Location of the index.
        path: PathBuf,
        /// Name of the mismatching parameter.
        parameter: &'static str,
        /// Value requested by the caller.
        expected: String,
        /// Value stored in the index.
        found: String,
    },

    /// A mutating call was made on a read-only index.
    #[error("index is read-only: {0}")]
    ReadOnly(String),

    /// An operation failed.
    ///
    /// Raised when:
    /// - Reading the input stream or writing the output stream fails
    /// - File reads, writes or fsyncs of the B-tree file fail
    /// - `SQLite` statements fail
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A failure while resolving the record at `line`.
    ///
    /// The open batch has already been rolled back when this is returned;
    /// earlier batches stay durable.
    #[error("line {line}: {source}")]
    AtLine {
        /// 1-based line number of the failing record.
        line: u64,
        /// The underlying error.
        #[source]
        source: Box<Self>,
    },
}

impl Error {
    /// Shorthand for an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Returns true for errors raised while opening an index.
    #[must_use]
    pub const fn is_open_error(&self) -> bool {
        matches!(
            self,
            Self::IndexNotFound { .. }
                | Self::IndexCorrupt { .. }
                | Self::IncompatibleParameters { .. }
        )
    }
}

/// Result type alias for uq operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");

        let err = Error::IncompatibleParameters {
            path: PathBuf::from("/tmp/x.uq"),
            parameter: "key_width",
            expected: "16".to_string(),
            found: "8".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "index /tmp/x.uq has key_width=8, but 16 was requested"
        );
    }

    #[test]
    fn test_at_line_wraps_source() {
        let err = Error::AtLine {
            line: 42,
            source: Box::new(Error::operation("insert", "disk full")),
        };
        assert_eq!(
            err.to_string(),
            "line 42: operation 'insert' failed: disk full"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_open_error() {
        assert!(
            Error::IndexNotFound {
                path: PathBuf::from("a")
            }
            .is_open_error()
        );
        assert!(!Error::InvalidInput("x".to_string()).is_open_error());
    }
}
