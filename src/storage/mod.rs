//! Persistent index storage.
//!
//! Two backends implement [`PersistentSet`]:
//! - **btree**: a custom block-organized B-tree in a single file
//! - **sqlite**: an embedded `SQLite` database
//!
//! The pipeline only sees `Box<dyn PersistentSet>`; the backend is chosen
//! once at startup by [`open_persistent_set`].

// Allow significant_drop_tightening - statements and guards are short-lived.
#![allow(clippy::significant_drop_tightening)]
// Allow cast_possible_truncation for block offsets, which are bounded by the file size.
#![allow(clippy::cast_possible_truncation)]

pub mod btree;
mod instrument;
pub mod sqlite;
pub mod traits;

pub use btree::BtreeSet;
pub use sqlite::SqliteSet;
pub use traits::PersistentSet;

use crate::Result;
use crate::config::{BackendKind, OpenMode, StorageConfig};
use std::time::Instant;

/// Opens the configured backend.
///
/// # Errors
///
/// Returns the backend's open error: [`crate::Error::IndexNotFound`],
/// [`crate::Error::IndexCorrupt`], [`crate::Error::IncompatibleParameters`],
/// or an I/O failure. Nothing is created when a load fails.
pub fn open_persistent_set(
    config: &StorageConfig,
    mode: OpenMode,
) -> Result<Box<dyn PersistentSet>> {
    let start = Instant::now();
    let backend = config.backend.as_str();
    let result: Result<Box<dyn PersistentSet>> = match config.backend {
        BackendKind::Btree => BtreeSet::open(config, mode).map(|set| Box::new(set) as _),
        BackendKind::Sqlite => SqliteSet::open(config, mode).map(|set| Box::new(set) as _),
    };
    instrument::record_operation_metrics(backend, "open", start, instrument::status_of(&result));

    match &result {
        Ok(_) => tracing::debug!(
            backend,
            ?mode,
            path = %config.path.display(),
            elapsed_ms = start.elapsed().as_millis(),
            "Opened index"
        ),
        Err(err) => tracing::debug!(backend, ?mode, error = %err, "Index open failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IndexKey, KeySize};
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case(BackendKind::Btree; "btree")]
    #[test_case(BackendKind::Sqlite; "sqlite")]
    fn test_factory_opens_backend(backend: BackendKind) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path().join("idx")).with_backend(backend);

        let mut set = open_persistent_set(&config, OpenMode::Create).unwrap();
        assert_eq!(set.backend_name(), backend.as_str());
        assert_eq!(set.key_size(), KeySize::Eight);

        let key = IndexKey::from_slice(b"abcdefgh");
        set.begin_batch().unwrap();
        assert!(set.insert_if_absent(&key).unwrap());
        set.commit_batch().unwrap();
        drop(set);

        let mut set = open_persistent_set(&config, OpenMode::ReadOnly).unwrap();
        assert!(set.contains(&key).unwrap());
        assert!(!set.is_empty().unwrap());
    }

    #[test_case(BackendKind::Btree; "btree")]
    #[test_case(BackendKind::Sqlite; "sqlite")]
    fn test_load_missing_creates_nothing(backend: BackendKind) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::new(dir.path().join("absent")).with_backend(backend);
        let err = open_persistent_set(&config, OpenMode::Load).err().unwrap();
        assert!(err.is_open_error());
        assert!(!config.path.exists());
    }
}
