//! Persistent set trait.
//!
//! The persistent set is the durable, restart-surviving record of every
//! [`IndexKey`] seen so far. Both backends store fixed-width keys and nothing
//! else; the key width and the page/block size are fixed when the index is
//! created.
//!
//! # Available Implementations
//!
//! | Backend | Storage | Durability unit |
//! |---------|---------|-----------------|
//! | `BtreeSet` | Single block-organized file | One batch, via rollback journal |
//! | `SqliteSet` | Embedded `SQLite` database | One batch, one transaction |
//!
//! # Batches
//!
//! Inserts are grouped by the caller into batches. After `commit_batch`
//! returns, every insert of the batch is durable; after `abort_batch` (or a
//! crash before commit) none of them are. Committed batches are never
//! affected by a later failure.
//!
//! Inserting outside a batch is allowed; the backend then opens one
//! implicitly and it is committed by the next `commit_batch`.

use crate::Result;
use crate::models::{IndexKey, KeySize};

/// Durable set of fixed-width index keys.
///
/// # Implementor Notes
///
/// - Methods take `&mut self`: the pipeline drives one set from one thread
/// - `insert_if_absent` must be idempotent within and across batches
/// - `contains` must never mutate the index
/// - Read-only sets return [`crate::Error::ReadOnly`] from every mutation
pub trait PersistentSet: Send {
    /// Backend name used in logs and metric labels.
    fn backend_name(&self) -> &'static str;

    /// Width of the stored keys.
    fn key_size(&self) -> KeySize;

    /// Inserts `key` unless it is already present.
    ///
    /// Returns `true` if the key was newly inserted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the set is read-only.
    fn insert_if_absent(&mut self, key: &IndexKey) -> Result<bool>;

    /// Returns `true` if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn contains(&mut self, key: &IndexKey) -> Result<bool>;

    /// Starts a batch. A no-op if one is already open.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the set is read-only.
    fn begin_batch(&mut self) -> Result<()>;

    /// Makes every insert since the last commit durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable. The batch is
    /// then rolled back.
    fn commit_batch(&mut self) -> Result<()>;

    /// Discards every insert since the last commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to roll back.
    fn abort_batch(&mut self) -> Result<()>;

    /// Number of keys in the set, including uncommitted inserts.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn len(&mut self) -> Result<u64>;

    /// Returns `true` if the set holds no keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
