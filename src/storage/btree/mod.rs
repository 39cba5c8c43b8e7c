//! Custom block-organized B-tree index file.
//!
//! The whole index is one file of fixed-size blocks. Block 0 holds the
//! [`Header`]; every other block is a tree node. The tree is a classic B-tree
//! over keys only: interior nodes hold keys too, insertion descends once and
//! splits overflowing nodes on the way back up, and a root split grows the
//! tree by one level.
//!
//! Modified blocks are kept in memory until [`PersistentSet::commit_batch`],
//! which writes them through a rollback journal. See [`pager`] for the
//! commit protocol.

mod header;
mod node;
mod pager;

pub use header::{FORMAT_VERSION, HEADER_LEN, Header, MAGIC};
pub use node::{NODE_HEADER_LEN, node_capacity};
pub use pager::journal_path;

use crate::config::{OpenMode, StorageConfig};
use crate::models::{IndexKey, KeySize};
use crate::storage::instrument::{record_operation_metrics, status_of};
use crate::storage::traits::PersistentSet;
use crate::{Error, Result};
use node::Node;
use pager::Pager;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

const BACKEND: &str = "btree";

/// Smallest interior node fan-out that keeps splits well defined.
const MIN_INTERIOR_KEYS: usize = 3;

/// Outcome of inserting into a subtree.
enum Insertion {
    Present,
    Inserted,
    /// The subtree root split; `median` moves up with `right` as its right child.
    Split { median: IndexKey, right: u64 },
}

/// [`PersistentSet`] over a single B-tree file.
pub struct BtreeSet {
    path: PathBuf,
    header: Header,
    committed: Header,
    pager: Pager,
    leaf_max: usize,
    interior_max: usize,
    read_only: bool,
}

impl BtreeSet {
    /// Opens or creates the index described by `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::IndexNotFound`] when loading a path that does not exist
    /// - [`Error::IndexCorrupt`] for a bad header, a truncated file or a hot
    ///   journal on a read-only open
    /// - [`Error::IncompatibleParameters`] when an explicit key width or block
    ///   size differs from the stored one
    pub fn open(config: &StorageConfig, mode: OpenMode) -> Result<Self> {
        match mode {
            OpenMode::Create => Self::create(config),
            OpenMode::Load => Self::load(config, false),
            OpenMode::ReadOnly => Self::load(config, true),
        }
    }

    fn create(config: &StorageConfig) -> Result<Self> {
        let path = config.path.as_path();
        let header = Header::new(config.creation_key_size(), config.creation_block_size());
        let (leaf_max, interior_max) = capacities(&header);
        if interior_max < MIN_INTERIOR_KEYS {
            return Err(Error::InvalidInput(format!(
                "block size {} is too small for {}-byte keys",
                header.block_size, header.key_size
            )));
        }

        remove_if_exists(&journal_path(path))?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::operation("btree_create", format!("{}: {e}", path.display())))?;

        let mut image = vec![0u8; header.block_len() * 2];
        let (head, root) = image.split_at_mut(header.block_len());
        header.encode(head);
        Node::leaf().encode(root, header.key_size.bytes());
        io::Write::write_all(&mut file, &image)
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::operation("btree_create", e))?;

        tracing::info!(
            path = %path.display(),
            block_size = header.block_size,
            key_width = header.key_size.bytes(),
            "Created b-tree index"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            committed: header,
            pager: Pager::new(path, file, &header, config.cache_size),
            leaf_max,
            interior_max,
            read_only: false,
        })
    }

    fn load(config: &StorageConfig, read_only: bool) -> Result<Self> {
        let path = config.path.as_path();
        if !path.exists() {
            return Err(Error::IndexNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .map_err(|e| Error::operation("btree_open", format!("{}: {e}", path.display())))?;

        if journal_path(path).exists() {
            if read_only {
                return Err(corrupt(
                    path,
                    "interrupted commit pending; open read-write once to recover".to_string(),
                ));
            }
            pager::recover_journal(path, &mut file)?;
        }

        let header = read_header(path, &mut file)?;
        check_parameters(path, config, &header)?;

        let (leaf_max, interior_max) = capacities(&header);
        if interior_max < MIN_INTERIOR_KEYS {
            return Err(corrupt(
                path,
                format!(
                    "block size {} cannot hold {}-byte keys",
                    header.block_size, header.key_size
                ),
            ));
        }

        tracing::info!(
            path = %path.display(),
            block_size = header.block_size,
            key_width = header.key_size.bytes(),
            entries = header.entries,
            read_only,
            "Loaded b-tree index"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header,
            committed: header,
            pager: Pager::new(path, file, &header, config.cache_size),
            leaf_max,
            interior_max,
            read_only,
        })
    }

    /// Block size of the open index.
    #[must_use]
    pub const fn block_size(&self) -> u32 {
        self.header.block_size
    }

    fn check_key(&self, key: &IndexKey) -> Result<()> {
        if key.len() == self.header.key_size.bytes() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{}-byte key offered to an index of {}-byte keys",
                key.len(),
                self.header.key_size
            )))
        }
    }

    fn insert_into(&mut self, id: u64, key: &IndexKey) -> Result<Insertion> {
        let (pos, child) = {
            let node = self.pager.node(id)?;
            match node.search(key) {
                Ok(_) => return Ok(Insertion::Present),
                Err(pos) => (pos, node.child(pos)),
            }
        };

        if let Some(child) = child {
            match self.insert_into(child, key)? {
                Insertion::Split { median, right } => {
                    let node = self.pager.node_mut(id)?;
                    node.keys.insert(pos, median);
                    node.children.insert(pos + 1, right);
                },
                done => return Ok(done),
            }
        } else {
            self.pager.node_mut(id)?.keys.insert(pos, *key);
        }

        let (leaf_max, interior_max) = (self.leaf_max, self.interior_max);
        let node = self.pager.node_mut(id)?;
        let max = if node.is_leaf() { leaf_max } else { interior_max };
        if node.keys.len() <= max {
            return Ok(Insertion::Inserted);
        }

        let (median, right) = node.split();
        let right = self.pager.allocate(right, &mut self.header);
        Ok(Insertion::Split { median, right })
    }

    fn reset_to_committed(&mut self) {
        self.pager.discard();
        self.header = self.committed;
    }
}

impl PersistentSet for BtreeSet {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn key_size(&self) -> KeySize {
        self.header.key_size
    }

    fn insert_if_absent(&mut self, key: &IndexKey) -> Result<bool> {
        if self.read_only {
            return Err(Error::ReadOnly(format!(
                "insert into {}",
                self.path.display()
            )));
        }
        self.check_key(key)?;

        let root = self.header.root;
        match self.insert_into(root, key)? {
            Insertion::Present => Ok(false),
            Insertion::Inserted => {
                self.header.entries += 1;
                Ok(true)
            },
            Insertion::Split { median, right } => {
                let new_root = Node {
                    keys: vec![median],
                    children: vec![root, right],
                };
                let new_root = self.pager.allocate(new_root, &mut self.header);
                self.header.root = new_root;
                self.header.entries += 1;
                tracing::debug!(root = self.header.root, "B-tree grew a level");
                Ok(true)
            },
        }
    }

    fn contains(&mut self, key: &IndexKey) -> Result<bool> {
        self.check_key(key)?;
        let mut id = self.header.root;
        loop {
            let node = self.pager.node(id)?;
            match node.search(key) {
                Ok(_) => return Ok(true),
                Err(pos) => match node.child(pos) {
                    Some(child) => id = child,
                    None => return Ok(false),
                },
            }
        }
    }

    fn begin_batch(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(format!(
                "begin batch on {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(format!(
                "commit on {}",
                self.path.display()
            )));
        }
        if self.pager.dirty_blocks() == 0 && self.header == self.committed {
            return Ok(());
        }

        let start = Instant::now();
        let result = self.pager.commit(&self.header);
        record_operation_metrics(BACKEND, "commit", start, status_of(&result));

        match result {
            Ok(()) => {
                self.committed = self.header;
                Ok(())
            },
            Err(err) => {
                tracing::error!(error = %err, "B-tree commit failed, rolling back");
                self.header = self.committed;
                if let Err(rollback) = self.pager.roll_back_commit() {
                    tracing::error!(error = %rollback, "B-tree rollback failed");
                }
                Err(err)
            },
        }
    }

    fn abort_batch(&mut self) -> Result<()> {
        let start = Instant::now();
        self.reset_to_committed();
        record_operation_metrics(BACKEND, "abort", start, "success");
        Ok(())
    }

    fn len(&mut self) -> Result<u64> {
        Ok(self.header.entries)
    }
}

fn capacities(header: &Header) -> (usize, usize) {
    node_capacity(header.block_len(), header.key_size.bytes())
}

fn corrupt(path: &Path, reason: String) -> Error {
    Error::IndexCorrupt {
        path: path.to_path_buf(),
        reason,
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::operation("btree_remove", format!("{}: {e}", path.display()))),
    }
}

fn read_header(path: &Path, file: &mut File) -> Result<Header> {
    let len = file
        .metadata()
        .map_err(|e| Error::operation("btree_open", e))?
        .len();

    let mut bytes = Vec::with_capacity(HEADER_LEN);
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::operation("btree_read_header", e))?;
    file.by_ref()
        .take(HEADER_LEN as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::operation("btree_read_header", e))?;
    let header = Header::decode(&bytes).map_err(|reason| corrupt(path, reason))?;

    if len < header.file_len() {
        return Err(corrupt(
            path,
            format!(
                "truncated: {len} bytes, but the header declares {} blocks of {}",
                header.block_count, header.block_size
            ),
        ));
    }
    Ok(header)
}

fn check_parameters(path: &Path, config: &StorageConfig, header: &Header) -> Result<()> {
    if let Some(key_size) = config.key_size {
        if key_size != header.key_size {
            return Err(Error::IncompatibleParameters {
                path: path.to_path_buf(),
                parameter: "key_width",
                expected: key_size.to_string(),
                found: header.key_size.to_string(),
            });
        }
    }
    if let Some(block_size) = config.block_size {
        if block_size != header.block_size {
            return Err(Error::IncompatibleParameters {
                path: path.to_path_buf(),
                parameter: "block_size",
                expected: block_size.to_string(),
                found: header.block_size.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir, block_size: u32, key_size: KeySize) -> StorageConfig {
        let mut config = StorageConfig::new(dir.path().join("seen.uq")).with_key_size(key_size);
        config.block_size = Some(block_size);
        config
    }

    fn key(value: u64) -> IndexKey {
        IndexKey::from_slice(&value.to_be_bytes())
    }

    #[test]
    fn test_insert_then_present() {
        let dir = TempDir::new().unwrap();
        let mut set = BtreeSet::open(&storage(&dir, 4096, KeySize::Eight), OpenMode::Create).unwrap();

        assert!(set.insert_if_absent(&key(1)).unwrap());
        assert!(!set.insert_if_absent(&key(1)).unwrap());
        assert!(set.contains(&key(1)).unwrap());
        assert!(!set.contains(&key(2)).unwrap());
        assert_eq!(set.len().unwrap(), 1);
    }

    #[test]
    fn test_splits_keep_every_key_reachable() {
        let dir = TempDir::new().unwrap();
        // 64-byte blocks: 7 keys per leaf, 3 per interior node, so the tree gets deep.
        let config = storage(&dir, 64, KeySize::Eight);
        let mut set = BtreeSet::open(&config, OpenMode::Create).unwrap();

        let values: Vec<u64> = (0..500u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect();
        for v in &values {
            assert!(set.insert_if_absent(&key(*v)).unwrap());
        }
        set.commit_batch().unwrap();
        drop(set);

        let mut set = BtreeSet::open(&config, OpenMode::Load).unwrap();
        assert_eq!(set.len().unwrap(), 500);
        for v in &values {
            assert!(set.contains(&key(*v)).unwrap(), "lost key {v:#x}");
            assert!(!set.insert_if_absent(&key(*v)).unwrap());
        }
        assert!(!set.contains(&key(12345)).unwrap());
    }

    #[test]
    fn test_abort_discards_uncommitted() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 64, KeySize::Eight);
        let mut set = BtreeSet::open(&config, OpenMode::Create).unwrap();

        for v in 0..20 {
            set.insert_if_absent(&key(v)).unwrap();
        }
        set.commit_batch().unwrap();
        for v in 20..60 {
            set.insert_if_absent(&key(v)).unwrap();
        }
        set.abort_batch().unwrap();

        assert_eq!(set.len().unwrap(), 20);
        assert!(set.contains(&key(19)).unwrap());
        assert!(!set.contains(&key(20)).unwrap());
        assert!(set.insert_if_absent(&key(40)).unwrap());
    }

    #[test]
    fn test_drop_without_commit_loses_only_open_batch() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 128, KeySize::Four);
        {
            let mut set = BtreeSet::open(&config, OpenMode::Create).unwrap();
            for v in 0..100u32 {
                set.insert_if_absent(&IndexKey::from_slice(&v.to_be_bytes())).unwrap();
            }
            set.commit_batch().unwrap();
            for v in 100..150u32 {
                set.insert_if_absent(&IndexKey::from_slice(&v.to_be_bytes())).unwrap();
            }
        }

        let mut set = BtreeSet::open(&config, OpenMode::Load).unwrap();
        assert_eq!(set.len().unwrap(), 100);
        assert!(set.contains(&IndexKey::from_slice(&99u32.to_be_bytes())).unwrap());
        assert!(!set.contains(&IndexKey::from_slice(&100u32.to_be_bytes())).unwrap());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 4096, KeySize::Eight);
        BtreeSet::open(&config, OpenMode::Create).unwrap();

        let mut set = BtreeSet::open(&config, OpenMode::ReadOnly).unwrap();
        assert!(matches!(set.insert_if_absent(&key(1)), Err(Error::ReadOnly(_))));
        assert!(matches!(set.begin_batch(), Err(Error::ReadOnly(_))));
        assert!(!set.contains(&key(1)).unwrap());
    }

    #[test]
    fn test_missing_file_not_found() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 4096, KeySize::Eight);
        let err = BtreeSet::open(&config, OpenMode::Load).err().unwrap();
        assert!(matches!(err, Error::IndexNotFound { .. }));
    }

    #[test]
    fn test_incompatible_parameters() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 4096, KeySize::Eight);
        BtreeSet::open(&config, OpenMode::Create).unwrap();

        let wider = storage(&dir, 4096, KeySize::Sixteen);
        let err = BtreeSet::open(&wider, OpenMode::Load).err().unwrap();
        assert!(matches!(
            err,
            Error::IncompatibleParameters {
                parameter: "key_width",
                ..
            }
        ));

        let bigger = storage(&dir, 8192, KeySize::Eight);
        let err = BtreeSet::open(&bigger, OpenMode::Load).err().unwrap();
        assert!(matches!(
            err,
            Error::IncompatibleParameters {
                parameter: "block_size",
                ..
            }
        ));

        // Unset parameters adopt the stored ones.
        let adopt = StorageConfig::new(dir.path().join("seen.uq"));
        let set = BtreeSet::open(&adopt, OpenMode::Load).unwrap();
        assert_eq!(set.block_size(), 4096);
        assert_eq!(set.key_size(), KeySize::Eight);
    }

    #[test]
    fn test_corrupt_files_rejected() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 4096, KeySize::Eight);

        fs::write(&config.path, b"definitely not an index").unwrap();
        let err = BtreeSet::open(&config, OpenMode::Load).err().unwrap();
        assert!(matches!(err, Error::IndexCorrupt { .. }));

        BtreeSet::open(&config, OpenMode::Create).unwrap();
        let file = OpenOptions::new().write(true).open(&config.path).unwrap();
        file.set_len(4096 + 10).unwrap();
        let err = BtreeSet::open(&config, OpenMode::Load).err().unwrap();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_hot_journal_blocks_read_only_open() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 4096, KeySize::Eight);
        BtreeSet::open(&config, OpenMode::Create).unwrap();
        fs::write(journal_path(&config.path), b"UQJ1").unwrap();

        let err = BtreeSet::open(&config, OpenMode::ReadOnly).err().unwrap();
        assert!(matches!(err, Error::IndexCorrupt { .. }));

        // A read-write open discards the incomplete journal.
        BtreeSet::open(&config, OpenMode::Load).unwrap();
        assert!(!journal_path(&config.path).exists());
    }

    #[test]
    fn test_create_rejects_tiny_blocks() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir, 64, KeySize::Sixteen);
        assert!(matches!(
            BtreeSet::open(&config, OpenMode::Create),
            Err(Error::InvalidInput(_))
        ));
    }
}
