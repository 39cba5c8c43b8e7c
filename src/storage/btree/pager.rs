//! Block I/O, the block cache and the rollback journal.
//!
//! Nodes are read through an LRU cache of decoded blocks. A node that is
//! modified moves from the cache into the dirty set and stays there until
//! the batch is committed or discarded; the file itself is only written by
//! [`Pager::commit`].
//!
//! Commit protocol:
//!
//! 1. Pre-images of every overwritten block (header included) are written to
//!    `<path>-journal`, followed by a trailer, and synced together with the
//!    directory entry that names it.
//! 2. Dirty blocks and the new header are written in place and synced.
//! 3. The journal is deleted and the directory synced again, so a stale
//!    journal is never replayed over a later commit.
//!
//! A complete journal found at open time means step 2 may have been cut
//! short, so the pre-images are copied back. An incomplete journal means
//! step 2 never started and it is simply removed.

use super::header::{HEADER_LEN, Header};
use super::node::Node;
use crate::{Error, Result};
use lru::LruCache;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

const JOURNAL_MAGIC: &[u8; 4] = b"UQJ1";
const JOURNAL_TRAILER: &[u8; 4] = b"UQJE";
const JOURNAL_HEADER_LEN: usize = 16;
const BLOCK_ID_LEN: usize = 8;

/// Lower bound on cached blocks, whatever the cache budget.
const MIN_CACHED_BLOCKS: usize = 16;

/// Location of the rollback journal of the index at `path`.
pub fn journal_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push("-journal");
    PathBuf::from(name)
}

/// Cached and dirty node storage over one index file.
pub struct Pager {
    path: PathBuf,
    file: File,
    block_len: usize,
    key_width: usize,
    cache: LruCache<u64, Node>,
    dirty: HashMap<u64, Node>,
    disk_blocks: u64,
}

impl Pager {
    /// Wraps an open index file whose committed header is `header`.
    pub fn new(path: &Path, file: File, header: &Header, cache_size: usize) -> Self {
        let block_len = header.block_len();
        let blocks = (cache_size / block_len.max(1)).max(MIN_CACHED_BLOCKS);
        let capacity = NonZeroUsize::new(blocks).unwrap_or(NonZeroUsize::MIN);
        Self {
            path: path.to_path_buf(),
            file,
            block_len,
            key_width: header.key_size.bytes(),
            cache: LruCache::new(capacity),
            dirty: HashMap::new(),
            disk_blocks: header.block_count,
        }
    }

    /// Returns the node in block `id`.
    pub fn node(&mut self, id: u64) -> Result<&Node> {
        if self.dirty.contains_key(&id) {
            return self.dirty.get(&id).ok_or_else(|| missing(id));
        }
        if !self.cache.contains(&id) {
            let node = self.read_node(id)?;
            self.cache.put(id, node);
        }
        self.cache.get(&id).ok_or_else(|| missing(id))
    }

    /// Returns the node in block `id` for modification, marking it dirty.
    pub fn node_mut(&mut self, id: u64) -> Result<&mut Node> {
        if !self.dirty.contains_key(&id) {
            let node = match self.cache.pop(&id) {
                Some(node) => node,
                None => self.read_node(id)?,
            };
            self.dirty.insert(id, node);
        }
        self.dirty.get_mut(&id).ok_or_else(|| missing(id))
    }

    /// Appends `node` as a new block and returns its id.
    pub fn allocate(&mut self, node: Node, header: &mut Header) -> u64 {
        let id = header.block_count;
        header.block_count += 1;
        self.dirty.insert(id, node);
        id
    }

    /// Number of modified blocks waiting for commit.
    pub fn dirty_blocks(&self) -> usize {
        self.dirty.len()
    }

    /// Writes every dirty block and `header` durably.
    pub fn commit(&mut self, header: &Header) -> Result<()> {
        let mut ids: Vec<u64> = self.dirty.keys().copied().collect();
        ids.sort_unstable();

        let overwritten: Vec<u64> = std::iter::once(0)
            .chain(ids.iter().copied().filter(|&id| id < self.disk_blocks))
            .collect();
        let journal = journal_path(&self.path);
        self.write_journal(&journal, &overwritten)?;
        sync_parent_dir(&journal)?;

        let mut block = vec![0u8; self.block_len];
        for id in &ids {
            if let Some(node) = self.dirty.get(id) {
                node.encode(&mut block, self.key_width);
                write_block(&mut self.file, self.block_len, *id, &block)
                    .map_err(|e| Error::operation("btree_write_block", e))?;
            }
        }
        header.encode(&mut block);
        write_block(&mut self.file, self.block_len, 0, &block)
            .map_err(|e| Error::operation("btree_write_header", e))?;
        self.file
            .sync_all()
            .map_err(|e| Error::operation("btree_sync", e))?;

        fs::remove_file(&journal).map_err(|e| Error::operation("btree_remove_journal", e))?;
        sync_parent_dir(&journal)?;

        for (id, node) in self.dirty.drain() {
            self.cache.put(id, node);
        }
        self.disk_blocks = header.block_count;
        Ok(())
    }

    /// Drops every uncommitted modification.
    pub fn discard(&mut self) {
        self.dirty.clear();
    }

    /// Rolls back a failed commit from its journal and resets the cache.
    pub fn roll_back_commit(&mut self) -> Result<()> {
        self.discard();
        self.cache.clear();
        recover_journal(&self.path, &mut self.file)?;
        Ok(())
    }

    fn write_journal(&mut self, journal: &Path, ids: &[u64]) -> Result<()> {
        let file = File::create(journal).map_err(|e| Error::operation("btree_journal", e))?;
        let mut out = BufWriter::new(file);
        let count = ids.len() as u64;

        #[allow(clippy::cast_possible_truncation)]
        let block_size = self.block_len as u32;
        let mut write = |bytes: &[u8]| {
            out.write_all(bytes)
                .map_err(|e| Error::operation("btree_journal", e))
        };
        write(JOURNAL_MAGIC)?;
        write(&block_size.to_le_bytes())?;
        write(&count.to_le_bytes())?;
        for &id in ids {
            let block = self.read_block(id)?;
            write(&id.to_le_bytes())?;
            write(&block)?;
        }
        write(JOURNAL_TRAILER)?;

        let file = out
            .into_inner()
            .map_err(|e| Error::operation("btree_journal", e.error()))?;
        file.sync_all()
            .map_err(|e| Error::operation("btree_journal", e))
    }

    fn read_block(&mut self, id: u64) -> Result<Vec<u8>> {
        if id >= self.disk_blocks {
            return Err(self.corrupt(format!(
                "reference to block {id} beyond {} blocks",
                self.disk_blocks
            )));
        }
        let mut block = vec![0u8; self.block_len];
        self.file
            .seek(SeekFrom::Start(id * self.block_len as u64))
            .and_then(|_| self.file.read_exact(&mut block))
            .map_err(|e| Error::operation("btree_read_block", e))?;
        Ok(block)
    }

    fn read_node(&mut self, id: u64) -> Result<Node> {
        if id == 0 {
            return Err(self.corrupt("reference to the header block as a node".to_string()));
        }
        let block = self.read_block(id)?;
        Node::decode(&block, self.key_width)
            .map_err(|reason| self.corrupt(format!("block {id}: {reason}")))
    }

    fn corrupt(&self, reason: String) -> Error {
        Error::IndexCorrupt {
            path: self.path.clone(),
            reason,
        }
    }
}

fn missing(id: u64) -> Error {
    Error::operation("btree_cache", format!("block {id} vanished from the cache"))
}

fn write_block(file: &mut File, block_len: usize, id: u64, block: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(id * block_len as u64))?;
    file.write_all(block)
}

/// Parses a complete journal into its block size and pre-images.
fn parse_journal(bytes: &[u8]) -> Option<(usize, Vec<(u64, &[u8])>)> {
    if bytes.len() < JOURNAL_HEADER_LEN + JOURNAL_TRAILER.len() || &bytes[0..4] != JOURNAL_MAGIC {
        return None;
    }
    let block_len = u32::from_le_bytes(bytes[4..8].try_into().ok()?) as usize;
    let count = usize::try_from(u64::from_le_bytes(bytes[8..16].try_into().ok()?)).ok()?;
    let entry_len = BLOCK_ID_LEN + block_len;
    let body_len = count.checked_mul(entry_len)?;
    if bytes.len() != JOURNAL_HEADER_LEN + body_len + JOURNAL_TRAILER.len()
        || !bytes.ends_with(JOURNAL_TRAILER)
    {
        return None;
    }

    let entries = bytes[JOURNAL_HEADER_LEN..JOURNAL_HEADER_LEN + body_len]
        .chunks_exact(entry_len)
        .filter_map(|entry| {
            let id = u64::from_le_bytes(entry[..BLOCK_ID_LEN].try_into().ok()?);
            Some((id, &entry[BLOCK_ID_LEN..]))
        })
        .collect();
    Some((block_len, entries))
}

/// Restores the pre-images of an interrupted commit.
///
/// Returns `true` if a complete journal was rolled back, `false` if there was
/// no journal or only an incomplete one (which is deleted).
pub fn recover_journal(path: &Path, file: &mut File) -> Result<bool> {
    let journal = journal_path(path);
    let bytes = match fs::read(&journal) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::operation("btree_read_journal", e)),
    };

    let rolled_back = match parse_journal(&bytes) {
        Some((block_len, entries)) => {
            let mut restored = None;
            for (id, block) in &entries {
                write_block(file, block_len, *id, block)
                    .map_err(|e| Error::operation("btree_rollback", e))?;
                if *id == 0 {
                    restored = Some(Header::decode(&block[..HEADER_LEN.min(block.len())]));
                }
            }
            let header = match restored {
                Some(Ok(header)) => header,
                Some(Err(reason)) => {
                    return Err(Error::IndexCorrupt {
                        path: path.to_path_buf(),
                        reason: format!("journal header: {reason}"),
                    });
                },
                None => {
                    return Err(Error::IndexCorrupt {
                        path: path.to_path_buf(),
                        reason: "journal lacks a header pre-image".to_string(),
                    });
                },
            };
            file.set_len(header.file_len())
                .and_then(|()| file.sync_all())
                .map_err(|e| Error::operation("btree_rollback", e))?;
            tracing::warn!(
                path = %path.display(),
                blocks = entries.len(),
                "Rolled back interrupted commit"
            );
            true
        },
        None => {
            tracing::debug!(path = %path.display(), "Discarding incomplete journal");
            false
        },
    };

    fs::remove_file(&journal).map_err(|e| Error::operation("btree_remove_journal", e))?;
    sync_parent_dir(&journal)?;
    Ok(rolled_back)
}

/// Makes creation or removal of `path` durable by syncing its directory.
#[cfg(unix)]
pub fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| Error::operation("btree_sync_dir", format!("{}: {e}", parent.display())))
}

/// Directory handles cannot be synced on this platform; entry updates are
/// durable once the file itself is synced.
#[cfg(not(unix))]
pub fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeySize;

    #[test]
    fn test_journal_path_appends_suffix() {
        assert_eq!(
            journal_path(Path::new("/tmp/seen.uq")),
            PathBuf::from("/tmp/seen.uq-journal")
        );
    }

    #[test]
    fn test_parse_journal_requires_trailer() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(JOURNAL_MAGIC);
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&[7u8; 64]);
        assert!(parse_journal(&bytes).is_none());

        bytes.extend_from_slice(JOURNAL_TRAILER);
        let (block_len, entries) = parse_journal(&bytes).unwrap();
        assert_eq!(block_len, 64);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, 0);
        assert_eq!(entries[0].1, &[7u8; 64][..]);
    }

    #[test]
    fn test_recover_restores_preimages_and_truncates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idx");

        let header = Header::new(KeySize::Eight, 64);
        let mut original = vec![0u8; 128];
        header.encode(&mut original[..64]);
        Node::leaf().encode(&mut original[64..], 8);
        fs::write(&path, &original).unwrap();

        // A commit that wrote a grown file, then crashed before removing its journal.
        let mut journal = Vec::new();
        journal.extend_from_slice(JOURNAL_MAGIC);
        journal.extend_from_slice(&64u32.to_le_bytes());
        journal.extend_from_slice(&1u64.to_le_bytes());
        journal.extend_from_slice(&0u64.to_le_bytes());
        journal.extend_from_slice(&original[..64]);
        journal.extend_from_slice(JOURNAL_TRAILER);
        fs::write(journal_path(&path), &journal).unwrap();
        fs::write(&path, vec![0xFFu8; 256]).unwrap();

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert!(recover_journal(&path, &mut file).unwrap());
        drop(file);

        let restored = fs::read(&path).unwrap();
        assert_eq!(restored.len(), 128);
        assert_eq!(&restored[..64], &original[..64]);
        assert!(!journal_path(&path).exists());
    }

    #[test]
    fn test_incomplete_journal_is_discarded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idx");
        fs::write(&path, b"untouched").unwrap();
        fs::write(journal_path(&path), b"UQJ1partial").unwrap();

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        assert!(!recover_journal(&path, &mut file).unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"untouched");
        assert!(!journal_path(&path).exists());
    }

    #[test]
    fn test_commit_removes_journal_after_syncing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idx");

        let mut header = Header::new(KeySize::Eight, 64);
        let mut image = vec![0u8; 128];
        header.encode(&mut image[..64]);
        Node::leaf().encode(&mut image[64..], 8);
        fs::write(&path, &image).unwrap();

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        let mut pager = Pager::new(&path, file, &header, 1 << 16);
        let id = pager.allocate(Node::leaf(), &mut header);
        pager.commit(&header).unwrap();

        assert_eq!(id, 2);
        assert!(!journal_path(&path).exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), header.file_len());
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        sync_parent_dir(&dir.path().join("idx-journal")).unwrap();
        // A bare file name lives in the working directory.
        sync_parent_dir(Path::new("idx-journal")).unwrap();

        let err = sync_parent_dir(&dir.path().join("missing").join("idx-journal")).unwrap_err();
        assert!(err.to_string().contains("btree_sync_dir"));
    }
}
