//! Index file header (block 0).

use crate::models::KeySize;

/// File magic.
pub const MAGIC: &[u8; 4] = b"UQBT";

/// On-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Encoded header length. The rest of block 0 is zero.
pub const HEADER_LEN: usize = 36;

/// Block id of the root of a freshly created tree.
pub const INITIAL_ROOT: u64 = 1;

/// Parsed header block.
///
/// Layout, all integers little-endian:
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0 | 4 | magic `UQBT` |
/// | 4 | 2 | format version |
/// | 6 | 1 | key width |
/// | 7 | 1 | reserved |
/// | 8 | 4 | block size |
/// | 12 | 8 | root block id |
/// | 20 | 8 | block count, header included |
/// | 28 | 8 | entry count |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Stored key width.
    pub key_size: KeySize,
    /// Block size in bytes.
    pub block_size: u32,
    /// Root node block.
    pub root: u64,
    /// Number of blocks in the file.
    pub block_count: u64,
    /// Number of keys in the tree.
    pub entries: u64,
}

impl Header {
    /// Header of an empty tree: block 0 is this header, block 1 an empty leaf.
    pub const fn new(key_size: KeySize, block_size: u32) -> Self {
        Self {
            key_size,
            block_size,
            root: INITIAL_ROOT,
            block_count: 2,
            entries: 0,
        }
    }

    /// Block size as `usize`.
    pub const fn block_len(&self) -> usize {
        self.block_size as usize
    }

    /// Expected minimum file length.
    pub const fn file_len(&self) -> u64 {
        self.block_count * self.block_size as u64
    }

    /// Writes the header into the start of `block` and zeroes the rest.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, block: &mut [u8]) {
        block.fill(0);
        block[0..4].copy_from_slice(MAGIC);
        block[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        block[6] = self.key_size.bytes() as u8;
        block[8..12].copy_from_slice(&self.block_size.to_le_bytes());
        block[12..20].copy_from_slice(&self.root.to_le_bytes());
        block[20..28].copy_from_slice(&self.block_count.to_le_bytes());
        block[28..36].copy_from_slice(&self.entries.to_le_bytes());
    }

    /// Parses a header, returning the reason it is unusable on failure.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!(
                "file too short for a header ({} bytes)",
                bytes.len()
            ));
        }
        if &bytes[0..4] != MAGIC {
            return Err("bad magic, not a uq b-tree index".to_string());
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported format version {version}"));
        }
        let key_size = KeySize::from_bytes(usize::from(bytes[6]))
            .map_err(|_| format!("invalid key width {}", bytes[6]))?;
        let block_size = u32::from_le_bytes(read_array(&bytes[8..12]));
        let root = u64::from_le_bytes(read_array(&bytes[12..20]));
        let block_count = u64::from_le_bytes(read_array(&bytes[20..28]));
        let entries = u64::from_le_bytes(read_array(&bytes[28..36]));

        if (block_size as usize) < HEADER_LEN {
            return Err(format!("invalid block size {block_size}"));
        }
        if block_count < 2 || root == 0 || root >= block_count {
            return Err(format!(
                "root block {root} outside of {block_count} blocks"
            ));
        }

        Ok(Self {
            key_size,
            block_size,
            root,
            block_count,
            entries,
        })
    }
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
