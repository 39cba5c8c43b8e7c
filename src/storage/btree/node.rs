//! Tree nodes and their block encoding.
//!
//! A node block starts with a 4-byte header: kind, reserved, key count
//! (`u16` LE). Interior nodes follow with `count + 1` child block ids (`u64`
//! LE), then every node holds `count` sorted keys of the index key width.
//! The tail of the block is zero.

use crate::models::IndexKey;

/// Bytes of the node header.
pub const NODE_HEADER_LEN: usize = 4;

const CHILD_LEN: usize = 8;
const KIND_LEAF: u8 = 1;
const KIND_INTERIOR: u8 = 2;

/// Maximum keys per `(leaf, interior)` node for a block size and key width.
///
/// An interior node needs room for one more child than it has keys.
#[must_use]
pub fn node_capacity(block_size: usize, key_width: usize) -> (usize, usize) {
    let body = block_size.saturating_sub(NODE_HEADER_LEN);
    let key_width = key_width.max(1);
    let leaf = body / key_width;
    let interior = body.saturating_sub(CHILD_LEN) / (key_width + CHILD_LEN);
    let max = usize::from(u16::MAX);
    (leaf.min(max), interior.min(max))
}

/// A decoded node. Leaves have no children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Sorted keys.
    pub keys: Vec<IndexKey>,
    /// Child block ids, `keys.len() + 1` of them for interior nodes.
    pub children: Vec<u64>,
}

impl Node {
    /// An empty leaf.
    pub const fn leaf() -> Self {
        Self {
            keys: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Returns true if the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Binary search for `key`: `Ok` if present, else the slot it belongs in.
    pub fn search(&self, key: &IndexKey) -> Result<usize, usize> {
        self.keys.binary_search(key)
    }

    /// Child to descend into for slot `pos`, or `None` at a leaf.
    pub fn child(&self, pos: usize) -> Option<u64> {
        self.children.get(pos).copied()
    }

    /// Splits an overflowing node around its middle key.
    ///
    /// `self` keeps the lower half; the median and the upper half are returned.
    pub fn split(&mut self) -> (IndexKey, Self) {
        let mid = self.keys.len() / 2;
        let right_keys = self.keys.split_off(mid + 1);
        let median = self.keys.pop().unwrap_or_default();
        let right_children = if self.is_leaf() {
            Vec::new()
        } else {
            self.children.split_off(mid + 1)
        };
        (
            median,
            Self {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    /// Writes the node into `block`, which must be large enough.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, block: &mut [u8], key_width: usize) {
        block.fill(0);
        block[0] = if self.is_leaf() { KIND_LEAF } else { KIND_INTERIOR };
        block[2..4].copy_from_slice(&(self.keys.len() as u16).to_le_bytes());

        let mut offset = NODE_HEADER_LEN;
        for child in &self.children {
            block[offset..offset + CHILD_LEN].copy_from_slice(&child.to_le_bytes());
            offset += CHILD_LEN;
        }
        for key in &self.keys {
            block[offset..offset + key_width].copy_from_slice(key.as_bytes());
            offset += key_width;
        }
    }

    /// Parses a node block, returning the reason it is unusable on failure.
    pub fn decode(block: &[u8], key_width: usize) -> Result<Self, String> {
        if block.len() < NODE_HEADER_LEN {
            return Err("node block too short".to_string());
        }
        let count = usize::from(u16::from_le_bytes([block[2], block[3]]));
        let child_count = match block[0] {
            KIND_LEAF => 0,
            KIND_INTERIOR => count + 1,
            kind => return Err(format!("unknown node kind {kind}")),
        };

        let needed = NODE_HEADER_LEN + child_count * CHILD_LEN + count * key_width;
        if needed > block.len() {
            return Err(format!("node with {count} keys overflows its block"));
        }

        let mut offset = NODE_HEADER_LEN;
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            let mut raw = [0u8; CHILD_LEN];
            raw.copy_from_slice(&block[offset..offset + CHILD_LEN]);
            children.push(u64::from_le_bytes(raw));
            offset += CHILD_LEN;
        }

        let keys = block[offset..offset + count * key_width]
            .chunks_exact(key_width)
            .map(IndexKey::from_slice)
            .collect();

        Ok(Self { keys, children })
    }
}
