//! Property-based tests for key derivation, presort and the B-tree backend.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Fingerprints are deterministic and keys are fingerprint prefixes
//! - URL-mode keys of one host share their leading bytes
//! - The presort buffer stays bounded, sorted and prefix-unique
//! - The B-tree agrees with an in-memory model across commits and aborts

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;

use proptest::prelude::*;
use tempfile::TempDir;
use uq::config::StorageConfig;
use uq::services::HOST_PREFIX_LEN;
use uq::storage::BtreeSet;
use uq::{IndexKey, KeyDeriver, KeySize, OfferResult, OpenMode, PersistentSet, PresortBuffer};

fn key_size() -> impl Strategy<Value = KeySize> {
    prop::sample::select(vec![
        KeySize::One,
        KeySize::Two,
        KeySize::Four,
        KeySize::Eight,
        KeySize::Sixteen,
    ])
}

// ============================================================================
// Key derivation
// ============================================================================

proptest! {
    /// Property: the same bytes always produce the same fingerprint.
    #[test]
    fn prop_fingerprint_deterministic(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
        url_mode in any::<bool>(),
    ) {
        let first = KeyDeriver::new(url_mode).fingerprint(&bytes);
        let second = KeyDeriver::new(url_mode).fingerprint(&bytes);
        prop_assert_eq!(first, second);
    }

    /// Property: an index key is the leading bytes of the fingerprint.
    #[test]
    fn prop_index_key_is_prefix(bytes in prop::collection::vec(any::<u8>(), 0..64), size in key_size()) {
        let fingerprint = KeyDeriver::default().fingerprint(&bytes);
        let key = fingerprint.index_key(size);
        prop_assert_eq!(key.len(), size.bytes());
        prop_assert_eq!(key.as_bytes(), &fingerprint.as_bytes()[..size.bytes()]);
    }

    /// Property: URLs on one host cluster under a shared key prefix.
    #[test]
    fn prop_url_mode_clusters_by_host(
        host in "[a-z]{1,12}\\.(com|org|net)",
        left in "[a-z0-9/]{0,20}",
        right in "[a-z0-9/]{0,20}",
    ) {
        let deriver = KeyDeriver::new(true);
        let a = deriver.fingerprint(format!("http://{host}/{left}").as_bytes());
        let b = deriver.fingerprint(format!("https://{host}/{right}").as_bytes());
        prop_assert_eq!(&a.as_bytes()[..HOST_PREFIX_LEN], &b.as_bytes()[..HOST_PREFIX_LEN]);
    }
}

// ============================================================================
// Presort buffer
// ============================================================================

proptest! {
    /// Property: the buffer never exceeds capacity, stays sorted and holds
    /// no two entries with the same prefix; every offer is accounted for.
    #[test]
    fn prop_presort_bounded_and_sorted(
        keys in prop::collection::vec(any::<u16>(), 1..200),
        capacity in 1usize..32,
        prefix_width in 1usize..=2,
    ) {
        let mut buffer = PresortBuffer::new(capacity, prefix_width);
        let mut staged = 0usize;
        let mut suppressed = 0usize;
        let mut evicted = Vec::new();

        for (line, raw) in keys.iter().enumerate() {
            let key = IndexKey::from_slice(&raw.to_be_bytes());
            match buffer.offer(key, line as u64 + 1, b"r") {
                OfferResult::Staged => staged += 1,
                OfferResult::DuplicateSuppressed => suppressed += 1,
                OfferResult::Evicted(entry) => {
                    staged += 1;
                    evicted.push(entry.key);
                },
            }
            prop_assert!(buffer.len() <= capacity);

            let held: Vec<&[u8]> = buffer.iter().map(|e| e.key.prefix(prefix_width)).collect();
            prop_assert!(held.windows(2).all(|pair| pair[0] < pair[1]));
        }

        prop_assert_eq!(staged + suppressed, keys.len());
        prop_assert_eq!(evicted.len() + buffer.len(), staged);

        let drained: Vec<IndexKey> = buffer.drain().map(|e| e.key).collect();
        prop_assert!(drained.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert!(buffer.is_empty());
    }
}

// ============================================================================
// B-tree against a model
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Insert(u16),
    Commit,
    Abort,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => any::<u16>().prop_map(Op::Insert),
        1 => Just(Op::Commit),
        1 => Just(Op::Abort),
    ]
}

fn small_tree(dir: &TempDir) -> StorageConfig {
    let mut config =
        StorageConfig::new(dir.path().join("model.uq")).with_key_size(KeySize::Two);
    config.block_size = Some(64);
    config.cache_size = 64 * 32;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: inserts, commits and aborts match a set model, and only
    /// committed keys survive a reopen.
    #[test]
    fn prop_btree_matches_model(ops in prop::collection::vec(op(), 1..400)) {
        let dir = TempDir::new().unwrap();
        let config = small_tree(&dir);
        let mut committed = HashSet::new();
        let mut working = HashSet::new();

        {
            let mut set = BtreeSet::open(&config, OpenMode::Create).unwrap();
            for op in &ops {
                match *op {
                    Op::Insert(raw) => {
                        let key = IndexKey::from_slice(&raw.to_be_bytes());
                        let inserted = set.insert_if_absent(&key).unwrap();
                        prop_assert_eq!(inserted, working.insert(raw));
                        prop_assert!(set.contains(&key).unwrap());
                    },
                    Op::Commit => {
                        set.commit_batch().unwrap();
                        committed.clone_from(&working);
                    },
                    Op::Abort => {
                        set.abort_batch().unwrap();
                        working.clone_from(&committed);
                    },
                }
            }
            prop_assert_eq!(set.len().unwrap(), working.len() as u64);
        }

        let mut reopened = BtreeSet::open(&config, OpenMode::ReadOnly).unwrap();
        prop_assert_eq!(reopened.len().unwrap(), committed.len() as u64);
        for raw in ops.iter().filter_map(|op| match op {
            Op::Insert(raw) => Some(*raw),
            _ => None,
        }) {
            let key = IndexKey::from_slice(&raw.to_be_bytes());
            prop_assert_eq!(reopened.contains(&key).unwrap(), committed.contains(&raw));
        }
    }

    /// Property: inserting a key twice reports new exactly once.
    #[test]
    fn prop_insert_idempotent(keys in prop::collection::vec(any::<u16>(), 1..100)) {
        let dir = TempDir::new().unwrap();
        let mut set = BtreeSet::open(&small_tree(&dir), OpenMode::Create).unwrap();
        let mut distinct = HashSet::new();
        for raw in &keys {
            let key = IndexKey::from_slice(&raw.to_be_bytes());
            prop_assert_eq!(set.insert_if_absent(&key).unwrap(), distinct.insert(*raw));
            prop_assert!(!set.insert_if_absent(&key).unwrap());
        }
        prop_assert_eq!(set.len().unwrap(), distinct.len() as u64);
    }
}
