//! Embedded `SQLite` index.
//!
//! The index is a single database with two tables:
//!
//! ```sql
//! CREATE TABLE uq_meta (name TEXT PRIMARY KEY, value TEXT NOT NULL);
//! CREATE TABLE seen (key BLOB PRIMARY KEY, marker INTEGER NOT NULL) WITHOUT ROWID;
//! ```
//!
//! `uq_meta` records the format version, key width and map size chosen at
//! creation. Each batch is one `BEGIN IMMEDIATE` transaction; an insert that
//! hits an existing key changes no rows and is reported as already present.

mod connection;

pub use connection::{ConnectionTuning, configure_connection};

use crate::config::{OpenMode, StorageConfig};
use crate::models::{IndexKey, KeySize};
use crate::storage::instrument::{record_operation_metrics, status_of};
use crate::storage::traits::PersistentSet;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

const BACKEND: &str = "sqlite";

/// Schema version stored in `uq_meta`.
pub const SCHEMA_VERSION: u32 = 1;

const SCHEMA: &str = "
    CREATE TABLE uq_meta (name TEXT PRIMARY KEY, value TEXT NOT NULL);
    CREATE TABLE seen (key BLOB PRIMARY KEY, marker INTEGER NOT NULL) WITHOUT ROWID;
";

const INSERT_SQL: &str = "INSERT OR IGNORE INTO seen (key, marker) VALUES (?1, 1)";
const CONTAINS_SQL: &str = "SELECT 1 FROM seen WHERE key = ?1";

/// [`PersistentSet`] stored in an embedded `SQLite` database.
pub struct SqliteSet {
    path: PathBuf,
    conn: Connection,
    key_size: KeySize,
    read_only: bool,
    in_batch: bool,
}

impl SqliteSet {
    /// Opens or creates the index described by `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::IndexNotFound`] when loading a path that does not exist
    /// - [`Error::IndexCorrupt`] when the file is not a database or lacks the
    ///   `uq_meta` table
    /// - [`Error::IncompatibleParameters`] when an explicit key width or page
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
        for stale in [path.to_path_buf(), sidecar(path, "-wal"), sidecar(path, "-shm")] {
            remove_if_exists(&stale)?;
        }

        let conn = Connection::open(path).map_err(sql_error("sqlite_create"))?;
        let page_size = config.creation_block_size();
        let tuning = ConnectionTuning::from_config(config);
        connection::set_page_size(&conn, page_size);
        configure_connection(&conn, &tuning);

        let key_size = config.creation_key_size();
        conn.execute_batch(SCHEMA)
            .map_err(sql_error("sqlite_create_schema"))?;
        for (name, value) in [
            ("format_version", SCHEMA_VERSION.to_string()),
            ("key_width", key_size.bytes().to_string()),
            ("map_size", config.map_size.to_string()),
        ] {
            conn.execute(
                "INSERT INTO uq_meta (name, value) VALUES (?1, ?2)",
                params![name, value],
            )
            .map_err(sql_error("sqlite_write_meta"))?;
        }
        connection::limit_page_count(&conn, &tuning, i64::from(page_size));

        tracing::info!(
            path = %path.display(),
            page_size,
            key_width = key_size.bytes(),
            map_size = config.map_size,
            "Created sqlite index"
        );

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            key_size,
            read_only: false,
            in_batch: false,
        })
    }

    fn load(config: &StorageConfig, read_only: bool) -> Result<Self> {
        let path = config.path.as_path();
        if !path.exists() {
            return Err(Error::IndexNotFound {
                path: path.to_path_buf(),
            });
        }

        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(path, flags).map_err(sql_error("sqlite_open"))?;

        let corrupt = |reason: String| Error::IndexCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        let version = read_meta(&conn, "format_version").map_err(|e| corrupt(e.to_string()))?;
        let version = version.ok_or_else(|| corrupt("missing format version".to_string()))?;
        if version != SCHEMA_VERSION.to_string() {
            return Err(corrupt(format!("unsupported schema version {version}")));
        }
        let key_width = read_meta(&conn, "key_width")
            .map_err(|e| corrupt(e.to_string()))?
            .and_then(|value| value.parse::<usize>().ok())
            .ok_or_else(|| corrupt("missing key width".to_string()))?;
        let key_size =
            KeySize::from_bytes(key_width).map_err(|_| corrupt(format!("invalid key width {key_width}")))?;
        let page_size = connection::page_size(&conn).map_err(|e| corrupt(e.to_string()))?;

        check_parameters(path, config, key_size, page_size)?;

        // The map size only grows: a smaller request keeps the stored limit.
        let stored_map_size = read_meta(&conn, "map_size")
            .map_err(|e| corrupt(e.to_string()))?
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let map_size = stored_map_size.max(config.map_size);
        let mut tuning = ConnectionTuning::from_config(config);
        tuning.map_size = i64::try_from(map_size).unwrap_or(i64::MAX);
        configure_connection(&conn, &tuning);

        if !read_only {
            if map_size > stored_map_size {
                conn.execute(
                    "INSERT OR REPLACE INTO uq_meta (name, value) VALUES ('map_size', ?1)",
                    params![map_size.to_string()],
                )
                .map_err(sql_error("sqlite_write_meta"))?;
            }
            connection::limit_page_count(&conn, &tuning, page_size);
        }

        tracing::info!(
            path = %path.display(),
            page_size,
            key_width = key_size.bytes(),
            map_size,
            read_only,
            "Loaded sqlite index"
        );

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            key_size,
            read_only,
            in_batch: false,
        })
    }

    fn check_key(&self, key: &IndexKey) -> Result<()> {
        if key.len() == self.key_size.bytes() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "{}-byte key offered to an index of {}-byte keys",
                key.len(),
                self.key_size
            )))
        }
    }

    fn read_only_error(&self, what: &str) -> Error {
        Error::ReadOnly(format!("{what} on {}", self.path.display()))
    }
}

impl PersistentSet for SqliteSet {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn key_size(&self) -> KeySize {
        self.key_size
    }

    fn insert_if_absent(&mut self, key: &IndexKey) -> Result<bool> {
        if self.read_only {
            return Err(self.read_only_error("insert"));
        }
        self.check_key(key)?;
        if !self.in_batch {
            self.begin_batch()?;
        }

        let changed = self
            .conn
            .prepare_cached(INSERT_SQL)
            .and_then(|mut stmt| stmt.execute(params![key.as_bytes()]))
            .map_err(sql_error("sqlite_insert"))?;
        Ok(changed > 0)
    }

    fn contains(&mut self, key: &IndexKey) -> Result<bool> {
        self.check_key(key)?;
        self.conn
            .prepare_cached(CONTAINS_SQL)
            .and_then(|mut stmt| stmt.exists(params![key.as_bytes()]))
            .map_err(sql_error("sqlite_contains"))
    }

    fn begin_batch(&mut self) -> Result<()> {
        if self.read_only {
            return Err(self.read_only_error("begin batch"));
        }
        if self.in_batch {
            return Ok(());
        }
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(sql_error("sqlite_begin"))?;
        self.in_batch = true;
        Ok(())
    }

    fn commit_batch(&mut self) -> Result<()> {
        if self.read_only {
            return Err(self.read_only_error("commit"));
        }
        if !self.in_batch {
            return Ok(());
        }

        let start = Instant::now();
        let result = self
            .conn
            .execute_batch("COMMIT")
            .map_err(sql_error("sqlite_commit"));
        record_operation_metrics(BACKEND, "commit", start, status_of(&result));

        if result.is_err() && !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
        self.in_batch = false;
        result
    }

    fn abort_batch(&mut self) -> Result<()> {
        if !self.in_batch {
            return Ok(());
        }
        self.in_batch = false;
        let start = Instant::now();
        let result = if self.conn.is_autocommit() {
            Ok(())
        } else {
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(sql_error("sqlite_rollback"))
        };
        record_operation_metrics(BACKEND, "abort", start, status_of(&result));
        result
    }

    fn len(&mut self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM seen", [], |row| row.get(0))
            .map_err(sql_error("sqlite_count"))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn sql_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::operation(operation, e)
}

fn read_meta(conn: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM uq_meta WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::operation(
            "sqlite_remove",
            format!("{}: {e}", path.display()),
        )),
    }
}

fn check_parameters(
    path: &Path,
    config: &StorageConfig,
    key_size: KeySize,
    page_size: i64,
) -> Result<()> {
    if let Some(requested) = config.key_size {
        if requested != key_size {
            return Err(Error::IncompatibleParameters {
                path: path.to_path_buf(),
                parameter: "key_width",
                expected: requested.to_string(),
                found: key_size.to_string(),
            });
        }
    }
    if let Some(requested) = config.block_size {
        if i64::from(requested) != page_size {
            return Err(Error::IncompatibleParameters {
                path: path.to_path_buf(),
                parameter: "block_size",
                expected: requested.to_string(),
                found: page_size.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> StorageConfig {
        StorageConfig::new(dir.path().join("seen.db")).with_key_size(KeySize::Eight)
    }

    fn key(value: u64) -> IndexKey {
        IndexKey::from_slice(&value.to_le_bytes())
    }

    #[test]
    fn test_insert_if_absent_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut set = SqliteSet::open(&storage(&dir), OpenMode::Create).unwrap();

        set.begin_batch().unwrap();
        assert!(set.insert_if_absent(&key(7)).unwrap());
        assert!(!set.insert_if_absent(&key(7)).unwrap());
        set.commit_batch().unwrap();
        assert!(!set.insert_if_absent(&key(7)).unwrap());
        assert!(set.contains(&key(7)).unwrap());
        assert_eq!(set.len().unwrap(), 1);
    }

    #[test]
    fn test_abort_rolls_back_open_batch() {
        let dir = TempDir::new().unwrap();
        let mut set = SqliteSet::open(&storage(&dir), OpenMode::Create).unwrap();

        set.insert_if_absent(&key(1)).unwrap();
        set.commit_batch().unwrap();
        set.insert_if_absent(&key(2)).unwrap();
        set.abort_batch().unwrap();

        assert!(set.contains(&key(1)).unwrap());
        assert!(!set.contains(&key(2)).unwrap());
    }

    fn max_page_count(set: &SqliteSet) -> i64 {
        set.conn
            .pragma_query_value(None, "max_page_count", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_stored_map_size_applies_on_load() {
        let dir = TempDir::new().unwrap();
        let mut config = storage(&dir);
        config.block_size = Some(4096);
        config.map_size = 64 << 20;
        drop(SqliteSet::open(&config, OpenMode::Create).unwrap());

        // A smaller request keeps the limit the index was created with.
        config.map_size = 1 << 20;
        let set = SqliteSet::open(&config, OpenMode::Load).unwrap();
        assert_eq!(max_page_count(&set), (64 << 20) / 4096);
        drop(set);

        // A larger one raises it and is remembered.
        config.map_size = 128 << 20;
        drop(SqliteSet::open(&config, OpenMode::Load).unwrap());
        config.map_size = 1 << 20;
        let set = SqliteSet::open(&config, OpenMode::Load).unwrap();
        assert_eq!(
            read_meta(&set.conn, "map_size").unwrap().as_deref(),
            Some("134217728")
        );
        assert_eq!(max_page_count(&set), (128 << 20) / 4096);
    }

    #[test]
    fn test_uncommitted_batch_lost_on_drop() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir);
        {
            let mut set = SqliteSet::open(&config, OpenMode::Create).unwrap();
            set.insert_if_absent(&key(1)).unwrap();
            set.commit_batch().unwrap();
            set.insert_if_absent(&key(2)).unwrap();
        }
        let mut set = SqliteSet::open(&config, OpenMode::Load).unwrap();
        assert!(set.contains(&key(1)).unwrap());
        assert!(!set.contains(&key(2)).unwrap());
    }

    #[test]
    fn test_read_only_open() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir);
        {
            let mut set = SqliteSet::open(&config, OpenMode::Create).unwrap();
            set.insert_if_absent(&key(3)).unwrap();
            set.commit_batch().unwrap();
        }
        let mut set = SqliteSet::open(&config, OpenMode::ReadOnly).unwrap();
        assert!(set.contains(&key(3)).unwrap());
        assert!(matches!(set.insert_if_absent(&key(4)), Err(Error::ReadOnly(_))));
    }

    #[test]
    fn test_open_errors() {
        let dir = TempDir::new().unwrap();
        let config = storage(&dir);
        assert!(matches!(
            SqliteSet::open(&config, OpenMode::Load),
            Err(Error::IndexNotFound { .. })
        ));

        fs::write(&config.path, vec![0x5Au8; 4096]).unwrap();
        assert!(matches!(
            SqliteSet::open(&config, OpenMode::Load),
            Err(Error::IndexCorrupt { .. })
        ));

        SqliteSet::open(&config, OpenMode::Create).unwrap();
        let wide = StorageConfig::new(&config.path).with_key_size(KeySize::Sixteen);
        assert!(matches!(
            SqliteSet::open(&wide, OpenMode::Load),
            Err(Error::IncompatibleParameters {
                parameter: "key_width",
                ..
            })
        ));
    }

    #[test]
    fn test_stored_parameters_adopted() {
        let dir = TempDir::new().unwrap();
        let mut config = storage(&dir).with_key_size(KeySize::Four);
        config.block_size = Some(4096);
        SqliteSet::open(&config, OpenMode::Create).unwrap();

        let set = SqliteSet::open(&StorageConfig::new(&config.path), OpenMode::Load).unwrap();
        assert_eq!(set.key_size(), KeySize::Four);

        let mut other_page = StorageConfig::new(&config.path);
        other_page.block_size = Some(8192);
        assert!(matches!(
            SqliteSet::open(&other_page, OpenMode::Load),
            Err(Error::IncompatibleParameters {
                parameter: "block_size",
                ..
            })
        ));
    }
}
