//! Connection setup for the `SQLite` index.
//!
//! Every connection gets the same WAL tuning. Resource hints from the storage
//! configuration become cache, mmap and page-count limits.

use crate::config::StorageConfig;
use rusqlite::Connection;

/// Busy timeout in milliseconds.
const BUSY_TIMEOUT_MS: &str = "5000";

/// Connection limits derived from [`StorageConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTuning {
    /// Page cache budget in KiB.
    pub cache_kib: i64,
    /// Memory map size in bytes, and the database size limit.
    pub map_size: i64,
}

impl ConnectionTuning {
    /// Derives tuning from the storage resource hints.
    pub fn from_config(config: &StorageConfig) -> Self {
        let cache_kib = i64::try_from(config.cache_size / 1024).unwrap_or(i64::MAX);
        Self {
            cache_kib: cache_kib.max(1),
            map_size: i64::try_from(config.map_size).unwrap_or(i64::MAX),
        }
    }

    /// Page limit that keeps the database within the map size.
    pub fn max_page_count(&self, page_size: i64) -> i64 {
        (self.map_size / page_size.max(1)).max(1)
    }
}

/// Sets the page size of a database that has no tables yet.
///
/// Must run before the journal mode is switched to WAL.
pub fn set_page_size(conn: &Connection, page_size: u32) {
    let _ = conn.pragma_update(None, "page_size", page_size);
}

/// Configures a connection for index workloads.
///
/// Failures are ignored: a connection to a file that is not a database
/// rejects these pragmas, and that is reported when the schema is read.
pub fn configure_connection(conn: &Connection, tuning: &ConnectionTuning) {
    // journal_mode returns the new mode as a row, so pragma_update's result is ignored.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS);
    // Negative values are a budget in KiB rather than pages.
    let _ = conn.pragma_update(None, "cache_size", -tuning.cache_kib);
    let _ = conn.pragma_update(None, "mmap_size", tuning.map_size);
}

/// Caps the database at the map size for the current page size.
pub fn limit_page_count(conn: &Connection, tuning: &ConnectionTuning, page_size: i64) {
    let _ = conn.pragma_update(None, "max_page_count", tuning.max_page_count(page_size));
}

/// Reads the page size of an open database.
pub fn page_size(conn: &Connection) -> rusqlite::Result<i64> {
    conn.pragma_query_value(None, "page_size", |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_from_config() {
        let mut config = StorageConfig::new("/tmp/x");
        config.cache_size = 8 * 1024 * 1024;
        config.map_size = 1 << 30;
        let tuning = ConnectionTuning::from_config(&config);
        assert_eq!(tuning.cache_kib, 8 * 1024);
        assert_eq!(tuning.max_page_count(4096), (1 << 30) / 4096);
    }

    #[test]
    fn test_configure_connection_sets_pragmas() {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        set_page_size(&conn, 4096);
        let tuning = ConnectionTuning {
            cache_kib: 1024,
            map_size: 1 << 24,
        };
        configure_connection(&conn, &tuning);
        conn.execute_batch("CREATE TABLE t(x)").unwrap();
        limit_page_count(&conn, &tuning, 4096);

        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert_eq!(page_size(&conn).unwrap(), 4096);
        let max: i64 = conn
            .pragma_query_value(None, "max_page_count", |row| row.get(0))
            .unwrap();
        assert_eq!(max, (1 << 24) / 4096);
    }
}
