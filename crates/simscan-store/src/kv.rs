//! Embedded KV engine on SQLite.
//!
//! One `kv(key TEXT PRIMARY KEY, value BLOB)` table provides the logical
//! contract the store needs: atomic per-key writes, ordered key-only
//! prefix scans, transactions spanning multiple keys, point deletes.

use crate::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Single-connection engine: one writer at a time, enforced by the lock;
/// SQLite's transactional semantics guarantee per-key atomicity.
#[derive(Debug)]
pub struct KvEngine {
    conn: Mutex<Connection>,
}

impl KvEngine {
    /// Open (or create) the database file and apply pragmas.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory engine for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// All keys with the given prefix, in lexicographic order. Values are
    /// not read, so enumerating a step index is O(count).
    pub fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let upper = prefix_upper_bound(prefix);
        let mut stmt =
            conn.prepare("SELECT key FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, upper], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Run `f` inside one transaction. Every mutation in `f` commits
    /// together or not at all.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&KvTransaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let result = f(&KvTransaction { tx: &tx })?;
        tx.commit()?;
        Ok(result)
    }
}

/// Mutation handle passed to [`KvEngine::with_tx`] closures.
pub struct KvTransaction<'a> {
    tx: &'a rusqlite::Transaction<'a>,
}

impl KvTransaction<'_> {
    pub fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.tx
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let upper = prefix_upper_bound(prefix);
        let n = self.tx.execute(
            "DELETE FROM kv WHERE key >= ?1 AND key < ?2",
            params![prefix, upper],
        )?;
        Ok(n)
    }

    pub fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let upper = prefix_upper_bound(prefix);
        let mut stmt = self
            .tx
            .prepare("SELECT key FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, upper], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

/// Smallest string greater than every string with the given prefix.
/// Both bounds must stay TEXT: SQLite orders every BLOB above every
/// TEXT value. Store prefixes always end in ASCII `/`, so bumping the
/// final byte yields a valid UTF-8 upper bound.
fn prefix_upper_bound(prefix: &str) -> String {
    let mut bytes = prefix.as_bytes().to_vec();
    let last = bytes.last_mut().expect("prefix is never empty");
    debug_assert!(last.is_ascii(), "store prefixes end in ASCII");
    *last += 1;
    String::from_utf8(bytes).expect("bumped ASCII byte stays UTF-8")
}
