//! Storage capability
//!
//! The tracker never touches a concrete storage API. It reads and writes
//! string values through [`Storage`], addressed by a [`StorageScope`]:
//!
//! - [`StorageScope::Durable`] outlives the page and the process (browser
//!   `localStorage`, or the SQLite file used by the CLI)
//! - [`StorageScope::Tab`] lives exactly as long as the tab (browser
//!   `sessionStorage`, or process memory)
//!
//! Concurrent tabs sharing durable storage are not coordinated: the last
//! write wins.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Durable-scope key holding the client id
pub const CLIENT_ID_KEY: &str = "avila_client_id";
/// Durable-scope key holding the caller-provided user id
pub const USER_ID_KEY: &str = "avila_user_id";
/// Tab-scope key holding the JSON session record
pub const SESSION_KEY: &str = "avila_session";

/// Lifetime of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Survives tab close and restarts until explicitly cleared
    Durable,
    /// Torn down with the tab
    Tab,
}

impl StorageScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageScope::Durable => "durable",
            StorageScope::Tab => "tab",
        }
    }
}

/// Key/value storage injected into the tracker.
///
/// Implementations must be cheap to call from event handlers; every
/// envelope reads the client id and reads-then-writes the session record.
pub trait Storage: Send + Sync {
    /// Read a value, `Ok(None)` when the key is absent
    fn get(&self, scope: StorageScope, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one
    fn set(&self, scope: StorageScope, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing an absent key is not an error
    fn remove(&self, scope: StorageScope, key: &str) -> Result<()>;
}

/// Recover the guard from a poisoned lock; the maps hold plain strings
/// so a panicked writer cannot leave them half-updated.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================
// In-memory storage
// ============================================

/// Both scopes held in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    durable: Mutex<HashMap<String, String>>,
    tab: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every tab-scoped value, as closing the tab would
    pub fn close_tab(&self) {
        lock(&self.tab).clear();
    }

    /// Drop every durable value, as clearing site data would
    pub fn clear_durable(&self) {
        lock(&self.durable).clear();
    }

    fn map(&self, scope: StorageScope) -> &Mutex<HashMap<String, String>> {
        match scope {
            StorageScope::Durable => &self.durable,
            StorageScope::Tab => &self.tab,
        }
    }
}

impl Storage for MemoryStorage {
    fn get(&self, scope: StorageScope, key: &str) -> Result<Option<String>> {
        Ok(lock(self.map(scope)).get(key).cloned())
    }

    fn set(&self, scope: StorageScope, key: &str, value: &str) -> Result<()> {
        lock(self.map(scope)).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, scope: StorageScope, key: &str) -> Result<()> {
        lock(self.map(scope)).remove(key);
        Ok(())
    }
}

// ============================================
// SQLite-backed durable storage
// ============================================

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: durable key/value table
    r#"
    CREATE TABLE IF NOT EXISTS durable_kv (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  DATETIME NOT NULL
    );
    "#,
];

fn run_migrations(conn: &Connection) -> Result<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let target = idx as i32 + 1;
        if version < target {
            tracing::debug!(version = target, "Applying storage migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", target))?;
        }
    }
    Ok(())
}

/// Durable scope in a SQLite file, tab scope in memory.
///
/// The tab scope dies with the process, which is the closest analogue of a
/// browser tab outside the browser.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tab: Mutex<HashMap<String, String>>,
}

impl SqliteStorage {
    /// Open or create a storage database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            tab: Mutex::new(HashMap::new()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tab: Mutex::new(HashMap::new()),
        })
    }
}

impl Storage for SqliteStorage {
    fn get(&self, scope: StorageScope, key: &str) -> Result<Option<String>> {
        match scope {
            StorageScope::Tab => Ok(lock(&self.tab).get(key).cloned()),
            StorageScope::Durable => {
                let conn = lock(&self.conn);
                let value = conn
                    .query_row(
                        "SELECT value FROM durable_kv WHERE key = ?1",
                        [key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            }
        }
    }

    fn set(&self, scope: StorageScope, key: &str, value: &str) -> Result<()> {
        match scope {
            StorageScope::Tab => {
                lock(&self.tab).insert(key.to_string(), value.to_string());
                Ok(())
            }
            StorageScope::Durable => {
                let conn = lock(&self.conn);
                conn.execute(
                    r#"
                    INSERT INTO durable_kv (key, value, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                    rusqlite::params![key, value, chrono::Utc::now().to_rfc3339()],
                )?;
                Ok(())
            }
        }
    }

    fn remove(&self, scope: StorageScope, key: &str) -> Result<()> {
        match scope {
            StorageScope::Tab => {
                lock(&self.tab).remove(key);
                Ok(())
            }
            StorageScope::Durable => {
                let conn = lock(&self.conn);
                conn.execute("DELETE FROM durable_kv WHERE key = ?1", [key])?;
                Ok(())
            }
        }
    }
}

// ============================================
// Unavailable storage
// ============================================

/// Storage that always fails, like a browser with storage disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStorage;

impl Storage for UnavailableStorage {
    fn get(&self, scope: StorageScope, _key: &str) -> Result<Option<String>> {
        Err(Error::Storage(format!("{} storage is disabled", scope.as_str())))
    }

    fn set(&self, scope: StorageScope, _key: &str, _value: &str) -> Result<()> {
        Err(Error::Storage(format!("{} storage is disabled", scope.as_str())))
    }

    fn remove(&self, scope: StorageScope, _key: &str) -> Result<()> {
        Err(Error::Storage(format!("{} storage is disabled", scope.as_str())))
    }
}
