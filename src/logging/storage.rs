/// Local key/value persistence for log entries
///
/// The pipeline keeps one rolling key with the most recent entries and one key
/// per audit entry. [`SqliteStore`] is the on-disk implementation; it uses WAL
/// mode so a crash mid-write never corrupts previously persisted entries.
use super::entry::LogEntry;
use anyhow::{Context, Result};
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Rolling key holding the most recent entries as a JSON array
pub const ROLLING_LOG_KEY: &str = "calculator_logs";

/// Prefix of individually persisted audit entries
pub const AUDIT_KEY_PREFIX: &str = "audit_";

/// Context used in audit keys for entries without a calculator
pub const GENERAL_CONTEXT: &str = "general";

/// Database file name under the data directory
const DB_FILE_NAME: &str = "medscore-guard.db";

/// Key for one audit entry: `audit_<context>_<millis>_<entry id>`
pub fn audit_key(entry: &LogEntry) -> String {
    format!(
        "{}{}_{}_{}",
        AUDIT_KEY_PREFIX,
        entry.calculator_context.as_deref().unwrap_or(GENERAL_CONTEXT),
        entry.timestamp.timestamp_millis(),
        entry.id
    )
}

/// Local persistence backend
pub trait LocalStore: Send + Sync {
    /// Insert or replace a value
    fn put(&self, key: &str, value: &str) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns true if the key existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// SQLite-backed key/value store
pub struct SqliteStore {
    /// Database connection
    conn: Mutex<Connection>,

    /// Database file path (":memory:" for in-memory stores)
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create or open the store
    ///
    /// Without a path, tests get an in-memory database and everything else uses
    /// the platform data directory.
    pub fn new(db_path: Option<&Path>) -> Result<Self> {
        let is_test = cfg!(test) || std::env::var("MEDSCORE_GUARD_TEST_MODE").is_ok();

        let db_path = match db_path {
            Some(path) => path.to_path_buf(),
            None if is_test => PathBuf::from(":memory:"),
            None => Self::default_path()?,
        };

        // Ensure parent directory exists (skip for in-memory databases)
        if db_path.to_str() != Some(":memory:") {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create log storage directory")?;
            }
        }

        let conn = Connection::open(&db_path).context("Failed to open log storage database")?;

        // WAL keeps earlier writes intact if the process dies mid-write
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("Failed to set synchronous mode")?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        store.initialize_schema()?;

        Ok(store)
    }

    /// In-memory store
    pub fn in_memory() -> Result<Self> {
        Self::new(Some(Path::new(":memory:")))
    }

    /// Platform data directory location of the database
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("org", "medscore", "medscore-guard")
            .context("Could not determine a data directory for log storage")?;
        Ok(dirs.data_dir().join(DB_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize database schema
    fn initialize_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
            )
            .context("Failed to create log storage schema")?;

        Ok(())
    }
}

impl LocalStore for SqliteStore {
    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.conn()
            .execute(
                r#"
            INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
                params![key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to store key {}", key))?;

        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to load key {}", key))?;

        Ok(value)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to delete key {}", key))?;

        Ok(deleted > 0)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
            .context("Failed to prepare key listing query")?;

        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))
            .context("Failed to list keys")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read key row")?;

        Ok(keys)
    }
}

/// Entries under the rolling key, oldest first
pub fn load_rolling_entries(store: &dyn LocalStore) -> Result<Vec<LogEntry>> {
    match store.get(ROLLING_LOG_KEY)? {
        Some(json) => serde_json::from_str(&json).context("Persisted log entries are unreadable"),
        None => Ok(Vec::new()),
    }
}

fn entry_context(entry: &LogEntry) -> &str {
    entry.calculator_context.as_deref().unwrap_or(GENERAL_CONTEXT)
}

/// Every individually persisted audit entry, optionally for one calculator,
/// oldest first.
///
/// Unreadable entries are skipped with a warning.
pub fn load_audit_entries(store: &dyn LocalStore, calculator: Option<&str>) -> Result<Vec<LogEntry>> {
    let prefix = match calculator {
        Some(context) => format!("{}{}_", AUDIT_KEY_PREFIX, context),
        None => AUDIT_KEY_PREFIX.to_string(),
    };

    let mut entries = Vec::new();
    for key in store.keys_with_prefix(&prefix)? {
        let Some(json) = store.get(&key)? else {
            continue;
        };
        match serde_json::from_str::<LogEntry>(&json) {
            // The key prefix also matches longer contexts sharing the same start
            Ok(entry) if calculator.map_or(true, |c| entry_context(&entry) == c) => entries.push(entry),
            Ok(_) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Skipping unreadable audit entry"),
        }
    }

    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}
