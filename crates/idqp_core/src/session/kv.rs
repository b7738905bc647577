use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};

use crate::error::AppError;

/// Durable string key-value storage used for the session.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    /// Apply every entry or none: `Some` writes the value, `None` removes the key.
    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), AppError>;
}

pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

/// Layout version stamped into `PRAGMA user_version`. 0 is a fresh file.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
  CREATE TABLE IF NOT EXISTS session_kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
  );
"#;

impl SqliteKeyValueStore {
    /// Open (creating when missing) a session database file.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::storage("DB_PATH_FAILED", "Failed to create session directory")
                    .with_details(format!("path={}; err={}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| {
            AppError::storage("DB_OPEN_FAILED", "Failed to open session database")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AppError::storage("DB_OPEN_FAILED", "Failed to open in-memory session database")
                .with_details(e.to_string())
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, AppError> {
        ensure_schema(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Bring a session file up to `SCHEMA_VERSION`. A file stamped by a newer client is refused
/// rather than rewritten.
fn ensure_schema(conn: &mut Connection) -> Result<(), AppError> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| {
            AppError::storage("DB_SCHEMA_READ_FAILED", "Failed to read session schema version")
                .with_details(e.to_string())
        })?;

    if version > SCHEMA_VERSION {
        return Err(AppError::storage(
            "DB_SCHEMA_TOO_NEW",
            "Session database was written by a newer client",
        )
        .with_details(format!("user_version={version}; supported={SCHEMA_VERSION}")));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction().map_err(|e| {
        AppError::storage("DB_TX_FAILED", "Failed to start schema transaction")
            .with_details(e.to_string())
    })?;
    tx.execute_batch(SCHEMA_V1)
        .and_then(|_| tx.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}")))
        .map_err(|e| {
            AppError::storage("DB_SCHEMA_FAILED", "Failed to create session schema")
                .with_details(e.to_string())
        })?;
    tx.commit().map_err(|e| {
        AppError::storage("DB_TX_FAILED", "Failed to commit schema transaction")
            .with_details(e.to_string())
    })?;
    tracing::debug!(from = version, to = SCHEMA_VERSION, "initialised session schema");
    Ok(())
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM session_kv WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| {
            AppError::storage("DB_QUERY_FAILED", "Failed to read session value")
                .with_details(format!("key={key}; err={e}"))
        })
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), AppError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| {
            AppError::storage("DB_TX_FAILED", "Failed to start session transaction")
                .with_details(e.to_string())
        })?;

        for (key, value) in entries {
            let res = match value {
                Some(value) => tx.execute(
                    r#"
          INSERT INTO session_kv(key, value, updated_at)
          VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ','now'))
          ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
          "#,
                    [key, value],
                ),
                None => tx.execute("DELETE FROM session_kv WHERE key = ?1", [key]),
            };
            res.map_err(|e| {
                AppError::storage("DB_WRITE_FAILED", "Failed to write session value")
                    .with_details(format!("key={key}; err={e}"))
            })?;
        }

        tx.commit().map_err(|e| {
            AppError::storage("DB_TX_FAILED", "Failed to commit session transaction")
                .with_details(e.to_string())
        })
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), AppError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            match value {
                Some(value) => {
                    map.insert(key.to_string(), value.to_string());
                }
                None => {
                    map.remove(*key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn user_version(path: &Path) -> i64 {
        Connection::open(path)
            .unwrap()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn fresh_file_is_stamped_and_reopened_as_is() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("session.sqlite");

        let store = SqliteKeyValueStore::open(&path).expect("create");
        store.write_batch(&[("token", Some("a"))]).expect("write");
        drop(store);
        assert_eq!(user_version(&path), SCHEMA_VERSION);

        let store = SqliteKeyValueStore::open(&path).expect("reopen");
        assert_eq!(store.get("token").unwrap().as_deref(), Some("a"));
        assert_eq!(user_version(&path), SCHEMA_VERSION);
    }

    #[test]
    fn newer_schema_is_refused() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("session.sqlite");
        Connection::open(&path)
            .unwrap()
            .execute_batch("PRAGMA user_version = 7")
            .unwrap();

        let err = SqliteKeyValueStore::open(&path).err().expect("too new");
        assert_eq!(err.code, "DB_SCHEMA_TOO_NEW");
        assert_eq!(user_version(&path), 7);
    }

    #[test]
    fn sqlite_store_overwrites_and_removes() {
        let store = SqliteKeyValueStore::open_in_memory().expect("open");
        store
            .write_batch(&[("token", Some("a")), ("identifier", Some("x@example.com"))])
            .expect("write");
        store.write_batch(&[("token", Some("b"))]).expect("overwrite");
        assert_eq!(store.get("token").unwrap().as_deref(), Some("b"));

        store.write_batch(&[("token", None)]).expect("remove");
        assert_eq!(store.get("token").unwrap(), None);
        assert_eq!(store.get("identifier").unwrap().as_deref(), Some("x@example.com"));
    }

    #[test]
    fn removing_missing_key_is_not_an_error() {
        let store = SqliteKeyValueStore::open_in_memory().expect("open");
        store.write_batch(&[("nope", None)]).expect("remove");
        let mem = MemoryKeyValueStore::new();
        mem.write_batch(&[("nope", None)]).expect("remove");
    }
}
