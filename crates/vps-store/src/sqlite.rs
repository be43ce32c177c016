use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use vps_common::{Expiry, InstanceRecord, PortMapping};

use crate::{InstanceStore, Result, StoreError};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS vps_instances (
    user            TEXT NOT NULL,
    container_name  TEXT PRIMARY KEY,
    ssh_command     TEXT,
    ram_limit       TEXT NOT NULL,
    cpu_limit       TEXT NOT NULL,
    creator         TEXT NOT NULL,
    os_type         TEXT NOT NULL,
    expiry          TEXT,
    ports           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vps_instances_user ON vps_instances(user);
CREATE TABLE IF NOT EXISTS admins (
    user TEXT PRIMARY KEY
);
";

/// SQLite-backed store. One connection behind a mutex: writes serialize at
/// the store boundary, and every call runs on the blocking pool so the
/// request loop never waits on database I/O.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Backend(format!("cannot open {}: {e}", path.display())))?;

        let _mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))
            .map_err(|e| StoreError::Backend(format!("cannot set WAL mode: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::Backend(format!("cannot apply schema: {e}")))?;

        info!(path = %path.display(), "Opened instance database");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Backend(format!("cannot open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::Backend(format!("cannot apply schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
    }
}

fn encode_expiry(expiry: Option<Expiry>) -> Option<String> {
    match expiry {
        None => None,
        Some(Expiry::Never) => Some("never".to_string()),
        Some(Expiry::At(ts)) => Some(ts.to_rfc3339()),
    }
}

fn decode_expiry(raw: Option<String>) -> Result<Option<Expiry>> {
    match raw.as_deref() {
        None => Ok(None),
        Some("never") => Ok(Some(Expiry::Never)),
        Some(text) => {
            let ts = DateTime::parse_from_rfc3339(text)
                .map_err(|e| StoreError::Backend(format!("bad expiry column '{text}': {e}")))?;
            Ok(Some(Expiry::At(ts.with_timezone(&Utc))))
        }
    }
}

// Column order matches the table definition.
type RawRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_record(raw: RawRow) -> Result<InstanceRecord> {
    let (owner, container_name, ssh_command, ram_limit, cpu_limit, creator, os_type, expiry, ports) =
        raw;
    let ports: Vec<PortMapping> = serde_json::from_str(&ports)
        .map_err(|e| StoreError::Backend(format!("bad ports column for {container_name}: {e}")))?;
    Ok(InstanceRecord {
        owner,
        container_name,
        ssh_command,
        ram_limit,
        cpu_limit,
        creator,
        os_type,
        expiry: decode_expiry(expiry)?,
        ports,
    })
}

fn map_sql_err(name: &str, err: rusqlite::Error) -> StoreError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::Duplicate(name.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl InstanceStore for SqliteStore {
    async fn insert(&self, record: &InstanceRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let ports = serde_json::to_string(&record.ports)
                .map_err(|e| StoreError::Backend(format!("cannot encode ports: {e}")))?;
            conn.execute(
                "INSERT INTO vps_instances \
                 (user, container_name, ssh_command, ram_limit, cpu_limit, creator, os_type, expiry, ports) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.owner,
                    record.container_name,
                    record.ssh_command,
                    record.ram_limit,
                    record.cpu_limit,
                    record.creator,
                    record.os_type,
                    encode_expiry(record.expiry),
                    ports,
                ],
            )
            .map_err(|e| map_sql_err(&record.container_name, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM vps_instances WHERE container_name = ?1", [&name])
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn update_credential(&self, name: &str, credential: &str) -> Result<()> {
        let name = name.to_string();
        let credential = credential.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE vps_instances SET ssh_command = ?1 WHERE container_name = ?2",
                    params![credential, name],
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            if changed == 0 {
                return Err(StoreError::NotFound(name));
            }
            Ok(())
        })
        .await
    }

    async fn get(&self, name: &str) -> Result<Option<InstanceRecord>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let raw = conn
                .query_row(
                    "SELECT user, container_name, ssh_command, ram_limit, cpu_limit, \
                     creator, os_type, expiry, ports \
                     FROM vps_instances WHERE container_name = ?1",
                    [&name],
                    read_raw,
                )
                .optional()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            raw.map(decode_record).transpose()
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<InstanceRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT user, container_name, ssh_command, ram_limit, cpu_limit, \
                     creator, os_type, expiry, ports FROM vps_instances",
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map([], read_raw)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.map(|raw| {
                raw.map_err(|e| StoreError::Backend(e.to_string()))
                    .and_then(decode_record)
            })
            .collect()
        })
        .await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<InstanceRecord>> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT user, container_name, ssh_command, ram_limit, cpu_limit, \
                     creator, os_type, expiry, ports FROM vps_instances WHERE user = ?1",
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map([&owner], read_raw)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.map(|raw| {
                raw.map_err(|e| StoreError::Backend(e.to_string()))
                    .and_then(decode_record)
            })
            .collect()
        })
        .await
    }

    async fn count_by_owner(&self, owner: &str) -> Result<usize> {
        let owner = owner.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM vps_instances WHERE user = ?1",
                    [&owner],
                    |row| row.get(0),
                )
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(count as usize)
        })
        .await
    }

    async fn count_all(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM vps_instances", [], |row| row.get(0))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(count as usize)
        })
        .await
    }

    async fn grant_admin(&self, user: &str) -> Result<()> {
        let user = user.to_string();
        self.with_conn(move |conn| {
            conn.execute("INSERT OR IGNORE INTO admins (user) VALUES (?1)", [&user])
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn list_admins(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT user FROM admins ORDER BY user")
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await
    }
}
