// src/store/metadata.rs — Durable plugin descriptors (SQLite)

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::infra::lock;
use crate::runtime::types::PluginDescriptor;
use crate::store::schema;

/// Persistence for plugin descriptors, one record per unique name.
pub trait MetadataStore: Send + Sync {
    /// Insert or update a descriptor. `created_at` of an existing row is kept.
    fn upsert(&self, descriptor: &PluginDescriptor) -> anyhow::Result<()>;

    fn get(&self, name: &str) -> anyhow::Result<Option<PluginDescriptor>>;

    /// All descriptors ordered by name.
    fn list(&self) -> anyhow::Result<Vec<PluginDescriptor>>;

    /// Record a failed load. Identity fields of an existing row are kept;
    /// the row is marked not loaded and not enabled.
    fn record_load_error(
        &self,
        name: &str,
        artifact_file_name: &str,
        error: &str,
    ) -> anyhow::Result<()>;

    /// Delete a descriptor. Returns whether a row existed.
    fn delete(&self, name: &str) -> anyhow::Result<bool>;
}

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        schema::run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn row_to_descriptor(row: &Row<'_>) -> rusqlite::Result<PluginDescriptor> {
        Ok(PluginDescriptor {
            name: row.get(0)?,
            version: row.get(1)?,
            author: row.get(2)?,
            description: row.get(3)?,
            artifact_file_name: row.get(4)?,
            entry_point_name: row.get(5)?,
            enabled: row.get(6)?,
            loaded: row.get(7)?,
            last_error: row.get(8)?,
            created_at: parse_timestamp(&row.get::<_, String>(9)?),
            updated_at: parse_timestamp(&row.get::<_, String>(10)?),
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT name, version, author, description, artifact_file_name,
     entry_point_name, enabled, loaded, last_error, created_at, updated_at FROM plugins";

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert(&self, d: &PluginDescriptor) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        // Enforce enabled => loaded regardless of caller mistakes.
        let enabled = d.enabled && d.loaded;
        lock(&self.conn).execute(
            "INSERT INTO plugins (name, version, author, description, artifact_file_name,
                 entry_point_name, enabled, loaded, last_error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(name) DO UPDATE SET
                 version = excluded.version,
                 author = excluded.author,
                 description = excluded.description,
                 artifact_file_name = excluded.artifact_file_name,
                 entry_point_name = excluded.entry_point_name,
                 enabled = excluded.enabled,
                 loaded = excluded.loaded,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
            params![
                d.name,
                d.version,
                d.author,
                d.description,
                d.artifact_file_name,
                d.entry_point_name,
                enabled,
                d.loaded,
                d.last_error,
                now
            ],
        )?;
        Ok(())
    }

    fn get(&self, name: &str) -> anyhow::Result<Option<PluginDescriptor>> {
        let conn = lock(&self.conn);
        let descriptor = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE name = ?1"),
                params![name],
                Self::row_to_descriptor,
            )
            .optional()?;
        Ok(descriptor)
    }

    fn list(&self) -> anyhow::Result<Vec<PluginDescriptor>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY name"))?;
        let rows = stmt
            .query_map([], Self::row_to_descriptor)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn record_load_error(
        &self,
        name: &str,
        artifact_file_name: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        lock(&self.conn).execute(
            "INSERT INTO plugins (name, artifact_file_name, enabled, loaded, last_error,
                 created_at, updated_at)
             VALUES (?1, ?2, 0, 0, ?3, ?4, ?4)
             ON CONFLICT(name) DO UPDATE SET
                 artifact_file_name = excluded.artifact_file_name,
                 enabled = 0,
                 loaded = 0,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
            params![name, artifact_file_name, error, now],
        )?;
        Ok(())
    }

    fn delete(&self, name: &str) -> anyhow::Result<bool> {
        let changed = lock(&self.conn).execute("DELETE FROM plugins WHERE name = ?1", params![name])?;
        Ok(changed > 0)
    }
}
