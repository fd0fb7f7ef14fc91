//! SQLite-backed relational store.
//!
//! A single database holds the metadata tables (upload ledger, table
//! registry, samples, report definitions) together with every synthesized
//! table. [`Store`] owns a long-lived connection used by ingestion and the
//! ledger; [`Store::connect`] hands out fresh short-lived connections to
//! the same database for query execution.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::error::{Error, Result};

const METADATA_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS upload_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id TEXT NOT NULL UNIQUE,
    file_name TEXT NOT NULL,
    table_name TEXT NOT NULL,
    upload_timestamp TEXT NOT NULL,
    num_columns INTEGER NOT NULL,
    num_rows INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    title TEXT,
    description TEXT
);
CREATE INDEX IF NOT EXISTS upload_log_file_name ON upload_log (file_name);
CREATE TABLE IF NOT EXISTS table_registry (
    table_name TEXT PRIMARY KEY,
    columns TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS table_samples (
    table_name TEXT PRIMARY KEY
        REFERENCES table_registry (table_name) ON DELETE CASCADE,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    table_name TEXT NOT NULL
        REFERENCES table_registry (table_name) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Names owned by the metadata schema; synthesized tables may not use them.
pub const RESERVED_TABLES: &[&str] = &["upload_log", "table_registry", "table_samples", "reports"];

static MEMORY_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory(String),
}

#[derive(Debug)]
pub struct Store {
    location: Location,
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let location = Location::File(path.to_path_buf());
        let conn = open_location(&location)?;
        Self::initialise(location, conn)
    }

    /// Private in-memory database. Connections from [`Store::connect`] share
    /// it for as long as this store is alive.
    pub fn open_in_memory() -> Result<Self> {
        let id = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let uri = format!(
            "file:sheet_sql_mem_{}_{id}?mode=memory&cache=shared",
            std::process::id()
        );
        let location = Location::Memory(uri);
        let conn = open_location(&location)?;
        Self::initialise(location, conn)
    }

    fn initialise(location: Location, conn: Connection) -> Result<Self> {
        conn.execute_batch(METADATA_SCHEMA)?;
        debug!("Metadata schema ready at {location:?}");
        Ok(Self { location, conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Opens a new connection to the same database.
    pub fn connect(&self) -> Result<Connection> {
        open_location(&self.location)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Drops a synthesized table. Its registry entry goes with it, and the
    /// sample and report definitions cascade from the registry.
    pub fn drop_table(&self, name: &str) -> Result<bool> {
        ensure_not_reserved(name)?;
        let existed = self.table_exists(name)?;
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
        let registered = self.conn.execute(
            "DELETE FROM table_registry WHERE table_name = ?1",
            params![name],
        )?;
        debug!("Dropped table {name} (existed: {existed}, registered: {registered})");
        Ok(existed || registered > 0)
    }
}

fn open_location(location: &Location) -> Result<Connection> {
    let conn = match location {
        Location::File(path) => Connection::open(path)?,
        Location::Memory(uri) => Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?,
    };
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(conn)
}

pub fn ensure_not_reserved(name: &str) -> Result<()> {
    if RESERVED_TABLES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
        || name.to_ascii_lowercase().starts_with("sqlite_")
    {
        return Err(Error::Validation(format!(
            "Table name '{name}' is reserved"
        )));
    }
    Ok(())
}

/// Double-quotes an identifier, doubling any embedded quote.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
