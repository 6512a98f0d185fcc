use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::error::VendorPulseError;
use crate::schema::CREATE_SCHEMA_SQL;

const SCHEMA_VERSION: &str = "1";

/// Wrapper around the single SQLite store shared by all pipeline stages.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self, VendorPulseError> {
        let conn = Connection::open(db_path.as_ref())?;
        let db = Self { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    /// In-memory store, used by tests and by `--dry-run` style invocations.
    pub fn open_in_memory() -> Result<Self, VendorPulseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn ensure_schema(&self) -> Result<(), VendorPulseError> {
        let table_exists: bool = self
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='meta'",
                [],
                |row| row.get::<_, i32>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false);

        if !table_exists {
            self.conn.execute_batch(CREATE_SCHEMA_SQL)?;
            return Ok(());
        }

        let stored_version: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored_version.as_deref() {
            Some(SCHEMA_VERSION) => Ok(()),
            Some(other) => Err(VendorPulseError::Error(format!(
                "Schema version mismatch: found '{other}', expected '{SCHEMA_VERSION}'"
            ))),
            None => Err(VendorPulseError::Error(
                "Schema version missing".to_string(),
            )),
        }
    }

    /// Publishes a freshly built derived table.
    ///
    /// Stages write into `<table>_staging` and call this to swap it over the
    /// published table inside one transaction. Readers either see the old
    /// table or the new one, never a half-written rebuild, and a failed
    /// build leaves the previous table untouched.
    pub fn swap_staging(&mut self, table: &str) -> Result<(), VendorPulseError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};\n\
             ALTER TABLE {table}_staging RENAME TO {table};"
        ))?;
        tx.commit()?;
        Ok(())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, VendorPulseError> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE type='table' AND name = ?",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn row_count(&self, table: &str) -> Result<i64, VendorPulseError> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
        Ok(count)
    }
}
