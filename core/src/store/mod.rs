//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Calculators and the recalculation orchestrator call store methods;
//! they never execute SQL directly.

mod field_value;
mod master;
mod records;

use crate::{
    error::EngineResult,
    types::{FacilityId, FacilityTypeId, ReportingMonth, WorkerId, WorkerTypeId},
};
use rusqlite::{types::Type, Connection};
use std::time::Duration;

/// How long a writer waits for another connection's transaction.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct IncentiveStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacilityRow {
    pub facility_id: FacilityId,
    pub name: String,
    pub facility_type: FacilityTypeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRow {
    pub worker_id: WorkerId,
    pub facility_id: FacilityId,
    pub worker_type: WorkerTypeId,
    pub name: String,
    pub active: bool,
}

impl IncentiveStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> EngineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// True when other connections cannot see this database.
    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Run several reads against one consistent view of the database.
    pub fn read_consistent<T>(&self, reads: impl FnOnce(&Self) -> EngineResult<T>) -> EngineResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = reads(self)?;
        tx.commit()?;
        Ok(out)
    }

    /// Apply all schema migrations in order. Safe to run repeatedly.
    pub fn migrate(&self) -> EngineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_master_data.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_field_values.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_remuneration_snapshot.sql"))?;
        Ok(())
    }
}

/// Parse a stored YYYY-MM column inside a row mapper.
fn month_column(idx: usize, raw: String) -> rusqlite::Result<ReportingMonth> {
    raw.parse::<ReportingMonth>().map_err(|e| conversion_error(idx, e))
}

/// Wrap a non-SQL decoding failure as a conversion error for column `idx`.
fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}
