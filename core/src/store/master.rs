//! Store methods for facility and worker master data.

use super::{FacilityRow, IncentiveStore, WorkerRow};
use crate::error::{EngineError, EngineResult};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

impl IncentiveStore {
    // ── Facilities ─────────────────────────────────────────────

    pub fn insert_facility(
        &self,
        facility_id: &str,
        name: &str,
        facility_type: &str,
    ) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO facility (facility_id, name, facility_type) VALUES (?1, ?2, ?3)
             ON CONFLICT(facility_id) DO UPDATE SET
                name = excluded.name, facility_type = excluded.facility_type",
            params![facility_id, name, facility_type],
        )?;
        Ok(())
    }

    pub fn get_facility(&self, facility_id: &str) -> EngineResult<Option<FacilityRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT facility_id, name, facility_type FROM facility WHERE facility_id = ?1",
                params![facility_id],
                |row| {
                    Ok(FacilityRow {
                        facility_id: row.get(0)?,
                        name: row.get(1)?,
                        facility_type: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Workers ────────────────────────────────────────────────

    /// Insert a roster row as-is. Collaborator import path; no cap check.
    pub fn insert_worker(&self, w: &WorkerRow) -> EngineResult<()> {
        self.conn.execute(
            "INSERT INTO worker (worker_id, facility_id, worker_type, name, active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![w.worker_id, w.facility_id, w.worker_type, w.name, w.active],
        )?;
        Ok(())
    }

    /// Active roster of a facility, ordered by worker id.
    pub fn active_workers(&self, facility_id: &str) -> EngineResult<Vec<WorkerRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT worker_id, facility_id, worker_type, name, active
             FROM worker WHERE facility_id = ?1 AND active = 1
             ORDER BY worker_id ASC",
        )?;
        let rows = stmt
            .query_map(params![facility_id], |row| {
                Ok(WorkerRow {
                    worker_id: row.get(0)?,
                    facility_id: row.get(1)?,
                    worker_type: row.get(2)?,
                    name: row.get(3)?,
                    active: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn active_worker_count(&self, facility_id: &str, worker_type: &str) -> EngineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM worker
             WHERE facility_id = ?1 AND worker_type = ?2 AND active = 1",
            params![facility_id, worker_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Activate (insert or re-activate) a worker unless `max_count` other
    /// workers of the same type are already active at the facility.
    /// The count and the write happen in one transaction.
    pub fn activate_worker_capped(
        &mut self,
        facility_id: &str,
        worker_id: &str,
        worker_type: &str,
        name: &str,
        max_count: u32,
    ) -> EngineResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let others: i64 = tx.query_row(
            "SELECT COUNT(*) FROM worker
             WHERE facility_id = ?1 AND worker_type = ?2 AND active = 1 AND worker_id <> ?3",
            params![facility_id, worker_type, worker_id],
            |row| row.get(0),
        )?;
        if others >= i64::from(max_count) {
            return Err(EngineError::WorkerCapExceeded {
                facility_id: facility_id.to_string(),
                worker_type: worker_type.to_string(),
                max_count,
            });
        }
        tx.execute(
            "INSERT INTO worker (worker_id, facility_id, worker_type, name, active)
             VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(worker_id) DO UPDATE SET
                facility_id = excluded.facility_id,
                worker_type = excluded.worker_type,
                name = excluded.name,
                active = 1",
            params![worker_id, facility_id, worker_type, name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Returns false when the worker does not exist.
    pub fn deactivate_worker(&self, worker_id: &str) -> EngineResult<bool> {
        let changed = self.conn.execute(
            "UPDATE worker SET active = 0 WHERE worker_id = ?1",
            params![worker_id],
        )?;
        Ok(changed > 0)
    }
}
