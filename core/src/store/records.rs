//! Store methods for derived snapshot records.
//!
//! `replace_snapshot` is the only writer. It deletes and inserts all three
//! record sets of a (facility, month) inside one IMMEDIATE transaction, so
//! readers see either the old snapshot or the new one.

use super::{conversion_error, month_column, IncentiveStore};
use crate::{
    achievement::AchievementStatus,
    error::EngineResult,
    snapshot::{IndicatorRecord, RemunerationSummary, Snapshot, WorkerRecord},
    types::ReportingMonth,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};

#[derive(Debug)]
struct UnknownStatus(String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown achievement status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl IncentiveStore {
    pub fn replace_snapshot(&mut self, snapshot: &Snapshot) -> EngineResult<()> {
        let facility_id = snapshot.summary.facility_id.as_str();
        let month = snapshot.summary.month.to_string();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        for table in ["indicator_achievement", "worker_remuneration", "remuneration_summary"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE facility_id = ?1 AND month = ?2"),
                params![facility_id, month],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO indicator_achievement (
                    facility_id, month, indicator_code, policy, actual_value, target_value,
                    achievement_percentage, status, incentive_amount, ceiling_amount,
                    conditional_ceiling, default_denominator_used, issue_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for r in &snapshot.indicators {
                let issue_json = r.issue.as_ref().map(serde_json::to_string).transpose()?;
                stmt.execute(params![
                    facility_id,
                    month,
                    r.indicator_code,
                    r.policy,
                    r.actual_value,
                    r.target_value,
                    r.achievement_percentage,
                    r.status.as_str(),
                    r.incentive_amount,
                    r.ceiling_amount,
                    r.conditional_ceiling,
                    r.default_denominator_used,
                    issue_json,
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO worker_remuneration (
                    facility_id, month, worker_id, worker_type, role,
                    allocated_amount, performance_percentage, computed_amount
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for w in &snapshot.workers {
                stmt.execute(params![
                    facility_id,
                    month,
                    w.worker_id,
                    w.worker_type,
                    w.role,
                    w.allocated_amount,
                    w.performance_percentage,
                    w.computed_amount,
                ])?;
            }
        }

        let s = &snapshot.summary;
        tx.execute(
            "INSERT INTO remuneration_summary (
                facility_id, month, facility_type, total_facility_incentive,
                total_worker_remuneration, grand_total, performance_percentage,
                indicators_processed, indicators_skipped, computed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                facility_id,
                month,
                s.facility_type,
                s.total_facility_incentive,
                s.total_worker_remuneration,
                s.grand_total,
                s.performance_percentage,
                s.indicators_processed,
                s.indicators_skipped,
                s.computed_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn summary(
        &self,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<Option<RemunerationSummary>> {
        let summary = self
            .conn
            .query_row(
                "SELECT facility_id, month, facility_type, total_facility_incentive,
                        total_worker_remuneration, grand_total, performance_percentage,
                        indicators_processed, indicators_skipped, computed_at
                 FROM remuneration_summary WHERE facility_id = ?1 AND month = ?2",
                params![facility_id, month.to_string()],
                |row| {
                    let computed_at: String = row.get(9)?;
                    let computed_at = DateTime::parse_from_rfc3339(&computed_at)
                        .map_err(|e| conversion_error(9, e))?
                        .with_timezone(&Utc);
                    Ok(RemunerationSummary {
                        facility_id: row.get(0)?,
                        month: month_column(1, row.get(1)?)?,
                        facility_type: row.get(2)?,
                        total_facility_incentive: row.get(3)?,
                        total_worker_remuneration: row.get(4)?,
                        grand_total: row.get(5)?,
                        performance_percentage: row.get(6)?,
                        indicators_processed: row.get(7)?,
                        indicators_skipped: row.get(8)?,
                        computed_at,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    /// Indicator records of a snapshot, ordered by indicator code.
    pub fn indicator_records(
        &self,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<Vec<IndicatorRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT facility_id, month, indicator_code, policy, actual_value, target_value,
                    achievement_percentage, status, incentive_amount, ceiling_amount,
                    conditional_ceiling, default_denominator_used, issue_json
             FROM indicator_achievement
             WHERE facility_id = ?1 AND month = ?2
             ORDER BY indicator_code ASC",
        )?;
        let records = stmt
            .query_map(params![facility_id, month.to_string()], |row| {
                let status: String = row.get(7)?;
                let status = AchievementStatus::parse(&status)
                    .ok_or_else(|| conversion_error(7, UnknownStatus(status)))?;
                let issue_json: Option<String> = row.get(12)?;
                let issue = issue_json
                    .map(|j| serde_json::from_str(&j))
                    .transpose()
                    .map_err(|e| conversion_error(12, e))?;
                Ok(IndicatorRecord {
                    facility_id: row.get(0)?,
                    month: month_column(1, row.get(1)?)?,
                    indicator_code: row.get(2)?,
                    policy: row.get(3)?,
                    actual_value: row.get(4)?,
                    target_value: row.get(5)?,
                    achievement_percentage: row.get(6)?,
                    status,
                    incentive_amount: row.get(8)?,
                    ceiling_amount: row.get(9)?,
                    conditional_ceiling: row.get(10)?,
                    default_denominator_used: row.get(11)?,
                    issue,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Worker records of a snapshot, ordered by worker id.
    pub fn worker_records(
        &self,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<Vec<WorkerRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT facility_id, month, worker_id, worker_type, role,
                    allocated_amount, performance_percentage, computed_amount
             FROM worker_remuneration
             WHERE facility_id = ?1 AND month = ?2
             ORDER BY worker_id ASC",
        )?;
        let records = stmt
            .query_map(params![facility_id, month.to_string()], |row| {
                Ok(WorkerRecord {
                    facility_id: row.get(0)?,
                    month: month_column(1, row.get(1)?)?,
                    worker_id: row.get(2)?,
                    worker_type: row.get(3)?,
                    role: row.get(4)?,
                    allocated_amount: row.get(5)?,
                    performance_percentage: row.get(6)?,
                    computed_amount: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The persisted snapshot, or `None` when no summary exists.
    ///
    /// Reads happen in one transaction so a concurrent replace cannot
    /// produce a mixed view.
    pub fn load_snapshot(
        &self,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<Option<Snapshot>> {
        self.read_consistent(|s| {
            let Some(summary) = s.summary(facility_id, month)? else {
                return Ok(None);
            };
            Ok(Some(Snapshot {
                summary,
                indicators: s.indicator_records(facility_id, month)?,
                workers: s.worker_records(facility_id, month)?,
            }))
        })
    }

    /// Row counts (indicator, worker, summary) for one (facility, month).
    pub fn snapshot_row_counts(
        &self,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<(i64, i64, i64)> {
        let count = |table: &str| -> EngineResult<i64> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE facility_id = ?1 AND month = ?2"),
                params![facility_id, month.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        };
        Ok((
            count("indicator_achievement")?,
            count("worker_remuneration")?,
            count("remuneration_summary")?,
        ))
    }

    /// Total number of persisted summaries (for tests and the runner).
    pub fn summary_count(&self) -> EngineResult<i64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM remuneration_summary", [], |row| row.get(0))?;
        Ok(n)
    }
}
