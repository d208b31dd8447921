//! Recalculation orchestrator: the transactional boundary of the engine.
//!
//! ORDER (fixed):
//!   1. Resolve the facility, its type and the applicable indicators.
//!   2. Per indicator: resolve operands, achievement, incentive.
//!   3. Facility performance percentage (policy from the facility type).
//!   4. Worker payouts for the active roster.
//!   5. Replace the persisted snapshot in one transaction.
//!
//! RULES:
//!   - Per-indicator problems are recorded on the indicator and never abort.
//!   - Snapshot-level problems abort before anything is written.
//!   - At most one recalculation per (facility, month) runs at a time.

use crate::{
    achievement::{self, AchievementStatus},
    config::{EngineConfig, FacilityTypeConfig, IndicatorConfig, PerformancePolicy},
    error::{EngineError, EngineResult, IndicatorIssue},
    field::FieldValues,
    remuneration,
    snapshot::{IndicatorRecord, Snapshot},
    store::IncentiveStore,
    types::{FacilityId, IndicatorCode, ReportingMonth},
    worker::{self, SkippedWorker},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One lock per (facility, month) key, shared by every recalculation that
/// may touch the same store.
#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<(FacilityId, ReportingMonth), Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, facility_id: &str, month: ReportingMonth) -> EngineResult<Arc<Mutex<()>>> {
        let mut slots = self.slots.lock().map_err(|_| EngineError::LockPoisoned {
            key: "lock registry".into(),
        })?;
        Ok(slots
            .entry((facility_id.to_string(), month))
            .or_default()
            .clone())
    }

    /// Drop the registry entry once the caller's clone is the last one
    /// outside the registry.
    fn release(&self, facility_id: &str, month: ReportingMonth, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&slot) == 2 {
            slots.remove(&(facility_id.to_string(), month));
        }
    }

    /// Number of keys currently holding a lock slot.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_else(|p| p.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IndicatorOutcome {
    Computed { code: IndicatorCode },
    /// Computed and paid, but flagged (e.g. a score outside its scale).
    Flagged { code: IndicatorCode, issue: IndicatorIssue },
    /// Recorded as zero with the reason.
    Skipped { code: IndicatorCode, issue: IndicatorIssue },
}

/// What the caller gets back: the persisted snapshot plus what happened to
/// each indicator and worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalcOutcome {
    pub snapshot: Snapshot,
    pub indicators: Vec<IndicatorOutcome>,
    pub skipped_workers: Vec<SkippedWorker>,
}

pub struct Recalculator<'a> {
    config: &'a EngineConfig,
    locks:  Arc<KeyLocks>,
}

impl<'a> Recalculator<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self::with_locks(config, Arc::new(KeyLocks::new()))
    }

    /// Share a lock registry with other recalculators over the same store.
    pub fn with_locks(config: &'a EngineConfig, locks: Arc<KeyLocks>) -> Self {
        Self { config, locks }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    pub fn locks(&self) -> Arc<KeyLocks> {
        Arc::clone(&self.locks)
    }

    /// Recompute and atomically replace the snapshot of one (facility, month).
    pub fn recalculate(
        &self,
        store: &mut IncentiveStore,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<RecalcOutcome> {
        let slot = self.locks.slot(facility_id, month)?;
        let result = self.recalculate_locked(&slot, store, facility_id, month);
        self.locks.release(facility_id, month, slot);
        result
    }

    fn recalculate_locked(
        &self,
        slot: &Mutex<()>,
        store: &mut IncentiveStore,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<RecalcOutcome> {
        let _guard = slot.lock().map_err(|_| EngineError::LockPoisoned {
            key: format!("{facility_id}/{month}"),
        })?;

        let outcome = self.compute(store, facility_id, month)?;
        store.replace_snapshot(&outcome.snapshot)?;

        let s = &outcome.snapshot.summary;
        log::info!(
            "facility={facility_id} month={month} recalc: {} indicators ({} skipped), \
             facility={:.2} workers={:.2} total={:.2} performance={:.1}%",
            s.indicators_processed,
            s.indicators_skipped,
            s.total_facility_incentive,
            s.total_worker_remuneration,
            s.grand_total,
            s.performance_percentage
        );
        Ok(outcome)
    }

    /// Compute a snapshot without writing anything.
    pub fn compute(
        &self,
        store: &IncentiveStore,
        facility_id: &str,
        month: ReportingMonth,
    ) -> EngineResult<RecalcOutcome> {
        let (facility, values, roster) = store.read_consistent(|s| {
            let facility = s
                .get_facility(facility_id)?
                .ok_or_else(|| EngineError::UnknownFacility { facility_id: facility_id.to_string() })?;
            let values = s.field_values_for(facility_id, month)?;
            let roster = s.active_workers(facility_id)?;
            Ok((facility, values, roster))
        })?;
        let facility_type = self
            .config
            .facility_type(&facility.facility_type)
            .ok_or_else(|| EngineError::UnknownFacilityType {
                facility_type: facility.facility_type.clone(),
            })?;

        let mut records = Vec::new();
        let mut outcomes = Vec::new();
        for indicator in self.config.applicable_indicators(&facility_type.id) {
            let (record, outcome) =
                self.indicator_record(indicator, facility_type, facility_id, month, &values);
            records.push(record);
            outcomes.push(outcome);
        }

        let performance = facility_performance(&facility_type.performance, &records)
            .map_err(|reason| EngineError::MissingPerformance {
                facility_id: facility_id.to_string(),
                reason,
            })?;

        let (workers, skipped_workers) = worker::worker_payouts(
            self.config,
            &facility_type.id,
            facility_id,
            month,
            &roster,
            performance,
        );

        let snapshot = Snapshot::assemble(
            facility_id,
            month,
            &facility_type.id,
            performance,
            records,
            workers,
            Utc::now(),
        );

        Ok(RecalcOutcome { snapshot, indicators: outcomes, skipped_workers })
    }

    fn indicator_record(
        &self,
        indicator: &IndicatorConfig,
        facility_type: &FacilityTypeConfig,
        facility_id: &str,
        month: ReportingMonth,
        values: &FieldValues,
    ) -> (IndicatorRecord, IndicatorOutcome) {
        let code = indicator.code.clone();
        let applied = self
            .config
            .ceiling(&facility_type.id, &indicator.code)
            .map(|c| remuneration::applied_ceiling(c, remuneration::condition_present(c, values)));

        let skipped = |issue: IndicatorIssue| {
            log::warn!("facility={facility_id} month={month} indicator {code} skipped: {issue}");
            (
                IndicatorRecord {
                    facility_id: facility_id.to_string(),
                    month,
                    indicator_code: code.clone(),
                    policy: indicator.target.label().to_string(),
                    actual_value: None,
                    target_value: None,
                    achievement_percentage: 0.0,
                    status: AchievementStatus::NotAchieved,
                    incentive_amount: 0.0,
                    ceiling_amount: applied.map(|a| a.amount),
                    conditional_ceiling: applied.is_some_and(|a| a.conditional),
                    default_denominator_used: false,
                    issue: Some(issue.clone()),
                },
                IndicatorOutcome::Skipped { code: code.clone(), issue },
            )
        };

        let Some(applied) = applied else {
            return skipped(IndicatorIssue::ConfigurationInconsistency {
                detail: format!(
                    "no remuneration ceiling for {} at facility type {}",
                    indicator.code, facility_type.id
                ),
            });
        };

        let resolved = match achievement::resolve_actual(indicator, facility_type, values) {
            Ok(r) => r,
            Err(issue) => return skipped(issue),
        };
        let result = match achievement::score(indicator, facility_type, resolved.value) {
            Ok(a) => a,
            Err(issue) => return skipped(issue),
        };

        let incentive = remuneration::indicator_incentive(&indicator.target, &result, applied.amount);

        log::debug!(
            "facility={facility_id} month={month} indicator {code}: actual={:.4} achievement={:.2}% incentive={incentive:.2}/{:.2}",
            result.actual_value,
            result.percentage,
            applied.amount
        );

        let outcome = match &result.flag {
            Some(issue) => IndicatorOutcome::Flagged { code: code.clone(), issue: issue.clone() },
            None => IndicatorOutcome::Computed { code: code.clone() },
        };

        (
            IndicatorRecord {
                facility_id: facility_id.to_string(),
                month,
                indicator_code: code.clone(),
                policy: indicator.target.label().to_string(),
                actual_value: Some(result.actual_value),
                target_value: result.target_value,
                achievement_percentage: result.percentage,
                status: result.status,
                incentive_amount: incentive,
                ceiling_amount: Some(applied.amount),
                conditional_ceiling: applied.conditional,
                default_denominator_used: resolved.default_denominator_used,
                issue: result.flag,
            },
            outcome,
        )
    }
}

/// Facility-level performance from the indicator records. Every processed
/// indicator counts, skipped ones as zero. Each percentage is capped at 100
/// before averaging.
pub fn facility_performance(
    policy: &PerformancePolicy,
    records: &[IndicatorRecord],
) -> Result<f64, String> {
    if records.is_empty() {
        return Err("no applicable indicators".into());
    }
    let capped = |r: &IndicatorRecord| r.achievement_percentage.clamp(0.0, 100.0);

    let (weighted_sum, total_weight) = match policy {
        PerformancePolicy::Average => (
            records.iter().map(capped).sum::<f64>(),
            records.len() as f64,
        ),
        PerformancePolicy::Weighted { weights } => records.iter().fold((0.0, 0.0), |(s, w), r| {
            let weight = weights.get(&r.indicator_code).copied().unwrap_or(0.0).max(0.0);
            (s + capped(r) * weight, w + weight)
        }),
    };

    if total_weight <= 0.0 {
        return Err("performance weights sum to zero".into());
    }
    Ok((weighted_sum / total_weight * 100.0).round() / 100.0)
}
