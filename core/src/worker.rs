//! Worker remuneration calculator and roster activation.
//!
//! Performance-based workers are paid `allocated × performance / 100`,
//! rounded to cents and never above the allocation. Team-based roles are
//! not paid here. The per-type `max_count` is a roster rule enforced when a
//! worker is activated, never at payout time.

use crate::{
    config::{AllocationBasis, EngineConfig, WorkerClass},
    error::{EngineError, EngineResult},
    snapshot::WorkerRecord,
    store::{IncentiveStore, WorkerRow},
    types::{round_money, ReportingMonth, WorkerId, WorkerTypeId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerSkipReason {
    TeamBased,
    /// No allocation exists for the worker's type at this facility type.
    Unconfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedWorker {
    pub worker_id: WorkerId,
    pub worker_type: WorkerTypeId,
    pub reason: WorkerSkipReason,
}

/// Payout for one performance-based worker.
pub fn performance_payout(allocated_amount: f64, performance_percentage: f64) -> f64 {
    let fraction = (performance_percentage / 100.0).clamp(0.0, 1.0);
    round_money(allocated_amount * fraction).min(allocated_amount)
}

/// Equal share of a pooled amount, floored to the cent so the shares never
/// add up to more than the pool.
pub fn pooled_share(pool: f64, workers: usize) -> f64 {
    let cents = (pool * 100.0).round() as i64;
    (cents / workers.max(1) as i64) as f64 / 100.0
}

/// Compute worker records for every active worker at a facility.
pub fn worker_payouts(
    config: &EngineConfig,
    facility_type: &str,
    facility_id: &str,
    month: ReportingMonth,
    workers: &[WorkerRow],
    performance_percentage: f64,
) -> (Vec<WorkerRecord>, Vec<SkippedWorker>) {
    let mut active_per_type: BTreeMap<&str, usize> = BTreeMap::new();
    for w in workers.iter().filter(|w| w.active) {
        *active_per_type.entry(w.worker_type.as_str()).or_default() += 1;
    }

    let mut records = Vec::new();
    let mut skipped = Vec::new();

    for w in workers.iter().filter(|w| w.active) {
        let Some(alloc) = config.allocation(facility_type, &w.worker_type) else {
            log::warn!(
                "facility={facility_id} month={month} worker {} has unconfigured type {}",
                w.worker_id,
                w.worker_type
            );
            skipped.push(SkippedWorker {
                worker_id: w.worker_id.clone(),
                worker_type: w.worker_type.clone(),
                reason: WorkerSkipReason::Unconfigured,
            });
            continue;
        };

        if alloc.class == WorkerClass::TeamBased {
            skipped.push(SkippedWorker {
                worker_id: w.worker_id.clone(),
                worker_type: w.worker_type.clone(),
                reason: WorkerSkipReason::TeamBased,
            });
            continue;
        }

        let allocated_amount = match alloc.basis {
            AllocationBasis::PerWorker => alloc.allocated_amount,
            AllocationBasis::Pooled => {
                let n = active_per_type
                    .get(w.worker_type.as_str())
                    .copied()
                    .unwrap_or(1)
                    .max(1);
                pooled_share(alloc.allocated_amount, n)
            }
        };

        records.push(WorkerRecord {
            facility_id: facility_id.to_string(),
            month,
            worker_id: w.worker_id.clone(),
            worker_type: w.worker_type.clone(),
            role: alloc.role.clone(),
            allocated_amount,
            performance_percentage,
            computed_amount: performance_payout(allocated_amount, performance_percentage),
        });
    }

    records.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
    skipped.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
    (records, skipped)
}

/// A worker to put on (or return to) a facility roster.
#[derive(Debug, Clone)]
pub struct NewWorker {
    pub worker_id: WorkerId,
    pub worker_type: WorkerTypeId,
    pub name: String,
}

/// Activate a worker at a facility, refusing once the worker type already
/// has `max_count` active workers there.
pub fn activate_worker(
    store: &mut IncentiveStore,
    config: &EngineConfig,
    facility_id: &str,
    worker: &NewWorker,
) -> EngineResult<()> {
    let facility = store
        .get_facility(facility_id)?
        .ok_or_else(|| EngineError::UnknownFacility { facility_id: facility_id.to_string() })?;
    let alloc = config
        .allocation(&facility.facility_type, &worker.worker_type)
        .ok_or_else(|| EngineError::UnknownWorkerType {
            facility_type: facility.facility_type.clone(),
            worker_type: worker.worker_type.clone(),
        })?;

    store.activate_worker_capped(
        facility_id,
        &worker.worker_id,
        &worker.worker_type,
        &worker.name,
        alloc.max_count,
    )?;
    log::info!(
        "facility={facility_id} roster: activated {} as {}",
        worker.worker_id,
        alloc.role
    );
    Ok(())
}
