//! Bulk recomputation over every (facility, month) with submitted data.
//!
//! Each unit is its own transaction. A failed unit is reported and the run
//! moves on; cancellation stops before the next unit starts and never
//! interrupts one that is already writing. No retries.

use crate::{
    error::{EngineError, EngineResult},
    recalc::Recalculator,
    store::IncentiveStore,
    types::{FacilityId, ReportingMonth},
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Cooperative cancellation flag, cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitKey {
    pub facility_id: FacilityId,
    pub month: ReportingMonth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub facility_id: FacilityId,
    pub month: ReportingMonth,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkReport {
    pub run_id: Uuid,
    pub succeeded: Vec<UnitKey>,
    pub failed: Vec<BulkFailure>,
    /// Units never started because the run was cancelled.
    pub not_started: Vec<UnitKey>,
    pub cancelled: bool,
}

impl BulkReport {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            succeeded: Vec::new(),
            failed: Vec::new(),
            not_started: Vec::new(),
            cancelled: false,
        }
    }

    fn record(&mut self, facility_id: FacilityId, month: ReportingMonth, result: EngineResult<()>) {
        match result {
            Ok(()) => self.succeeded.push(UnitKey { facility_id, month }),
            Err(e) => {
                log::warn!("facility={facility_id} month={month} bulk run {}: failed: {e}", self.run_id);
                self.failed.push(BulkFailure { facility_id, month, error: e.to_string() });
            }
        }
    }

    fn sort(&mut self) {
        let key = |k: &UnitKey| (k.facility_id.clone(), k.month);
        self.succeeded.sort_by_key(key);
        self.not_started.sort_by_key(key);
        self.failed.sort_by_key(|f| (f.facility_id.clone(), f.month));
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.not_started.len()
    }
}

/// Recompute every key sequentially on the given connection.
pub fn recompute_all(
    recalc: &Recalculator<'_>,
    store: &mut IncentiveStore,
    cancel: &CancelToken,
) -> EngineResult<BulkReport> {
    let keys = store.submitted_keys()?;
    let mut report = BulkReport::new();
    log::info!("bulk run {}: {} unit(s), sequential", report.run_id, keys.len());

    let mut pending = keys.into_iter();
    for (facility_id, month) in pending.by_ref() {
        if cancel.is_cancelled() {
            report.cancelled = true;
            report.not_started.push(UnitKey { facility_id, month });
            break;
        }
        let result = recalc.recalculate(store, &facility_id, month).map(|_| ());
        report.record(facility_id, month, result);
    }
    report
        .not_started
        .extend(pending.map(|(facility_id, month)| UnitKey { facility_id, month }));

    finish(&report);
    Ok(report)
}

/// Recompute every key on up to `threads` workers, each with its own
/// connection to the same database file. In-memory stores cannot be shared
/// between connections, so they run sequentially.
pub fn recompute_all_parallel(
    recalc: &Recalculator<'_>,
    store: &mut IncentiveStore,
    threads: usize,
    cancel: &CancelToken,
) -> EngineResult<BulkReport> {
    if threads <= 1 || store.is_in_memory() {
        return recompute_all(recalc, store, cancel);
    }

    let keys = store.submitted_keys()?;
    let run = Mutex::new(BulkReport::new());
    let queue = Mutex::new(keys.into_iter().collect::<VecDeque<_>>());
    let run_id = lock(&run)?.run_id;
    log::info!("bulk run {run_id}: {} unit(s), {threads} thread(s)", lock(&queue)?.len());

    let mut connections = Vec::with_capacity(threads);
    for _ in 0..threads {
        connections.push(store.reopen()?);
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = connections
            .into_iter()
            .map(|mut conn| {
                let (run, queue) = (&run, &queue);
                scope.spawn(move || -> EngineResult<()> {
                    loop {
                        let Some((facility_id, month)) = lock(queue)?.pop_front() else {
                            return Ok(());
                        };
                        if cancel.is_cancelled() {
                            let mut report = lock(run)?;
                            report.cancelled = true;
                            report.not_started.push(UnitKey { facility_id, month });
                            continue;
                        }
                        let result = recalc.recalculate(&mut conn, &facility_id, month).map(|_| ());
                        lock(run)?.record(facility_id, month, result);
                    }
                })
            })
            .collect();

        handles.into_iter().try_for_each(|h| {
            h.join()
                .map_err(|_| EngineError::Other(anyhow::anyhow!("bulk run {run_id}: worker thread panicked")))?
        })
    })?;

    let mut report = run
        .into_inner()
        .map_err(|_| EngineError::LockPoisoned { key: format!("bulk run {run_id}") })?;
    report.sort();
    finish(&report);
    Ok(report)
}

fn lock<T>(m: &Mutex<T>) -> EngineResult<std::sync::MutexGuard<'_, T>> {
    m.lock().map_err(|_| EngineError::LockPoisoned { key: "bulk run state".into() })
}

fn finish(report: &BulkReport) {
    log::info!(
        "bulk run {}: {} succeeded, {} failed, {} not started{}",
        report.run_id,
        report.succeeded.len(),
        report.failed.len(),
        report.not_started.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
}
