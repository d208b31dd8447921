//! Derived records for one (facility, month).
//!
//! A snapshot is the three record sets together. It is always replaced as
//! a whole; the summary totals are the sums of the detail records.

use crate::{
    achievement::AchievementStatus,
    error::IndicatorIssue,
    remuneration::facility_total,
    types::{round_money, FacilityId, FacilityTypeId, IndicatorCode, ReportingMonth, WorkerId, WorkerTypeId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    pub facility_id: FacilityId,
    pub month: ReportingMonth,
    pub indicator_code: IndicatorCode,
    pub policy: String,
    /// `None` when the indicator was skipped before a value was computed.
    pub actual_value: Option<f64>,
    pub target_value: Option<f64>,
    pub achievement_percentage: f64,
    pub status: AchievementStatus,
    pub incentive_amount: f64,
    /// `None` when no ceiling is configured for the facility type.
    pub ceiling_amount: Option<f64>,
    pub conditional_ceiling: bool,
    pub default_denominator_used: bool,
    pub issue: Option<IndicatorIssue>,
}

impl IndicatorRecord {
    pub fn is_skipped(&self) -> bool {
        self.issue.as_ref().is_some_and(|i| i.skips_indicator())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub facility_id: FacilityId,
    pub month: ReportingMonth,
    pub worker_id: WorkerId,
    pub worker_type: WorkerTypeId,
    pub role: String,
    pub allocated_amount: f64,
    pub performance_percentage: f64,
    pub computed_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemunerationSummary {
    pub facility_id: FacilityId,
    pub month: ReportingMonth,
    pub facility_type: FacilityTypeId,
    pub total_facility_incentive: f64,
    pub total_worker_remuneration: f64,
    pub grand_total: f64,
    pub performance_percentage: f64,
    pub indicators_processed: u32,
    pub indicators_skipped: u32,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub summary: RemunerationSummary,
    pub indicators: Vec<IndicatorRecord>,
    pub workers: Vec<WorkerRecord>,
}

impl Snapshot {
    /// Assemble a snapshot, deriving the summary totals from the records.
    pub fn assemble(
        facility_id: &str,
        month: ReportingMonth,
        facility_type: &str,
        performance_percentage: f64,
        indicators: Vec<IndicatorRecord>,
        workers: Vec<WorkerRecord>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        let total_facility_incentive = facility_total(indicators.iter().map(|r| &r.incentive_amount));
        let total_worker_remuneration =
            round_money(workers.iter().map(|r| r.computed_amount).sum());
        let indicators_skipped = indicators.iter().filter(|r| r.is_skipped()).count() as u32;

        Self {
            summary: RemunerationSummary {
                facility_id: facility_id.to_string(),
                month,
                facility_type: facility_type.to_string(),
                total_facility_incentive,
                total_worker_remuneration,
                grand_total: round_money(total_facility_incentive + total_worker_remuneration),
                performance_percentage,
                indicators_processed: indicators.len() as u32,
                indicators_skipped,
                computed_at,
            },
            indicators,
            workers,
        }
    }

    /// Summary totals equal the sums of the detail records.
    pub fn is_consistent(&self) -> bool {
        let ind = facility_total(self.indicators.iter().map(|r| &r.incentive_amount));
        let wrk = round_money(self.workers.iter().map(|r| r.computed_amount).sum());
        let s = &self.summary;
        (s.total_facility_incentive - ind).abs() < 0.005
            && (s.total_worker_remuneration - wrk).abs() < 0.005
            && (s.grand_total - round_money(ind + wrk)).abs() < 0.005
            && s.indicators_processed as usize == self.indicators.len()
    }
}
