use crate::types::{FacilityId, FacilityTypeId, FieldId, WorkerTypeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot-level failures. Any of these aborts the recalculation of a
/// (facility, month) with nothing written.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Facility '{facility_id}' not found")]
    UnknownFacility { facility_id: FacilityId },

    #[error("Facility type '{facility_type}' has no configuration")]
    UnknownFacilityType { facility_type: FacilityTypeId },

    #[error("Performance percentage unavailable for facility '{facility_id}': {reason}")]
    MissingPerformance { facility_id: FacilityId, reason: String },

    #[error("Recalculation lock for {key} is poisoned")]
    LockPoisoned { key: String },

    #[error("Worker type '{worker_type}' at facility '{facility_id}' already has {max_count} active worker(s)")]
    WorkerCapExceeded {
        facility_id: FacilityId,
        worker_type: WorkerTypeId,
        max_count:   u32,
    },

    #[error("Worker type '{worker_type}' is not configured for facility type '{facility_type}'")]
    UnknownWorkerType {
        facility_type: FacilityTypeId,
        worker_type:   WorkerTypeId,
    },

    #[error("Invalid reporting month '{value}', expected YYYY-MM")]
    InvalidMonth { value: String },

    #[error("Recalculation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Per-indicator conditions. They are recorded on the indicator's record and
/// never abort the facility snapshot.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IndicatorIssue {
    #[error("operand '{alias}' has no value for the month (field {field_id:?})")]
    MissingOperand { alias: char, field_id: Option<FieldId> },

    #[error("denominator has no usable value for the month (field {field_id:?})")]
    MissingDenominator { field_id: Option<FieldId> },

    #[error("field '{field_id}' holds a non-numeric value")]
    NonNumericOperand { field_id: FieldId },

    #[error("unrecognised formula '{formula}': {reason}")]
    UnknownFormula { formula: String, reason: String },

    #[error("configuration inconsistency: {detail}")]
    ConfigurationInconsistency { detail: String },

    #[error("value {value} outside [{min}, {max}]")]
    OutOfRange { value: f64, min: f64, max: f64 },
}

impl IndicatorIssue {
    /// Whether the indicator's computed values are unusable. An out-of-range
    /// score is still computed and paid, only flagged.
    pub fn skips_indicator(&self) -> bool {
        !matches!(self, IndicatorIssue::OutOfRange { .. })
    }
}
