//! Engine configuration: indicators, facility types, remuneration ceilings
//! and worker allocations.
//!
//! RULE: configuration is loaded once and passed into the engine as a value.
//! Nothing in the engine keeps process-wide caches of it, and nothing ever
//! dispatches on a facility type's display label.

use crate::{
    formula::{Alias, Formula, FormulaError},
    types::{FacilityTypeId, FieldId, IndicatorCode, WorkerTypeId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ── Indicators ─────────────────────────────────────────────────────

/// Inclusive achievement bounds `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

/// How a binary indicator decides "achieved".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BinaryCondition {
    /// Any nonzero actual value.
    #[default]
    NonZero,
    /// Actual value at or above `threshold`.
    AtLeast { threshold: f64 },
}

impl BinaryCondition {
    pub fn is_met(&self, actual: f64) -> bool {
        match self {
            BinaryCondition::NonZero => actual != 0.0,
            BinaryCondition::AtLeast { threshold } => actual >= *threshold,
        }
    }
}

/// Target-evaluation policy of an indicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetPolicy {
    Binary {
        #[serde(default)]
        condition: BinaryCondition,
    },
    /// Absolute count compared against `[min, max]`.
    Range { min: f64, max: f64 },
    /// Ratio (numerator / denominator × 100) compared against percentage bounds.
    PercentageRange { min: f64, max: f64 },
    /// Value already on a `0..=max_score` scale, e.g. a 1–5 satisfaction score.
    DirectScore { max_score: f64 },
}

impl TargetPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            TargetPolicy::Binary { .. } => "BINARY",
            TargetPolicy::Range { .. } => "RANGE",
            TargetPolicy::PercentageRange { .. } => "PERCENTAGE_RANGE",
            TargetPolicy::DirectScore { .. } => "DIRECT_SCORE",
        }
    }

    fn default_formula(&self) -> &'static str {
        match self {
            TargetPolicy::PercentageRange { .. } => "A/B*100",
            _ => "A",
        }
    }
}

/// Where an operand alias takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OperandSource {
    Field { field_id: FieldId },
    Literal { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperandBinding {
    pub alias: Alias,
    #[serde(flatten)]
    pub source: OperandSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub code: IndicatorCode,
    pub name: String,
    pub target: TargetPolicy,
    /// Kept as text so one bad formula only affects its own indicator.
    #[serde(default)]
    pub formula: Option<String>,
    pub operands: Vec<OperandBinding>,
    pub facility_types: Vec<FacilityTypeId>,
    /// Facility-type-specific replacement bounds for range policies.
    #[serde(default)]
    pub overrides: HashMap<FacilityTypeId, Bounds>,
}

impl IndicatorConfig {
    /// The configured formula, or the policy's default when none is set.
    pub fn effective_formula(&self) -> Result<Formula, FormulaError> {
        let source = self
            .formula
            .as_deref()
            .unwrap_or_else(|| self.target.default_formula());
        Formula::parse(source)
    }

    pub fn binding(&self, alias: Alias) -> Option<&OperandSource> {
        self.operands
            .iter()
            .find(|b| b.alias == alias)
            .map(|b| &b.source)
    }

    pub fn applies_to(&self, facility_type: &str) -> bool {
        self.facility_types.iter().any(|t| t == facility_type)
    }

    /// Bounds in force for this facility type. `None` for non-range policies.
    pub fn bounds_for(&self, facility_type: &str) -> Option<Bounds> {
        let base = match self.target {
            TargetPolicy::Range { min, max } | TargetPolicy::PercentageRange { min, max } => {
                Bounds { min, max }
            }
            _ => return None,
        };
        Some(self.overrides.get(facility_type).copied().unwrap_or(base))
    }
}

// ── Facility types ─────────────────────────────────────────────────

/// How the facility-level performance percentage is derived from the
/// indicator achievement percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PerformancePolicy {
    /// Unweighted mean over every processed indicator.
    #[default]
    Average,
    /// Weighted mean; indicators without a weight contribute nothing.
    Weighted { weights: BTreeMap<IndicatorCode, f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacilityTypeConfig {
    pub id: FacilityTypeId,
    pub label: String,
    /// Total monetary envelope for the facility type.
    pub total_pool: f64,
    /// Explicit fallback values for absent denominator fields, by field id.
    #[serde(default)]
    pub denominator_defaults: HashMap<FieldId, f64>,
    #[serde(default)]
    pub performance: PerformancePolicy,
}

// ── Remuneration ───────────────────────────────────────────────────

/// Auxiliary monthly state gating the base amount, e.g. "qualifying
/// patients present". Present when `field_id` holds a truthy value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayCondition {
    pub condition_type: String,
    pub field_id: FieldId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemunerationCeiling {
    pub facility_type: FacilityTypeId,
    pub indicator: IndicatorCode,
    pub base_amount: f64,
    /// Ceiling used instead of `base_amount` when the condition is absent.
    /// Zero when not configured.
    #[serde(default)]
    pub conditional_amount: Option<f64>,
    #[serde(default)]
    pub condition: Option<PayCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationBasis {
    /// Every active worker of the type draws the full amount.
    #[default]
    PerWorker,
    /// The amount is shared equally by the active workers of the type.
    Pooled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerClass {
    /// Fixed role, paid outside the performance calculation.
    TeamBased,
    /// Payout scales with facility performance.
    PerformanceBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAllocation {
    pub facility_type: FacilityTypeId,
    pub worker_type: WorkerTypeId,
    pub role: String,
    pub max_count: u32,
    pub allocated_amount: f64,
    #[serde(default)]
    pub basis: AllocationBasis,
    pub class: WorkerClass,
}

// ── Files ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct IndicatorsFile {
    indicators: Vec<IndicatorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct FacilityTypesFile {
    facility_types: Vec<FacilityTypeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemunerationFile {
    ceilings: Vec<RemunerationCeiling>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkerAllocationsFile {
    allocations: Vec<WorkerAllocation>,
}

/// A problem found by [`EngineConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub subject: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub indicators: BTreeMap<IndicatorCode, IndicatorConfig>,
    pub facility_types: HashMap<FacilityTypeId, FacilityTypeConfig>,
    pub ceilings: HashMap<(FacilityTypeId, IndicatorCode), RemunerationCeiling>,
    pub worker_allocations: HashMap<(FacilityTypeId, WorkerTypeId), WorkerAllocation>,
}

impl EngineConfig {
    /// Load from the data/ directory.
    /// In tests, use EngineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let indicators: IndicatorsFile = read_json(data_dir, "indicators.json")?;
        let types: FacilityTypesFile = read_json(data_dir, "facility_types.json")?;
        let remuneration: RemunerationFile = read_json(data_dir, "remuneration.json")?;
        let workers: WorkerAllocationsFile = read_json(data_dir, "worker_allocations.json")?;

        let config = Self::from_parts(
            indicators.indicators,
            types.facility_types,
            remuneration.ceilings,
            workers.allocations,
        );
        for issue in config.validate() {
            log::warn!("config: {issue}");
        }
        Ok(config)
    }

    pub fn from_parts(
        indicators: Vec<IndicatorConfig>,
        facility_types: Vec<FacilityTypeConfig>,
        ceilings: Vec<RemunerationCeiling>,
        allocations: Vec<WorkerAllocation>,
    ) -> Self {
        Self {
            indicators: indicators.into_iter().map(|i| (i.code.clone(), i)).collect(),
            facility_types: facility_types
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
            ceilings: ceilings
                .into_iter()
                .map(|c| ((c.facility_type.clone(), c.indicator.clone()), c))
                .collect(),
            worker_allocations: allocations
                .into_iter()
                .map(|a| ((a.facility_type.clone(), a.worker_type.clone()), a))
                .collect(),
        }
    }

    pub fn facility_type(&self, id: &str) -> Option<&FacilityTypeConfig> {
        self.facility_types.get(id)
    }

    /// Indicators that apply to a facility type, ordered by code.
    pub fn applicable_indicators(&self, facility_type: &str) -> Vec<&IndicatorConfig> {
        self.indicators
            .values()
            .filter(|i| i.applies_to(facility_type))
            .collect()
    }

    pub fn ceiling(&self, facility_type: &str, indicator: &str) -> Option<&RemunerationCeiling> {
        self.ceilings
            .get(&(facility_type.to_string(), indicator.to_string()))
    }

    pub fn allocation(&self, facility_type: &str, worker_type: &str) -> Option<&WorkerAllocation> {
        self.worker_allocations
            .get(&(facility_type.to_string(), worker_type.to_string()))
    }

    /// Cross-check the configuration. Issues are reported, never fixed up.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut push = |subject: String, message: String| {
            issues.push(ConfigIssue { subject, message })
        };

        for ind in self.indicators.values() {
            let subject = format!("indicator {}", ind.code);
            match ind.effective_formula() {
                Err(e) => push(subject.clone(), e.to_string()),
                Ok(formula) => {
                    for alias in formula.aliases() {
                        if ind.binding(alias).is_none() {
                            push(subject.clone(), format!("operand '{alias}' is not bound"));
                        }
                    }
                }
            }
            match ind.target {
                TargetPolicy::Range { min, max } | TargetPolicy::PercentageRange { min, max }
                    if min > max =>
                {
                    push(subject.clone(), format!("bounds [{min}, {max}] are inverted"));
                }
                TargetPolicy::DirectScore { max_score } if max_score <= 0.0 => {
                    push(subject.clone(), format!("max_score {max_score} must be positive"));
                }
                _ => {}
            }
            for (ft, b) in &ind.overrides {
                if b.min > b.max {
                    push(
                        subject.clone(),
                        format!("override for {ft}: bounds [{}, {}] are inverted", b.min, b.max),
                    );
                }
            }
            for ft in &ind.facility_types {
                if !self.facility_types.contains_key(ft) {
                    push(subject.clone(), format!("unknown facility type '{ft}'"));
                } else if self.ceiling(ft, &ind.code).is_none() {
                    push(subject.clone(), format!("no remuneration ceiling for facility type '{ft}'"));
                }
            }
        }

        for ft in self.facility_types.values() {
            let subject = format!("facility type {}", ft.id);
            let ceiling_sum: f64 = self
                .ceilings
                .values()
                .filter(|c| c.facility_type == ft.id)
                .map(|c| c.base_amount.max(c.conditional_amount.unwrap_or(0.0)))
                .sum();
            if ceiling_sum > ft.total_pool {
                push(
                    subject.clone(),
                    format!("indicator ceilings total {ceiling_sum:.2} exceed pool {:.2}", ft.total_pool),
                );
            }
            if let PerformancePolicy::Weighted { weights } = &ft.performance {
                for code in weights.keys() {
                    if !self.indicators.contains_key(code) {
                        push(subject.clone(), format!("weight for unknown indicator '{code}'"));
                    }
                }
            }
        }

        for c in self.ceilings.values() {
            if c.condition.is_some() && c.conditional_amount.is_none() {
                log::debug!(
                    "config: ceiling {}/{} has a condition without conditional amount, using 0",
                    c.facility_type,
                    c.indicator
                );
            }
        }

        issues
    }

    /// Config with hardcoded defaults for use in unit tests.
    ///
    /// Facility types `phc` (primary health centre) and `sc` (sub-centre).
    pub fn default_test() -> Self {
        let field = |alias: Alias, field_id: &str| OperandBinding {
            alias,
            source: OperandSource::Field { field_id: field_id.into() },
        };

        let indicators = vec![
            IndicatorConfig {
                code: "ANC_REGISTRATION".into(),
                name: "Early ANC registration rate".into(),
                target: TargetPolicy::PercentageRange { min: 3.0, max: 5.0 },
                formula: Some("A/B*100".into()),
                operands: vec![field('A', "anc_registered"), field('B', "catchment_population")],
                facility_types: vec!["phc".into(), "sc".into()],
                overrides: HashMap::new(),
            },
            IndicatorConfig {
                code: "INSTITUTIONAL_DELIVERY".into(),
                name: "Institutional deliveries against annual expected".into(),
                target: TargetPolicy::PercentageRange { min: 60.0, max: 80.0 },
                formula: Some("(A/(B/12))*100".into()),
                operands: vec![field('A', "institutional_deliveries"), field('B', "expected_deliveries_annual")],
                facility_types: vec!["phc".into()],
                overrides: HashMap::new(),
            },
            IndicatorConfig {
                code: "NCD_SCREENING".into(),
                name: "NCD screening camp held".into(),
                target: TargetPolicy::Binary { condition: BinaryCondition::NonZero },
                formula: None,
                operands: vec![field('A', "ncd_camps_held")],
                facility_types: vec!["phc".into(), "sc".into()],
                overrides: HashMap::new(),
            },
            IndicatorConfig {
                code: "OPD_FOOTFALL".into(),
                name: "Monthly OPD footfall".into(),
                target: TargetPolicy::Range { min: 300.0, max: 500.0 },
                formula: None,
                operands: vec![field('A', "opd_footfall")],
                facility_types: vec!["phc".into(), "sc".into()],
                overrides: HashMap::from([("sc".into(), Bounds { min: 100.0, max: 200.0 })]),
            },
            IndicatorConfig {
                code: "PATIENT_SATISFACTION".into(),
                name: "Patient satisfaction score".into(),
                target: TargetPolicy::DirectScore { max_score: 5.0 },
                formula: None,
                operands: vec![field('A', "satisfaction_score")],
                facility_types: vec!["phc".into()],
                overrides: HashMap::new(),
            },
            IndicatorConfig {
                code: "TB_TREATMENT_ADHERENCE".into(),
                name: "TB patients adherent to treatment".into(),
                target: TargetPolicy::PercentageRange { min: 70.0, max: 90.0 },
                formula: Some("A/B*100".into()),
                operands: vec![field('A', "tb_adherent"), field('B', "tb_on_treatment")],
                facility_types: vec!["phc".into()],
                overrides: HashMap::new(),
            },
        ];

        let facility_types = vec![
            FacilityTypeConfig {
                id: "phc".into(),
                label: "Primary Health Centre".into(),
                total_pool: 5_000.0,
                denominator_defaults: HashMap::from([(
                    "expected_deliveries_annual".to_string(),
                    240.0,
                )]),
                performance: PerformancePolicy::Average,
            },
            FacilityTypeConfig {
                id: "sc".into(),
                label: "Sub Centre".into(),
                total_pool: 2_000.0,
                denominator_defaults: HashMap::new(),
                performance: PerformancePolicy::Weighted {
                    weights: BTreeMap::from([
                        ("ANC_REGISTRATION".to_string(), 2.0),
                        ("NCD_SCREENING".to_string(), 1.0),
                        ("OPD_FOOTFALL".to_string(), 1.0),
                    ]),
                },
            },
        ];

        let ceiling = |ft: &str, ind: &str, base: f64| RemunerationCeiling {
            facility_type: ft.into(),
            indicator: ind.into(),
            base_amount: base,
            conditional_amount: None,
            condition: None,
        };
        let ceilings = vec![
            ceiling("phc", "ANC_REGISTRATION", 500.0),
            ceiling("phc", "INSTITUTIONAL_DELIVERY", 800.0),
            ceiling("phc", "NCD_SCREENING", 300.0),
            ceiling("phc", "OPD_FOOTFALL", 600.0),
            ceiling("phc", "PATIENT_SATISFACTION", 400.0),
            RemunerationCeiling {
                facility_type: "phc".into(),
                indicator: "TB_TREATMENT_ADHERENCE".into(),
                base_amount: 700.0,
                conditional_amount: Some(100.0),
                condition: Some(PayCondition {
                    condition_type: "tb_patients_present".into(),
                    field_id: "tb_on_treatment".into(),
                }),
            },
            ceiling("sc", "ANC_REGISTRATION", 400.0),
            ceiling("sc", "NCD_SCREENING", 200.0),
            ceiling("sc", "OPD_FOOTFALL", 300.0),
        ];

        let allocation = |ft: &str, wt: &str, role: &str, max: u32, amount: f64, basis, class| {
            WorkerAllocation {
                facility_type: ft.into(),
                worker_type: wt.into(),
                role: role.into(),
                max_count: max,
                allocated_amount: amount,
                basis,
                class,
            }
        };
        let allocations = vec![
            allocation("phc", "MO", "Medical Officer", 1, 5_000.0, AllocationBasis::PerWorker, WorkerClass::TeamBased),
            allocation("phc", "ANM", "Auxiliary Nurse Midwife", 3, 1_000.0, AllocationBasis::PerWorker, WorkerClass::PerformanceBased),
            allocation("phc", "ASHA", "Accredited Social Health Activist", 4, 2_000.0, AllocationBasis::Pooled, WorkerClass::PerformanceBased),
            allocation("sc", "ANM", "Auxiliary Nurse Midwife", 2, 800.0, AllocationBasis::PerWorker, WorkerClass::PerformanceBased),
        ];

        Self::from_parts(indicators, facility_types, ceilings, allocations)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(data_dir: &str, file: &str) -> anyhow::Result<T> {
    let path = format!("{data_dir}/{file}");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}
