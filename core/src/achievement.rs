//! Achievement calculator. Turns resolved operand values into an
//! achievement percentage and status, per target policy.
//!
//! Pure and synchronous. Field values arrive already loaded; missing
//! denominators are filled only from the facility type's explicit default
//! table, otherwise reported.

use crate::{
    config::{BinaryCondition, Bounds, FacilityTypeConfig, IndicatorConfig, OperandSource, TargetPolicy},
    error::IndicatorIssue,
    field::FieldValues,
    formula::{FormulaError, Operands},
};
use serde::{Deserialize, Serialize};

/// Achievement percentage at exactly the lower bound of a range.
pub const PARTIAL_FLOOR: f64 = 60.0;

/// Lowest percentage still counted as partial achievement.
pub const PARTIAL_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementStatus {
    Achieved,
    Partial,
    NotAchieved,
}

impl AchievementStatus {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 100.0 {
            AchievementStatus::Achieved
        } else if percentage >= PARTIAL_THRESHOLD {
            AchievementStatus::Partial
        } else {
            AchievementStatus::NotAchieved
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementStatus::Achieved => "achieved",
            AchievementStatus::Partial => "partial",
            AchievementStatus::NotAchieved => "not_achieved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "achieved" => Some(AchievementStatus::Achieved),
            "partial" => Some(AchievementStatus::Partial),
            "not_achieved" => Some(AchievementStatus::NotAchieved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Achievement {
    pub actual_value: f64,
    /// The target the actual value was measured against.
    pub target_value: Option<f64>,
    pub percentage: f64,
    pub status: AchievementStatus,
    /// Set for values that were computed but fall outside their valid scale.
    pub flag: Option<IndicatorIssue>,
}

/// The evaluated formula value plus how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedActual {
    pub value: f64,
    pub default_denominator_used: bool,
}

/// Linear partial credit inside `[min, max]`: 0 below, 100 at or above max,
/// `60 + position * 40` in between.
pub fn interpolate(actual: f64, bounds: Bounds) -> f64 {
    if actual >= bounds.max {
        100.0
    } else if actual < bounds.min {
        0.0
    } else {
        let span = bounds.max - bounds.min;
        PARTIAL_FLOOR + ((actual - bounds.min) / span) * (100.0 - PARTIAL_FLOOR)
    }
}

pub fn evaluate_binary(actual: f64, condition: BinaryCondition) -> Achievement {
    let percentage = if condition.is_met(actual) { 100.0 } else { 0.0 };
    let target_value = match condition {
        BinaryCondition::NonZero => None,
        BinaryCondition::AtLeast { threshold } => Some(threshold),
    };
    Achievement {
        actual_value: actual,
        target_value,
        percentage,
        status: AchievementStatus::from_percentage(percentage),
        flag: None,
    }
}

pub fn evaluate_range(actual: f64, bounds: Bounds) -> Achievement {
    let percentage = interpolate(actual, bounds);
    Achievement {
        actual_value: actual,
        target_value: Some(bounds.max),
        percentage,
        status: AchievementStatus::from_percentage(percentage),
        flag: None,
    }
}

/// `score / max_score × 100`. Scores outside `[1, max_score]` are flagged,
/// not clamped.
pub fn evaluate_direct_score(score: f64, max_score: f64) -> Achievement {
    let percentage = score / max_score * 100.0;
    let flag = if score < 1.0 || score > max_score {
        Some(IndicatorIssue::OutOfRange { value: score, min: 1.0, max: max_score })
    } else {
        None
    };
    Achievement {
        actual_value: score,
        target_value: Some(max_score),
        percentage,
        status: AchievementStatus::from_percentage(percentage),
        flag,
    }
}

/// Dispatch on the indicator's policy. `bounds` are the facility-type
/// specific bounds for range policies.
pub fn evaluate(policy: &TargetPolicy, bounds: Option<Bounds>, actual: f64) -> Achievement {
    match (policy, bounds) {
        (TargetPolicy::Binary { condition }, _) => evaluate_binary(actual, *condition),
        (TargetPolicy::Range { .. } | TargetPolicy::PercentageRange { .. }, Some(b)) => {
            evaluate_range(actual, b)
        }
        (TargetPolicy::Range { min, max } | TargetPolicy::PercentageRange { min, max }, None) => {
            evaluate_range(actual, Bounds { min: *min, max: *max })
        }
        (TargetPolicy::DirectScore { max_score }, _) => evaluate_direct_score(actual, *max_score),
    }
}

/// Bind every alias the indicator's formula uses and evaluate it.
pub fn resolve_actual(
    indicator: &IndicatorConfig,
    facility_type: &FacilityTypeConfig,
    values: &FieldValues,
) -> Result<ResolvedActual, IndicatorIssue> {
    let formula = indicator.effective_formula().map_err(|e| match e {
        FormulaError::UnknownFormula { formula, reason } => {
            IndicatorIssue::UnknownFormula { formula, reason }
        }
        other => IndicatorIssue::ConfigurationInconsistency { detail: other.to_string() },
    })?;
    let divisors = formula.divisor_aliases();

    let mut operands = Operands::new();
    let mut default_denominator_used = false;
    let mut divisor_field = None;

    for alias in formula.aliases() {
        let is_divisor = divisors.contains(&alias);
        let value = match indicator.binding(alias) {
            None => {
                return Err(IndicatorIssue::ConfigurationInconsistency {
                    detail: format!("operand '{alias}' of {} is not bound", indicator.code),
                })
            }
            Some(OperandSource::Literal { value }) => *value,
            Some(OperandSource::Field { field_id }) => {
                if is_divisor && divisor_field.is_none() {
                    divisor_field = Some(field_id.clone());
                }
                match values.get(field_id) {
                    Some(v) => v.as_number().ok_or_else(|| IndicatorIssue::NonNumericOperand {
                        field_id: field_id.clone(),
                    })?,
                    None if is_divisor => {
                        let default = facility_type.denominator_defaults.get(field_id).copied();
                        match default {
                            Some(d) => {
                                default_denominator_used = true;
                                log::debug!(
                                    "indicator={} denominator {field_id} absent, using {} default {d}",
                                    indicator.code,
                                    facility_type.id
                                );
                                d
                            }
                            None => {
                                return Err(IndicatorIssue::MissingDenominator {
                                    field_id: Some(field_id.clone()),
                                })
                            }
                        }
                    }
                    None => {
                        return Err(IndicatorIssue::MissingOperand {
                            alias,
                            field_id: Some(field_id.clone()),
                        })
                    }
                }
            }
        };
        operands.insert(alias, value);
    }

    let value = formula.evaluate(&operands).map_err(|e| match e {
        FormulaError::DivisionByZero => IndicatorIssue::MissingDenominator {
            field_id: divisor_field.clone(),
        },
        FormulaError::MissingOperand { alias } => IndicatorIssue::MissingOperand {
            alias,
            field_id: None,
        },
        FormulaError::UnknownFormula { formula, reason } => {
            IndicatorIssue::UnknownFormula { formula, reason }
        }
    })?;

    Ok(ResolvedActual { value, default_denominator_used })
}

/// Resolve and evaluate one indicator for one facility's month.
pub fn calculate(
    indicator: &IndicatorConfig,
    facility_type: &FacilityTypeConfig,
    values: &FieldValues,
) -> Result<Achievement, IndicatorIssue> {
    let resolved = resolve_actual(indicator, facility_type, values)?;
    score(indicator, facility_type, resolved.value)
}

/// Evaluate an already-resolved actual value against the indicator's target
/// for this facility type.
pub fn score(
    indicator: &IndicatorConfig,
    facility_type: &FacilityTypeConfig,
    actual: f64,
) -> Result<Achievement, IndicatorIssue> {
    let bounds = indicator.bounds_for(&facility_type.id);
    if let Some(b) = bounds {
        if b.min > b.max {
            return Err(IndicatorIssue::ConfigurationInconsistency {
                detail: format!("bounds [{}, {}] of {} are inverted", b.min, b.max, indicator.code),
            });
        }
    }
    if let TargetPolicy::DirectScore { max_score } = indicator.target {
        if max_score <= 0.0 {
            return Err(IndicatorIssue::ConfigurationInconsistency {
                detail: format!("max_score {max_score} of {} must be positive", indicator.code),
            });
        }
    }
    Ok(evaluate(&indicator.target, bounds, actual))
}
