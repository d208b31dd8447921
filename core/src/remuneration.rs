//! Facility remuneration calculator. Maps one indicator's achievement to
//! a monetary incentive under its facility-type ceiling.

use crate::{
    achievement::{Achievement, AchievementStatus},
    config::{RemunerationCeiling, TargetPolicy},
    field::FieldValues,
    types::round_money,
};

/// The ceiling actually in force for a facility's month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedCeiling {
    pub amount: f64,
    /// True when the conditional amount replaced the base amount.
    pub conditional: bool,
}

/// Whether the ceiling's auxiliary condition holds this month.
/// Ceilings without a condition always count as satisfied.
pub fn condition_present(ceiling: &RemunerationCeiling, values: &FieldValues) -> bool {
    match &ceiling.condition {
        None => true,
        Some(cond) => values
            .get(&cond.field_id)
            .map(|v| v.is_truthy())
            .unwrap_or(false),
    }
}

pub fn applied_ceiling(ceiling: &RemunerationCeiling, condition_present: bool) -> AppliedCeiling {
    if ceiling.condition.is_some() && !condition_present {
        AppliedCeiling {
            amount: ceiling.conditional_amount.unwrap_or(0.0).max(0.0),
            conditional: true,
        }
    } else {
        AppliedCeiling { amount: ceiling.base_amount.max(0.0), conditional: false }
    }
}

/// Incentive for one indicator. Never exceeds the ceiling, even when the
/// achievement percentage is above 100.
pub fn indicator_incentive(policy: &TargetPolicy, achievement: &Achievement, ceiling: f64) -> f64 {
    let amount = match policy {
        TargetPolicy::Binary { .. } => {
            if achievement.status == AchievementStatus::Achieved {
                ceiling
            } else {
                0.0
            }
        }
        TargetPolicy::Range { .. }
        | TargetPolicy::PercentageRange { .. }
        | TargetPolicy::DirectScore { .. } => {
            let fraction = (achievement.percentage / 100.0).clamp(0.0, 1.0);
            ceiling * fraction
        }
    };
    round_money(amount).min(ceiling)
}

/// Facility total: the sum of its indicator incentives.
pub fn facility_total<'a>(incentives: impl IntoIterator<Item = &'a f64>) -> f64 {
    round_money(incentives.into_iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::achievement::{evaluate_binary, evaluate_direct_score, evaluate_range};
    use crate::config::{BinaryCondition, Bounds, PayCondition};
    use crate::field::FieldValue;

    fn ceiling_with_condition(conditional: Option<f64>) -> RemunerationCeiling {
        RemunerationCeiling {
            facility_type: "phc".into(),
            indicator: "TB".into(),
            base_amount: 700.0,
            conditional_amount: conditional,
            condition: Some(PayCondition {
                condition_type: "tb_patients_present".into(),
                field_id: "tb_on_treatment".into(),
            }),
        }
    }

    #[test]
    fn range_pays_linearly() {
        let policy = TargetPolicy::PercentageRange { min: 3.0, max: 5.0 };
        let a = evaluate_range(4.0, Bounds { min: 3.0, max: 5.0 });
        assert_eq!(indicator_incentive(&policy, &a, 500.0), 400.0);

        let below = evaluate_range(2.0, Bounds { min: 3.0, max: 5.0 });
        assert_eq!(indicator_incentive(&policy, &below, 500.0), 0.0);
    }

    #[test]
    fn binary_pays_all_or_nothing() {
        let policy = TargetPolicy::Binary { condition: BinaryCondition::NonZero };
        let met = evaluate_binary(2.0, BinaryCondition::NonZero);
        let unmet = evaluate_binary(0.0, BinaryCondition::NonZero);
        assert_eq!(indicator_incentive(&policy, &met, 300.0), 300.0);
        assert_eq!(indicator_incentive(&policy, &unmet, 300.0), 0.0);
    }

    #[test]
    fn payout_is_capped_at_ceiling() {
        let policy = TargetPolicy::DirectScore { max_score: 5.0 };
        let over = evaluate_direct_score(7.0, 5.0);
        assert!(over.percentage > 100.0);
        assert_eq!(indicator_incentive(&policy, &over, 400.0), 400.0);
    }

    #[test]
    fn absent_condition_switches_to_conditional_amount() {
        let c = ceiling_with_condition(Some(100.0));
        let mut values = FieldValues::new();
        assert!(!condition_present(&c, &values));
        assert_eq!(
            applied_ceiling(&c, false),
            AppliedCeiling { amount: 100.0, conditional: true }
        );

        values.insert("tb_on_treatment".into(), FieldValue::Number(12.0));
        assert!(condition_present(&c, &values));
        assert_eq!(
            applied_ceiling(&c, true),
            AppliedCeiling { amount: 700.0, conditional: false }
        );
    }

    #[test]
    fn conditional_amount_defaults_to_zero() {
        let c = ceiling_with_condition(None);
        assert_eq!(applied_ceiling(&c, false).amount, 0.0);
    }

    #[test]
    fn facility_total_sums_incentives() {
        assert_eq!(facility_total(&[400.0, 300.0, 0.0, 125.5]), 825.5);
    }
}
