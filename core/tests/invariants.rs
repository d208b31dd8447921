//! Payout invariants over seeded random inputs.
//!
//! Seeds are fixed so a failure reproduces exactly.

use incentive_core::{
    achievement::{self, interpolate},
    config::{Bounds, EngineConfig, TargetPolicy},
    field::{FieldValue, FieldValues},
    remuneration,
    store::WorkerRow,
    types::ReportingMonth,
    worker::{performance_payout, pooled_share, worker_payouts},
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

const CASES: usize = 2_000;

#[test]
fn incentive_never_exceeds_the_applied_ceiling() {
    let cfg = EngineConfig::default_test();
    let mut rng = Pcg64Mcg::seed_from_u64(0x1CE_11);

    for _ in 0..CASES {
        let values: FieldValues = [
            ("anc_registered", rng.gen_range(0.0..120.0)),
            ("catchment_population", rng.gen_range(1.0..2_000.0)),
            ("institutional_deliveries", rng.gen_range(0.0..60.0)),
            ("ncd_camps_held", rng.gen_range(0.0..3.0_f64).floor()),
            ("opd_footfall", rng.gen_range(0.0..1_000.0)),
            ("satisfaction_score", rng.gen_range(0.0..9.0)),
            ("tb_adherent", rng.gen_range(0.0..40.0)),
            ("tb_on_treatment", rng.gen_range(0.0..30.0_f64).floor()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), FieldValue::Number(v)))
        .collect();

        for ft in ["phc", "sc"] {
            let facility_type = cfg.facility_type(ft).unwrap();
            for indicator in cfg.applicable_indicators(ft) {
                let Ok(result) = achievement::calculate(indicator, facility_type, &values) else {
                    continue;
                };
                let ceiling = cfg.ceiling(ft, &indicator.code).unwrap();
                let applied = remuneration::applied_ceiling(
                    ceiling,
                    remuneration::condition_present(ceiling, &values),
                );
                let paid = remuneration::indicator_incentive(&indicator.target, &result, applied.amount);
                assert!(
                    (0.0..=applied.amount).contains(&paid),
                    "{} at {ft}: paid {paid} against ceiling {} (achievement {})",
                    indicator.code,
                    applied.amount,
                    result.percentage
                );
            }
        }
    }
}

#[test]
fn interpolation_is_monotonic_within_bounds() {
    let mut rng = Pcg64Mcg::seed_from_u64(0xB0_0D5);

    for _ in 0..CASES {
        let min = rng.gen_range(0.0..500.0);
        let max = min + rng.gen_range(0.01..500.0);
        let bounds = Bounds { min, max };

        let mut xs: Vec<f64> = (0..8).map(|_| rng.gen_range(min..=max)).collect();
        xs.sort_by(|a, b| a.total_cmp(b));

        let pcts: Vec<f64> = xs.iter().map(|x| interpolate(*x, bounds)).collect();
        for pair in pcts.windows(2) {
            assert!(pair[0] <= pair[1], "not monotonic in [{min}, {max}]: {pcts:?}");
        }
        assert_eq!(interpolate(min, bounds), 60.0);
        assert_eq!(interpolate(max, bounds), 100.0);
    }
}

#[test]
fn range_payout_is_monotonic_in_actual_value() {
    let policy = TargetPolicy::Range { min: 300.0, max: 500.0 };
    let bounds = Bounds { min: 300.0, max: 500.0 };
    let mut rng = Pcg64Mcg::seed_from_u64(0x5CA1E);

    for _ in 0..CASES {
        let a = rng.gen_range(0.0..800.0);
        let b = rng.gen_range(0.0..800.0);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let pay = |x| {
            remuneration::indicator_incentive(&policy, &achievement::evaluate(&policy, Some(bounds), x), 600.0)
        };
        assert!(pay(lo) <= pay(hi), "pay({lo}) > pay({hi})");
    }
}

#[test]
fn worker_payout_never_exceeds_allocation() {
    let mut rng = Pcg64Mcg::seed_from_u64(0xA110C);

    for _ in 0..CASES {
        let allocated = (rng.gen_range(0.0..10_000.0_f64) * 100.0).round() / 100.0;
        let performance = rng.gen_range(-20.0..180.0);
        let paid = performance_payout(allocated, performance);
        assert!(
            (0.0..=allocated).contains(&paid),
            "allocated {allocated}, performance {performance}, paid {paid}"
        );
        assert_eq!(paid, (paid * 100.0).round() / 100.0, "not rounded to cents: {paid}");
    }
}

#[test]
fn pooled_payouts_never_exceed_the_pool() {
    let mut rng = Pcg64Mcg::seed_from_u64(0x900_1ED);

    for _ in 0..CASES {
        let pool = (rng.gen_range(0.0..10_000.0_f64) * 100.0).round() / 100.0;
        let n = rng.gen_range(1..=12);
        let performance = rng.gen_range(0.0..120.0);
        let paid: f64 = (0..n).map(|_| performance_payout(pooled_share(pool, n), performance)).sum();
        assert!(paid <= pool + 1e-6, "pool {pool} over {n} workers paid {paid}");
    }
}

#[test]
fn pooled_roster_payout_stays_within_configured_pool() {
    let cfg = EngineConfig::default_test();
    let month = ReportingMonth::new(2024, 6).unwrap();
    let mut rng = Pcg64Mcg::seed_from_u64(0xA5_4A);

    for _ in 0..200 {
        let n = rng.gen_range(1..=4);
        let roster: Vec<WorkerRow> = (0..n)
            .map(|i| WorkerRow {
                worker_id: format!("A{i}"),
                facility_id: "F1".into(),
                worker_type: "ASHA".into(),
                name: format!("ASHA {i}"),
                active: true,
            })
            .collect();
        let performance = rng.gen_range(0.0..=100.0);
        let (records, _) = worker_payouts(&cfg, "phc", "F1", month, &roster, performance);
        let paid: f64 = records.iter().map(|r| r.computed_amount).sum();
        assert!(paid <= 2_000.0 + 1e-6, "{n} ASHAs at {performance}% paid {paid}");
    }
}
