//! Integration tests for the recalculation orchestrator.
//!
//! A fully reported PHC month pays:
//!   ANC 4%        → 80%  → 400 / 500
//!   deliveries    → 100% → 800 / 800   (annual default 240 used)
//!   NCD camp      → 100% → 300 / 300
//!   OPD 400       → 80%  → 480 / 600
//!   satisfaction 4→ 80%  → 320 / 400
//!   TB 80%        → 80%  → 560 / 700
//! Facility total 2860, performance 86.67%.

use incentive_core::{
    achievement::AchievementStatus,
    config::EngineConfig,
    error::{EngineError, IndicatorIssue},
    field::FieldValue,
    recalc::{IndicatorOutcome, Recalculator},
    store::{IncentiveStore, WorkerRow},
    types::ReportingMonth,
    worker::WorkerSkipReason,
};

const PHC: &str = "PHC-001";

fn month() -> ReportingMonth {
    ReportingMonth::new(2024, 4).unwrap()
}

fn worker(id: &str, wt: &str) -> WorkerRow {
    WorkerRow {
        worker_id: id.into(),
        facility_id: PHC.into(),
        worker_type: wt.into(),
        name: format!("Worker {id}"),
        active: true,
    }
}

fn submit(store: &IncentiveStore, facility: &str, m: ReportingMonth, pairs: &[(&str, f64)]) {
    for (field, v) in pairs {
        store
            .upsert_field_value(field, facility, m, &FieldValue::Number(*v))
            .expect("upsert field");
    }
}

fn full_month() -> Vec<(&'static str, f64)> {
    vec![
        ("anc_registered", 40.0),
        ("catchment_population", 1000.0),
        ("institutional_deliveries", 20.0),
        ("ncd_camps_held", 1.0),
        ("opd_footfall", 400.0),
        ("satisfaction_score", 4.0),
        ("tb_adherent", 16.0),
        ("tb_on_treatment", 20.0),
    ]
}

fn build() -> IncentiveStore {
    let store = IncentiveStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store.insert_facility(PHC, "Rampur PHC", "phc").unwrap();
    for (id, wt) in [("W-MO", "MO"), ("W-ANM", "ANM"), ("W-ASHA1", "ASHA"), ("W-ASHA2", "ASHA")] {
        store.insert_worker(&worker(id, wt)).unwrap();
    }
    store
}

#[test]
fn full_month_snapshot_totals() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, PHC, month(), &full_month());

    let outcome = Recalculator::new(&cfg).recalculate(&mut store, PHC, month()).unwrap();
    let s = &outcome.snapshot.summary;

    assert_eq!(s.indicators_processed, 6);
    assert_eq!(s.indicators_skipped, 0);
    assert_eq!(s.total_facility_incentive, 2860.0);
    assert_eq!(s.performance_percentage, 86.67);
    // ANM 1000 and two ASHAs sharing 2000, each scaled to 86.67%.
    assert_eq!(s.total_worker_remuneration, 2600.1);
    assert_eq!(s.grand_total, 5460.1);

    let delivery = outcome
        .snapshot
        .indicators
        .iter()
        .find(|r| r.indicator_code == "INSTITUTIONAL_DELIVERY")
        .unwrap();
    assert!(delivery.default_denominator_used);
    assert_eq!(delivery.status, AchievementStatus::Achieved);

    assert_eq!(outcome.skipped_workers.len(), 1);
    assert_eq!(outcome.skipped_workers[0].worker_id, "W-MO");
    assert_eq!(outcome.skipped_workers[0].reason, WorkerSkipReason::TeamBased);
    assert!(outcome
        .indicators
        .iter()
        .all(|o| matches!(o, IndicatorOutcome::Computed { .. })));
}

#[test]
fn persisted_snapshot_matches_outcome_and_is_consistent() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, PHC, month(), &full_month());

    let outcome = Recalculator::new(&cfg).recalculate(&mut store, PHC, month()).unwrap();
    let stored = store.load_snapshot(PHC, month()).unwrap().expect("snapshot persisted");

    assert!(stored.is_consistent());
    assert_eq!(stored.indicators, outcome.snapshot.indicators);
    assert_eq!(stored.workers, outcome.snapshot.workers);
    assert_eq!(stored.summary.grand_total, outcome.snapshot.summary.grand_total);
}

#[test]
fn recalculation_is_idempotent_apart_from_timestamp() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, PHC, month(), &full_month());
    let recalc = Recalculator::new(&cfg);

    recalc.recalculate(&mut store, PHC, month()).unwrap();
    let first = store.load_snapshot(PHC, month()).unwrap().unwrap();
    recalc.recalculate(&mut store, PHC, month()).unwrap();
    let mut second = store.load_snapshot(PHC, month()).unwrap().unwrap();

    second.summary.computed_at = first.summary.computed_at;
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(store.snapshot_row_counts(PHC, month()).unwrap(), (6, 3, 1));
}

#[test]
fn changed_inputs_replace_the_whole_snapshot() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, PHC, month(), &full_month());
    let recalc = Recalculator::new(&cfg);
    recalc.recalculate(&mut store, PHC, month()).unwrap();

    // One ASHA leaves and the camp was not held after all.
    store.deactivate_worker("W-ASHA2").unwrap();
    submit(&store, PHC, month(), &[("ncd_camps_held", 0.0)]);
    recalc.recalculate(&mut store, PHC, month()).unwrap();

    let stored = store.load_snapshot(PHC, month()).unwrap().unwrap();
    assert!(stored.is_consistent());
    assert_eq!(stored.summary.total_facility_incentive, 2560.0);
    assert_eq!(stored.workers.len(), 2);
    let asha = stored.workers.iter().find(|w| w.worker_id == "W-ASHA1").unwrap();
    assert_eq!(asha.allocated_amount, 2000.0);
}

#[test]
fn missing_denominator_skips_only_that_indicator() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    let data: Vec<_> = full_month()
        .into_iter()
        .filter(|(f, _)| *f != "catchment_population")
        .collect();
    submit(&store, PHC, month(), &data);

    let outcome = Recalculator::new(&cfg).recalculate(&mut store, PHC, month()).unwrap();
    let s = &outcome.snapshot.summary;
    assert_eq!(s.indicators_processed, 6);
    assert_eq!(s.indicators_skipped, 1);
    assert_eq!(s.total_facility_incentive, 2460.0);
    // Skipped indicator counts as zero: (0 + 100 + 100 + 80 + 80 + 80) / 6.
    assert_eq!(s.performance_percentage, 73.33);

    let anc = outcome
        .snapshot
        .indicators
        .iter()
        .find(|r| r.indicator_code == "ANC_REGISTRATION")
        .unwrap();
    assert!(anc.is_skipped());
    assert_eq!(anc.incentive_amount, 0.0);
    assert_eq!(anc.ceiling_amount, Some(500.0));
    assert_eq!(
        anc.issue,
        Some(IndicatorIssue::MissingDenominator { field_id: Some("catchment_population".into()) })
    );
    assert!(outcome.indicators.iter().any(|o| matches!(
        o,
        IndicatorOutcome::Skipped { code, .. } if code == "ANC_REGISTRATION"
    )));
}

#[test]
fn withdrawn_field_value_is_treated_as_missing() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, PHC, month(), &full_month());
    let recalc = Recalculator::new(&cfg);
    recalc.recalculate(&mut store, PHC, month()).unwrap();

    store.delete_field_value("catchment_population", PHC, month()).unwrap();
    assert!(store.field_value("catchment_population", PHC, month()).unwrap().is_none());

    let outcome = recalc.recalculate(&mut store, PHC, month()).unwrap();
    assert_eq!(outcome.snapshot.summary.indicators_skipped, 1);
    assert_eq!(outcome.snapshot.summary.total_facility_incentive, 2460.0);
}

#[test]
fn out_of_range_score_is_flagged_but_paid() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    let mut data = full_month();
    data.retain(|(f, _)| *f != "satisfaction_score");
    data.push(("satisfaction_score", 7.0));
    submit(&store, PHC, month(), &data);

    let outcome = Recalculator::new(&cfg).recalculate(&mut store, PHC, month()).unwrap();
    let sat = outcome
        .snapshot
        .indicators
        .iter()
        .find(|r| r.indicator_code == "PATIENT_SATISFACTION")
        .unwrap();
    assert!(!sat.is_skipped());
    assert_eq!(sat.incentive_amount, 400.0);
    assert!(matches!(sat.issue, Some(IndicatorIssue::OutOfRange { .. })));
    assert_eq!(outcome.snapshot.summary.indicators_skipped, 0);
}

#[test]
fn no_tb_patients_uses_conditional_ceiling() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    let mut data = full_month();
    data.retain(|(f, _)| !f.starts_with("tb_"));
    submit(&store, PHC, month(), &data);

    let outcome = Recalculator::new(&cfg).recalculate(&mut store, PHC, month()).unwrap();
    let tb = outcome
        .snapshot
        .indicators
        .iter()
        .find(|r| r.indicator_code == "TB_TREATMENT_ADHERENCE")
        .unwrap();
    // No patients also means no denominator, so nothing is paid; the record
    // still shows the reduced ceiling that was in force.
    assert!(tb.is_skipped());
    assert_eq!(tb.incentive_amount, 0.0);
    assert_eq!(tb.ceiling_amount, Some(100.0));
    assert!(tb.conditional_ceiling);
}

#[test]
fn unknown_facility_aborts_without_writing() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, "GHOST", month(), &full_month());

    let err = Recalculator::new(&cfg)
        .recalculate(&mut store, "GHOST", month())
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownFacility { .. }));
    assert!(store.load_snapshot("GHOST", month()).unwrap().is_none());
}

#[test]
fn unconfigured_facility_type_aborts_and_keeps_previous_snapshot() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    submit(&store, PHC, month(), &full_month());
    let recalc = Recalculator::new(&cfg);
    recalc.recalculate(&mut store, PHC, month()).unwrap();

    store.insert_facility(PHC, "Rampur PHC", "district_hospital").unwrap();
    let err = recalc.recalculate(&mut store, PHC, month()).unwrap_err();
    assert!(matches!(err, EngineError::UnknownFacilityType { .. }));

    let stored = store.load_snapshot(PHC, month()).unwrap().unwrap();
    assert_eq!(stored.summary.facility_type, "phc");
    assert_eq!(stored.summary.total_facility_incentive, 2860.0);
}

#[test]
fn missing_ceiling_is_a_configuration_inconsistency() {
    let mut cfg = EngineConfig::default_test();
    cfg.ceilings
        .remove(&("phc".to_string(), "OPD_FOOTFALL".to_string()));
    let mut store = build();
    submit(&store, PHC, month(), &full_month());

    let outcome = Recalculator::new(&cfg).recalculate(&mut store, PHC, month()).unwrap();
    let opd = outcome
        .snapshot
        .indicators
        .iter()
        .find(|r| r.indicator_code == "OPD_FOOTFALL")
        .unwrap();
    assert!(matches!(opd.issue, Some(IndicatorIssue::ConfigurationInconsistency { .. })));
    assert_eq!(opd.ceiling_amount, None);
    assert_eq!(outcome.snapshot.summary.total_facility_incentive, 2380.0);
}

#[test]
fn weighted_performance_at_sub_centre() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    store.insert_facility("SC-007", "Bhimpur SC", "sc").unwrap();
    store
        .insert_worker(&WorkerRow {
            worker_id: "SC-ANM".into(),
            facility_id: "SC-007".into(),
            worker_type: "ANM".into(),
            name: "Sub-centre ANM".into(),
            active: true,
        })
        .unwrap();
    // ANC 6% → 100 (weight 2), no camp → 0 (weight 1), OPD 150 → 80 (weight 1).
    submit(
        &store,
        "SC-007",
        month(),
        &[
            ("anc_registered", 60.0),
            ("catchment_population", 1000.0),
            ("ncd_camps_held", 0.0),
            ("opd_footfall", 150.0),
        ],
    );

    let outcome = Recalculator::new(&cfg)
        .recalculate(&mut store, "SC-007", month())
        .unwrap();
    let s = &outcome.snapshot.summary;
    assert_eq!(s.indicators_processed, 3);
    assert_eq!(s.performance_percentage, 70.0);
    assert_eq!(s.total_facility_incentive, 640.0);
    assert_eq!(s.total_worker_remuneration, 560.0);
}

#[test]
fn dry_run_computes_without_writing() {
    let cfg = EngineConfig::default_test();
    let store = build();
    submit(&store, PHC, month(), &full_month());

    let outcome = Recalculator::new(&cfg).compute(&store, PHC, month()).unwrap();
    assert_eq!(outcome.snapshot.summary.total_facility_incentive, 2860.0);
    assert!(store.load_snapshot(PHC, month()).unwrap().is_none());
}

#[test]
fn months_are_independent() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    let april = month();
    let march = april.previous().unwrap();
    submit(&store, PHC, april, &full_month());
    submit(&store, PHC, march, &[("ncd_camps_held", 1.0)]);
    let recalc = Recalculator::new(&cfg);

    recalc.recalculate(&mut store, PHC, april).unwrap();
    recalc.recalculate(&mut store, PHC, march).unwrap();

    let a = store.load_snapshot(PHC, april).unwrap().unwrap();
    let m = store.load_snapshot(PHC, march).unwrap().unwrap();
    assert_eq!(a.summary.total_facility_incentive, 2860.0);
    assert_eq!(m.summary.total_facility_incentive, 300.0);
    assert_eq!(m.summary.indicators_skipped, 5);
}

#[test]
fn lock_registry_is_empty_after_a_year_of_recalculations() {
    let cfg = EngineConfig::default_test();
    let mut store = build();
    let recalc = Recalculator::new(&cfg);

    for m in 1..=12 {
        let month = ReportingMonth::new(2023, m).unwrap();
        submit(&store, PHC, month, &full_month());
        recalc.recalculate(&mut store, PHC, month).unwrap();
    }
    // A failed recalculation releases its slot too.
    assert!(recalc.recalculate(&mut store, "NOWHERE", month()).is_err());

    assert!(recalc.locks().is_empty(), "{} slots left", recalc.locks().len());
    assert_eq!(store.summary_count().unwrap(), 12);
}
