use std::fs;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use clinic_core::{EncounterId, ManualClock, QueueStatus, Severity};
use clinic_wire::{build_clinic, dashboard_response_value, replay, RejectedEvent, Scenario};
use serde_json::Value;

fn fixture_path(name: &str) -> String {
    format!("{}/tests/data/{name}", env!("CARGO_MANIFEST_DIR"))
}

fn load_scenario() -> Scenario {
    let raw = fs::read_to_string(fixture_path("followup_scenario.json"))
        .expect("cannot read scenario fixture");
    Scenario::parse(&raw).expect("scenario fixture is invalid")
}

#[test]
fn followup_dashboard_matches_golden() {
    let scenario = load_scenario();
    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let clinic = build_clinic(&scenario, clock.clone());
    replay(&clinic, &clock, &scenario).expect("replay failed");

    let now = Utc.with_ymd_and_hms(2025, 3, 1, 8, 42, 0).unwrap();
    let response = clinic.dashboard().poll(now).expect("poll failed");
    let actual = dashboard_response_value(&response);

    let expected = fs::read_to_string(fixture_path("followup_dashboard.json"))
        .expect("cannot read golden dashboard");
    let expected: Value = serde_json::from_str(&expected).expect("golden is not valid JSON");

    assert_eq!(actual, expected);
}

#[test]
fn replay_reports_rejected_actions() {
    let scenario = load_scenario();
    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let clinic = build_clinic(&scenario, clock.clone());
    let report = replay(&clinic, &clock, &scenario).unwrap();

    assert_eq!(report.applied, scenario.events.len() - 2);
    let indexes: Vec<usize> = report.rejected.iter().map(|r: &RejectedEvent| r.index).collect();
    assert_eq!(indexes, vec![5, 14]);
    assert!(report.rejected[0].reason.contains("expected WAITING"));
}

#[test]
fn replay_leaves_pipeline_in_expected_state() {
    let scenario = load_scenario();
    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let clinic = build_clinic(&scenario, clock.clone());
    replay(&clinic, &clock, &scenario).unwrap();

    let pipeline = clinic.pipeline();
    let counts = pipeline.status_counts().unwrap();
    assert_eq!((counts.waiting, counts.called, counts.opd_done, counts.followup), (0, 0, 1, 2));

    let closed = pipeline.entry_for_encounter(EncounterId(1)).unwrap();
    assert_eq!(closed.status, QueueStatus::OpdDone);
    assert_eq!(
        pipeline.encounter(EncounterId(2)).unwrap().final_severity,
        Some(Severity::Red)
    );
    assert_eq!(clinic.telemetry().sample_count(EncounterId(2)), 2);
    assert_eq!(clinic.telemetry().sample_count(EncounterId(1)), 1);
    assert_eq!(scenario.end_time(), Utc.with_ymd_and_hms(2025, 3, 1, 8, 42, 0).unwrap());
}

#[test]
fn scenario_without_classifier_queues_everyone_green() {
    let scenario = Scenario::parse(
        r#"{
            "classifier": "none",
            "events": [
                { "op": "register", "patient": "a", "inputs": { "vitals": { "saturation": 80 } } },
                { "op": "register", "patient": "b", "severity": "PURPLE" }
            ]
        }"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let clinic = build_clinic(&scenario, clock.clone());
    let report = replay(&clinic, &clock, &scenario).unwrap();

    assert_eq!(report.applied, 2);
    let waiting = clinic.pipeline().peek_ordered(10).unwrap();
    assert!(waiting
        .iter()
        .all(|entry| entry.priority == Severity::Green.priority()));
}

#[test]
fn scenario_thresholds_tune_the_rule_classifier() {
    let scenario = Scenario::parse(
        r#"{
            "thresholds": { "red_saturation_below": 99 },
            "events": [
                { "op": "register", "patient": "a", "inputs": { "vitals": { "saturation": 98 } } },
                { "op": "register", "patient": "b", "inputs": { "vitals": { "rate": 140 } } }
            ]
        }"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new(scenario.start_time()));
    let clinic = build_clinic(&scenario, clock.clone());
    replay(&clinic, &clock, &scenario).unwrap();

    let waiting = clinic.pipeline().peek_ordered(10).unwrap();
    assert_eq!(waiting.len(), 2);
    assert!(waiting
        .iter()
        .all(|entry| entry.priority == Severity::Red.priority()));
}
