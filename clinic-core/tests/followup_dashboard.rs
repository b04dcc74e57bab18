use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use clinic_core::{
    AssessmentForm, AssessmentInputs, Clinic, ClinicConfig, ClinicError, ClinicPipeline, DeviceRef,
    EncounterId, EntryId, InitialTriage, Liveness, ManualClock, PatientRef, QueueStatus,
    RuleBasedClassifier, Severity, TelemetrySample, Vitals,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn clinic_with(config: ClinicConfig) -> (Clinic, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(at(0)));
    let pipeline = ClinicPipeline::new(clock.clone())
        .with_classifier(Arc::new(RuleBasedClassifier::default()));
    (Clinic::new(config, pipeline), clock)
}

fn clinic() -> (Clinic, Arc<ManualClock>) {
    clinic_with(ClinicConfig::default())
}

fn followup_form() -> AssessmentForm {
    AssessmentForm {
        inputs: AssessmentInputs::default(),
        next_appointment_at: Some(at(7 * 24 * 3600)),
    }
}

/// Registers, calls and closes an encounter with the given form.
fn through_room(clinic: &Clinic, name: &str, form: AssessmentForm) -> (EncounterId, EntryId) {
    let pipeline = clinic.pipeline();
    let registration = pipeline
        .register(PatientRef::from(name), InitialTriage::Unassessed)
        .unwrap();
    pipeline.call(registration.entry.id).unwrap();
    pipeline
        .complete_assessment(registration.entry.id, form)
        .unwrap();
    (registration.encounter.id, registration.entry.id)
}

fn reading(encounter: EncounterId, secs: i64) -> TelemetrySample {
    TelemetrySample {
        encounter_id: encounter,
        device: Some(DeviceRef("band-01".into())),
        recorded_at: at(secs),
        vitals: Vitals {
            rate: Some(88),
            saturation: Some(97),
            temperature: Some(36.9),
            respiration_rate: Some(18),
            systolic: Some(128),
            diastolic: Some(82),
        },
    }
}

#[test]
fn assessment_without_appointment_closes_the_visit() {
    let (clinic, _clock) = clinic();
    let (encounter, entry) = through_room(&clinic, "done", AssessmentForm::default());

    assert_eq!(clinic.pipeline().entry(entry).unwrap().status, QueueStatus::OpdDone);
    assert!(clinic.pipeline().peek_ordered(10).unwrap().is_empty());
    assert!(clinic.dashboard().list_followup_rows(at(0)).unwrap().is_empty());
    assert!(clinic.pipeline().assessment(encounter).unwrap().is_some());
    assert_eq!(clinic.pipeline().status_counts().unwrap().opd_done, 1);
}

#[test]
fn assessment_with_appointment_enters_followup() {
    let (clinic, _clock) = clinic();
    let (encounter, entry) = through_room(&clinic, "monitored", followup_form());

    assert_eq!(clinic.pipeline().entry(entry).unwrap().status, QueueStatus::Followup);
    let rows = clinic.dashboard().list_followup_rows(at(0)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].encounter_id, encounter);
    assert_eq!(rows[0].patient, PatientRef::from("monitored"));
    assert!(!rows[0].online);
    assert!(rows[0].vitals.is_none());
}

#[test]
fn assessment_requires_called_status() {
    let (clinic, _clock) = clinic();
    let registration = clinic
        .pipeline()
        .register(PatientRef::from("early"), InitialTriage::Unassessed)
        .unwrap();

    let err = clinic
        .pipeline()
        .complete_assessment(registration.entry.id, followup_form())
        .unwrap_err();
    assert_eq!(
        err,
        ClinicError::InvalidTransition {
            entry: registration.entry.id,
            expected: QueueStatus::Called,
            actual: QueueStatus::Waiting,
        }
    );
}

#[test]
fn completed_assessment_is_irreversible() {
    let (clinic, _clock) = clinic();
    let (_, entry) = through_room(&clinic, "once", AssessmentForm::default());

    let err = clinic
        .pipeline()
        .complete_assessment(entry, followup_form())
        .unwrap_err();
    assert!(err.is_precondition());
    assert!(clinic.pipeline().call(entry).unwrap_err().is_precondition());
    assert_eq!(clinic.pipeline().entry(entry).unwrap().status, QueueStatus::OpdDone);
}

#[test]
fn urgent_assessment_updates_colour_but_keeps_first_triage_stamp() {
    let (clinic, clock) = clinic();
    let pipeline = clinic.pipeline();
    let registration = pipeline
        .register(PatientRef::from("febrile"), InitialTriage::Unassessed)
        .unwrap();
    clock.set(at(60));
    pipeline.call(registration.entry.id).unwrap();

    let outcome = pipeline
        .complete_assessment(
            registration.entry.id,
            AssessmentForm {
                inputs: AssessmentInputs {
                    vitals: Vitals {
                        temperature: Some(38.6),
                        ..Vitals::default()
                    },
                    ..AssessmentInputs::default()
                },
                next_appointment_at: None,
            },
        )
        .unwrap();

    assert_eq!(outcome.assessment.urgency, Severity::Yellow);
    assert_eq!(outcome.encounter.final_severity, Some(Severity::Yellow));
    assert_eq!(outcome.encounter.triaged_at, Some(at(0)));
    assert_eq!(outcome.assessment.assessed_at, at(60));
}

#[test]
fn green_assessment_leaves_colour_untouched() {
    let (clinic, _clock) = clinic();
    let pipeline = clinic.pipeline();
    let registration = pipeline
        .register(PatientRef::from("p"), InitialTriage::Severity(Severity::Yellow))
        .unwrap();
    pipeline.call(registration.entry.id).unwrap();

    let outcome = pipeline
        .complete_assessment(registration.entry.id, AssessmentForm::default())
        .unwrap();
    assert_eq!(outcome.assessment.urgency, Severity::Green);
    assert_eq!(outcome.encounter.final_severity, Some(Severity::Yellow));
}

#[test]
fn liveness_scenario_at_window_edge() {
    let (clinic, _clock) = clinic();
    let (encounter, _) = through_room(&clinic, "F", followup_form());
    clinic.ingest(reading(encounter, 100));

    let online = clinic.dashboard().list_followup_rows(at(280)).unwrap();
    assert!(online[0].online);
    assert_eq!(online[0].last_seen_at, Some(at(100)));
    assert_eq!(online[0].device, Some(DeviceRef("band-01".into())));
    assert_eq!(online[0].vitals.as_ref().and_then(|v| v.saturation), Some(97));

    let offline = clinic.dashboard().list_followup_rows(at(281)).unwrap();
    assert!(!offline[0].online);
}

#[test]
fn telemetry_before_followup_is_not_listed() {
    let (clinic, _clock) = clinic();
    let registration = clinic
        .pipeline()
        .register(PatientRef::from("waiting"), InitialTriage::Unassessed)
        .unwrap();
    clinic.ingest(reading(registration.encounter.id, 0));

    assert!(clinic.dashboard().list_followup_rows(at(0)).unwrap().is_empty());
    assert_eq!(clinic.telemetry().sample_count(registration.encounter.id), 1);
}

#[test]
fn rows_are_newest_arrival_first_and_bounded() {
    let config = ClinicConfig {
        followup_row_limit: 2,
        ..ClinicConfig::default()
    };
    let (clinic, clock) = clinic_with(config);
    let mut entries = Vec::new();
    for (secs, name) in [(0, "a"), (10, "b"), (20, "c")] {
        clock.set(at(secs));
        entries.push(through_room(&clinic, name, followup_form()).1);
    }

    let response = clinic.dashboard().poll(at(30)).unwrap();
    assert!(response.ok);
    assert_eq!(response.server_time, at(30));
    let ids: Vec<EntryId> = response.rows.iter().map(|row| row.entry_id).collect();
    assert_eq!(ids, vec![entries[2], entries[1]]);
}

#[test]
fn followup_detail_is_only_for_monitored_entries() {
    let (clinic, _clock) = clinic();
    let (_, closed) = through_room(&clinic, "closed", AssessmentForm::default());
    let (encounter, monitored) = through_room(&clinic, "monitored", followup_form());
    for secs in [10, 30, 20] {
        clinic.ingest(reading(encounter, secs));
    }

    assert_eq!(
        clinic.dashboard().followup_detail(closed, at(40)).unwrap_err(),
        ClinicError::NotFollowup(closed)
    );

    let detail = clinic.dashboard().followup_detail(monitored, at(40)).unwrap();
    assert_eq!(detail.liveness, Liveness::Online);
    assert!(detail.assessment.is_some());
    let stamps: Vec<DateTime<Utc>> = detail.samples.iter().map(|s| s.recorded_at).collect();
    assert_eq!(stamps, vec![at(30), at(20), at(10)]);
}

#[test]
fn visit_detail_reads_closed_and_waiting_visits() {
    let config = ClinicConfig {
        visit_sample_limit: 2,
        ..ClinicConfig::default()
    };
    let (clinic, _clock) = clinic_with(config);
    let (closed, closed_entry) = through_room(&clinic, "closed", AssessmentForm::default());
    for secs in [5, 15, 10] {
        clinic.ingest(reading(closed, secs));
    }

    let detail = clinic.dashboard().visit_detail(closed, at(20)).unwrap();
    assert_eq!(detail.entry.id, closed_entry);
    assert_eq!(detail.entry.status, QueueStatus::OpdDone);
    assert!(detail.assessment.is_some());
    assert_eq!(detail.liveness, Liveness::Online);
    let stamps: Vec<DateTime<Utc>> = detail.samples.iter().map(|s| s.recorded_at).collect();
    assert_eq!(stamps, vec![at(15), at(10)]);

    let waiting = clinic
        .pipeline()
        .register(PatientRef::from("waiting"), InitialTriage::Unassessed)
        .unwrap();
    let detail = clinic
        .dashboard()
        .visit_detail(waiting.encounter.id, at(20))
        .unwrap();
    assert_eq!(detail.entry.status, QueueStatus::Waiting);
    assert!(detail.assessment.is_none());
    assert_eq!(detail.liveness, Liveness::NeverSeen);
    assert!(detail.samples.is_empty());

    assert_eq!(
        clinic.dashboard().visit_detail(EncounterId(99), at(20)).unwrap_err(),
        ClinicError::EncounterNotFound(EncounterId(99))
    );
}

#[test]
fn waiting_board_joins_encounters_in_dispatch_order() {
    let (clinic, clock) = clinic();
    let pipeline = clinic.pipeline();
    pipeline
        .register(PatientRef::from("green"), InitialTriage::Severity(Severity::Green))
        .unwrap();
    clock.set(at(5));
    pipeline
        .register(PatientRef::from("red"), InitialTriage::Severity(Severity::Red))
        .unwrap();

    let board = clinic.dashboard().waiting_board(None).unwrap();
    let names: Vec<&str> = board.iter().map(|row| row.encounter.patient.0.as_str()).collect();
    assert_eq!(names, vec!["red", "green"]);
    assert_eq!(board[1].position, 1);
}

#[test]
fn clones_share_state_across_threads() {
    let (clinic, _clock) = clinic();
    let (encounter, _) = through_room(&clinic, "shared", followup_form());

    let worker = {
        let clinic = clinic.clone();
        std::thread::spawn(move || clinic.ingest(reading(encounter, 5)))
    };
    worker.join().unwrap();

    assert_eq!(clinic.telemetry().sample_count(encounter), 1);
}
