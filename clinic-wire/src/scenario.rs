//! Replayable scenario files.
//!
//! A scenario is a list of timestamped desk, room and device events applied
//! to a fresh clinic in order. Events address encounters by id (`visit`);
//! ids are handed out from 1 in registration order. Precondition failures are
//! collected in the report so a scenario can also exercise rejected actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clinic_core::{
    AssessmentForm, AssessmentInputs, Clinic, ClinicConfig, ClinicError, ClinicPipeline, Clock,
    EncounterId, InitialTriage, ManualClock, PatientRef, RuleBasedClassifier, Severity,
    TriageThresholds,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{parse_telemetry_value, PartialConfig, WireError};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierChoice {
    #[default]
    Rules,
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Clock position before the first event. Defaults to the Unix epoch.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config: PartialConfig,
    #[serde(default)]
    pub classifier: ClassifierChoice,
    /// Cut-offs for the rule-based classifier; unset fields keep their defaults.
    #[serde(default)]
    pub thresholds: TriageThresholds,
    pub events: Vec<ScenarioEvent>,
}

impl Scenario {
    pub fn parse(input: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start.unwrap_or_default()
    }

    /// Latest event time, or the start when no event carries one.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.events
            .iter()
            .filter_map(|event| event.at)
            .max()
            .unwrap_or_else(|| self.start_time())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioEvent {
    /// Moves the clock before the event runs; omitted means "same time".
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub op: ScenarioOp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScenarioOp {
    Register {
        patient: String,
        #[serde(default)]
        severity: Option<String>,
        #[serde(default)]
        inputs: Option<AssessmentInputs>,
    },
    Call {
        visit: u64,
    },
    CallNext,
    Triage {
        visit: u64,
        severity: String,
    },
    Assess {
        visit: u64,
        #[serde(default)]
        inputs: AssessmentInputs,
        #[serde(default)]
        next_appointment_at: Option<DateTime<Utc>>,
    },
    Telemetry {
        payload: Value,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectedEvent {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReplayReport {
    pub applied: usize,
    pub rejected: Vec<RejectedEvent>,
}

/// Builds an empty clinic for `scenario`, driven by `clock`.
pub fn build_clinic(scenario: &Scenario, clock: Arc<ManualClock>) -> Clinic {
    clock.set(scenario.start_time());
    let mut pipeline = ClinicPipeline::new(clock);
    if scenario.classifier == ClassifierChoice::Rules {
        let rules = RuleBasedClassifier::new(scenario.thresholds.clone());
        pipeline = pipeline.with_classifier(Arc::new(rules));
    }
    Clinic::new(ClinicConfig::from(scenario.config.clone()), pipeline)
}

/// Applies every event in order. Only a poisoned lock aborts the replay;
/// anything else the clinic refuses is recorded and skipped.
pub fn replay(
    clinic: &Clinic,
    clock: &ManualClock,
    scenario: &Scenario,
) -> Result<ReplayReport, WireError> {
    let mut report = ReplayReport::default();

    for (index, event) in scenario.events.iter().enumerate() {
        if let Some(at) = event.at {
            clock.set(at);
        }
        match apply(clinic, clock, &event.op) {
            Ok(()) => report.applied += 1,
            Err(WireError::Clinic(ClinicError::LockPoisoned(reason))) => {
                return Err(ClinicError::LockPoisoned(reason).into());
            }
            Err(err) => {
                warn!(index, error = %err, "scenario event rejected");
                report.rejected.push(RejectedEvent {
                    index,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        applied = report.applied,
        rejected = report.rejected.len(),
        "scenario replayed"
    );
    Ok(report)
}

fn apply(clinic: &Clinic, clock: &ManualClock, op: &ScenarioOp) -> Result<(), WireError> {
    let pipeline = clinic.pipeline();
    match op {
        ScenarioOp::Register {
            patient,
            severity,
            inputs,
        } => {
            let triage = match (severity.as_deref(), inputs) {
                (None, Some(inputs)) => InitialTriage::Inputs(inputs.clone()),
                (label, _) => InitialTriage::Severity(Severity::from_label(label)),
            };
            pipeline.register(PatientRef(patient.clone()), triage)?;
        }
        ScenarioOp::Call { visit } => {
            pipeline.call_encounter(EncounterId(*visit))?;
        }
        ScenarioOp::CallNext => {
            pipeline.call_next()?;
        }
        ScenarioOp::Triage { visit, severity } => {
            let entry = pipeline.entry_for_encounter(EncounterId(*visit))?;
            pipeline.reprioritize_label(entry.id, severity)?;
        }
        ScenarioOp::Assess {
            visit,
            inputs,
            next_appointment_at,
        } => {
            let entry = pipeline.entry_for_encounter(EncounterId(*visit))?;
            pipeline.complete_assessment(
                entry.id,
                AssessmentForm {
                    inputs: inputs.clone(),
                    next_appointment_at: *next_appointment_at,
                },
            )?;
        }
        ScenarioOp::Telemetry { payload } => {
            let sample = parse_telemetry_value(payload, clock.now())?;
            clinic.ingest(sample);
        }
    }
    Ok(())
}
