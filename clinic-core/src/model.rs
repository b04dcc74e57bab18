//! Domain records shared by the pipeline, the monitor and the dashboard.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ClinicError;

/// Identity of one clinical episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct EncounterId(pub u64);

/// Identity of a queue entry. Also the last tie-break of the dispatch order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to the patient record held by the registration system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PatientRef(pub String);

impl From<&str> for PatientRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Monitoring device a telemetry sample was attributed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DeviceRef(pub String);

/// Triage colour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Red,
    Yellow,
    Green,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Red => "RED",
            Severity::Yellow => "YELLOW",
            Severity::Green => "GREEN",
        }
    }

    pub fn priority(self) -> Priority {
        Priority::from_severity(self)
    }

    /// RED and YELLOW outcomes of an assessment overwrite the visit colour.
    pub fn is_urgent(self) -> bool {
        matches!(self, Severity::Red | Severity::Yellow)
    }

    /// Lenient reading of a registration-desk label: an unknown or absent
    /// label ranks as GREEN. Unknown labels are logged.
    pub fn from_label(label: Option<&str>) -> Severity {
        match label.map(str::parse::<Severity>) {
            Some(Ok(severity)) => severity,
            Some(Err(err)) => {
                warn!(%err, "ranking unrecognised label as GREEN");
                Severity::Green
            }
            None => Severity::Green,
        }
    }

    /// The more severe of the two.
    pub fn worst(self, other: Severity) -> Severity {
        if other.priority() < self.priority() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Severity {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RED" => Ok(Severity::Red),
            "YELLOW" => Ok(Severity::Yellow),
            "GREEN" => Ok(Severity::Green),
            other => Err(ClinicError::UnknownSeverity(other.to_string())),
        }
    }
}

/// Dispatch rank. Lower is served first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const RED: Priority = Priority(1);
    pub const YELLOW: Priority = Priority(2);
    pub const GREEN: Priority = Priority(3);

    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Red => Priority::RED,
            Severity::Yellow => Priority::YELLOW,
            Severity::Green => Priority::GREEN,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

/// Position of a queue entry in the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Called,
    OpdDone,
    Followup,
}

impl QueueStatus {
    pub fn label(self) -> &'static str {
        match self {
            QueueStatus::Waiting => "WAITING",
            QueueStatus::Called => "CALLED",
            QueueStatus::OpdDone => "OPD_DONE",
            QueueStatus::Followup => "FOLLOWUP",
        }
    }

    /// Only waiting entries take part in dispatch ordering.
    pub fn is_dispatchable(self) -> bool {
        self == QueueStatus::Waiting
    }

    /// Only follow-up entries are surfaced by the liveness dashboard.
    pub fn is_monitored(self) -> bool {
        self == QueueStatus::Followup
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One clinical episode for one patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encounter {
    pub id: EncounterId,
    pub patient: PatientRef,
    pub registered_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub triaged_at: Option<DateTime<Utc>>,
    pub final_severity: Option<Severity>,
}

impl Encounter {
    pub(crate) fn new(id: EncounterId, patient: PatientRef, registered_at: DateTime<Utc>) -> Self {
        Self {
            id,
            patient,
            registered_at,
            called_at: None,
            triaged_at: None,
            final_severity: None,
        }
    }

    /// Sets the colour and the triage stamp together so that one is never
    /// present without the other. An earlier stamp is kept when `keep_stamp`.
    pub(crate) fn stamp_severity(
        &mut self,
        severity: Severity,
        now: DateTime<Utc>,
        keep_stamp: bool,
    ) {
        self.final_severity = Some(severity);
        self.triaged_at = match self.triaged_at {
            Some(previous) if keep_stamp => Some(previous),
            _ => Some(now),
        };
    }
}

/// Dispatchable token for an encounter, 1:1 with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub encounter_id: EncounterId,
    pub status: QueueStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

/// Vital signs as captured by a form or a bedside device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Vitals {
    /// Pulse rate, beats per minute.
    pub rate: Option<u16>,
    /// Peripheral oxygen saturation, percent.
    pub saturation: Option<u8>,
    /// Body temperature, Celsius.
    pub temperature: Option<f32>,
    /// Breaths per minute.
    pub respiration_rate: Option<u16>,
    pub systolic: Option<u16>,
    pub diastolic: Option<u16>,
}

/// Clinical inputs handed to a severity classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssessmentInputs {
    #[serde(default)]
    pub vitals: Vitals,
    #[serde(default)]
    pub chief_complaint: Option<String>,
    /// Self-reported pain, 0-10.
    #[serde(default)]
    pub pain_score: Option<u8>,
    #[serde(default)]
    pub symptoms: Vec<String>,
}

/// What the examining clinician submits when closing the room visit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AssessmentForm {
    #[serde(default)]
    pub inputs: AssessmentInputs,
    #[serde(default)]
    pub next_appointment_at: Option<DateTime<Utc>>,
}

/// Stored result of the examination, one per encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    pub encounter_id: EncounterId,
    pub inputs: AssessmentInputs,
    pub next_appointment_at: Option<DateTime<Utc>>,
    pub urgency: Severity,
    pub reasons: Vec<String>,
    pub assessed_at: DateTime<Utc>,
}

impl Assessment {
    /// A follow-up appointment keeps the encounter under monitoring.
    pub fn requires_followup(&self) -> bool {
        self.next_appointment_at.is_some()
    }
}

/// A timestamped vital-sign reading. Never mutated once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySample {
    pub encounter_id: EncounterId,
    pub device: Option<DeviceRef>,
    pub recorded_at: DateTime<Utc>,
    pub vitals: Vitals,
}
