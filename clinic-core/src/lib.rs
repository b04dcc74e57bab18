//! Core logic for the outpatient pipeline: severity dispatch queue, visit
//! lifecycle and follow-up telemetry liveness.

use chrono::Duration;
use serde::{Deserialize, Serialize};

pub mod classifier;
pub mod clinic;
pub mod clock;
pub mod dashboard;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod telemetry;

pub use classifier::{
    classify_or_fallback, Classification, ClassifierError, ModelClassifier, RuleBasedClassifier,
    SeverityClassifier, TriageThresholds,
};
pub use clinic::Clinic;
pub use clock::{Clock, ManualClock, SystemClock};
pub use dashboard::{Dashboard, DashboardResponse, FollowupRow, VisitDetail, WaitingRow};
pub use model::{
    Assessment, AssessmentForm, AssessmentInputs, DeviceRef, Encounter, EncounterId, EntryId,
    PatientRef, Priority, QueueEntry, QueueStatus, Severity, TelemetrySample, Vitals,
};
pub use pipeline::{AssessmentOutcome, ClinicPipeline, InitialTriage, Registration, StatusCounts};
pub use queue::{DispatchQueue, QueueKey};
pub use telemetry::{is_fresh, IngestOutcome, Liveness, TelemetryMonitor, MAX_SHARDS};

/// Tunables for the dispatch and monitoring views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicConfig {
    /// Maximum age (seconds) of the latest sample for a device to count as online.
    pub freshness_window_secs: u64,
    /// Upper bound on rows returned by one dashboard poll.
    pub followup_row_limit: usize,
    /// Default page size for the waiting board.
    pub waiting_page_size: usize,
    /// Telemetry rows shown in a follow-up detail view.
    pub detail_sample_limit: usize,
    /// Telemetry rows shown in the detail view of any visit.
    pub visit_sample_limit: usize,
    /// Initial shard amount for the latest-sample index.
    pub telemetry_shards: usize,
}

impl Default for ClinicConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 180,
            followup_row_limit: 200,
            waiting_page_size: 50,
            detail_sample_limit: 100,
            visit_sample_limit: 50,
            telemetry_shards: 16,
        }
    }
}

impl ClinicConfig {
    pub fn freshness_window(&self) -> Duration {
        // `Duration::seconds` panics past i64::MAX milliseconds.
        const MAX_SECS: u64 = (i64::MAX / 1_000) as u64;
        Duration::seconds(self.freshness_window_secs.min(MAX_SECS) as i64)
    }
}

/// Outcomes a caller of the core must be prepared to handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClinicError {
    #[error("encounter {0} not found")]
    EncounterNotFound(EncounterId),
    #[error("queue entry {0} not found")]
    EntryNotFound(EntryId),
    #[error("queue entry {entry} is {actual}, expected {expected}")]
    InvalidTransition {
        entry: EntryId,
        expected: QueueStatus,
        actual: QueueStatus,
    },
    #[error("queue entry {0} is not under follow-up")]
    NotFollowup(EntryId),
    #[error("unknown severity label: {0}")]
    UnknownSeverity(String),
    #[error("shared state lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ClinicError {
    /// True for "entry is not in the expected state" signals. Callers re-fetch
    /// and redirect instead of reporting a fault.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ClinicError::InvalidTransition { .. } | ClinicError::NotFollowup(_)
        )
    }
}

pub type ClinicResult<T> = Result<T, ClinicError>;
