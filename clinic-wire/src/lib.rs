//! JSON boundary for the clinic core: device telemetry payloads, the polling
//! dashboard response and replayable scenario files.

use clinic_core::{ClinicConfig, ClinicError};
use serde::Deserialize;

mod dashboard;
mod scenario;
mod telemetry;

pub use dashboard::{dashboard_response_str, dashboard_response_value, followup_row_value};
pub use scenario::{
    build_clinic, replay, ClassifierChoice, RejectedEvent, ReplayReport, Scenario, ScenarioEvent,
    ScenarioOp,
};
pub use telemetry::{ingest_payload_str, parse_telemetry_str, parse_telemetry_value};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("invalid JSON: {0}")]
    Parse(String),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error(transparent)]
    Clinic(#[from] ClinicError),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Parse(err.to_string())
    }
}

/// Config as it appears in files: every field optional, merged over defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialConfig {
    #[serde(default)]
    pub freshness_window_secs: Option<u64>,
    #[serde(default)]
    pub followup_row_limit: Option<usize>,
    #[serde(default)]
    pub waiting_page_size: Option<usize>,
    #[serde(default)]
    pub detail_sample_limit: Option<usize>,
    #[serde(default)]
    pub visit_sample_limit: Option<usize>,
    #[serde(default)]
    pub telemetry_shards: Option<usize>,
}

impl From<PartialConfig> for ClinicConfig {
    fn from(cfg: PartialConfig) -> Self {
        let mut base = ClinicConfig::default();
        if let Some(secs) = cfg.freshness_window_secs {
            base.freshness_window_secs = secs;
        }
        if let Some(limit) = cfg.followup_row_limit {
            base.followup_row_limit = limit;
        }
        if let Some(size) = cfg.waiting_page_size {
            base.waiting_page_size = size;
        }
        if let Some(limit) = cfg.detail_sample_limit {
            base.detail_sample_limit = limit;
        }
        if let Some(limit) = cfg.visit_sample_limit {
            base.visit_sample_limit = limit;
        }
        if let Some(shards) = cfg.telemetry_shards {
            base.telemetry_shards = shards;
        }
        base
    }
}

/// Reads a partial JSON config and fills the gaps with defaults.
pub fn parse_config_str(input: &str) -> Result<ClinicConfig, WireError> {
    let partial: PartialConfig = serde_json::from_str(input)?;
    Ok(ClinicConfig::from(partial))
}
