//! Polling response in the shape the monitor wall consumes.

use chrono::{DateTime, SecondsFormat, Utc};
use clinic_core::{DashboardResponse, FollowupRow, Severity};
use serde_json::{json, Value};

use crate::WireError;

pub fn dashboard_response_value(response: &DashboardResponse) -> Value {
    json!({
        "ok": response.ok,
        "rows": response.rows.iter().map(followup_row_value).collect::<Vec<_>>(),
        "server_time": format_datetime(response.server_time),
    })
}

pub fn dashboard_response_str(response: &DashboardResponse) -> Result<String, WireError> {
    Ok(serde_json::to_string_pretty(&dashboard_response_value(response))?)
}

/// Vitals keys are always present; they are `null` until the first reading.
pub fn followup_row_value(row: &FollowupRow) -> Value {
    let vitals = row.vitals.clone().unwrap_or_default();
    json!({
        "visit_id": row.encounter_id.0,
        "followup_queue_id": row.entry_id.0,
        "patient": row.patient.0,
        "severity": row.severity.map(Severity::label),
        "device_id": row.device.as_ref().map(|device| device.0.as_str()),
        "online": row.online,
        "vitals": {
            "bpm": vitals.rate,
            "o2sat": vitals.saturation,
            "bt": vitals.temperature,
            "rr": vitals.respiration_rate,
            "sys_bp": vitals.systolic,
            "dia_bp": vitals.diastolic,
        },
        "last_seen_at": row.last_seen_at.map(format_datetime),
        "created_at": format_datetime(row.created_at),
    })
}

fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
