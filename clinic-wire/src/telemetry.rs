//! Device payloads.
//!
//! Devices post flat JSON objects. Both the bedside field names (`visit_id`,
//! `bpm`, `o2sat`, `bt`, `rr`, `sys_bp`, `dia_bp`) and the long names used by
//! the core are accepted. Numbers may arrive as JSON numbers or numeric
//! strings. Vitals are never range-checked clinically and are stored exactly as
//! sent; a value the field cannot hold (fractional pulse, negative pressure,
//! saturation above 255) is refused rather than altered.

use chrono::{DateTime, Utc};
use clinic_core::{Clinic, DeviceRef, EncounterId, IngestOutcome, TelemetrySample, Vitals};
use serde_json::Value;

use crate::WireError;

/// Parses a payload string into a sample. `server_time` stamps payloads that
/// carry no timestamp of their own.
pub fn parse_telemetry_str(
    payload: &str,
    server_time: DateTime<Utc>,
) -> Result<TelemetrySample, WireError> {
    let value: Value = serde_json::from_str(payload)?;
    parse_telemetry_value(&value, server_time)
}

pub fn parse_telemetry_value(
    payload: &Value,
    server_time: DateTime<Utc>,
) -> Result<TelemetrySample, WireError> {
    if !payload.is_object() {
        return Err(WireError::InvalidField {
            field: "payload",
            reason: "expected a JSON object".to_string(),
        });
    }

    let encounter = extract_number(payload, &["visit_id", "encounter_id"])
        .ok_or(WireError::MissingField("visit_id"))?;
    if encounter < 0.0 || encounter.fract() != 0.0 {
        return Err(WireError::InvalidField {
            field: "visit_id",
            reason: format!("{encounter} is not an encounter id"),
        });
    }

    let recorded_at = match first_present(payload, &["ts", "recorded_at"]) {
        None | Some(Value::Null) => server_time,
        Some(raw) => raw
            .as_str()
            .and_then(parse_datetime)
            .ok_or_else(|| WireError::InvalidField {
                field: "ts",
                reason: format!("{raw} is not an RFC 3339 timestamp"),
            })?,
    };

    let device = first_present(payload, &["device_id", "device"]).and_then(|value| match value {
        Value::String(text) if !text.is_empty() => Some(DeviceRef(text.clone())),
        Value::Number(number) => Some(DeviceRef(number.to_string())),
        _ => None,
    });

    let vitals = Vitals {
        rate: whole_vital(payload, "bpm", &["bpm", "rate"])?,
        saturation: whole_vital(payload, "o2sat", &["o2sat", "saturation"])?,
        temperature: temperature(payload)?,
        respiration_rate: whole_vital(payload, "rr", &["rr", "respiration_rate"])?,
        systolic: whole_vital(payload, "sys_bp", &["sys_bp", "systolic"])?,
        diastolic: whole_vital(payload, "dia_bp", &["dia_bp", "diastolic"])?,
    };

    Ok(TelemetrySample {
        encounter_id: EncounterId(encounter as u64),
        device,
        recorded_at,
        vitals,
    })
}

/// Parses and ingests in one go, the way the ingestion endpoint does.
pub fn ingest_payload_str(
    clinic: &Clinic,
    payload: &str,
    server_time: DateTime<Utc>,
) -> Result<IngestOutcome, WireError> {
    let sample = parse_telemetry_str(payload, server_time)?;
    Ok(clinic.ingest(sample))
}

fn first_present<'a>(payload: &'a Value, fields: &[&str]) -> Option<&'a Value> {
    fields.iter().find_map(|field| payload.get(*field))
}

fn extract_number(payload: &Value, fields: &[&str]) -> Option<f64> {
    for field in fields {
        let Some(value) = payload.get(*field) else {
            continue;
        };
        if let Some(number) = value.as_f64() {
            return Some(number);
        }
        if let Some(number) = value.as_str().and_then(|text| text.trim().parse::<f64>().ok()) {
            return Some(number);
        }
    }
    None
}

/// Integer vital stored in `T`. Anything `T` cannot represent verbatim is an
/// `InvalidField`.
fn whole_vital<T>(
    payload: &Value,
    field: &'static str,
    aliases: &[&str],
) -> Result<Option<T>, WireError>
where
    T: TryFrom<i64>,
{
    let Some(value) = extract_number(payload, aliases) else {
        return Ok(None);
    };
    let unrepresentable = || WireError::InvalidField {
        field,
        reason: format!("{value} cannot be stored as a whole reading"),
    };
    if !value.is_finite() || value.fract() != 0.0 || value.abs() > i64::MAX as f64 {
        return Err(unrepresentable());
    }
    T::try_from(value as i64).map(Some).map_err(|_| unrepresentable())
}

fn temperature(payload: &Value) -> Result<Option<f32>, WireError> {
    let Some(value) = extract_number(payload, &["bt", "temperature"]) else {
        return Ok(None);
    };
    let narrowed = value as f32;
    if !narrowed.is_finite() {
        return Err(WireError::InvalidField {
            field: "bt",
            reason: format!("{value} is out of range for a temperature"),
        });
    }
    Ok(Some(narrowed))
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn server_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn bedside_field_names_are_understood() {
        let sample = parse_telemetry_str(
            r#"{"visit_id": 4, "device_id": "band-7", "ts": "2025-03-01T07:59:30Z",
                "bpm": 96, "o2sat": 95, "bt": 37.8, "rr": 20, "sys_bp": 141, "dia_bp": 88}"#,
            server_time(),
        )
        .unwrap();

        assert_eq!(sample.encounter_id, EncounterId(4));
        assert_eq!(sample.device, Some(DeviceRef("band-7".into())));
        assert_eq!(
            sample.recorded_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 7, 59, 30).unwrap()
        );
        assert_eq!(sample.vitals.rate, Some(96));
        assert_eq!(sample.vitals.saturation, Some(95));
        assert_eq!(sample.vitals.respiration_rate, Some(20));
        assert_eq!(sample.vitals.diastolic, Some(88));
    }

    #[test]
    fn missing_timestamp_uses_server_time() {
        let sample =
            parse_telemetry_str(r#"{"visit_id": "4", "bpm": "70"}"#, server_time()).unwrap();
        assert_eq!(sample.recorded_at, server_time());
        assert_eq!(sample.vitals.rate, Some(70));
        assert!(sample.device.is_none());
    }

    #[test]
    fn implausible_vitals_are_kept_as_sent() {
        let sample = parse_telemetry_str(
            r#"{"visit_id": 1, "o2sat": 40, "bpm": 250, "sys_bp": 0, "bt": 45.5}"#,
            server_time(),
        )
        .unwrap();
        assert_eq!(sample.vitals.saturation, Some(40));
        assert_eq!(sample.vitals.rate, Some(250));
        assert_eq!(sample.vitals.systolic, Some(0));
        assert_eq!(sample.vitals.temperature, Some(45.5));
    }

    #[test]
    fn vitals_that_do_not_fit_are_refused_not_clamped() {
        for (payload, field) in [
            (r#"{"visit_id": 1, "bpm": 70000}"#, "bpm"),
            (r#"{"visit_id": 1, "o2sat": 400}"#, "o2sat"),
            (r#"{"visit_id": 1, "sys_bp": -20}"#, "sys_bp"),
            (r#"{"visit_id": 1, "rr": 18.5}"#, "rr"),
            (r#"{"visit_id": 1, "dia_bp": "1e30"}"#, "dia_bp"),
            (r#"{"visit_id": 1, "bt": 1e300}"#, "bt"),
        ] {
            let err = parse_telemetry_str(payload, server_time()).unwrap_err();
            assert!(
                matches!(err, WireError::InvalidField { field: f, .. } if f == field),
                "{payload}: {err:?}"
            );
        }
    }

    #[test]
    fn missing_visit_is_rejected() {
        let err = parse_telemetry_str(r#"{"bpm": 70}"#, server_time()).unwrap_err();
        assert!(matches!(err, WireError::MissingField("visit_id")));
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let err = parse_telemetry_str(r#"{"visit_id": 1, "ts": "yesterday"}"#, server_time())
            .unwrap_err();
        assert!(matches!(err, WireError::InvalidField { field: "ts", .. }));
    }
}
