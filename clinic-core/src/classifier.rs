//! Severity classification strategies.
//!
//! The pipeline holds at most one `SeverityClassifier`, chosen when the
//! pipeline is built. Whatever the strategy, callers go through
//! [`classify_or_fallback`], which turns a missing or failing strategy into a
//! GREEN result carrying a single diagnostic reason.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{AssessmentInputs, Severity};

/// Colour plus the human-readable reasons that produced it, in rule order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub severity: Severity,
    pub reasons: Vec<String>,
}

impl Classification {
    pub fn new(severity: Severity, reasons: Vec<String>) -> Self {
        Self { severity, reasons }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier rejected input: {0}")]
    Rejected(String),
}

pub trait SeverityClassifier: Send + Sync {
    fn classify(&self, inputs: &AssessmentInputs) -> Result<Classification, ClassifierError>;
}

/// Runs `classifier` if there is one. Never fails.
pub fn classify_or_fallback(
    classifier: Option<&dyn SeverityClassifier>,
    inputs: &AssessmentInputs,
) -> Classification {
    let Some(classifier) = classifier else {
        warn!("no severity classifier configured, defaulting to GREEN");
        return Classification::new(
            Severity::Green,
            vec!["No severity classifier configured; defaulted to GREEN".to_string()],
        );
    };

    match classifier.classify(inputs) {
        Ok(classification) => classification,
        Err(err) => {
            warn!(error = %err, "severity classifier failed, defaulting to GREEN");
            Classification::new(
                Severity::Green,
                vec![format!("Severity classifier failed ({err}); defaulted to GREEN")],
            )
        }
    }
}

/// Cut-offs used by [`RuleBasedClassifier`]. A reading at or beyond a `red_*`
/// bound is RED, at or beyond a `yellow_*` bound is YELLOW.
/// Missing fields take their default when deserialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriageThresholds {
    pub red_saturation_below: u8,
    pub yellow_saturation_below: u8,
    pub red_systolic_at_least: u16,
    pub yellow_systolic_at_least: u16,
    pub red_systolic_below: u16,
    pub red_diastolic_at_least: u16,
    pub yellow_diastolic_at_least: u16,
    pub red_rate_above: u16,
    pub yellow_rate_above: u16,
    pub red_rate_below: u16,
    pub yellow_rate_below: u16,
    pub red_respiration_above: u16,
    pub yellow_respiration_above: u16,
    pub red_respiration_below: u16,
    pub yellow_temperature_at_least: f32,
    pub red_temperature_at_least: f32,
    pub yellow_temperature_below: f32,
    pub yellow_pain_at_least: u8,
}

impl Default for TriageThresholds {
    fn default() -> Self {
        Self {
            red_saturation_below: 90,
            yellow_saturation_below: 94,
            red_systolic_at_least: 180,
            yellow_systolic_at_least: 160,
            red_systolic_below: 90,
            red_diastolic_at_least: 110,
            yellow_diastolic_at_least: 100,
            red_rate_above: 130,
            yellow_rate_above: 110,
            red_rate_below: 40,
            yellow_rate_below: 50,
            red_respiration_above: 30,
            yellow_respiration_above: 24,
            red_respiration_below: 8,
            yellow_temperature_at_least: 38.0,
            red_temperature_at_least: 40.0,
            yellow_temperature_below: 35.0,
            yellow_pain_at_least: 8,
        }
    }
}

/// Vital-sign threshold rules. Every triggered rule adds a reason; the most
/// severe rule wins.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedClassifier {
    thresholds: TriageThresholds,
}

impl RuleBasedClassifier {
    pub fn new(thresholds: TriageThresholds) -> Self {
        Self { thresholds }
    }
}

impl SeverityClassifier for RuleBasedClassifier {
    fn classify(&self, inputs: &AssessmentInputs) -> Result<Classification, ClassifierError> {
        let t = &self.thresholds;
        let vitals = &inputs.vitals;
        let mut findings: Vec<(Severity, String)> = Vec::new();

        if let Some(spo2) = vitals.saturation {
            if spo2 < t.red_saturation_below {
                findings.push((
                    Severity::Red,
                    format!("SpO2 {spo2}% below {}%", t.red_saturation_below),
                ));
            } else if spo2 < t.yellow_saturation_below {
                findings.push((
                    Severity::Yellow,
                    format!("SpO2 {spo2}% below {}%", t.yellow_saturation_below),
                ));
            }
        }

        if let Some(sys) = vitals.systolic {
            if sys >= t.red_systolic_at_least {
                findings.push((
                    Severity::Red,
                    format!("Systolic BP {sys} mmHg, hypertensive crisis"),
                ));
            } else if sys < t.red_systolic_below {
                findings.push((Severity::Red, format!("Systolic BP {sys} mmHg, hypotension")));
            } else if sys >= t.yellow_systolic_at_least {
                findings.push((Severity::Yellow, format!("Systolic BP {sys} mmHg elevated")));
            }
        }

        if let Some(dia) = vitals.diastolic {
            if dia >= t.red_diastolic_at_least {
                findings.push((
                    Severity::Red,
                    format!("Diastolic BP {dia} mmHg, hypertensive crisis"),
                ));
            } else if dia >= t.yellow_diastolic_at_least {
                findings.push((Severity::Yellow, format!("Diastolic BP {dia} mmHg elevated")));
            }
        }

        if let Some(rate) = vitals.rate {
            if rate > t.red_rate_above || rate < t.red_rate_below {
                findings.push((Severity::Red, format!("Pulse {rate} bpm critical")));
            } else if rate > t.yellow_rate_above || rate < t.yellow_rate_below {
                findings.push((Severity::Yellow, format!("Pulse {rate} bpm abnormal")));
            }
        }

        if let Some(rr) = vitals.respiration_rate {
            if rr > t.red_respiration_above || rr < t.red_respiration_below {
                findings.push((Severity::Red, format!("Respiratory rate {rr}/min critical")));
            } else if rr > t.yellow_respiration_above {
                findings.push((Severity::Yellow, format!("Respiratory rate {rr}/min elevated")));
            }
        }

        if let Some(bt) = vitals.temperature {
            if bt >= t.red_temperature_at_least {
                findings.push((Severity::Red, format!("Temperature {bt:.1} C, hyperpyrexia")));
            } else if bt >= t.yellow_temperature_at_least {
                findings.push((Severity::Yellow, format!("Temperature {bt:.1} C, fever")));
            } else if bt < t.yellow_temperature_below {
                findings.push((Severity::Yellow, format!("Temperature {bt:.1} C, hypothermia")));
            }
        }

        if let Some(pain) = inputs.pain_score {
            if pain >= t.yellow_pain_at_least {
                findings.push((Severity::Yellow, format!("Pain score {pain}/10")));
            }
        }

        if findings.is_empty() {
            return Ok(Classification::new(
                Severity::Green,
                vec!["Vital signs within normal limits".to_string()],
            ));
        }

        let severity = findings
            .iter()
            .fold(Severity::Green, |acc, (severity, _)| acc.worst(*severity));
        let reasons = findings.into_iter().map(|(_, reason)| reason).collect();
        Ok(Classification::new(severity, reasons))
    }
}

type ModelFn = dyn Fn(&AssessmentInputs) -> Result<Classification, ClassifierError> + Send + Sync;

/// Adapter for an externally trained model exposed as a plain function.
pub struct ModelClassifier {
    name: String,
    model: Box<ModelFn>,
}

impl ModelClassifier {
    pub fn new<F>(name: impl Into<String>, model: F) -> Self
    where
        F: Fn(&AssessmentInputs) -> Result<Classification, ClassifierError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            model: Box::new(model),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ModelClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelClassifier")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SeverityClassifier for ModelClassifier {
    fn classify(&self, inputs: &AssessmentInputs) -> Result<Classification, ClassifierError> {
        (self.model)(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vitals;

    fn inputs(vitals: Vitals) -> AssessmentInputs {
        AssessmentInputs {
            vitals,
            ..AssessmentInputs::default()
        }
    }

    #[test]
    fn normal_vitals_are_green() {
        let result = RuleBasedClassifier::default()
            .classify(&inputs(Vitals {
                rate: Some(72),
                saturation: Some(98),
                temperature: Some(36.8),
                respiration_rate: Some(16),
                systolic: Some(120),
                diastolic: Some(80),
            }))
            .unwrap();
        assert_eq!(result.severity, Severity::Green);
        assert_eq!(result.reasons.len(), 1);
    }

    #[test]
    fn worst_finding_wins_and_all_reasons_are_kept() {
        let result = RuleBasedClassifier::default()
            .classify(&inputs(Vitals {
                saturation: Some(88),
                temperature: Some(38.4),
                ..Vitals::default()
            }))
            .unwrap();
        assert_eq!(result.severity, Severity::Red);
        assert_eq!(result.reasons.len(), 2);
        assert!(result.reasons[0].starts_with("SpO2 88%"));
    }

    #[test]
    fn elevated_pressure_is_yellow() {
        let result = RuleBasedClassifier::default()
            .classify(&inputs(Vitals {
                systolic: Some(165),
                diastolic: Some(95),
                ..Vitals::default()
            }))
            .unwrap();
        assert_eq!(result.severity, Severity::Yellow);
    }

    #[test]
    fn missing_strategy_falls_back_to_green() {
        let result = classify_or_fallback(None, &AssessmentInputs::default());
        assert_eq!(result.severity, Severity::Green);
        assert_eq!(result.reasons.len(), 1);
    }

    #[test]
    fn failing_model_falls_back_to_green() {
        let model = ModelClassifier::new("offline", |_| {
            Err(ClassifierError::Unavailable("model not loaded".into()))
        });
        let result = classify_or_fallback(Some(&model), &AssessmentInputs::default());
        assert_eq!(result.severity, Severity::Green);
        assert_eq!(result.reasons.len(), 1);
        assert!(result.reasons[0].contains("model not loaded"));
    }

    #[test]
    fn model_result_is_passed_through() {
        let model = ModelClassifier::new("always-red", |_| {
            Ok(Classification::new(Severity::Red, vec!["model score 0.97".into()]))
        });
        let result = classify_or_fallback(Some(&model), &AssessmentInputs::default());
        assert_eq!(result.severity, Severity::Red);
        assert_eq!(model.name(), "always-red");
    }
}
