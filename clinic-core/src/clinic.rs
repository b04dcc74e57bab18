//! Shareable handle bundling the pipeline, the telemetry monitor and config.

use std::sync::Arc;

use crate::dashboard::Dashboard;
use crate::model::TelemetrySample;
use crate::pipeline::ClinicPipeline;
use crate::telemetry::{IngestOutcome, TelemetryMonitor};
use crate::ClinicConfig;

/// Cheap to clone; every clone sees the same state. Request workers each hold
/// one.
#[derive(Clone)]
pub struct Clinic {
    pipeline: Arc<ClinicPipeline>,
    telemetry: Arc<TelemetryMonitor>,
    config: Arc<ClinicConfig>,
}

impl Clinic {
    pub fn new(config: ClinicConfig, pipeline: ClinicPipeline) -> Self {
        let telemetry = TelemetryMonitor::with_shards(config.telemetry_shards);
        Self {
            pipeline: Arc::new(pipeline),
            telemetry: Arc::new(telemetry),
            config: Arc::new(config),
        }
    }

    pub fn pipeline(&self) -> &ClinicPipeline {
        &self.pipeline
    }

    pub fn telemetry(&self) -> &TelemetryMonitor {
        &self.telemetry
    }

    pub fn config(&self) -> &ClinicConfig {
        &self.config
    }

    pub fn dashboard(&self) -> Dashboard<'_> {
        Dashboard::new(&self.pipeline, &self.telemetry, &self.config)
    }

    pub fn ingest(&self, sample: TelemetrySample) -> IngestOutcome {
        self.telemetry.ingest(sample)
    }
}
