//! Read models for the polling dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{
    Assessment, DeviceRef, Encounter, EncounterId, EntryId, PatientRef, QueueEntry, Severity,
    TelemetrySample, Vitals,
};
use crate::pipeline::ClinicPipeline;
use crate::telemetry::{is_fresh, Liveness, TelemetryMonitor};
use crate::{ClinicConfig, ClinicError, ClinicResult};

/// One follow-up patient as shown on the monitor wall.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowupRow {
    pub encounter_id: EncounterId,
    pub entry_id: EntryId,
    pub patient: PatientRef,
    pub severity: Option<Severity>,
    pub device: Option<DeviceRef>,
    pub vitals: Option<Vitals>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub online: bool,
    /// Arrival time of the queue entry.
    pub created_at: DateTime<Utc>,
}

/// Body of one poll. Clients diff `rows` locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardResponse {
    pub ok: bool,
    pub rows: Vec<FollowupRow>,
    pub server_time: DateTime<Utc>,
}

/// One visit with its assessment and recent device readings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitDetail {
    pub encounter: Encounter,
    pub entry: QueueEntry,
    pub assessment: Option<Assessment>,
    pub liveness: Liveness,
    /// Newest first.
    pub samples: Vec<TelemetrySample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingRow {
    /// Zero-based place in the dispatch order.
    pub position: usize,
    pub entry: QueueEntry,
    pub encounter: Encounter,
}

/// Joins pipeline state with the latest telemetry. Borrowed per request.
#[derive(Clone, Copy)]
pub struct Dashboard<'a> {
    pipeline: &'a ClinicPipeline,
    telemetry: &'a TelemetryMonitor,
    config: &'a ClinicConfig,
}

impl<'a> Dashboard<'a> {
    pub fn new(
        pipeline: &'a ClinicPipeline,
        telemetry: &'a TelemetryMonitor,
        config: &'a ClinicConfig,
    ) -> Self {
        Self {
            pipeline,
            telemetry,
            config,
        }
    }

    /// FOLLOWUP entries, newest arrival first, bounded by
    /// `followup_row_limit`. Entries whose encounter cannot be resolved are
    /// skipped.
    pub fn list_followup_rows(&self, now: DateTime<Utc>) -> ClinicResult<Vec<FollowupRow>> {
        let entries = self.pipeline.followup_entries(self.config.followup_row_limit)?;
        let ids: Vec<EncounterId> = entries.iter().map(|entry| entry.encounter_id).collect();
        let encounters = self.pipeline.encounters(&ids)?;
        let window = self.config.freshness_window();

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(encounter) = encounters.get(&entry.encounter_id) else {
                warn!(
                    entry = %entry.id,
                    encounter = %entry.encounter_id,
                    "follow-up entry without encounter, skipping row"
                );
                continue;
            };

            let latest = self.telemetry.latest_snapshot(encounter.id);
            let online = latest
                .as_ref()
                .is_some_and(|sample| is_fresh(sample.recorded_at, now, window));
            let (device, vitals, last_seen_at) = match latest {
                Some(sample) => (sample.device, Some(sample.vitals), Some(sample.recorded_at)),
                None => (None, None, None),
            };

            rows.push(FollowupRow {
                encounter_id: encounter.id,
                entry_id: entry.id,
                patient: encounter.patient.clone(),
                severity: encounter.final_severity,
                device,
                vitals,
                last_seen_at,
                online,
                created_at: entry.created_at,
            });
        }
        Ok(rows)
    }

    pub fn poll(&self, now: DateTime<Utc>) -> ClinicResult<DashboardResponse> {
        Ok(DashboardResponse {
            ok: true,
            rows: self.list_followup_rows(now)?,
            server_time: now,
        })
    }

    /// Detail page for one follow-up patient. Refused for any other status.
    pub fn followup_detail(
        &self,
        entry: EntryId,
        now: DateTime<Utc>,
    ) -> ClinicResult<VisitDetail> {
        let queue_entry = self.pipeline.entry(entry)?;
        if !queue_entry.status.is_monitored() {
            return Err(ClinicError::NotFollowup(entry));
        }
        let encounter = self.pipeline.encounter(queue_entry.encounter_id)?;
        self.detail(encounter, queue_entry, now, self.config.detail_sample_limit)
    }

    /// Detail of any visit, whatever its status, with the newest
    /// `visit_sample_limit` readings.
    pub fn visit_detail(
        &self,
        encounter: EncounterId,
        now: DateTime<Utc>,
    ) -> ClinicResult<VisitDetail> {
        let visit = self.pipeline.encounter(encounter)?;
        let queue_entry = self.pipeline.entry_for_encounter(encounter)?;
        self.detail(visit, queue_entry, now, self.config.visit_sample_limit)
    }

    fn detail(
        &self,
        encounter: Encounter,
        entry: QueueEntry,
        now: DateTime<Utc>,
        sample_limit: usize,
    ) -> ClinicResult<VisitDetail> {
        let assessment = self.pipeline.assessment(encounter.id)?;
        Ok(VisitDetail {
            liveness: self
                .telemetry
                .liveness(encounter.id, now, self.config.freshness_window()),
            samples: self.telemetry.recent_samples(encounter.id, sample_limit),
            encounter,
            entry,
            assessment,
        })
    }

    /// Waiting queue joined with encounters, in dispatch order.
    pub fn waiting_board(&self, limit: Option<usize>) -> ClinicResult<Vec<WaitingRow>> {
        let entries = self
            .pipeline
            .peek_ordered(limit.unwrap_or(self.config.waiting_page_size))?;
        let ids: Vec<EncounterId> = entries.iter().map(|entry| entry.encounter_id).collect();
        let encounters = self.pipeline.encounters(&ids)?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| {
                let encounter = encounters.get(&entry.encounter_id)?.clone();
                Some((entry, encounter))
            })
            .enumerate()
            .map(|(position, (entry, encounter))| WaitingRow {
                position,
                entry,
                encounter,
            })
            .collect())
    }
}
