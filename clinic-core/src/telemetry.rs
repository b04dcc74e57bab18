//! Device telemetry for follow-up patients.
//!
//! Each encounter keeps its append-only sample log together with the index of
//! its newest sample, updated on write, so reading the latest vitals is O(1)
//! regardless of log length. Tracks live in a sharded `DashMap`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::{EncounterId, TelemetrySample};

/// What an ingest did to the latest-known snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The sample is now the latest for its encounter.
    Advanced,
    /// The sample is older than the current latest; it was logged only.
    Late,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Online,
    Offline,
    NeverSeen,
}

impl Liveness {
    pub fn is_online(self) -> bool {
        self == Liveness::Online
    }
}

/// Freshness rule shared by every liveness view: a reading exactly `window`
/// old still counts.
pub fn is_fresh(recorded_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now - recorded_at <= window
}

#[derive(Debug, Default)]
struct TelemetryTrack {
    log: Vec<TelemetrySample>,
    latest: Option<usize>,
}

impl TelemetryTrack {
    fn latest(&self) -> Option<&TelemetrySample> {
        self.latest.and_then(|idx| self.log.get(idx))
    }

    fn append(&mut self, sample: TelemetrySample) -> IngestOutcome {
        let advances = self
            .latest()
            .map_or(true, |current| sample.recorded_at >= current.recorded_at);
        self.log.push(sample);
        if advances {
            self.latest = Some(self.log.len() - 1);
            IngestOutcome::Advanced
        } else {
            IngestOutcome::Late
        }
    }
}

/// Upper bound on lock shards for the per-encounter index.
pub const MAX_SHARDS: usize = 1 << 12;

#[derive(Debug)]
pub struct TelemetryMonitor {
    tracks: DashMap<EncounterId, TelemetryTrack>,
}

impl Default for TelemetryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMonitor {
    pub fn new() -> Self {
        Self {
            tracks: DashMap::new(),
        }
    }

    /// `shards` is clamped to `2..=MAX_SHARDS` and rounded up to a power of two.
    pub fn with_shards(shards: usize) -> Self {
        Self {
            tracks: DashMap::with_shard_amount(shards.clamp(2, MAX_SHARDS).next_power_of_two()),
        }
    }

    /// Appends a sample. Never rejects; vitals range checks belong upstream.
    pub fn ingest(&self, sample: TelemetrySample) -> IngestOutcome {
        let encounter = sample.encounter_id;
        let recorded_at = sample.recorded_at;
        let outcome = self.tracks.entry(encounter).or_default().append(sample);
        debug!(encounter = %encounter, %recorded_at, ?outcome, "telemetry ingested");
        outcome
    }

    pub fn latest_snapshot(&self, encounter: EncounterId) -> Option<TelemetrySample> {
        self.tracks
            .get(&encounter)
            .and_then(|track| track.latest().cloned())
    }

    /// True iff a latest sample exists and is at most `window` old at `now`.
    /// The boundary is inclusive.
    pub fn is_online(
        &self,
        encounter: EncounterId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        self.liveness(encounter, now, window).is_online()
    }

    pub fn liveness(
        &self,
        encounter: EncounterId,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Liveness {
        match self.latest_snapshot(encounter) {
            None => Liveness::NeverSeen,
            Some(sample) if is_fresh(sample.recorded_at, now, window) => Liveness::Online,
            Some(_) => Liveness::Offline,
        }
    }

    /// Up to `limit` samples, newest reading first.
    pub fn recent_samples(&self, encounter: EncounterId, limit: usize) -> Vec<TelemetrySample> {
        let Some(track) = self.tracks.get(&encounter) else {
            return Vec::new();
        };
        let mut samples: Vec<&TelemetrySample> = track.log.iter().collect();
        samples.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        samples.into_iter().take(limit).cloned().collect()
    }

    pub fn sample_count(&self, encounter: EncounterId) -> usize {
        self.tracks.get(&encounter).map_or(0, |track| track.log.len())
    }

    /// Encounters that have reported at least once.
    pub fn tracked_encounters(&self) -> usize {
        self.tracks.len()
    }
}
