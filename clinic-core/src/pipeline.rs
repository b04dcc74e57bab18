//! Visit lifecycle: `WAITING -> CALLED -> {OPD_DONE | FOLLOWUP}`.
//!
//! `ClinicPipeline` is the single owner of encounters, queue entries,
//! assessments and the dispatch order. Every transition checks the current
//! status and applies its changes inside one write critical section, so two
//! actors racing on the same entry get exactly one winner; the other sees
//! [`ClinicError::InvalidTransition`] and nothing changes.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::classifier::{classify_or_fallback, Classification, SeverityClassifier};
use crate::clock::{Clock, SystemClock};
use crate::model::{
    Assessment, AssessmentForm, AssessmentInputs, Encounter, EncounterId, EntryId, PatientRef,
    Priority, QueueEntry, QueueStatus, Severity,
};
use crate::queue::{DispatchQueue, QueueKey};
use crate::{ClinicError, ClinicResult};

/// How the colour of a new encounter is decided at registration.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialTriage {
    /// Nothing known yet; the encounter starts GREEN.
    Unassessed,
    /// The registration desk already picked a colour.
    Severity(Severity),
    /// Run the configured classifier on these inputs.
    Inputs(AssessmentInputs),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registration {
    pub encounter: Encounter,
    pub entry: QueueEntry,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentOutcome {
    pub encounter: Encounter,
    pub entry: QueueEntry,
    pub assessment: Assessment,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub waiting: usize,
    pub called: usize,
    pub opd_done: usize,
    pub followup: usize,
}

#[derive(Debug, Default)]
struct PipelineState {
    next_encounter: u64,
    next_entry: u64,
    encounters: HashMap<EncounterId, Encounter>,
    entries: HashMap<EntryId, QueueEntry>,
    entry_by_encounter: HashMap<EncounterId, EntryId>,
    encounter_by_entry: HashMap<EntryId, EncounterId>,
    assessments: HashMap<EncounterId, Assessment>,
    waiting: DispatchQueue,
    called: BTreeSet<QueueKey>,
    followups: BTreeSet<(DateTime<Utc>, EntryId)>,
    opd_done: usize,
}

impl PipelineState {
    fn allocate_ids(&mut self) -> (EncounterId, EntryId) {
        self.next_encounter += 1;
        self.next_entry += 1;
        (EncounterId(self.next_encounter), EntryId(self.next_entry))
    }

    /// Checks that `entry` is in `expected` or reports what it really is.
    fn expect_status(&self, entry: EntryId, expected: QueueStatus) -> ClinicResult<&QueueEntry> {
        let current = self
            .entries
            .get(&entry)
            .ok_or(ClinicError::EntryNotFound(entry))?;
        if current.status != expected {
            return Err(ClinicError::InvalidTransition {
                entry,
                expected,
                actual: current.status,
            });
        }
        Ok(current)
    }

    /// Only entries still in dispatch order may be called or re-triaged.
    fn expect_dispatchable(&self, entry: EntryId) -> ClinicResult<&QueueEntry> {
        let current = self
            .entries
            .get(&entry)
            .ok_or(ClinicError::EntryNotFound(entry))?;
        if !current.status.is_dispatchable() {
            return Err(ClinicError::InvalidTransition {
                entry,
                expected: QueueStatus::Waiting,
                actual: current.status,
            });
        }
        Ok(current)
    }

    fn encounter_of(&self, entry: EntryId) -> ClinicResult<EncounterId> {
        self.encounter_by_entry
            .get(&entry)
            .copied()
            .ok_or(ClinicError::EntryNotFound(entry))
    }

    fn entry_of(&self, encounter: EncounterId) -> ClinicResult<EntryId> {
        self.entry_by_encounter
            .get(&encounter)
            .copied()
            .ok_or(ClinicError::EncounterNotFound(encounter))
    }

    fn encounter_snapshot(&self, encounter: EncounterId) -> ClinicResult<Encounter> {
        self.encounters
            .get(&encounter)
            .cloned()
            .ok_or(ClinicError::EncounterNotFound(encounter))
    }

    fn entry_snapshot(&self, entry: EntryId) -> ClinicResult<QueueEntry> {
        self.entries
            .get(&entry)
            .cloned()
            .ok_or(ClinicError::EntryNotFound(entry))
    }

    fn call(&mut self, entry: EntryId, now: DateTime<Utc>) -> ClinicResult<QueueEntry> {
        self.expect_dispatchable(entry)?;
        let encounter_id = self.encounter_of(entry)?;

        let state = &mut *self;
        let current = state
            .entries
            .get_mut(&entry)
            .ok_or(ClinicError::EntryNotFound(entry))?;
        current.status = QueueStatus::Called;
        state.waiting.dequeue(entry);
        state.called.insert(QueueKey::of(current));
        if let Some(encounter) = state.encounters.get_mut(&encounter_id) {
            encounter.called_at = Some(now);
        }
        Ok(current.clone())
    }
}

pub struct ClinicPipeline {
    state: RwLock<PipelineState>,
    classifier: Option<Arc<dyn SeverityClassifier>>,
    clock: Arc<dyn Clock>,
}

impl Default for ClinicPipeline {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ClinicPipeline {
    /// Pipeline without a classifier: every classification falls back to GREEN.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(PipelineState::default()),
            classifier: None,
            clock,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn SeverityClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read(&self) -> ClinicResult<RwLockReadGuard<'_, PipelineState>> {
        self.state
            .read()
            .map_err(|err| ClinicError::LockPoisoned(err.to_string()))
    }

    fn write(&self) -> ClinicResult<RwLockWriteGuard<'_, PipelineState>> {
        self.state
            .write()
            .map_err(|err| ClinicError::LockPoisoned(err.to_string()))
    }

    fn classify(&self, inputs: &AssessmentInputs) -> Classification {
        classify_or_fallback(self.classifier.as_deref(), inputs)
    }

    /// Creates an encounter and its WAITING entry. The initial colour is
    /// applied the same way a later re-triage would be.
    #[instrument(skip(self, patient, triage), fields(patient = %patient.0))]
    pub fn register(
        &self,
        patient: PatientRef,
        triage: InitialTriage,
    ) -> ClinicResult<Registration> {
        let Classification { severity, reasons } = match triage {
            InitialTriage::Unassessed => Classification::new(Severity::Green, Vec::new()),
            InitialTriage::Severity(severity) => Classification::new(severity, Vec::new()),
            InitialTriage::Inputs(inputs) => self.classify(&inputs),
        };

        let now = self.clock.now();
        let mut state = self.write()?;
        let (encounter_id, entry_id) = state.allocate_ids();

        let mut encounter = Encounter::new(encounter_id, patient, now);
        encounter.stamp_severity(severity, now, false);

        let entry = QueueEntry {
            id: entry_id,
            encounter_id,
            status: QueueStatus::Waiting,
            priority: Priority::from_severity(severity),
            created_at: now,
        };

        state.waiting.enqueue(QueueKey::of(&entry));
        state.entry_by_encounter.insert(encounter_id, entry_id);
        state.encounter_by_entry.insert(entry_id, encounter_id);
        state.encounters.insert(encounter_id, encounter.clone());
        state.entries.insert(entry_id, entry.clone());

        info!(
            encounter = %encounter_id,
            entry = %entry_id,
            severity = %severity,
            "registered encounter"
        );
        Ok(Registration {
            encounter,
            entry,
            reasons,
        })
    }

    /// Moves a WAITING entry into the examination room.
    #[instrument(skip(self))]
    pub fn call(&self, entry: EntryId) -> ClinicResult<QueueEntry> {
        let now = self.clock.now();
        let called = self.write()?.call(entry, now)?;
        info!(entry = %entry, "called into examination room");
        Ok(called)
    }

    pub fn call_encounter(&self, encounter: EncounterId) -> ClinicResult<QueueEntry> {
        let entry = self.read()?.entry_of(encounter)?;
        self.call(entry)
    }

    /// Calls whoever is first in dispatch order. `None` when nobody waits.
    #[instrument(skip(self))]
    pub fn call_next(&self) -> ClinicResult<Option<QueueEntry>> {
        let now = self.clock.now();
        let mut state = self.write()?;
        let Some(next) = state.waiting.first() else {
            return Ok(None);
        };
        let called = state.call(next.entry, now)?;
        info!(entry = %called.id, priority = called.priority.value(), "called next in queue");
        Ok(Some(called))
    }

    /// Changes the colour of a WAITING entry and re-ranks it.
    #[instrument(skip(self))]
    pub fn reprioritize(&self, entry: EntryId, severity: Severity) -> ClinicResult<QueueEntry> {
        let now = self.clock.now();
        let mut guard = self.write()?;
        guard.expect_dispatchable(entry)?;
        let encounter_id = guard.encounter_of(entry)?;

        let state = &mut *guard;
        let priority = Priority::from_severity(severity);
        let current = state
            .entries
            .get_mut(&entry)
            .ok_or(ClinicError::EntryNotFound(entry))?;
        current.priority = priority;
        state.waiting.update_priority(entry, priority);
        if let Some(encounter) = state.encounters.get_mut(&encounter_id) {
            encounter.stamp_severity(severity, now, false);
        }

        debug!(entry = %entry, severity = %severity, "re-triaged waiting entry");
        Ok(current.clone())
    }

    /// Free-form variant of [`Self::reprioritize`] for triage forms. Unknown
    /// labels are rejected without touching the entry.
    pub fn reprioritize_label(&self, entry: EntryId, label: &str) -> ClinicResult<QueueEntry> {
        let severity = label.parse::<Severity>()?;
        self.reprioritize(entry, severity)
    }

    pub fn reprioritize_encounter(
        &self,
        encounter: EncounterId,
        severity: Severity,
    ) -> ClinicResult<QueueEntry> {
        let entry = self.read()?.entry_of(encounter)?;
        self.reprioritize(entry, severity)
    }

    /// Closes the room visit. Urgent (RED/YELLOW) results overwrite the visit
    /// colour; a next appointment sends the encounter to follow-up monitoring,
    /// otherwise it is done.
    #[instrument(skip(self, form))]
    pub fn complete_assessment(
        &self,
        entry: EntryId,
        form: AssessmentForm,
    ) -> ClinicResult<AssessmentOutcome> {
        // Fail fast before running the classifier.
        self.read()?.expect_status(entry, QueueStatus::Called)?;

        let Classification { severity, reasons } = self.classify(&form.inputs);
        let now = self.clock.now();

        let mut guard = self.write()?;
        guard.expect_status(entry, QueueStatus::Called)?;
        let encounter_id = guard.encounter_of(entry)?;
        let state = &mut *guard;

        let assessment = Assessment {
            encounter_id,
            inputs: form.inputs,
            next_appointment_at: form.next_appointment_at,
            urgency: severity,
            reasons,
            assessed_at: now,
        };

        let encounter = state
            .encounters
            .get_mut(&encounter_id)
            .ok_or(ClinicError::EncounterNotFound(encounter_id))?;
        if severity.is_urgent() {
            encounter.stamp_severity(severity, now, true);
        }
        let encounter = encounter.clone();

        let current = state
            .entries
            .get_mut(&entry)
            .ok_or(ClinicError::EntryNotFound(entry))?;
        state.called.remove(&QueueKey::of(current));
        if assessment.requires_followup() {
            current.status = QueueStatus::Followup;
            state.followups.insert((current.created_at, current.id));
        } else {
            current.status = QueueStatus::OpdDone;
            state.opd_done += 1;
        }
        let current = current.clone();
        state.assessments.insert(encounter_id, assessment.clone());

        info!(
            entry = %entry,
            status = %current.status,
            urgency = %severity,
            "assessment completed"
        );
        Ok(AssessmentOutcome {
            encounter,
            entry: current,
            assessment,
        })
    }

    /// Up to `limit` WAITING entries in dispatch order.
    pub fn peek_ordered(&self, limit: usize) -> ClinicResult<Vec<QueueEntry>> {
        let state = self.read()?;
        state
            .waiting
            .peek_ordered(limit)
            .into_iter()
            .map(|key| state.entry_snapshot(key.entry))
            .collect()
    }

    /// Entries currently in the examination room, most urgent first.
    pub fn called_entries(&self) -> ClinicResult<Vec<QueueEntry>> {
        let state = self.read()?;
        state
            .called
            .iter()
            .map(|key| state.entry_snapshot(key.entry))
            .collect()
    }

    /// FOLLOWUP entries, newest arrival first, at most `limit`.
    pub fn followup_entries(&self, limit: usize) -> ClinicResult<Vec<QueueEntry>> {
        let state = self.read()?;
        state
            .followups
            .iter()
            .rev()
            .take(limit)
            .map(|(_, entry)| state.entry_snapshot(*entry))
            .collect()
    }

    pub fn entry(&self, entry: EntryId) -> ClinicResult<QueueEntry> {
        self.read()?.entry_snapshot(entry)
    }

    pub fn encounter(&self, encounter: EncounterId) -> ClinicResult<Encounter> {
        self.read()?.encounter_snapshot(encounter)
    }

    pub fn entry_for_encounter(&self, encounter: EncounterId) -> ClinicResult<QueueEntry> {
        let state = self.read()?;
        let entry = state.entry_of(encounter)?;
        state.entry_snapshot(entry)
    }

    pub fn encounter_for_entry(&self, entry: EntryId) -> ClinicResult<Encounter> {
        let state = self.read()?;
        let encounter = state.encounter_of(entry)?;
        state.encounter_snapshot(encounter)
    }

    /// Batch reverse lookup. Ids with no encounter are simply absent from the map.
    pub fn encounters(&self, ids: &[EncounterId]) -> ClinicResult<HashMap<EncounterId, Encounter>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.encounters.get(id).map(|enc| (*id, enc.clone())))
            .collect())
    }

    pub fn assessment(&self, encounter: EncounterId) -> ClinicResult<Option<Assessment>> {
        let state = self.read()?;
        if !state.encounters.contains_key(&encounter) {
            return Err(ClinicError::EncounterNotFound(encounter));
        }
        Ok(state.assessments.get(&encounter).cloned())
    }

    pub fn status_counts(&self) -> ClinicResult<StatusCounts> {
        let state = self.read()?;
        Ok(StatusCounts {
            waiting: state.waiting.len(),
            called: state.called.len(),
            opd_done: state.opd_done,
            followup: state.followups.len(),
        })
    }
}
