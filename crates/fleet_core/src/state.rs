use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use crate::candidate::{CandidateId, CandidateRecord, HostKey, ProbeStatus, VerifiedHost};
use crate::effect::ProbeTarget;
use crate::msg::{ExistenceVerdict, ProbeReport};
use crate::sheet::{ParsedSheet, RowError};
use crate::view_model::{CandidateRowView, OnboardingView, StatusCounts};

pub type RunId = u64;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3);

pub(crate) const EXISTS_MESSAGE: &str = "a server with this address already exists";
pub(crate) const VALIDATION_TRANSPORT_MESSAGE: &str = "could not verify the address; try again";
pub(crate) const PROBE_TRANSPORT_MESSAGE: &str = "connection test could not be performed; try again";
pub(crate) const NO_RESULT_MESSAGE: &str = "no test result was returned for this host";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStage {
    #[default]
    Idle,
    /// Existence checks are in flight.
    Validating,
    /// Connectivity probe is in flight.
    Probing,
    /// Probe finished; failed candidates are pruned when the window closes.
    Retaining,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitBlocked {
    #[error("a validation run is still in progress")]
    RunInProgress,
    #[error("{0} candidates have not been tested yet")]
    Unresolved(usize),
    #[error("no candidate passed the connection test")]
    NothingToCommit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SavedStatus {
    status: ProbeStatus,
    message: Option<String>,
    detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveRun {
    id: RunId,
    pending_keys: BTreeSet<HostKey>,
    snapshot: HashMap<CandidateId, SavedStatus>,
}

/// Working set of an onboarding dialog: candidates and the run probing them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingState {
    candidates: BTreeMap<CandidateId, CandidateRecord>,
    by_key: HashMap<HostKey, CandidateId>,
    row_errors: Vec<RowError>,
    next_candidate_id: CandidateId,
    run_counter: RunId,
    stage: PipelineStage,
    active: Option<ActiveRun>,
    retention: Duration,
    dirty: bool,
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl OnboardingState {
    pub fn new(retention: Duration) -> Self {
        Self {
            candidates: BTreeMap::new(),
            by_key: HashMap::new(),
            row_errors: Vec::new(),
            next_candidate_id: 1,
            run_counter: 0,
            stage: PipelineStage::Idle,
            active: None,
            retention,
            dirty: false,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Run that still owns outstanding effects, if any.
    pub fn live_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|run| run.id)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &CandidateRecord> {
        self.candidates.values()
    }

    pub fn candidate(&self, id: CandidateId) -> Option<&CandidateRecord> {
        self.candidates.get(&id)
    }

    pub fn candidate_by_key(&self, key: &HostKey) -> Option<&CandidateRecord> {
        self.by_key.get(key).and_then(|id| self.candidates.get(id))
    }

    pub fn row_errors(&self) -> &[RowError] {
        &self.row_errors
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Successfully probed hosts, ready for a batch create.
    pub fn committable(&self) -> Result<Vec<VerifiedHost>, CommitBlocked> {
        if matches!(self.stage, PipelineStage::Validating | PipelineStage::Probing) {
            return Err(CommitBlocked::RunInProgress);
        }
        let unresolved = self
            .candidates
            .values()
            .filter(|rec| !rec.status().is_resolved())
            .count();
        if unresolved > 0 {
            return Err(CommitBlocked::Unresolved(unresolved));
        }
        let verified: Vec<VerifiedHost> = self
            .candidates
            .values()
            .filter_map(|rec| VerifiedHost::try_from(rec.clone()).ok())
            .collect();
        if verified.is_empty() {
            return Err(CommitBlocked::NothingToCommit);
        }
        Ok(verified)
    }

    pub fn view(&self) -> OnboardingView {
        let mut counts = StatusCounts::default();
        let rows = self
            .candidates
            .values()
            .map(|rec| {
                counts.record(rec.status());
                CandidateRowView {
                    candidate_id: rec.id,
                    row_number: rec.row_number,
                    address: rec.key().to_string(),
                    port: rec.host.port,
                    username: rec.host.username.clone(),
                    hostname: rec.host.hostname.clone(),
                    os: rec.host.os.clone(),
                    status: rec.status(),
                    message: rec.message().map(ToOwned::to_owned),
                }
            })
            .collect();
        OnboardingView {
            stage: self.stage,
            rows,
            row_errors: self.row_errors.clone(),
            counts,
            can_commit: self.committable().is_ok(),
            dirty: self.dirty,
        }
    }

    /// Drops everything. Returns the run whose effects must be cancelled.
    pub(crate) fn reset(&mut self) -> Option<RunId> {
        let cancelled = self.take_active();
        self.candidates.clear();
        self.by_key.clear();
        self.row_errors.clear();
        self.stage = PipelineStage::Idle;
        self.dirty = true;
        cancelled
    }

    pub(crate) fn adopt_sheet(&mut self, sheet: ParsedSheet) -> Option<RunId> {
        let cancelled = self.reset();
        for mut record in sheet.records {
            record.id = self.next_candidate_id;
            self.next_candidate_id += 1;
            self.by_key.insert(record.key(), record.id);
            self.candidates.insert(record.id, record);
        }
        self.row_errors = sheet.row_errors;
        cancelled
    }

    /// Starts a fresh run over every candidate. Returns the new run and the
    /// keys needing an existence check.
    pub(crate) fn start_run(&mut self) -> (RunId, Vec<HostKey>) {
        self.run_counter += 1;
        let id = self.run_counter;
        let snapshot = self
            .candidates
            .values()
            .map(|rec| {
                (
                    rec.id,
                    SavedStatus {
                        status: rec.status(),
                        message: rec.message().map(ToOwned::to_owned),
                        detail: rec.detail().map(ToOwned::to_owned),
                    },
                )
            })
            .collect();
        for rec in self.candidates.values_mut() {
            rec.reset();
        }
        let pending_keys: BTreeSet<HostKey> = self.by_key.keys().cloned().collect();
        let keys = pending_keys.iter().cloned().collect();
        self.active = Some(ActiveRun {
            id,
            pending_keys,
            snapshot,
        });
        self.stage = PipelineStage::Validating;
        self.dirty = true;
        (id, keys)
    }

    /// Abandons the live run. In-flight stages roll back to the statuses the
    /// candidates had before the run; a pending prune is simply dropped.
    pub(crate) fn cancel_run(&mut self) -> Option<RunId> {
        let stage = self.stage;
        let active = self.active.take()?;
        if matches!(stage, PipelineStage::Validating | PipelineStage::Probing) {
            for (id, saved) in active.snapshot {
                if let Some(rec) = self.candidates.get_mut(&id) {
                    rec.restore(saved.status, saved.message, saved.detail);
                }
            }
        }
        self.stage = PipelineStage::Idle;
        self.dirty = true;
        Some(active.id)
    }

    pub(crate) fn is_current(&self, run: RunId, stage: PipelineStage) -> bool {
        self.stage == stage && self.live_run() == Some(run)
    }

    /// Records an existence verdict. Returns true when it was the last
    /// outstanding check of the run.
    pub(crate) fn apply_existence(
        &mut self,
        key: &HostKey,
        verdict: Result<ExistenceVerdict, String>,
    ) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        if !active.pending_keys.remove(key) {
            return false;
        }
        let Some(rec) = self.by_key.get(key).and_then(|id| self.candidates.get_mut(id)) else {
            return active.pending_keys.is_empty();
        };

        let rejection = match verdict {
            Ok(ExistenceVerdict { exists: false, .. }) => None,
            Ok(ExistenceVerdict {
                exists: true,
                message,
            }) => Some((
                message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| EXISTS_MESSAGE.to_string()),
                None,
            )),
            Err(detail) => Some((VALIDATION_TRANSPORT_MESSAGE.to_string(), Some(detail))),
        };
        if let Some((message, detail)) = rejection {
            if rec.begin_testing().is_ok() {
                let _ = rec.fail(message, detail);
            }
        }
        self.dirty = true;
        active.pending_keys.is_empty()
    }

    /// Moves every validated candidate to `Testing` at once and returns the
    /// probe targets. An empty result means nothing is left to probe.
    pub(crate) fn begin_probe(&mut self) -> Vec<ProbeTarget> {
        let targets: Vec<ProbeTarget> = self
            .candidates
            .values_mut()
            .filter(|rec| rec.status() == ProbeStatus::Untested)
            .filter_map(|rec| {
                rec.begin_testing().ok().map(|()| ProbeTarget {
                    key: rec.key(),
                    host: rec.host.clone(),
                })
            })
            .collect();
        self.stage = PipelineStage::Probing;
        self.dirty = true;
        targets
    }

    pub(crate) fn apply_probe(&mut self, outcome: Result<ProbeReport, String>) {
        match outcome {
            Ok(report) => {
                let mut by_key: HashMap<HostKey, _> = report
                    .results
                    .into_iter()
                    .map(|result| (result.key.clone(), result))
                    .collect();
                for rec in self.candidates.values_mut() {
                    if rec.status() != ProbeStatus::Testing {
                        continue;
                    }
                    match by_key.remove(&rec.key()) {
                        Some(result) if result.succeeded => {
                            rec.host.merge_discovered(result.discovered);
                            let _ = rec.succeed(result.message);
                        }
                        Some(result) => {
                            rec.host.merge_discovered(result.discovered);
                            let message = result
                                .message
                                .filter(|m| !m.trim().is_empty())
                                .unwrap_or_else(|| "connection test failed".to_string());
                            let _ = rec.fail(message, result.detail);
                        }
                        None => {
                            let _ = rec.fail(NO_RESULT_MESSAGE, None);
                        }
                    }
                }
            }
            Err(detail) => {
                for rec in self.candidates.values_mut() {
                    if rec.status() == ProbeStatus::Testing {
                        let _ = rec.fail(PROBE_TRANSPORT_MESSAGE, Some(detail.clone()));
                    }
                }
            }
        }
        self.dirty = true;
    }

    /// Ends the probe stage. Returns true when failed candidates are waiting
    /// for the retention window; otherwise the run is complete.
    pub(crate) fn finish_probe(&mut self) -> bool {
        let any_failed = self
            .candidates
            .values()
            .any(|rec| rec.status() == ProbeStatus::Failed);
        if let Some(active) = self.active.as_mut() {
            active.snapshot.clear();
        }
        if any_failed {
            self.stage = PipelineStage::Retaining;
        } else {
            self.active = None;
            self.stage = PipelineStage::Idle;
        }
        self.dirty = true;
        any_failed
    }

    pub(crate) fn prune_failed(&mut self) -> usize {
        let failed: Vec<CandidateId> = self
            .candidates
            .values()
            .filter(|rec| rec.status() == ProbeStatus::Failed)
            .map(|rec| rec.id)
            .collect();
        for id in &failed {
            self.remove_candidate(*id);
        }
        self.active = None;
        self.stage = PipelineStage::Idle;
        self.dirty = true;
        failed.len()
    }

    /// Removes one candidate. Returns true when this settled the last
    /// outstanding existence check of a validating run.
    pub(crate) fn remove_candidate(&mut self, id: CandidateId) -> bool {
        let Some(rec) = self.candidates.remove(&id) else {
            return false;
        };
        let key = rec.key();
        self.by_key.remove(&key);
        self.dirty = true;
        if let Some(active) = self.active.as_mut() {
            active.snapshot.remove(&id);
            if self.stage == PipelineStage::Validating && active.pending_keys.remove(&key) {
                return active.pending_keys.is_empty();
            }
        }
        false
    }

    fn take_active(&mut self) -> Option<RunId> {
        self.active.take().map(|run| run.id)
    }
}
