use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fleet_core::{
    update, CandidateId, Effect, HostKey, InputError, Msg, OnboardingState, OnboardingView,
    ProbeReport, ProbeResult, ProbeTarget, RowError, RunId, SheetSchema, DEFAULT_RETENTION,
};
use fleet_logging::{fleet_debug, fleet_info, fleet_warn};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::cancel::RunScope;
use crate::config::duration_ms;
use crate::decode::decode_sheet;
use crate::dispatch::{Dispatcher, OnboardReceipt};
use crate::{ApiError, FleetApi, SessionError};

const SINGLE_PROBE_FAILED: &str = "connection test could not be performed; try again";

/// How the connectivity probe is sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// One request carrying every target.
    #[default]
    Batch,
    /// One request per target, merged by key.
    PerTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    #[serde(with = "duration_ms", rename = "retention_ms")]
    pub retention: Duration,
    pub existence_concurrency: usize,
    pub probe_mode: ProbeMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            existence_concurrency: 8,
            probe_mode: ProbeMode::Batch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetSummary {
    pub accepted: usize,
    pub row_errors: Vec<RowError>,
}

struct Inner<A: ?Sized> {
    api: Arc<A>,
    settings: PipelineSettings,
    schema: SheetSchema,
    state: Mutex<OnboardingState>,
    scope: Mutex<Option<(RunId, RunScope)>>,
}

/// Runs the onboarding pipeline for one dialog: feeds messages through
/// [`fleet_core::update`] and executes the effects it asks for.
///
/// Clones share the same session, so a UI can cancel or remove candidates
/// while another task awaits [`OnboardingSession::run_probe`].
pub struct OnboardingSession<A: FleetApi + ?Sized> {
    inner: Arc<Inner<A>>,
}

impl<A: FleetApi + ?Sized> Clone for OnboardingSession<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: FleetApi + ?Sized + 'static> OnboardingSession<A> {
    pub fn new(api: Arc<A>, settings: PipelineSettings) -> Self {
        Self::with_schema(api, settings, SheetSchema::default())
    }

    pub fn with_schema(api: Arc<A>, settings: PipelineSettings, schema: SheetSchema) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                schema,
                state: Mutex::new(OnboardingState::new(settings.retention)),
                scope: Mutex::new(None),
            }),
        }
    }

    pub fn view(&self) -> OnboardingView {
        self.lock_state().view()
    }

    /// The current view if anything changed since the last poll.
    pub fn poll_view(&self) -> Option<OnboardingView> {
        let mut state = self.lock_state();
        if state.consume_dirty() {
            Some(state.view())
        } else {
            None
        }
    }

    pub fn load_sheet(&self, bytes: &[u8]) -> Result<SheetSummary, InputError> {
        let text = decode_sheet(bytes, None)?;
        self.load_sheet_str(&text)
    }

    /// Replaces every candidate with the sheet's rows. A run in progress is
    /// abandoned.
    pub fn load_sheet_str(&self, text: &str) -> Result<SheetSummary, InputError> {
        let sheet = fleet_core::parse_sheet(text, &self.inner.schema).inspect_err(|err| {
            fleet_warn!("Rejected sheet: {}", err);
        })?;
        let summary = SheetSummary {
            accepted: sheet.records.len(),
            row_errors: sheet.row_errors.clone(),
        };
        fleet_info!(
            "Sheet accepted {} candidates, {} rows rejected",
            summary.accepted,
            summary.row_errors.len()
        );
        self.apply(Msg::SheetParsed(sheet));
        Ok(summary)
    }

    /// Validates and probes every candidate. Returns once the run has
    /// finished its probe or was cancelled; a retention prune may still be
    /// pending afterwards.
    pub async fn run_probe(&self) {
        let effects = self.apply(Msg::ProbeRequested);
        let live = self.lock_state().live_run();
        if let Some(run) = live {
            fleet_info!("Starting validation run {}", run);
        }
        self.drive(effects).await;
    }

    /// Aborts the active run, or drops a pending prune.
    pub fn cancel(&self) {
        self.apply(Msg::RunCancelled);
    }

    /// Dialog closed: cancels everything and forgets every candidate.
    pub fn close(&self) {
        self.apply(Msg::Reset);
    }

    pub async fn remove(&self, id: CandidateId) {
        let effects = self.apply(Msg::CandidateRemoved(id));
        self.drive(effects).await;
    }

    /// Creates the successfully probed hosts in one call and resets the
    /// session. Nothing is reset when the create fails.
    pub async fn commit<B>(
        &self,
        dispatcher: &Dispatcher<B>,
        group_id: Option<u64>,
    ) -> Result<OnboardReceipt, SessionError>
    where
        B: FleetApi + ?Sized + 'static,
    {
        let hosts = self.lock_state().committable()?;
        let receipt = dispatcher.onboard(hosts, group_id).await?;
        fleet_info!("Committed {} servers", receipt.created);
        self.apply(Msg::Reset);
        Ok(receipt)
    }

    /// Applies `msg`, performs the effects that need no awaiting and
    /// returns the ones that issue requests.
    fn apply(&self, msg: Msg) -> Vec<Effect> {
        let effects = {
            let mut state = self.lock_state();
            let (next, effects) = update(std::mem::take(&mut *state), msg);
            *state = next;
            effects
        };

        let mut deferred = Vec::new();
        for effect in effects {
            match effect {
                Effect::CancelRun { run } => self.cancel_scope(run),
                Effect::ScheduleRetention { run, after } => self.schedule_retention(run, after),
                other => deferred.push(other),
            }
        }
        deferred
    }

    async fn drive(&self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        let mut checks: Vec<(RunId, HostKey)> = Vec::new();
        loop {
            while let Some(effect) = queue.pop_front() {
                match effect {
                    Effect::CheckExists { run, key } => checks.push((run, key)),
                    Effect::ProbeConnectivity { run, targets } => {
                        queue.extend(self.probe(run, targets).await);
                    }
                    Effect::CancelRun { run } => self.cancel_scope(run),
                    Effect::ScheduleRetention { run, after } => {
                        self.schedule_retention(run, after)
                    }
                }
            }
            if checks.is_empty() {
                break;
            }
            queue.extend(self.check_existence(std::mem::take(&mut checks)).await);
        }
    }

    async fn check_existence(&self, checks: Vec<(RunId, HostKey)>) -> Vec<Effect> {
        let limit = self.inner.settings.existence_concurrency.max(1);
        let mut scopes: HashMap<RunId, Option<RunScope>> = HashMap::new();
        let jobs: Vec<_> = checks
            .into_iter()
            .filter_map(|(run, key)| {
                let scope = scopes
                    .entry(run)
                    .or_insert_with(|| self.scope_for(run))
                    .clone()?;
                Some((run, key, scope))
            })
            .collect();

        let api = Arc::clone(&self.inner.api);
        let mut answers = stream::iter(jobs)
            .map(|(run, key, scope)| {
                let api = Arc::clone(&api);
                async move {
                    let verdict = scope.guard(api.exists_by_key(&key)).await;
                    (run, key, verdict)
                }
            })
            .buffer_unordered(limit);

        let mut follow_up = Vec::new();
        while let Some((run, key, verdict)) = answers.next().await {
            let Ok(verdict) = verdict else {
                fleet_debug!("Existence check for {} cancelled", key);
                continue;
            };
            let verdict = verdict.map_err(|err| {
                fleet_warn!("Existence check for {} failed: {}", key, err);
                err.to_string()
            });
            follow_up.extend(self.apply(Msg::ExistenceChecked { run, key, verdict }));
        }
        follow_up
    }

    async fn probe(&self, run: RunId, targets: Vec<ProbeTarget>) -> Vec<Effect> {
        let Some(scope) = self.scope_for(run) else {
            return Vec::new();
        };
        fleet_info!("Probing {} candidates for run {}", targets.len(), run);
        let outcome = match self.inner.settings.probe_mode {
            ProbeMode::Batch => scope.guard(self.inner.api.test_connectivity(&targets)).await,
            ProbeMode::PerTarget => scope.guard(self.probe_each(&targets)).await,
        };
        let Ok(outcome) = outcome else {
            fleet_debug!("Probe for run {} cancelled", run);
            return Vec::new();
        };
        let outcome = outcome.map_err(|err| {
            fleet_warn!("Probe for run {} failed: {}", run, err);
            err.to_string()
        });
        self.apply(Msg::ProbeFinished { run, outcome })
    }

    /// One request per target. A failed request fails only its own target.
    async fn probe_each(&self, targets: &[ProbeTarget]) -> Result<ProbeReport, ApiError> {
        let limit = self.inner.settings.existence_concurrency.max(1);
        let api = Arc::clone(&self.inner.api);
        let results: Vec<ProbeResult> = stream::iter(targets.iter().cloned())
            .map(|target| {
                let api = Arc::clone(&api);
                async move {
                    match api.test_connectivity(std::slice::from_ref(&target)).await {
                        Ok(report) => report
                            .results
                            .into_iter()
                            .find(|result| result.key == target.key),
                        Err(err) => Some(ProbeResult {
                            key: target.key,
                            succeeded: false,
                            message: Some(SINGLE_PROBE_FAILED.to_string()),
                            detail: Some(err.to_string()),
                            discovered: Vec::new(),
                        }),
                    }
                }
            })
            .buffer_unordered(limit)
            .filter_map(|result| async move { result })
            .collect()
            .await;
        let successful_count = results.iter().filter(|result| result.succeeded).count();
        Ok(ProbeReport {
            results,
            successful_count,
        })
    }

    fn schedule_retention(&self, run: RunId, after: Duration) {
        let Some(scope) = self.scope_for(run) else {
            return;
        };
        let session = self.clone();
        tokio::spawn(async move {
            if scope.sleep(after).await.is_ok() {
                fleet_info!("Retention window of run {} elapsed", run);
                session.apply(Msg::RetentionElapsed { run });
            }
        });
    }

    /// Scope owning `run`'s requests and timers, or `None` once the run is
    /// no longer live.
    fn scope_for(&self, run: RunId) -> Option<RunScope> {
        // Held until the scope is installed so a cancel cannot slip between
        // the liveness check and the install.
        let state = self.lock_state();
        if state.live_run() != Some(run) {
            return None;
        }
        let mut current = self.lock_scope();
        match current.as_ref() {
            Some((owner, scope)) if *owner == run => Some(scope.clone()),
            _ => {
                if let Some((_, stale)) = current.take() {
                    stale.cancel();
                }
                let scope = RunScope::new();
                *current = Some((run, scope.clone()));
                Some(scope)
            }
        }
    }

    fn cancel_scope(&self, run: RunId) {
        let mut current = self.lock_scope();
        if current.as_ref().is_some_and(|(owner, _)| *owner == run) {
            if let Some((_, scope)) = current.take() {
                fleet_debug!("Cancelling run {}", run);
                scope.cancel();
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OnboardingState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_scope(&self) -> MutexGuard<'_, Option<(RunId, RunScope)>> {
        self.inner
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
