use crate::state::{OnboardingState, PipelineStage, RunId};
use crate::{Effect, Msg};

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: OnboardingState, msg: Msg) -> (OnboardingState, Vec<Effect>) {
    let effects = match msg {
        Msg::SheetParsed(sheet) => cancel_effect(state.adopt_sheet(sheet)),
        Msg::ProbeRequested => {
            if state.candidates().next().is_none() {
                return (state, Vec::new());
            }
            // A re-run supersedes whatever the previous run still owns,
            // including its pending prune.
            let mut effects = cancel_effect(state.cancel_run());
            let (run, keys) = state.start_run();
            effects.extend(keys.into_iter().map(|key| Effect::CheckExists { run, key }));
            effects
        }
        Msg::ExistenceChecked { run, key, verdict } => {
            if !state.is_current(run, PipelineStage::Validating) {
                return (state, Vec::new());
            }
            if state.apply_existence(&key, verdict) {
                advance_to_probe(&mut state, run)
            } else {
                Vec::new()
            }
        }
        Msg::ProbeFinished { run, outcome } => {
            if !state.is_current(run, PipelineStage::Probing) {
                return (state, Vec::new());
            }
            state.apply_probe(outcome);
            finish_probe(&mut state, run)
        }
        Msg::RetentionElapsed { run } => {
            if state.is_current(run, PipelineStage::Retaining) {
                state.prune_failed();
            }
            Vec::new()
        }
        Msg::RunCancelled => cancel_effect(state.cancel_run()),
        Msg::CandidateRemoved(id) => {
            let validating_run = state
                .live_run()
                .filter(|_| state.stage() == PipelineStage::Validating);
            match (state.remove_candidate(id), validating_run) {
                (true, Some(run)) => advance_to_probe(&mut state, run),
                _ => Vec::new(),
            }
        }
        Msg::Reset => cancel_effect(state.reset()),
    };

    (state, effects)
}

fn advance_to_probe(state: &mut OnboardingState, run: RunId) -> Vec<Effect> {
    let targets = state.begin_probe();
    if targets.is_empty() {
        return finish_probe(state, run);
    }
    vec![Effect::ProbeConnectivity { run, targets }]
}

fn finish_probe(state: &mut OnboardingState, run: RunId) -> Vec<Effect> {
    if state.finish_probe() {
        vec![Effect::ScheduleRetention {
            run,
            after: state.retention(),
        }]
    } else {
        Vec::new()
    }
}

fn cancel_effect(run: Option<RunId>) -> Vec<Effect> {
    run.map(|run| Effect::CancelRun { run }).into_iter().collect()
}
