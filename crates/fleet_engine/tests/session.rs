mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{init_logging, Call, FakeApi};
use fleet_core::{ChunkPolicy, CommitBlocked, PipelineStage, ProbeStatus};
use fleet_engine::{Dispatcher, OnboardingSession, PipelineSettings, ProbeMode, SessionError};
use pretty_assertions::assert_eq;

const SHEET: &str = "ip,username,password\n\
                     10.0.0.1,root,a\n\
                     10.0.0.2,root,b\n\
                     10.0.0.3,root,c\n";

fn settings(retention_ms: u64, probe_mode: ProbeMode) -> PipelineSettings {
    PipelineSettings {
        retention: Duration::from_millis(retention_ms),
        existence_concurrency: 4,
        probe_mode,
    }
}

fn session(api: &Arc<FakeApi>, settings: PipelineSettings) -> OnboardingSession<FakeApi> {
    let session = OnboardingSession::new(Arc::clone(api), settings);
    session.load_sheet_str(SHEET).unwrap();
    session
}

fn statuses(session: &OnboardingSession<FakeApi>) -> Vec<(String, ProbeStatus)> {
    session
        .view()
        .rows
        .into_iter()
        .map(|row| (row.address, row.status))
        .collect()
}

#[tokio::test]
async fn uploaded_bytes_are_decoded_and_summarized() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    let session = OnboardingSession::new(Arc::clone(&api), PipelineSettings::default());

    let summary = session
        .load_sheet(b"\xEF\xBB\xBFip,username,password\n10.0.0.1,root,a\nnot-an-ip,root,b\n")
        .unwrap();

    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.row_errors.len(), 1);
    assert_eq!(summary.row_errors[0].row_number, 3);
    assert_eq!(session.view().rows.len(), 1);
    assert!(session.poll_view().is_some());
    assert!(session.poll_view().is_none());
}

#[tokio::test]
async fn existing_host_fails_and_survivors_are_probed_in_one_request() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.mark_existing("10.0.0.2");
    api.mark_unreachable("10.0.0.3");
    let session = session(&api, settings(5_000, ProbeMode::Batch));

    session.run_probe().await;

    assert_eq!(
        statuses(&session),
        vec![
            ("10.0.0.1".to_string(), ProbeStatus::Success),
            ("10.0.0.2".to_string(), ProbeStatus::Failed),
            ("10.0.0.3".to_string(), ProbeStatus::Failed),
        ]
    );
    assert_eq!(
        api.probe_calls(),
        vec![Call::Probe(vec![
            "10.0.0.1".to_string(),
            "10.0.0.3".to_string()
        ])]
    );
    let view = session.view();
    assert_eq!(view.stage, PipelineStage::Retaining);
    assert_eq!(view.rows[0].os.as_deref(), Some("ubuntu"));
    assert_eq!(view.rows[2].message.as_deref(), Some("authentication failed"));
    assert!(view.can_commit);
    session.close();
}

#[tokio::test]
async fn per_target_mode_sends_one_request_each() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.mark_unreachable("10.0.0.2");
    let session = session(&api, settings(5_000, ProbeMode::PerTarget));

    session.run_probe().await;

    assert_eq!(api.probe_calls().len(), 3);
    assert_eq!(
        statuses(&session),
        vec![
            ("10.0.0.1".to_string(), ProbeStatus::Success),
            ("10.0.0.2".to_string(), ProbeStatus::Failed),
            ("10.0.0.3".to_string(), ProbeStatus::Success),
        ]
    );
    session.close();
}

#[tokio::test]
async fn probe_transport_failure_leaves_nothing_testing() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.set_fail_probe(true);
    let session = session(&api, settings(5_000, ProbeMode::Batch));

    session.run_probe().await;

    let view = session.view();
    assert_eq!(view.counts.testing, 0);
    assert_eq!(view.counts.failed, 3);
    assert!(!view.can_commit);
    session.close();
}

#[tokio::test]
async fn failed_candidates_are_pruned_after_retention() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.mark_unreachable("10.0.0.3");
    let session = session(&api, settings(50, ProbeMode::Batch));

    session.run_probe().await;
    assert_eq!(session.view().rows.len(), 3);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let view = session.view();
    assert_eq!(view.stage, PipelineStage::Idle);
    assert_eq!(
        statuses(&session),
        vec![
            ("10.0.0.1".to_string(), ProbeStatus::Success),
            ("10.0.0.2".to_string(), ProbeStatus::Success),
        ]
    );
}

#[tokio::test]
async fn cancel_during_prune_window_keeps_failed_rows() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.mark_unreachable("10.0.0.3");
    let session = session(&api, settings(50, ProbeMode::Batch));

    session.run_probe().await;
    session.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(session.view().rows.len(), 3);
    assert_eq!(session.view().stage, PipelineStage::Idle);
}

#[tokio::test]
async fn cancelling_mid_validation_restores_prior_statuses() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.set_exists_delay(Duration::from_millis(300));
    let session = session(&api, settings(5_000, ProbeMode::Batch));

    let running = tokio::spawn({
        let session = session.clone();
        async move { session.run_probe().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    session.cancel();
    running.await.unwrap();

    assert!(statuses(&session)
        .iter()
        .all(|(_, status)| *status == ProbeStatus::Untested));
    assert_eq!(session.view().stage, PipelineStage::Idle);
    assert!(api.probe_calls().is_empty());
}

#[tokio::test]
async fn new_upload_abandons_running_validation() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.set_exists_delay(Duration::from_millis(200));
    let session = session(&api, settings(5_000, ProbeMode::Batch));

    let running = tokio::spawn({
        let session = session.clone();
        async move { session.run_probe().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    session
        .load_sheet_str("ip,username,password\n10.9.9.9,admin,x\n")
        .unwrap();
    running.await.unwrap();

    assert_eq!(
        statuses(&session),
        vec![("10.9.9.9".to_string(), ProbeStatus::Untested)]
    );
    assert!(api.probe_calls().is_empty());
}

#[tokio::test]
async fn rerun_after_success_does_not_downgrade_on_cancel() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    let session = session(&api, settings(5_000, ProbeMode::Batch));
    session.run_probe().await;

    api.set_exists_delay(Duration::from_millis(300));
    let running = tokio::spawn({
        let session = session.clone();
        async move { session.run_probe().await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    session.cancel();
    running.await.unwrap();

    assert!(statuses(&session)
        .iter()
        .all(|(_, status)| *status == ProbeStatus::Success));
}

#[tokio::test]
async fn removing_a_candidate_mid_validation_keeps_the_run_going() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.set_exists_delay(Duration::from_millis(100));
    let session = session(&api, settings(5_000, ProbeMode::Batch));
    let removed = session.view().rows[1].candidate_id;

    let running = tokio::spawn({
        let session = session.clone();
        async move { session.run_probe().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.remove(removed).await;
    running.await.unwrap();

    assert_eq!(
        statuses(&session),
        vec![
            ("10.0.0.1".to_string(), ProbeStatus::Success),
            ("10.0.0.3".to_string(), ProbeStatus::Success),
        ]
    );
    assert_eq!(
        api.probe_calls(),
        vec![Call::Probe(vec![
            "10.0.0.1".to_string(),
            "10.0.0.3".to_string()
        ])]
    );
}

#[tokio::test]
async fn commit_sends_verified_hosts_and_resets() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.mark_unreachable("10.0.0.2");
    let session = session(&api, settings(5_000, ProbeMode::Batch));
    let dispatcher = Dispatcher::new(Arc::clone(&api), ChunkPolicy::default());

    let blocked = session.commit(&dispatcher, None).await.unwrap_err();
    assert_eq!(blocked, SessionError::Commit(CommitBlocked::Unresolved(3)));

    session.run_probe().await;
    let receipt = session.commit(&dispatcher, Some(2)).await.unwrap();

    assert_eq!(receipt.created, 2);
    assert_eq!(
        api.create_calls(),
        vec![Call::Create {
            addresses: vec!["10.0.0.1".to_string(), "10.0.0.3".to_string()],
            group_id: Some(2),
        }]
    );
    assert!(session.view().rows.is_empty());
}

#[tokio::test]
async fn failed_commit_keeps_the_candidates() {
    init_logging();
    let api = Arc::new(FakeApi::default());
    api.fail_create_with(common::transport_error());
    let session = session(&api, settings(5_000, ProbeMode::Batch));
    let dispatcher = Dispatcher::new(Arc::clone(&api), ChunkPolicy::default());

    session.run_probe().await;
    assert!(matches!(
        session.commit(&dispatcher, None).await,
        Err(SessionError::Dispatch(_))
    ));
    assert_eq!(session.view().rows.len(), 3);
}
