use std::sync::Arc;

use fleet_core::{ChunkPolicy, DispatchTarget, InventoryFilter, RecordId, VerifiedHost};
use fleet_logging::{fleet_info, fleet_warn};
use tokio::task::JoinHandle;

use crate::{ApiError, DispatchError, FailureKind, FleetApi, OperationKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardReceipt {
    pub created: usize,
    pub group_id: Option<u64>,
}

/// Acceptance of a triggered operation. Job completion is reported
/// out-of-band by the backend, not through this receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub kind: OperationKind,
    pub targets: u64,
    pub batch_size: usize,
    pub requests: usize,
}

/// Handle to a submission running in the background. Dropping it (or calling
/// [`OperationHandle::detach`]) leaves the submission running.
#[derive(Debug)]
pub struct OperationHandle {
    task: JoinHandle<Result<DispatchReceipt, DispatchError>>,
}

impl OperationHandle {
    /// Waits for the backend's accept/reject answer.
    pub async fn accepted(self) -> Result<DispatchReceipt, DispatchError> {
        self.task
            .await
            .map_err(|err| DispatchError::TaskFailed(err.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn detach(self) {}
}

/// Turns finalized selections and verified hosts into backend calls.
/// Identical payloads are not deduplicated; callers gate re-submission.
pub struct Dispatcher<A: FleetApi + ?Sized> {
    api: Arc<A>,
    policy: ChunkPolicy,
}

impl<A: FleetApi + ?Sized + 'static> Dispatcher<A> {
    pub fn new(api: Arc<A>, policy: ChunkPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> ChunkPolicy {
        self.policy
    }

    /// Creates every host in one all-or-nothing call and waits for the
    /// outcome.
    pub async fn onboard(
        &self,
        hosts: Vec<VerifiedHost>,
        group_id: Option<u64>,
    ) -> Result<OnboardReceipt, DispatchError> {
        if hosts.is_empty() {
            return Err(DispatchError::Empty);
        }
        fleet_info!("creating {} servers (group {:?})", hosts.len(), group_id);
        self.api
            .create_batch(&hosts, group_id)
            .await
            .map_err(classify)?;
        Ok(OnboardReceipt {
            created: hosts.len(),
            group_id,
        })
    }

    /// Submits `kind` for `target` in the background and returns at once.
    pub fn trigger(&self, kind: OperationKind, target: DispatchTarget) -> OperationHandle {
        let api = Arc::clone(&self.api);
        let policy = self.policy;
        let task = tokio::spawn(async move { submit(api.as_ref(), policy, kind, target).await });
        OperationHandle { task }
    }
}

async fn submit<A: FleetApi + ?Sized>(
    api: &A,
    policy: ChunkPolicy,
    kind: OperationKind,
    target: DispatchTarget,
) -> Result<DispatchReceipt, DispatchError> {
    if target.is_empty() {
        return Err(DispatchError::Empty);
    }
    let ids = match target {
        DispatchTarget::Ids(ids) => ids,
        // An omitted id list means "every server", which only matches an
        // unfiltered selection.
        DispatchTarget::AllMatching { filter, count } if filter == InventoryFilter::default() => {
            let batch_size = policy.batch_size_for(count);
            fleet_info!(
                "triggering {:?} for all {} servers (batch size {})",
                kind,
                count,
                batch_size
            );
            return accept_or_reject(api.trigger_operation(&kind, None, batch_size).await, 1, 1)
                .map(|()| DispatchReceipt {
                    kind,
                    targets: count,
                    batch_size,
                    requests: 1,
                });
        }
        DispatchTarget::AllMatching { filter, count } => {
            api.fetch_all_ids(&filter, count).await?
        }
    };
    submit_chunks(api, policy, kind, ids).await
}

async fn submit_chunks<A: FleetApi + ?Sized>(
    api: &A,
    policy: ChunkPolicy,
    kind: OperationKind,
    ids: Vec<RecordId>,
) -> Result<DispatchReceipt, DispatchError> {
    if ids.is_empty() {
        return Err(DispatchError::Empty);
    }
    let batch_size = policy.batch_size_for(ids.len() as u64);
    let chunks: Vec<&[RecordId]> = policy.chunks(&ids).collect();
    let total = chunks.len();
    fleet_info!(
        "triggering {:?} for {} servers in {} requests of up to {}",
        kind,
        ids.len(),
        total,
        batch_size
    );
    for (index, chunk) in chunks.into_iter().enumerate() {
        accept_or_reject(
            api.trigger_operation(&kind, Some(chunk), batch_size).await,
            index + 1,
            total,
        )?;
    }
    Ok(DispatchReceipt {
        kind,
        targets: ids.len() as u64,
        batch_size,
        requests: total,
    })
}

fn accept_or_reject(
    answer: Result<bool, ApiError>,
    request: usize,
    total: usize,
) -> Result<(), DispatchError> {
    match answer {
        Ok(true) => Ok(()),
        Ok(false) => {
            fleet_warn!("request {}/{} was not accepted", request, total);
            Err(DispatchError::Rejected(format!(
                "request {request} of {total} was not accepted"
            )))
        }
        Err(err) => {
            fleet_warn!("request {}/{} failed: {}", request, total, err);
            Err(classify(err))
        }
    }
}

/// Client errors carry the backend's reason; everything else is transport.
fn classify(err: ApiError) -> DispatchError {
    match err.kind {
        FailureKind::HttpStatus(code) if (400..500).contains(&code) => {
            DispatchError::Rejected(err.message)
        }
        _ => DispatchError::Transport(err),
    }
}
