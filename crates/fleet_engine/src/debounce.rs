use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Identifies one debounced call; only the newest ticket is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
struct DebounceState {
    generation: u64,
    pending: Option<CancellationToken>,
}

/// Collapses bursts of calls into the last one. Each call cancels the wait
/// of the previous one; results must still be checked with [`Debouncer::is_latest`]
/// before they are applied, since a slow response may outlive its window.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    state: Mutex<DebounceState>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Mutex::new(DebounceState::default()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits out the quiet window. Returns `None` if a newer call superseded
    /// this one before the window elapsed.
    pub async fn settle(&self) -> Option<Ticket> {
        let (ticket, token) = {
            let mut state = self.lock();
            if let Some(previous) = state.pending.take() {
                previous.cancel();
            }
            state.generation += 1;
            let token = CancellationToken::new();
            state.pending = Some(token.clone());
            (Ticket(state.generation), token)
        };

        tokio::select! {
            () = token.cancelled() => None,
            () = tokio::time::sleep(self.delay) => Some(ticket),
        }
    }

    /// Issues a ticket immediately, superseding any pending wait.
    pub fn bypass(&self) -> Ticket {
        let mut state = self.lock();
        if let Some(previous) = state.pending.take() {
            previous.cancel();
        }
        state.generation += 1;
        Ticket(state.generation)
    }

    pub fn is_latest(&self, ticket: Ticket) -> bool {
        self.lock().generation == ticket.0
    }

    /// Drops the pending call and invalidates every outstanding ticket.
    pub fn cancel(&self) {
        self.bypass();
    }

    fn lock(&self) -> MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
