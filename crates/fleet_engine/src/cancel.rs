use std::future::Future;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

/// Revocable handle shared by every request and timer of one user-initiated
/// operation. Cloning shares the same cancellation state.
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    token: CancellationToken,
}

impl RunScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope cancelled together with this one, but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Runs `fut` until it completes or the scope is cancelled. On cancel the
    /// future is dropped, which aborts any request it had in flight.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, Cancelled>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: std::time::Duration) -> Result<(), Cancelled> {
        self.guard(tokio::time::sleep(duration)).await
    }
}
