//! Cancellable, deadline-bound operation context and reliable-send options.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline plus cancellation handle for one queuing or blocking operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl OpContext {
    /// No deadline, never cancelled unless the token is cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Expire `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Expire at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancellation token of this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel the operation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the token was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancelled, or past the deadline at `now`.
    pub fn is_done_at(&self, now: Instant) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| now >= d)
    }

    /// Resolves once cancelled or past the deadline.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

/// Completion callback of a queued reliable packet.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Options for [`Conn::queue_reliable`](super::Conn::queue_reliable).
///
/// At most one of the two callbacks fires for a packet.
#[derive(Default)]
pub struct ReliableOptions {
    pub(crate) ctx: OpContext,
    pub(crate) on_acked: Option<Callback>,
    pub(crate) on_timeout: Option<Callback>,
}

impl ReliableOptions {
    /// Default context, no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the packet's lifetime by `ctx`.
    pub fn context(mut self, ctx: OpContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Run `f` once the peer acknowledges the packet.
    pub fn on_acked<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_acked = Some(Box::new(f));
        self
    }

    /// Run `f` if the packet expires or its context is cancelled first.
    pub fn on_timeout<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_timeout = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for ReliableOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReliableOptions")
            .field("ctx", &self.ctx)
            .field("on_acked", &self.on_acked.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_context() {
        let ctx = OpContext::with_timeout(Duration::from_millis(100));
        assert!(!ctx.is_done_at(Instant::now()));
        ctx.done().await;
        assert!(ctx.is_done_at(Instant::now()));
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_context() {
        let token = CancellationToken::new();
        let ctx = OpContext::background().with_cancel(token.clone());
        assert!(ctx.deadline().is_none());
        token.cancel();
        ctx.done().await;
        assert!(ctx.is_cancelled());
        assert!(ctx.is_done_at(Instant::now()));
    }

    #[test]
    fn test_options_debug() {
        let opts = ReliableOptions::new().on_acked(|| {});
        let s = format!("{opts:?}");
        assert!(s.contains("on_acked: true"));
        assert!(s.contains("on_timeout: false"));
    }
}
