use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// A context-like cancellation handle tied to primary-status loss.
///
/// Derived from a parent [`CancellationToken`] plus the store's "primary
/// channel": a `tokio::sync::watch` receiver whose sender is dropped (and a
/// fresh pair installed) on every primary transition, the same
/// channel-close-as-signal pattern `libsql-server` uses for readiness and
/// frame notification (`replication/wal/frame_notifier.rs`). Cancels the
/// moment either the parent cancels or primary status is lost, whichever
/// comes first, and lets the caller distinguish the two.
pub struct PrimaryCtx {
    parent: CancellationToken,
    primary_rx: tokio::sync::watch::Receiver<()>,
}

impl PrimaryCtx {
    pub(crate) fn new(parent: CancellationToken, primary_rx: tokio::sync::watch::Receiver<()>) -> Self {
        Self { parent, primary_rx }
    }

    /// Resolves once either the parent is cancelled or primary status is
    /// lost.
    pub async fn cancelled(&mut self) {
        tokio::select! {
            _ = self.parent.cancelled() => {}
            _ = self.primary_rx.changed() => {}
        }
    }

    /// `None` while primary and the parent hasn't cancelled.
    /// `Some(Error::LeaseExpired)` once primary status is lost.
    /// `Some(Error::StoreClosed)` if the parent cancelled first.
    pub fn err(&self) -> Option<Error> {
        if self.parent.is_cancelled() {
            return Some(Error::StoreClosed);
        }
        if self.primary_rx.has_changed().is_err() {
            return Some(Error::LeaseExpired);
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn none_while_primary() {
        let (_tx, rx) = tokio::sync::watch::channel(());
        let ctx = PrimaryCtx::new(CancellationToken::new(), rx);
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn lease_expired_on_channel_close() {
        let (tx, rx) = tokio::sync::watch::channel(());
        let mut ctx = PrimaryCtx::new(CancellationToken::new(), rx);
        drop(tx);
        tokio::time::timeout(Duration::from_millis(100), ctx.cancelled())
            .await
            .unwrap();
        assert!(matches!(ctx.err(), Some(Error::LeaseExpired)));
    }

    #[tokio::test]
    async fn parent_cancellation_takes_precedence() {
        let (_tx, rx) = tokio::sync::watch::channel(());
        let parent = CancellationToken::new();
        let ctx = PrimaryCtx::new(parent.clone(), rx);
        parent.cancel();
        assert!(matches!(ctx.err(), Some(Error::StoreClosed)));
    }
}
