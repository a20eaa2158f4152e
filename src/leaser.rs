use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Identifies the current primary, as reported by the [`Leaser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryInfo {
    pub node_id: u64,
    pub advertise_url: String,
}

/// A held primary lease. Must be periodically renewed or it expires and
/// primary authority reverts to the lease backend.
#[async_trait]
pub trait Lease: Send + Sync {
    fn ttl(&self) -> Duration;
    fn renewed_at(&self) -> SystemTime;
    /// Renews the lease. Returns [`crate::error::Error::LeaseExpired`] if the
    /// backend considers the lease unrecoverably gone. Honours `cancel`.
    async fn renew(&mut self, cancel: &CancellationToken) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// Abstract external lease service used for single-primary election.
///
/// Implementations are expected to be backed by a CP (consistent,
/// partition-intolerant) key-value store; no quorum logic lives in this
/// crate.
#[async_trait]
pub trait Leaser: Send + Sync {
    /// Attempts to acquire the primary lease. Returns
    /// [`crate::error::Error::PrimaryExists`] if another node already holds
    /// it. Honours `cancel`.
    async fn acquire(&self, cancel: &CancellationToken) -> Result<Box<dyn Lease>>;

    /// Returns the current primary, if any. Returns
    /// [`crate::error::Error::NoPrimary`] if no primary currently holds the
    /// lease. Honours `cancel`.
    async fn primary_info(&self, cancel: &CancellationToken) -> Result<PrimaryInfo>;

    /// The URL this node would advertise to replicas if it became primary.
    fn advertise_url(&self) -> &str;
}
