use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for [`crate::store::Store`].
///
/// Mirrors the plain-struct-with-`Duration`-fields-and-a-`Default`-impl shape
/// `libsql-server` uses for `DbConfig`/`RpcClientConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Pause between lease-monitor loop iterations after a failed attempt to
    /// discover or acquire a primary.
    pub reconnect_delay: Duration,
    /// Pause after a manual [`Store::demote`](crate::store::Store::demote)
    /// before contending for the lease again.
    pub demote_delay: Duration,
    /// How long LTX files are kept around after being superseded.
    pub retention: Duration,
    /// How often the retention monitor sweeps every DB.
    pub retention_monitor_interval: Duration,
    /// Budget for acquiring a HALT lock.
    pub halt_acquire_timeout: Duration,
    /// Lifetime of a granted HALT lock absent renewal.
    pub halt_lock_ttl: Duration,
    /// How often the HALT lock monitor sweeps every DB for expiration.
    pub halt_lock_monitor_interval: Duration,
    /// Budget for acquiring the write lock to begin a transaction.
    pub begin_timeout: Duration,
    /// Apply LZ4 compression to outbound LTX frames on the primary.
    pub compress: bool,
    /// Verify the full database checksum after every apply. Expensive;
    /// intended for tests only.
    pub strict_verify: bool,
    /// Whether this node may become primary. A non-candidate is replica-only.
    pub candidate: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            demote_delay: Duration::from_secs(10),
            retention: Duration::from_secs(10 * 60),
            retention_monitor_interval: Duration::from_secs(60),
            halt_acquire_timeout: Duration::from_secs(5),
            halt_lock_ttl: Duration::from_secs(30),
            halt_lock_monitor_interval: Duration::from_secs(5),
            begin_timeout: Duration::from_secs(30),
            compress: false,
            strict_verify: false,
            candidate: true,
        }
    }
}
