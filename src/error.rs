#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("store is closed")]
    StoreClosed,
    #[error("no primary available")]
    NoPrimary,
    #[error("a primary already exists")]
    PrimaryExists,
    #[error("lease has expired")]
    LeaseExpired,
    #[error("database `{0}` already exists")]
    DatabaseExists(String),
    #[error("database `{0}` not found")]
    DatabaseNotFound(String),
    #[error("timed out acquiring write lock")]
    AcquireTimeout,
    #[error("timed out acquiring halt lock")]
    HaltAcquireTimeout,
    #[error("halt lock `{0}` not held remotely")]
    HaltLockNotHeld(u64),
    #[error("ltx position mismatch: expected min_txid={expected_min}, pre_apply_checksum={expected_checksum:#x}, got min_txid={got_min}, pre_apply_checksum={got_checksum:#x}")]
    PositionMismatch {
        expected_min: u64,
        expected_checksum: u64,
        got_min: u64,
        got_checksum: u64,
    },
    #[error("unknown stream frame tag: {0}")]
    UnknownFrameTag(u8),
    #[error("replication stream ended unexpectedly")]
    StreamClosed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    // Catch-all for lower-level failures we don't give a dedicated variant.
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
