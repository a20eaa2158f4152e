use std::time::Instant;

/// Grants a replica temporary exclusive write authority, borrowed from the
/// primary. Only one replica may hold a given DB's HALT lock at a time; the
/// primary enforces that server-side (out of scope here, since granting is a
/// primary-side RPC concern) — the core only tracks and expires the
/// replica-side view of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltLock {
    /// No HALT lock is in play for this DB.
    Empty,
    /// This node holds local write authority. Always true on the primary.
    Local,
    /// A replica has borrowed write authority from the primary.
    Remote { id: u64, expires_at: Instant },
}

impl HaltLock {
    pub fn is_remote(&self) -> bool {
        matches!(self, HaltLock::Remote { .. })
    }

    pub fn remote_id(&self) -> Option<u64> {
        match self {
            HaltLock::Remote { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self, HaltLock::Remote { expires_at, .. } if *expires_at <= now)
    }
}
