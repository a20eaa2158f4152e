use serde::{Deserialize, Serialize};

/// A database's exact replicated state: the last applied transaction id and
/// the checksum chained through every LTX file applied up to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub txid: u64,
    pub post_apply_checksum: u64,
}

impl Pos {
    pub const fn zero() -> Self {
        Self {
            txid: 0,
            post_apply_checksum: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::zero()
    }
}

impl std::fmt::Display for Pos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}/{:016x}", self.txid, self.post_apply_checksum)
    }
}

/// The header of an LTX file, as decoded by the (out of scope) LTX codec.
///
/// The core never parses LTX file bodies; it only relies on this header to
/// enforce the apply-order invariants and to decide snapshot handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtxHeader {
    /// The database this file applies to. Present so a replica can create a
    /// DB on demand the first time it sees a frame for an unfamiliar name.
    pub db_name: String,
    pub min_txid: u64,
    pub max_txid: u64,
    pub pre_apply_checksum: u64,
    pub post_apply_checksum: u64,
    pub node_id: u64,
    pub is_snapshot: bool,
}

impl LtxHeader {
    /// The position this DB will be at once this file is applied.
    pub fn post_apply_pos(&self) -> Pos {
        Pos {
            txid: self.max_txid,
            post_apply_checksum: self.post_apply_checksum,
        }
    }

    /// Validates that `self` may be applied directly after `current`.
    /// Snapshots are exempt from the chaining check: they replace state
    /// unconditionally.
    pub fn validate_apply(&self, current: Pos) -> crate::error::Result<()> {
        if self.is_snapshot {
            return Ok(());
        }
        if self.min_txid != current.txid + 1 || self.pre_apply_checksum != current.post_apply_checksum {
            return Err(crate::error::Error::PositionMismatch {
                expected_min: current.txid + 1,
                expected_checksum: current.post_apply_checksum,
                got_min: self.min_txid,
                got_checksum: self.pre_apply_checksum,
            });
        }
        Ok(())
    }

    /// Canonical on-disk file name: `{min_txid}-{max_txid}` hex, zero padded.
    pub fn file_name(&self) -> String {
        format!("{:016x}-{:016x}.ltx", self.min_txid, self.max_txid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn validate_apply_rejects_gap() {
        let current = Pos {
            txid: 5,
            post_apply_checksum: 0xAA,
        };
        let hdr = LtxHeader {
            db_name: "mydb".into(),
            min_txid: 7,
            max_txid: 8,
            pre_apply_checksum: 0xAA,
            post_apply_checksum: 0xBB,
            node_id: 1,
            is_snapshot: false,
        };
        assert!(hdr.validate_apply(current).is_err());
    }

    #[test]
    fn validate_apply_rejects_checksum_mismatch() {
        let current = Pos {
            txid: 5,
            post_apply_checksum: 0xAA,
        };
        let hdr = LtxHeader {
            db_name: "mydb".into(),
            min_txid: 6,
            max_txid: 6,
            pre_apply_checksum: 0xFF,
            post_apply_checksum: 0xBB,
            node_id: 1,
            is_snapshot: false,
        };
        assert!(hdr.validate_apply(current).is_err());
    }

    #[test]
    fn validate_apply_accepts_contiguous() {
        let current = Pos {
            txid: 5,
            post_apply_checksum: 0xAA,
        };
        let hdr = LtxHeader {
            db_name: "mydb".into(),
            min_txid: 6,
            max_txid: 6,
            pre_apply_checksum: 0xAA,
            post_apply_checksum: 0xBB,
            node_id: 1,
            is_snapshot: false,
        };
        assert!(hdr.validate_apply(current).is_ok());
    }

    #[test]
    fn snapshot_bypasses_chaining() {
        let current = Pos {
            txid: 5,
            post_apply_checksum: 0xAA,
        };
        let hdr = LtxHeader {
            db_name: "mydb".into(),
            min_txid: 1,
            max_txid: 10,
            pre_apply_checksum: 0x00,
            post_apply_checksum: 0xBEEF,
            node_id: 1,
            is_snapshot: true,
        };
        assert!(hdr.validate_apply(current).is_ok());
        assert_eq!(
            hdr.post_apply_pos(),
            Pos {
                txid: 10,
                post_apply_checksum: 0xBEEF
            }
        );
    }
}
