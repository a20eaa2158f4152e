use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex as PMutex;
use tokio_util::sync::CancellationToken;

use ltx_store::{Client, Error, Lease, Leaser, LtxCodec, LtxHeader, PrimaryInfo, Result};

/// Pins the store's persistent node id to a known value so tests can predict
/// which node a fake election backend hands primary status to.
pub async fn write_node_id(dir: &Path, id: u64) {
    tokio::fs::create_dir_all(dir).await.unwrap();
    tokio::fs::write(dir.join("id"), format!("{id:016x}\n")).await.unwrap();
}

/// Shared in-memory election state standing in for the out-of-scope CP
/// lease backend. Multiple [`FakeLeaser`] handles pointed at the same
/// instance simulate several nodes contending for one lease.
#[derive(Default)]
pub struct Election {
    holder: PMutex<Option<PrimaryInfo>>,
}

impl Election {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

pub struct FakeLeaser {
    pub node_id: u64,
    pub advertise_url: String,
    pub election: Arc<Election>,
    pub ttl: Duration,
    /// Shared with every [`FakeLease`] this leaser hands out. Flipping it
    /// from a test simulates the lease backend revoking this node's lease
    /// out from under it (e.g. a network partition), as opposed to the node
    /// voluntarily giving it up via `Store::demote()`. While set, `acquire`
    /// also refuses to hand the lease back to this node, so a revoked node
    /// cannot race a surviving candidate for it.
    pub force_expire: Arc<AtomicBool>,
}

impl FakeLeaser {
    pub fn new(node_id: u64, advertise_url: impl Into<String>, election: Arc<Election>, ttl: Duration) -> Self {
        Self {
            node_id,
            advertise_url: advertise_url.into(),
            election,
            ttl,
            force_expire: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Leaser for FakeLeaser {
    async fn acquire(&self, _cancel: &CancellationToken) -> Result<Box<dyn Lease>> {
        if self.force_expire.load(Ordering::Acquire) {
            return Err(Error::Internal(format!(
                "node {} lost contact with the lease backend",
                self.node_id
            )));
        }
        let mut holder = self.election.holder.lock();
        if holder.is_some() {
            return Err(Error::PrimaryExists);
        }
        *holder = Some(PrimaryInfo {
            node_id: self.node_id,
            advertise_url: self.advertise_url.clone(),
        });
        Ok(Box::new(FakeLease {
            node_id: self.node_id,
            election: self.election.clone(),
            ttl: self.ttl,
            renewed_at: SystemTime::now(),
            force_expire: self.force_expire.clone(),
        }))
    }

    async fn primary_info(&self, _cancel: &CancellationToken) -> Result<PrimaryInfo> {
        self.election.holder.lock().clone().ok_or(Error::NoPrimary)
    }

    fn advertise_url(&self) -> &str {
        &self.advertise_url
    }
}

pub struct FakeLease {
    node_id: u64,
    election: Arc<Election>,
    ttl: Duration,
    renewed_at: SystemTime,
    /// Flipped from outside the trait object to simulate the lease backend
    /// revoking a lease out from under its holder (e.g. a network partition).
    pub force_expire: Arc<AtomicBool>,
}

#[async_trait]
impl Lease for FakeLease {
    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn renewed_at(&self) -> SystemTime {
        self.renewed_at
    }

    async fn renew(&mut self, _cancel: &CancellationToken) -> Result<()> {
        if self.force_expire.load(Ordering::Acquire) {
            self.election.holder.lock().take();
            return Err(Error::LeaseExpired);
        }
        self.renewed_at = SystemTime::now();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut holder = self.election.holder.lock();
        if holder.as_ref().map(|p| p.node_id) == Some(self.node_id) {
            *holder = None;
        }
        Ok(())
    }
}

/// Hands back a single canned byte stream once, then an empty one. Good
/// enough to drive a replica through one reconnect cycle deterministically.
pub struct FakeClient {
    body: PMutex<Option<Vec<u8>>>,
}

impl FakeClient {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: PMutex::new(Some(body)),
        }
    }
}

#[async_trait]
impl Client for FakeClient {
    type Stream = std::io::Cursor<Vec<u8>>;

    async fn stream(
        &self,
        _cancel: &CancellationToken,
        _url: &str,
        _node_id: u64,
        _pos_map: std::collections::HashMap<String, ltx_store::Pos>,
    ) -> Result<Self::Stream> {
        let body = self.body.lock().take().unwrap_or_default();
        Ok(std::io::Cursor::new(body))
    }
}

/// A trivial fixed-width header codec used only by tests: the LTX "file
/// body" a [`FakeClient`]/primary exchanges is just the encoded header,
/// with no page payload, since this crate never interprets page data.
pub struct FakeCodec;

impl LtxCodec for FakeCodec {
    fn decode_header(&self, bytes: &[u8]) -> Result<LtxHeader> {
        decode_header(bytes)
    }
}

pub fn encode_header(hdr: &LtxHeader) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&hdr.node_id.to_le_bytes());
    out.extend_from_slice(&hdr.min_txid.to_le_bytes());
    out.extend_from_slice(&hdr.max_txid.to_le_bytes());
    out.extend_from_slice(&hdr.pre_apply_checksum.to_le_bytes());
    out.extend_from_slice(&hdr.post_apply_checksum.to_le_bytes());
    out.push(hdr.is_snapshot as u8);
    let name = hdr.db_name.as_bytes();
    out.extend_from_slice(&(name.len() as u32).to_le_bytes());
    out.extend_from_slice(name);
    out
}

fn decode_header(bytes: &[u8]) -> Result<LtxHeader> {
    let mut cur = std::io::Cursor::new(bytes);
    let mut read_u64 = |c: &mut std::io::Cursor<&[u8]>| -> u64 {
        let pos = c.position() as usize;
        let v = u64::from_le_bytes(c.get_ref()[pos..pos + 8].try_into().unwrap());
        c.set_position((pos + 8) as u64);
        v
    };
    let node_id = read_u64(&mut cur);
    let min_txid = read_u64(&mut cur);
    let max_txid = read_u64(&mut cur);
    let pre_apply_checksum = read_u64(&mut cur);
    let post_apply_checksum = read_u64(&mut cur);
    let pos = cur.position() as usize;
    let is_snapshot = bytes[pos] != 0;
    cur.set_position((pos + 1) as u64);
    let pos = cur.position() as usize;
    let name_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
    cur.set_position((pos + 4) as u64);
    let pos = cur.position() as usize;
    let db_name = String::from_utf8(bytes[pos..pos + name_len].to_vec())
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(LtxHeader {
        db_name,
        min_txid,
        max_txid,
        pre_apply_checksum,
        post_apply_checksum,
        node_id,
        is_snapshot,
    })
}
