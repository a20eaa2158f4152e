use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex as PMutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::config::StoreConfig;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::leaser::{Leaser, PrimaryInfo};
use crate::locks::LockKind;
use crate::metrics;
use crate::node_id;
use crate::pos::Pos;
use crate::primary_ctx::PrimaryCtx;
use crate::protocol::{self, FrameTag, LtxCodec};
use crate::subscriber::Subscriber;

struct Inner {
    dbs: HashMap<String, Arc<Db>>,
    subscribers: Vec<Arc<Subscriber>>,
    is_primary: bool,
    primary_info: Option<PrimaryInfo>,
    primary_tx: watch::Sender<()>,
}

struct Shared<L, C> {
    node_id: u64,
    data_dir: std::path::PathBuf,
    config: StoreConfig,
    leaser: L,
    client: C,
    codec: Arc<dyn LtxCodec>,
    cancel: CancellationToken,
    inner: PMutex<Inner>,
    ready: AtomicBool,
    ready_notify: Notify,
    demote_notify: Notify,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

/// Owns node identity, the set of DBs, the lease-monitor loop, replica-stream
/// consumption, retention and HALT monitors, and subscriber fan-out.
///
/// Cheaply `Clone`: every clone shares the same underlying state, mirroring
/// the `Arc<Namespace>` handles `libsql-server`'s `NamespaceStore` hands out.
pub struct Store<L, C> {
    shared: Arc<Shared<L, C>>,
}

impl<L, C> Clone for Store<L, C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<L, C> Store<L, C>
where
    L: Leaser + 'static,
    C: Client + 'static,
{
    /// Creates the data directory, loads the persistent node id, opens all
    /// existing DBs, and starts the lease monitor, HALT lock monitor, and
    /// retention monitor background tasks.
    pub async fn open(
        data_dir: std::path::PathBuf,
        config: StoreConfig,
        leaser: L,
        client: C,
        codec: Arc<dyn LtxCodec>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;
        let node_id = node_id::load_or_create(&data_dir).await?;

        let dbs_dir = data_dir.join("dbs");
        tokio::fs::create_dir_all(&dbs_dir).await?;
        let mut dbs = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dbs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let db = Db::open(entry.path(), name.clone(), codec.clone()).await?;
            dbs.insert(name, Arc::new(db));
        }

        let (primary_tx, _) = watch::channel(());
        let shared = Arc::new(Shared {
            node_id,
            data_dir,
            config,
            leaser,
            client,
            codec,
            cancel: CancellationToken::new(),
            inner: PMutex::new(Inner {
                dbs,
                subscribers: Vec::new(),
                is_primary: false,
                primary_info: None,
                primary_tx,
            }),
            ready: AtomicBool::new(false),
            ready_notify: Notify::new(),
            demote_notify: Notify::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        });

        metrics::DATABASE_COUNT.set(shared.inner.lock().dbs.len() as f64);

        let handles = vec![
            tokio::spawn(run_lease_monitor(shared.clone())),
            tokio::spawn(run_retention_monitor(shared.clone())),
            tokio::spawn(run_halt_monitor(shared.clone())),
        ];
        *shared.tasks.lock().await = handles;

        Ok(Self { shared })
    }

    pub fn node_id(&self) -> u64 {
        self.shared.node_id
    }

    pub fn candidate(&self) -> bool {
        self.shared.config.candidate
    }

    pub fn is_primary(&self) -> bool {
        self.shared.inner.lock().is_primary
    }

    pub fn primary_info(&self) -> Option<PrimaryInfo> {
        self.shared.inner.lock().primary_info.clone()
    }

    /// Resolves once the store has completed its first successful sync,
    /// whether that's becoming primary or receiving a `Ready` frame as a
    /// replica.
    pub async fn ready(&self) {
        loop {
            if self.shared.ready.load(Ordering::Acquire) {
                return;
            }
            self.shared.ready_notify.notified().await;
        }
    }

    pub fn primary_ctx(&self, parent: CancellationToken) -> PrimaryCtx {
        let rx = self.shared.inner.lock().primary_tx.subscribe();
        PrimaryCtx::new(parent, rx)
    }

    /// Signals the primary monitor to drop its lease and pause
    /// `demote_delay` before contending again. No-op if not primary.
    pub fn demote(&self) {
        self.shared.demote_notify.notify_one();
    }

    pub async fn create_db(&self, name: &str) -> Result<Arc<Db>> {
        if self.shared.inner.lock().dbs.contains_key(name) {
            return Err(Error::DatabaseExists(name.to_string()));
        }
        self.create_db_internal(name).await
    }

    pub async fn create_db_if_not_exists(&self, name: &str) -> Result<Arc<Db>> {
        if let Some(db) = self.shared.inner.lock().dbs.get(name).cloned() {
            return Ok(db);
        }
        self.create_db_internal(name).await
    }

    async fn create_db_internal(&self, name: &str) -> Result<Arc<Db>> {
        let dir = self.shared.data_dir.join("dbs").join(name);
        let db = Arc::new(Db::open(dir, name.to_string(), self.shared.codec.clone()).await?);
        self.shared.inner.lock().dbs.insert(name.to_string(), db.clone());
        metrics::DATABASE_COUNT.set(self.shared.inner.lock().dbs.len() as f64);
        Ok(db)
    }

    pub async fn drop_db(&self, name: &str) -> Result<()> {
        self.drop_db_internal(name).await
    }

    async fn drop_db_internal(&self, name: &str) -> Result<()> {
        let removed = self.shared.inner.lock().dbs.remove(name);
        match removed {
            Some(_) => {
                let dir = self.shared.data_dir.join("dbs").join(name);
                tokio::fs::remove_dir_all(&dir).await.ok();
                metrics::DATABASE_COUNT.set(self.shared.inner.lock().dbs.len() as f64);
                Ok(())
            }
            None => Err(Error::DatabaseNotFound(name.to_string())),
        }
    }

    pub fn db(&self, name: &str) -> Option<Arc<Db>> {
        self.shared.inner.lock().dbs.get(name).cloned()
    }

    /// Waits for `name`'s HALT lock grant to arrive, bounded by
    /// `halt_acquire_timeout`. Used by the (out-of-scope) filesystem
    /// front-end when a replica needs temporary local write authority.
    pub async fn acquire_halt_lock(&self, name: &str) -> Result<crate::halt::HaltLock> {
        let db = self.db(name).ok_or_else(|| Error::DatabaseNotFound(name.to_string()))?;
        db.acquire_halt_lock(self.shared.config.halt_acquire_timeout).await
    }

    pub fn dbs(&self) -> Vec<Arc<Db>> {
        self.shared.inner.lock().dbs.values().cloned().collect()
    }

    pub fn pos_map(&self) -> HashMap<String, Pos> {
        self.shared
            .inner
            .lock()
            .dbs
            .iter()
            .map(|(name, db)| (name.clone(), db.pos()))
            .collect()
    }

    pub fn subscribe(&self) -> Arc<Subscriber> {
        let sub = Subscriber::new();
        let mut inner = self.shared.inner.lock();
        inner.subscribers.push(sub.clone());
        metrics::SUBSCRIBER_COUNT.set(inner.subscribers.len() as f64);
        sub
    }

    pub fn unsubscribe(&self, sub: &Arc<Subscriber>) {
        let mut inner = self.shared.inner.lock();
        inner.subscribers.retain(|s| !Arc::ptr_eq(s, sub));
        metrics::SUBSCRIBER_COUNT.set(inner.subscribers.len() as f64);
    }

    fn mark_dirty(&self, name: &str) {
        let inner = self.shared.inner.lock();
        for sub in &inner.subscribers {
            sub.mark_dirty(name);
        }
    }

    fn mark_ready(&self) {
        if !self.shared.ready.swap(true, Ordering::AcqRel) {
            self.shared.ready_notify.notify_waiters();
        }
    }

    fn set_is_primary(&self, is_primary: bool) {
        let mut inner = self.shared.inner.lock();
        inner.is_primary = is_primary;
        let (tx, _) = watch::channel(());
        inner.primary_tx = tx;
        metrics::IS_PRIMARY.set(if is_primary { 1.0 } else { 0.0 });
    }

    /// Cancels the root token with [`Error::StoreClosed`], and best-effort
    /// releases any remotely-held HALT locks. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.shared.cancel.is_cancelled() {
            return Ok(());
        }
        self.shared.cancel.cancel();
        for db in self.dbs() {
            if let Some(id) = db.remote_halt_lock().and_then(|h| h.remote_id()) {
                let _ = db.release_remote_halt_lock(id);
            }
        }
        let handles = std::mem::take(&mut *self.shared.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn recover_all_dbs(&self) {
        for db in self.dbs() {
            if let Err(e) = db.recover(self.shared.config.begin_timeout).await {
                tracing::warn!(db = db.name(), error = %e, "recover failed");
            }
        }
    }

    async fn sleep_cancellable(&self, dur: Duration) {
        tokio::select! {
            _ = self.shared.cancel.cancelled() => {}
            _ = tokio::time::sleep(dur) => {}
        }
    }
}

async fn run_lease_monitor<L, C>(shared: Arc<Shared<L, C>>)
where
    L: Leaser + 'static,
    C: Client + 'static,
{
    let store = Store { shared: shared.clone() };
    while !shared.cancel.is_cancelled() {
        match shared.leaser.primary_info(&shared.cancel).await {
            Ok(info) => monitor_lease_as_replica(&store, info).await,
            Err(Error::NoPrimary) => {
                if shared.config.candidate {
                    match shared.leaser.acquire(&shared.cancel).await {
                        Ok(lease) => monitor_lease_as_primary(&store, lease).await,
                        Err(Error::PrimaryExists) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to acquire primary lease");
                            store.sleep_cancellable(shared.config.reconnect_delay).await;
                        }
                    }
                } else {
                    store.sleep_cancellable(shared.config.reconnect_delay).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to discover primary");
                store.sleep_cancellable(shared.config.reconnect_delay).await;
            }
        }
    }
}

async fn monitor_lease_as_primary<L, C>(store: &Store<L, C>, mut lease: Box<dyn crate::leaser::Lease>)
where
    L: Leaser + 'static,
    C: Client + 'static,
{
    store.set_is_primary(true);
    store.mark_ready();
    tracing::info!(node_id = store.node_id(), "became primary");

    let ttl = lease.ttl();
    let mut last_renewal = Instant::now();
    let mut demoted = false;

    'renew: loop {
        tokio::select! {
            _ = store.shared.cancel.cancelled() => break 'renew,
            _ = store.shared.demote_notify.notified() => {
                demoted = true;
                break 'renew;
            }
            _ = tokio::time::sleep(ttl / 2) => {
                match lease.renew(&store.shared.cancel).await {
                    Ok(()) => last_renewal = Instant::now(),
                    Err(Error::LeaseExpired) => break 'renew,
                    Err(e) => {
                        tracing::warn!(error = %e, "lease renewal failed, retrying");
                        loop {
                            if Instant::now().duration_since(last_renewal) + Duration::from_secs(1) > ttl {
                                break 'renew;
                            }
                            tokio::select! {
                                _ = store.shared.cancel.cancelled() => break 'renew,
                                _ = store.shared.demote_notify.notified() => { demoted = true; break 'renew; }
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            }
                            match lease.renew(&store.shared.cancel).await {
                                Ok(()) => { last_renewal = Instant::now(); continue 'renew; }
                                Err(Error::LeaseExpired) => break 'renew,
                                Err(e) => { tracing::warn!(error = %e, "lease renewal retry failed"); }
                            }
                        }
                    }
                }
            }
        }
    }

    let _ = lease.close().await;
    store.set_is_primary(false);
    tracing::info!(node_id = store.node_id(), "lost primary lease");
    store.recover_all_dbs().await;

    if demoted {
        store.sleep_cancellable(store.shared.config.demote_delay).await;
    }
}

async fn monitor_lease_as_replica<L, C>(store: &Store<L, C>, info: PrimaryInfo)
where
    L: Leaser + 'static,
    C: Client + 'static,
{
    store.shared.inner.lock().primary_info = Some(info.clone());

    let result = async {
        let mut stream = store
            .shared
            .client
            .stream(
                &store.shared.cancel,
                &info.advertise_url,
                store.node_id(),
                store.pos_map(),
            )
            .await?;
        consume_stream(store, &mut stream).await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(error = %e, "replica stream ended");
    }

    store.shared.inner.lock().primary_info = None;
    store.recover_all_dbs().await;
    store.sleep_cancellable(store.shared.config.reconnect_delay).await;
}

async fn consume_stream<L, C, S>(store: &Store<L, C>, stream: &mut S) -> Result<()>
where
    L: Leaser + 'static,
    C: Client + 'static,
    S: tokio::io::AsyncRead + Unpin,
{
    loop {
        match protocol::read_frame_tag(stream).await? {
            None => return Ok(()),
            Some(FrameTag::Ready) => store.mark_ready(),
            Some(FrameTag::DropDb) => {
                let name = protocol::read_drop_db_name(stream).await?;
                match store.drop_db_internal(&name).await {
                    Ok(()) => store.mark_dirty(&name),
                    Err(Error::DatabaseNotFound(_)) => {
                        tracing::info!(db = %name, "drop_db for unknown database, ignoring");
                    }
                    Err(e) => return Err(e),
                }
            }
            Some(FrameTag::Ltx) => handle_ltx_frame(store, stream).await?,
            Some(FrameTag::End) => unreachable!("End maps to None above"),
        }
    }
}

async fn handle_ltx_frame<L, C, S>(store: &Store<L, C>, stream: &mut S) -> Result<()>
where
    L: Leaser + 'static,
    C: Client + 'static,
    S: tokio::io::AsyncRead + Unpin,
{
    let body = protocol::read_ltx_body(stream).await?;
    let hdr = store.shared.codec.decode_header(&body)?;

    let db = store.create_db_if_not_exists(&hdr.db_name).await?;
    let _guard = db
        .acquire_write_lock(&[LockKind::Recover], store.shared.config.begin_timeout)
        .await?;

    db.clear_remote_halt_lock();

    if hdr.node_id == store.node_id() {
        // This replica generated the file itself and it round-tripped
        // through the primary. Verify it's installable, but never re-apply:
        // the position it describes is already reflected locally.
        hdr.validate_apply(db.pos()).or_else(|e| {
            if hdr.is_snapshot {
                Ok(())
            } else {
                Err(e)
            }
        })?;
        return Ok(());
    }

    let path = db.install_ltx_file(&hdr, &body).await?;
    match db.apply_ltx_no_lock(&path, &hdr).await {
        Ok(_) => {
            metrics::LTX_FILES_APPLIED.increment(1);
            store.mark_dirty(&hdr.db_name);
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(e)
        }
    }
}

async fn run_retention_monitor<L, C>(shared: Arc<Shared<L, C>>)
where
    L: Leaser + 'static,
    C: Client + 'static,
{
    let store = Store { shared: shared.clone() };
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.config.retention_monitor_interval) => {}
        }

        let min_time = SystemTime::now() - shared.config.retention;
        let mut first_err = None;
        for db in store.dbs() {
            if let Err(e) = db.enforce_retention(min_time).await {
                tracing::warn!(db = db.name(), error = %e, "retention sweep failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        if let Some(e) = first_err {
            tracing::warn!(error = %e, "retention monitor encountered errors this sweep");
        }
    }
}

async fn run_halt_monitor<L, C>(shared: Arc<Shared<L, C>>)
where
    L: Leaser + 'static,
    C: Client + 'static,
{
    let store = Store { shared: shared.clone() };
    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.config.halt_lock_monitor_interval) => {}
        }

        let now = Instant::now();
        let mut held = 0.0;
        for db in store.dbs() {
            db.enforce_halt_lock_expiration(now);
            if db.remote_halt_lock().is_some() {
                held += 1.0;
            }
        }
        metrics::HALT_LOCKS_HELD.set(held);
    }
}
