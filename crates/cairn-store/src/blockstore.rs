use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use cairn_car::{CarHeader, CommitMeta};
use cairn_crypto::KeyMaterial;
use cairn_types::{Block, Cid, TypeError};
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::fs::FsStore;
use crate::loader::{CommitOpts, Loader, LoaderOptions};
use crate::memory::{MemoryDataStore, MemoryMetaStore};
use crate::traits::{BlockFetcher, DataStore, MetaStore, RemoteTransport};
use crate::transaction::{EmptyFetcher, Transaction};

/// Receives the blocks of every committed transaction.
pub type ReplicationSink = mpsc::UnboundedReceiver<Vec<Block>>;

/// Content-addressed, transactional blockstore.
///
/// Reads resolve in order: open transactions, the committed cache, the
/// loader's containers, then an optional remote fetcher. Writes only happen
/// through a [`Transaction`] committed with
/// [`commit_transaction`](Self::commit_transaction).
pub struct Blockstore {
    name: Option<String>,
    loader: Option<Arc<Loader>>,
    committed: RwLock<HashMap<Cid, Block>>,
    active: Mutex<Vec<Weak<Transaction>>>,
    remote: RwLock<Option<Arc<dyn BlockFetcher>>>,
    inflight: Mutex<HashMap<Cid, Arc<OnceCell<Option<Block>>>>>,
    sinks: Mutex<Vec<mpsc::UnboundedSender<Vec<Block>>>>,
    compacting: AtomicBool,
    /// Remotely fetched blocks not yet written to a container. They ride
    /// along with the next commit.
    write_back: Mutex<Vec<Block>>,
}

struct CompactingGuard<'a>(&'a AtomicBool);

impl Drop for CompactingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Blockstore {
    fn with_loader(name: Option<String>, loader: Option<Arc<Loader>>) -> Self {
        Self {
            name,
            loader,
            committed: RwLock::new(HashMap::new()),
            active: Mutex::new(Vec::new()),
            remote: RwLock::new(None),
            inflight: Mutex::new(HashMap::new()),
            sinks: Mutex::new(Vec::new()),
            compacting: AtomicBool::new(false),
            write_back: Mutex::new(Vec::new()),
        }
    }

    /// A store with no containers: commits only reach the in-memory cache.
    pub fn ephemeral() -> Arc<Self> {
        Arc::new(Self::with_loader(None, None))
    }

    /// Open a store from configuration, returning it with the header of its
    /// newest container (empty for a new database).
    pub async fn open(config: &StoreConfig) -> StoreResult<(Arc<Self>, CarHeader)> {
        let Some(name) = &config.name else {
            return Ok((Self::ephemeral(), CarHeader::empty()));
        };
        let (data, meta): (Arc<dyn DataStore>, Arc<dyn MetaStore>) = match &config.path {
            Some(root) => {
                let fs = Arc::new(FsStore::new(root.join(name)));
                (fs.clone(), fs)
            }
            None => (
                Arc::new(MemoryDataStore::new()),
                Arc::new(MemoryMetaStore::new()),
            ),
        };
        Self::open_with(config, data, meta).await
    }

    /// Open a named store over explicit collaborators.
    pub async fn open_with(
        config: &StoreConfig,
        data: Arc<dyn DataStore>,
        meta: Arc<dyn MetaStore>,
    ) -> StoreResult<(Arc<Self>, CarHeader)> {
        let name = config
            .name
            .clone()
            .ok_or_else(|| StoreError::Config("a persistent store needs a name".into()))?;
        let key = config.key.as_deref().map(KeyMaterial::from_hex).transpose()?;
        let loader = Arc::new(Loader::new(
            LoaderOptions {
                name: name.clone(),
                branch: config.branch.clone(),
                public: config.public,
                key,
            },
            data,
            meta,
        ));
        let header = loader.ready().await?;
        info!(db = %name, cars = loader.car_log().len(), "blockstore opened");
        Ok((Arc::new(Self::with_loader(Some(name), Some(loader))), header))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn loader(&self) -> Option<&Arc<Loader>> {
        self.loader.as_ref()
    }

    /// Committed containers, oldest first. Always empty for ephemeral stores.
    pub fn car_log(&self) -> Vec<Cid> {
        self.loader.as_ref().map(|l| l.car_log()).unwrap_or_default()
    }

    /// Fall back to `fetcher` when a block is found nowhere locally.
    pub fn set_remote_fetcher(&self, fetcher: Arc<dyn BlockFetcher>) {
        *self.remote.write().expect("lock poisoned") = Some(fetcher);
    }

    /// Upload committed containers and metas to `transport`, and use it to
    /// fetch containers missing locally.
    pub fn set_transport(&self, transport: Arc<dyn RemoteTransport>) {
        if let Some(loader) = &self.loader {
            loader.set_remote(transport);
        }
    }

    /// Subscribe to the blocks of every future commit. Dropping the receiver
    /// detaches the sink.
    pub fn attach_sink(&self) -> ReplicationSink {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().expect("lock poisoned").push(tx);
        rx
    }

    /// Direct writes are not allowed; use a transaction.
    pub fn put(&self, _block: Block) -> StoreResult<Cid> {
        Err(StoreError::UseTransaction)
    }

    /// Start a transaction whose reads fall through to this store.
    pub fn open_transaction(self: &Arc<Self>) -> Arc<Transaction> {
        let parent: Arc<dyn BlockFetcher> = self.clone();
        let tx = Arc::new(Transaction::new(parent));
        self.active
            .lock()
            .expect("lock poisoned")
            .push(Arc::downgrade(&tx));
        tx
    }

    /// Drop a transaction without committing it.
    pub fn discard_transaction(&self, tx: &Transaction) {
        self.release(tx);
    }

    fn release(&self, tx: &Transaction) {
        self.active
            .lock()
            .expect("lock poisoned")
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), tx));
    }

    /// Run `f` in a fresh transaction and commit it with the meta `f` returns.
    /// On error nothing is committed.
    pub async fn transaction<F, Fut>(self: &Arc<Self>, f: F) -> StoreResult<Option<Cid>>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: Future<Output = StoreResult<CommitMeta>>,
    {
        let tx = self.open_transaction();
        match f(tx.clone()).await {
            Ok(meta) => self.commit_transaction(&tx, meta, CommitOpts::default()).await,
            Err(e) => {
                self.release(&tx);
                Err(e)
            }
        }
    }

    /// Merge `tx` into the committed cache, write it as a container, and
    /// notify replication sinks. Returns the container id (none for
    /// ephemeral stores).
    pub async fn commit_transaction(
        &self,
        tx: &Transaction,
        meta: CommitMeta,
        opts: CommitOpts,
    ) -> StoreResult<Option<Cid>> {
        let blocks = tx.entries();
        {
            let mut committed = self.committed.write().expect("lock poisoned");
            for block in &blocks {
                committed.insert(block.cid(), block.clone());
            }
        }
        self.release(tx);

        let car = match &self.loader {
            Some(loader) => {
                let pending = self.take_write_back(&blocks);
                let mut stored = pending.clone();
                stored.extend(blocks.iter().cloned());
                match loader.commit(stored, meta, opts).await {
                    Ok(car) => Some(car),
                    Err(e) => {
                        self.restore_write_back(pending);
                        return Err(e);
                    }
                }
            }
            None => None,
        };
        self.notify_sinks(blocks);
        Ok(car)
    }

    /// Drain pending write-back blocks that `blocks` does not already carry.
    fn take_write_back(&self, blocks: &[Block]) -> Vec<Block> {
        let pending = std::mem::take(&mut *self.write_back.lock().expect("lock poisoned"));
        if pending.is_empty() {
            return pending;
        }
        let mut seen: HashSet<Cid> = blocks.iter().map(Block::cid).collect();
        pending.into_iter().filter(|b| seen.insert(b.cid())).collect()
    }

    fn restore_write_back(&self, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        let mut pending = self.write_back.lock().expect("lock poisoned");
        let mut merged = blocks;
        merged.append(&mut pending);
        *pending = merged;
    }

    /// Remotely fetched blocks waiting for the next commit.
    pub fn pending_write_back(&self) -> usize {
        self.write_back.lock().expect("lock poisoned").len()
    }

    fn notify_sinks(&self, blocks: Vec<Block>) {
        let mut sinks = self.sinks.lock().expect("lock poisoned");
        let before = sinks.len();
        sinks.retain(|sink| sink.send(blocks.clone()).is_ok());
        if sinks.len() < before {
            debug!(dropped = before - sinks.len(), "replication sink detached");
        }
    }

    /// Fold the whole reachable state into one container.
    ///
    /// `f` walks the state through the given [`LoggingFetcher`]; every block it
    /// reads becomes part of the new container. Only the containers in the log
    /// when compaction starts are folded and deleted. Containers committed or
    /// merged while `f` runs are carried forward. Skipped (returns `None`) for
    /// ephemeral stores, logs shorter than two containers, and while another
    /// compaction runs.
    pub async fn compact<F, Fut, E>(self: &Arc<Self>, f: F) -> Result<Option<Cid>, E>
    where
        F: FnOnce(Arc<LoggingFetcher>) -> Fut,
        Fut: Future<Output = Result<CommitMeta, E>>,
        E: From<StoreError>,
    {
        let Some(loader) = &self.loader else { return Ok(None) };
        let snapshot = loader.car_log();
        if snapshot.len() < 2 {
            debug!("compaction skipped: car log too short");
            return Ok(None);
        }
        if self.compacting.swap(true, Ordering::SeqCst) {
            debug!("compaction skipped: already running");
            return Ok(None);
        }
        let _reset = CompactingGuard(&self.compacting);

        let parent: Arc<dyn BlockFetcher> = self.clone();
        let fetcher = Arc::new(LoggingFetcher::new(parent));
        let meta = f(fetcher.clone()).await?;
        let blocks = fetcher.logged();
        let count = blocks.len();
        let written: HashSet<Cid> = blocks.iter().map(Block::cid).collect();
        let car = loader
            .commit(blocks, meta, CommitOpts::compacting(snapshot))
            .await?;
        self.write_back
            .lock()
            .expect("lock poisoned")
            .retain(|b| !written.contains(&b.cid()));
        info!(car = %car.short_hex(), blocks = count, "compaction finished");
        Ok(Some(car))
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::SeqCst)
    }

    fn fetch_active(&self, cid: &Cid) -> Option<Block> {
        let active: Vec<Arc<Transaction>> = self
            .active
            .lock()
            .expect("lock poisoned")
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        active.iter().find_map(|tx| tx.fetch_local(cid))
    }

    async fn fetch_remote(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        let Some(remote) = self.remote.read().expect("lock poisoned").clone() else {
            return Ok(None);
        };
        let cell = self
            .inflight
            .lock()
            .expect("lock poisoned")
            .entry(*cid)
            .or_default()
            .clone();
        let result = cell
            .get_or_try_init(|| async { remote.fetch(cid).await })
            .await
            .cloned();
        self.inflight.lock().expect("lock poisoned").remove(cid);

        let Some(block) = result? else { return Ok(None) };
        if block.cid() != *cid {
            return Err(TypeError::HashMismatch {
                expected: *cid,
                actual: block.cid(),
            }
            .into());
        }
        let fresh = self
            .committed
            .write()
            .expect("lock poisoned")
            .insert(*cid, block.clone())
            .is_none();
        if fresh && self.loader.is_some() {
            self.write_back.lock().expect("lock poisoned").push(block.clone());
            debug!(cid = %cid.short_hex(), "remote block queued for write-back");
        }
        Ok(Some(block))
    }
}

#[async_trait]
impl BlockFetcher for Blockstore {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        if let Some(block) = self.fetch_active(cid) {
            return Ok(Some(block));
        }
        let cached = self.committed.read().expect("lock poisoned").get(cid).cloned();
        if let Some(block) = cached {
            return Ok(Some(block));
        }
        if let Some(loader) = &self.loader {
            if let Some(block) = loader.get_block(cid).await? {
                return Ok(Some(block));
            }
        }
        self.fetch_remote(cid).await
    }
}

impl std::fmt::Debug for Blockstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockstore")
            .field("name", &self.name)
            .field("cars", &self.car_log().len())
            .finish()
    }
}

/// Fetcher that records every block it serves. Compaction walks the live
/// state through one of these and writes exactly the recorded blocks.
pub struct LoggingFetcher {
    parent: Arc<dyn BlockFetcher>,
    log: Transaction,
}

impl LoggingFetcher {
    pub fn new(parent: Arc<dyn BlockFetcher>) -> Self {
        Self {
            parent,
            log: Transaction::new(Arc::new(EmptyFetcher)),
        }
    }

    /// Everything recorded so far, in first-seen order.
    pub fn logged(&self) -> Vec<Block> {
        self.log.entries()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

#[async_trait]
impl BlockFetcher for LoggingFetcher {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        if let Some(block) = self.log.fetch_local(cid) {
            return Ok(Some(block));
        }
        let block = self.parent.fetch(cid).await?;
        if let Some(block) = &block {
            self.log.put(block.clone());
        }
        Ok(block)
    }
}
