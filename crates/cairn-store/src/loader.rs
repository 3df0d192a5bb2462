use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use cairn_car::{encode_car_file, CarError, CarFile, CarHeader, CarReader, CommitMeta};
use cairn_crypto::{decrypt_blocks, encrypt_blocks, KeyMaterial};
use cairn_types::{Block, Cid};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::meta::DbMeta;
use crate::traits::{DataParams, DataStore, MetaParams, MetaStore, RemoteTransport};

/// Options for a single commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitOpts {
    /// Containers folded into this commit. They leave the car log and are
    /// deleted; log entries not listed here are carried forward. Empty for a
    /// normal commit.
    pub compact: Vec<Cid>,
}

impl CommitOpts {
    /// A compaction that folds exactly `cars`.
    pub fn compacting(cars: Vec<Cid>) -> Self {
        Self { compact: cars }
    }

    pub fn is_compaction(&self) -> bool {
        !self.compact.is_empty()
    }
}

/// Identity and encryption settings for a [`Loader`].
#[derive(Clone, Debug)]
pub struct LoaderOptions {
    pub name: String,
    pub branch: String,
    pub public: bool,
    pub key: Option<KeyMaterial>,
}

/// A container that has been read, decrypted, and indexed.
#[derive(Debug)]
pub struct LoadedCar {
    cid: Cid,
    header: CarHeader,
    blocks: HashMap<Cid, Block>,
}

impl LoadedCar {
    fn parse(cid: Cid, bytes: Bytes, key: Option<&KeyMaterial>) -> StoreResult<Self> {
        let reader = CarReader::from_bytes(bytes)?;
        let root = reader.root();
        let blocks = match key {
            Some(key) => decrypt_blocks(root, |c| reader.get(c).cloned(), key)?,
            None => {
                // Header last, matching the decrypted order.
                let mut blocks: Vec<Block> = reader
                    .blocks()
                    .iter()
                    .filter(|b| b.cid() != root)
                    .cloned()
                    .collect();
                blocks.extend(reader.get(&root).cloned());
                blocks
            }
        };
        let header_block = blocks
            .last()
            .ok_or(StoreError::Encode(CarError::MissingRoot(root)))?;
        let header = CarHeader::from_block(header_block)?;
        Ok(Self::from_blocks(cid, header, blocks))
    }

    fn from_blocks(cid: Cid, header: CarHeader, blocks: Vec<Block>) -> Self {
        Self {
            cid,
            header,
            blocks: blocks.into_iter().map(|b| (b.cid(), b)).collect(),
        }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn get(&self, cid: &Cid) -> Option<&Block> {
        self.blocks.get(cid)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

struct LoaderState {
    /// Committed containers, oldest first.
    car_log: Vec<Cid>,
    key: Option<KeyMaterial>,
    /// Containers folded away by some compaction; never re-admitted to the log.
    seen_compacted: HashSet<Cid>,
    last_meta: CommitMeta,
}

type ReaderCell = Arc<OnceCell<Arc<LoadedCar>>>;

/// Owns the car log: commits transactions as containers, loads containers on
/// demand, and compacts the log into a single container.
///
/// Commits (including compactions and remote log merges) are serialized by an
/// internal lock, so the log is never observed half-updated.
pub struct Loader {
    opts: LoaderOptions,
    data: Arc<dyn DataStore>,
    meta: Arc<dyn MetaStore>,
    remote: RwLock<Option<Arc<dyn RemoteTransport>>>,
    state: RwLock<LoaderState>,
    readers: Mutex<HashMap<Cid, ReaderCell>>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl Loader {
    pub fn new(opts: LoaderOptions, data: Arc<dyn DataStore>, meta: Arc<dyn MetaStore>) -> Self {
        let key = if opts.public { None } else { opts.key.clone() };
        Self {
            opts,
            data,
            meta,
            remote: RwLock::new(None),
            state: RwLock::new(LoaderState {
                car_log: Vec::new(),
                key,
                seen_compacted: HashSet::new(),
                last_meta: CommitMeta::data([]),
            }),
            readers: Mutex::new(HashMap::new()),
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Read the persisted meta for this branch and ingest it.
    pub async fn ready(&self) -> StoreResult<CarHeader> {
        let meta = self.meta.load(&self.opts.branch).await?;
        self.ingest_head_from_meta(meta).await
    }

    pub fn name(&self) -> &str {
        &self.opts.name
    }

    pub fn branch(&self) -> &str {
        &self.opts.branch
    }

    pub fn set_remote(&self, remote: Arc<dyn RemoteTransport>) {
        *self.remote.write().expect("lock poisoned") = Some(remote);
    }

    fn remote(&self) -> Option<Arc<dyn RemoteTransport>> {
        self.remote.read().expect("lock poisoned").clone()
    }

    /// Committed containers, oldest first.
    pub fn car_log(&self) -> Vec<Cid> {
        self.state.read().expect("lock poisoned").car_log.clone()
    }

    fn key(&self) -> Option<KeyMaterial> {
        self.state.read().expect("lock poisoned").key.clone()
    }

    /// Fingerprint of the key in use, if the database is encrypted.
    pub fn key_id(&self) -> Option<Cid> {
        self.key().map(|k| k.fingerprint())
    }

    /// Commit meta of the most recent commit (or ingested header).
    pub fn last_meta(&self) -> CommitMeta {
        self.state.read().expect("lock poisoned").last_meta.clone()
    }

    /// The meta record describing the current log, if anything was committed.
    pub fn current_meta(&self) -> Option<DbMeta> {
        let state = self.state.read().expect("lock poisoned");
        state.car_log.last().map(|car| DbMeta {
            car: *car,
            key: state.key.as_ref().map(KeyMaterial::to_hex),
        })
    }

    fn set_key(&self, hex: Option<&str>) -> StoreResult<()> {
        let Some(hex) = hex else { return Ok(()) };
        let key = KeyMaterial::from_hex(hex)?;
        let mut state = self.state.write().expect("lock poisoned");
        match &state.key {
            Some(existing) if *existing != key => Err(StoreError::KeyMismatch),
            Some(_) => Ok(()),
            None => {
                state.key = Some(key);
                Ok(())
            }
        }
    }

    /// Adopt a persisted meta record at startup.
    ///
    /// With no record, a fresh key is generated (unless the database is
    /// public) and an empty header is returned. Otherwise the referenced
    /// container and everything it depends on are loaded.
    pub async fn ingest_head_from_meta(&self, meta: Option<DbMeta>) -> StoreResult<CarHeader> {
        let Some(meta) = meta else {
            let mut state = self.state.write().expect("lock poisoned");
            if state.key.is_none() && !self.opts.public {
                let key = KeyMaterial::generate();
                info!(db = %self.opts.name, key_id = %key.fingerprint().short_hex(), "generated database key");
                state.key = Some(key);
            }
            return Ok(CarHeader::empty());
        };

        self.set_key(meta.key.as_deref())?;
        let header = self.load_with_deps(&meta.car).await?;

        let mut state = self.state.write().expect("lock poisoned");
        state.seen_compacted.extend(header.compact().iter().copied());
        let mut log: Vec<Cid> = Vec::with_capacity(header.cars().len() + 1);
        for car in header.cars().iter().chain([&meta.car]) {
            if !log.contains(car) && !state.seen_compacted.contains(car) {
                log.push(*car);
            }
        }
        state.car_log = log;
        state.last_meta = header.meta();
        info!(db = %self.opts.name, car = %meta.car.short_hex(), cars = state.car_log.len(), "ingested head from meta");
        Ok(header)
    }

    /// Encode `blocks` plus a commit header into a new container and record it.
    ///
    /// A normal commit lists the existing log in `cars` and appends to it. A
    /// compaction lists the folded containers in `compact` and the rest of the
    /// log in `cars`, so containers that joined the log after the compaction
    /// started survive it. Folded files are deleted only after the new meta
    /// record has been saved.
    pub async fn commit(&self, blocks: Vec<Block>, meta: CommitMeta, opts: CommitOpts) -> StoreResult<Cid> {
        let _guard = self.commit_lock.lock().await;
        let (log, key) = {
            let state = self.state.read().expect("lock poisoned");
            (state.car_log.clone(), state.key.clone())
        };

        let (cars, folded): (Vec<Cid>, Vec<Cid>) = log.iter().partition(|car| !opts.compact.contains(*car));
        let header = CarHeader::new(meta.clone(), cars.clone(), folded.clone());
        let header_block = header.to_block()?;
        let mut plain = blocks;
        plain.push(header_block.clone());

        let car = match &key {
            Some(key) => {
                let sealed = encrypt_blocks(header_block.cid(), &plain, key)?;
                let root = sealed
                    .last()
                    .map(Block::cid)
                    .ok_or(StoreError::Encode(CarError::NoRoots))?;
                encode_car_file(vec![root], sealed)?
            }
            None => encode_car_file(vec![header_block.cid()], plain.iter().cloned())?,
        };
        self.data.save(&car).await?;
        self.readers.lock().expect("lock poisoned").insert(
            car.cid,
            Arc::new(OnceCell::new_with(Some(Arc::new(LoadedCar::from_blocks(
                car.cid,
                header,
                plain,
            ))))),
        );

        let db_meta = DbMeta {
            car: car.cid,
            key: key.as_ref().map(KeyMaterial::to_hex),
        };
        self.meta.save(&db_meta, &self.opts.branch).await?;

        {
            let mut state = self.state.write().expect("lock poisoned");
            state.last_meta = meta;
            state.seen_compacted.extend(folded.iter().copied());
            state.car_log.retain(|c| !folded.contains(c));
            if !state.car_log.contains(&car.cid) {
                state.car_log.push(car.cid);
            }
        }

        if opts.is_compaction() {
            for old in &folded {
                self.readers.lock().expect("lock poisoned").remove(old);
                if let Err(e) = self.data.remove(old).await {
                    warn!(car = %old.short_hex(), error = %e, "failed to remove compacted container");
                }
            }
            info!(
                db = %self.opts.name,
                car = %car.cid.short_hex(),
                folded = folded.len(),
                carried = cars.len(),
                "compacted car log"
            );
        } else {
            debug!(db = %self.opts.name, car = %car.cid.short_hex(), cars = log.len() + 1, "committed container");
        }

        self.upload(&car, &db_meta).await;
        Ok(car.cid)
    }

    async fn upload(&self, car: &CarFile, meta: &DbMeta) {
        let Some(remote) = self.remote() else { return };
        let data = DataParams {
            name: self.opts.name.clone(),
            car: car.cid,
        };
        if let Err(e) = remote.data_upload(car.bytes.clone(), &data).await {
            warn!(car = %car.cid.short_hex(), error = %e, "container upload failed");
            return;
        }
        let result = match meta.to_json() {
            Ok(bytes) => remote.meta_upload(Bytes::from(bytes), &self.meta_params()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(car = %car.cid.short_hex(), error = %e, "meta upload failed");
        }
    }

    fn meta_params(&self) -> MetaParams {
        MetaParams {
            name: self.opts.name.clone(),
            branch: self.opts.branch.clone(),
        }
    }

    /// Open a container, reading and decrypting it on first use.
    ///
    /// Concurrent loads of the same id share one read. A failed read is not
    /// cached.
    pub async fn load(&self, car: &Cid) -> StoreResult<Arc<LoadedCar>> {
        let cell = self
            .readers
            .lock()
            .expect("lock poisoned")
            .entry(*car)
            .or_default()
            .clone();
        let result = cell.get_or_try_init(|| self.read_car(*car)).await.cloned();
        if result.is_err() {
            self.readers.lock().expect("lock poisoned").remove(car);
        }
        result
    }

    async fn read_car(&self, car: Cid) -> StoreResult<Arc<LoadedCar>> {
        let bytes = match self.data.load(&car).await? {
            Some(bytes) => bytes,
            None => self
                .download_car(&car)
                .await?
                .ok_or(StoreError::MissingContainer(car))?,
        };
        let loaded = LoadedCar::parse(car, bytes, self.key().as_ref())?;
        debug!(car = %car.short_hex(), blocks = loaded.len(), "container loaded");
        Ok(Arc::new(loaded))
    }

    async fn download_car(&self, car: &Cid) -> StoreResult<Option<Bytes>> {
        if self.state.read().expect("lock poisoned").seen_compacted.contains(car) {
            return Ok(None);
        }
        let Some(remote) = self.remote() else { return Ok(None) };
        let params = DataParams {
            name: self.opts.name.clone(),
            car: *car,
        };
        let Some(bytes) = remote.data_download(&params).await? else { return Ok(None) };
        let actual = Cid::from_bytes(&bytes);
        if actual != *car {
            return Err(CarError::HashMismatch { expected: *car, actual }.into());
        }
        self.data
            .save(&CarFile {
                cid: *car,
                bytes: bytes.clone(),
            })
            .await?;
        debug!(car = %car.short_hex(), "container fetched from remote");
        Ok(Some(bytes))
    }

    /// Load a container and, transitively, every container its header lists
    /// in `cars`. Returns the root container's header.
    pub async fn load_with_deps(&self, car: &Cid) -> StoreResult<CarHeader> {
        let root = self.load(car).await?;
        let mut visited = HashSet::from([*car]);
        let mut queue: VecDeque<Cid> = root.header().cars().iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            let loaded = self.load(&next).await?;
            queue.extend(
                loaded
                    .header()
                    .cars()
                    .iter()
                    .filter(|c| !visited.contains(c))
                    .copied(),
            );
        }
        Ok(root.header().clone())
    }

    /// Find a block in the loaded containers, loading the rest of the car log
    /// (newest first) on a miss.
    pub async fn get_block(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        let cached: Vec<Arc<LoadedCar>> = self
            .readers
            .lock()
            .expect("lock poisoned")
            .values()
            .filter_map(|cell| cell.get().cloned())
            .collect();
        if let Some(block) = cached.iter().find_map(|car| car.get(cid)) {
            return Ok(Some(block.clone()));
        }
        for car in self.car_log().iter().rev() {
            if let Some(block) = self.load(car).await?.get(cid) {
                return Ok(Some(block.clone()));
            }
        }
        Ok(None)
    }

    /// Meta records published by remote peers for this database.
    pub async fn fetch_remote_metas(&self) -> StoreResult<Vec<DbMeta>> {
        let Some(remote) = self.remote() else { return Ok(Vec::new()) };
        let payloads = remote
            .meta_download(&self.meta_params())
            .await?
            .unwrap_or_default();
        payloads.iter().map(|bytes| DbMeta::from_json(bytes)).collect()
    }

    /// Fold a remote meta record into the local car log.
    ///
    /// Returns the remote header, or `None` when the record is already known
    /// (or was compacted away).
    pub async fn merge_db_meta(&self, meta: &DbMeta) -> StoreResult<Option<CarHeader>> {
        {
            let state = self.state.read().expect("lock poisoned");
            if state.car_log.contains(&meta.car) || state.seen_compacted.contains(&meta.car) {
                return Ok(None);
            }
        }
        self.set_key(meta.key.as_deref())?;
        let header = self.load_with_deps(&meta.car).await?;

        let _guard = self.commit_lock.lock().await;
        let mut state = self.state.write().expect("lock poisoned");
        state.seen_compacted.extend(header.compact().iter().copied());
        let mut merged = state.car_log.clone();
        for car in header.cars().iter().chain([&meta.car]) {
            if !merged.contains(car) {
                merged.push(*car);
            }
        }
        merged.retain(|car| !state.seen_compacted.contains(car));
        state.car_log = merged;
        info!(db = %self.opts.name, car = %meta.car.short_hex(), cars = state.car_log.len(), "merged remote meta");
        Ok(Some(header))
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.opts.name)
            .field("branch", &self.opts.branch)
            .field("cars", &self.car_log().len())
            .finish()
    }
}
