use async_trait::async_trait;
use bytes::Bytes;
use cairn_car::CarFile;
use cairn_types::{Block, Cid};

use crate::error::{StoreError, StoreResult};
use crate::meta::DbMeta;

/// Anything that can resolve a block by id.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    /// Returns `Ok(None)` when no tier knows the block.
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>>;

    /// Like [`fetch`](Self::fetch), but a miss is `MissingBlock`.
    async fn get(&self, cid: &Cid) -> StoreResult<Block> {
        self.fetch(cid).await?.ok_or(StoreError::MissingBlock(*cid))
    }
}

/// Backing medium for container files.
///
/// Containers are immutable, so `save` of an existing id is a no-op.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn load(&self, car: &Cid) -> StoreResult<Option<Bytes>>;
    async fn save(&self, car: &CarFile) -> StoreResult<()>;
    /// Removing an absent container is not an error.
    async fn remove(&self, car: &Cid) -> StoreResult<()>;
}

/// Persists the per-branch [`DbMeta`] pointer.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn load(&self, branch: &str) -> StoreResult<Option<DbMeta>>;
    async fn save(&self, meta: &DbMeta, branch: &str) -> StoreResult<()>;
}

/// Addressing for meta uploads and downloads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetaParams {
    pub name: String,
    pub branch: String,
}

/// Addressing for container uploads and downloads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataParams {
    pub name: String,
    pub car: Cid,
}

/// Transport to a remote peer or store. Timeouts and retries are the
/// implementation's concern.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn meta_upload(&self, bytes: Bytes, params: &MetaParams) -> StoreResult<()>;
    async fn meta_download(&self, params: &MetaParams) -> StoreResult<Option<Vec<Bytes>>>;
    async fn data_upload(&self, bytes: Bytes, params: &DataParams) -> StoreResult<()>;
    async fn data_download(&self, params: &DataParams) -> StoreResult<Option<Bytes>>;
}
