use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use cairn_car::CarFile;
use cairn_types::Cid;

use crate::error::StoreResult;
use crate::meta::DbMeta;
use crate::traits::{DataParams, DataStore, MetaParams, MetaStore, RemoteTransport};

/// In-memory container store, for tests and ephemeral databases.
#[derive(Default)]
pub struct MemoryDataStore {
    cars: RwLock<HashMap<Cid, Bytes>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cars.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, car: &Cid) -> bool {
        self.cars.read().expect("lock poisoned").contains_key(car)
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn load(&self, car: &Cid) -> StoreResult<Option<Bytes>> {
        Ok(self.cars.read().expect("lock poisoned").get(car).cloned())
    }

    async fn save(&self, car: &CarFile) -> StoreResult<()> {
        self.cars
            .write()
            .expect("lock poisoned")
            .entry(car.cid)
            .or_insert_with(|| car.bytes.clone());
        Ok(())
    }

    async fn remove(&self, car: &Cid) -> StoreResult<()> {
        self.cars.write().expect("lock poisoned").remove(car);
        Ok(())
    }
}

/// In-memory meta store keyed by branch.
#[derive(Default)]
pub struct MemoryMetaStore {
    metas: RwLock<HashMap<String, DbMeta>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn load(&self, branch: &str) -> StoreResult<Option<DbMeta>> {
        Ok(self.metas.read().expect("lock poisoned").get(branch).cloned())
    }

    async fn save(&self, meta: &DbMeta, branch: &str) -> StoreResult<()> {
        self.metas
            .write()
            .expect("lock poisoned")
            .insert(branch.to_string(), meta.clone());
        Ok(())
    }
}

/// In-memory stand-in for a remote peer. Several databases can share one
/// instance to exchange metas and containers.
#[derive(Default)]
pub struct MemoryTransport {
    metas: RwLock<HashMap<MetaParams, Vec<Bytes>>>,
    data: RwLock<HashMap<DataParams, Bytes>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of data payloads held.
    pub fn data_len(&self) -> usize {
        self.data.read().expect("lock poisoned").len()
    }
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    async fn meta_upload(&self, bytes: Bytes, params: &MetaParams) -> StoreResult<()> {
        let mut metas = self.metas.write().expect("lock poisoned");
        let list = metas.entry(params.clone()).or_default();
        if !list.contains(&bytes) {
            list.push(bytes);
        }
        Ok(())
    }

    async fn meta_download(&self, params: &MetaParams) -> StoreResult<Option<Vec<Bytes>>> {
        Ok(self.metas.read().expect("lock poisoned").get(params).cloned())
    }

    async fn data_upload(&self, bytes: Bytes, params: &DataParams) -> StoreResult<()> {
        self.data
            .write()
            .expect("lock poisoned")
            .insert(params.clone(), bytes);
        Ok(())
    }

    async fn data_download(&self, params: &DataParams) -> StoreResult<Option<Bytes>> {
        Ok(self.data.read().expect("lock poisoned").get(params).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_car::encode_car_file;
    use cairn_types::Block;

    fn car() -> CarFile {
        let block = Block::new(&b"payload"[..]);
        encode_car_file(vec![block.cid()], [block]).unwrap()
    }

    #[tokio::test]
    async fn data_store_save_load_remove() {
        let store = MemoryDataStore::new();
        let car = car();
        assert_eq!(store.load(&car.cid).await.unwrap(), None);

        store.save(&car).await.unwrap();
        store.save(&car).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&car.cid).await.unwrap(), Some(car.bytes.clone()));

        store.remove(&car.cid).await.unwrap();
        store.remove(&car.cid).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn meta_store_is_per_branch() {
        let store = MemoryMetaStore::new();
        let meta = DbMeta {
            car: Cid::from_bytes(b"car"),
            key: None,
        };
        store.save(&meta, "main").await.unwrap();
        assert_eq!(store.load("main").await.unwrap(), Some(meta));
        assert_eq!(store.load("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn transport_keeps_distinct_metas() {
        let transport = MemoryTransport::new();
        let params = MetaParams {
            name: "db".into(),
            branch: "main".into(),
        };
        transport.meta_upload(Bytes::from_static(b"a"), &params).await.unwrap();
        transport.meta_upload(Bytes::from_static(b"a"), &params).await.unwrap();
        transport.meta_upload(Bytes::from_static(b"b"), &params).await.unwrap();
        assert_eq!(transport.meta_download(&params).await.unwrap().unwrap().len(), 2);

        let data = DataParams {
            name: "db".into(),
            car: Cid::from_bytes(b"car"),
        };
        assert_eq!(transport.data_download(&data).await.unwrap(), None);
        transport.data_upload(Bytes::from_static(b"x"), &data).await.unwrap();
        assert_eq!(transport.data_len(), 1);
    }
}
