use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use cairn_car::CarFile;
use cairn_types::Cid;
use tokio::fs;
use tracing::debug;

use crate::error::StoreResult;
use crate::meta::DbMeta;
use crate::traits::{DataStore, MetaStore};

/// Filesystem-backed container and meta store for one database.
///
/// ```text
/// <root>/
///   meta/<branch>.json
///   <car-id>.car
/// ```
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn car_path(&self, car: &Cid) -> PathBuf {
        self.root.join(format!("{car}.car"))
    }

    fn meta_path(&self, branch: &str) -> PathBuf {
        self.root.join("meta").join(format!("{branch}.json"))
    }
}

async fn read_optional(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write-to-temp then rename, so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl DataStore for FsStore {
    async fn load(&self, car: &Cid) -> StoreResult<Option<Bytes>> {
        Ok(read_optional(&self.car_path(car)).await?.map(Bytes::from))
    }

    async fn save(&self, car: &CarFile) -> StoreResult<()> {
        let path = self.car_path(&car.cid);
        if fs::try_exists(&path).await? {
            return Ok(());
        }
        write_atomic(&path, &car.bytes).await?;
        debug!(car = %car.cid.short_hex(), path = %path.display(), "container written");
        Ok(())
    }

    async fn remove(&self, car: &Cid) -> StoreResult<()> {
        match fs::remove_file(self.car_path(car)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MetaStore for FsStore {
    async fn load(&self, branch: &str) -> StoreResult<Option<DbMeta>> {
        match read_optional(&self.meta_path(branch)).await? {
            Some(bytes) => Ok(Some(DbMeta::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, meta: &DbMeta, branch: &str) -> StoreResult<()> {
        write_atomic(&self.meta_path(branch), &meta.to_json()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_car::encode_car_file;
    use cairn_types::Block;

    #[tokio::test]
    async fn layout_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path().join("db"));

        let block = Block::new(&b"payload"[..]);
        let car = encode_car_file(vec![block.cid()], [block]).unwrap();
        DataStore::save(&store, &car).await.unwrap();
        assert!(dir.path().join("db").join(format!("{}.car", car.cid)).exists());

        let meta = DbMeta {
            car: car.cid,
            key: Some("00".repeat(32)),
        };
        MetaStore::save(&store, &meta, "main").await.unwrap();
        assert!(dir.path().join("db/meta/main.json").exists());

        assert_eq!(MetaStore::load(&store, "main").await.unwrap(), Some(meta));
        assert_eq!(DataStore::load(&store, &car.cid).await.unwrap(), Some(car.bytes));
    }

    #[tokio::test]
    async fn missing_files_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        assert_eq!(MetaStore::load(&store, "main").await.unwrap(), None);
        assert_eq!(DataStore::load(&store, &Cid::from_bytes(b"x")).await.unwrap(), None);
        DataStore::remove(&store, &Cid::from_bytes(b"x")).await.unwrap();
    }

    #[tokio::test]
    async fn remove_deletes_container() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        let block = Block::new(&b"payload"[..]);
        let car = encode_car_file(vec![block.cid()], [block]).unwrap();
        DataStore::save(&store, &car).await.unwrap();
        DataStore::remove(&store, &car.cid).await.unwrap();
        assert_eq!(DataStore::load(&store, &car.cid).await.unwrap(), None);
    }
}
