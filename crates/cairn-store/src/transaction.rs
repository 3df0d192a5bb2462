use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use cairn_types::{Block, Cid};

use crate::error::StoreResult;
use crate::traits::BlockFetcher;

#[derive(Default)]
struct Overlay {
    order: Vec<Cid>,
    blocks: HashMap<Cid, Block>,
}

/// Write-once overlay for one logical operation.
///
/// Blocks put here are visible to reads through the transaction (and, while
/// it is open, through the owning blockstore). Reads fall through to the
/// parent. Insertion order is kept so the last block put can serve as a
/// container root.
pub struct Transaction {
    parent: Arc<dyn BlockFetcher>,
    overlay: RwLock<Overlay>,
}

impl Transaction {
    pub fn new(parent: Arc<dyn BlockFetcher>) -> Self {
        Self {
            parent,
            overlay: RwLock::new(Overlay::default()),
        }
    }

    /// Add a block. Putting the same block twice keeps the first position.
    pub fn put(&self, block: Block) -> Cid {
        let cid = block.cid();
        let mut overlay = self.overlay.write().expect("lock poisoned");
        if !overlay.blocks.contains_key(&cid) {
            overlay.order.push(cid);
            overlay.blocks.insert(cid, block);
        }
        cid
    }

    /// Look only in this overlay.
    pub fn fetch_local(&self, cid: &Cid) -> Option<Block> {
        self.overlay
            .read()
            .expect("lock poisoned")
            .blocks
            .get(cid)
            .cloned()
    }

    /// Blocks in insertion order.
    pub fn entries(&self) -> Vec<Block> {
        let overlay = self.overlay.read().expect("lock poisoned");
        overlay
            .order
            .iter()
            .filter_map(|cid| overlay.blocks.get(cid).cloned())
            .collect()
    }

    /// Id of the most recently added block.
    pub fn last(&self) -> Option<Cid> {
        self.overlay.read().expect("lock poisoned").order.last().copied()
    }

    pub fn len(&self) -> usize {
        self.overlay.read().expect("lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlockFetcher for Transaction {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        if let Some(block) = self.fetch_local(cid) {
            return Ok(Some(block));
        }
        self.parent.fetch(cid).await
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("blocks", &self.len())
            .finish()
    }
}

/// Fetcher with no blocks at all; the bottom of a transaction stack.
pub struct EmptyFetcher;

#[async_trait]
impl BlockFetcher for EmptyFetcher {
    async fn fetch(&self, _cid: &Cid) -> StoreResult<Option<Block>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn tx() -> Transaction {
        Transaction::new(Arc::new(EmptyFetcher))
    }

    #[tokio::test]
    async fn put_then_get() {
        let tx = tx();
        let block = Block::new(&b"a"[..]);
        let cid = tx.put(block.clone());
        assert_eq!(tx.get(&cid).await.unwrap(), block);
    }

    #[tokio::test]
    async fn miss_falls_through_to_parent() {
        let parent = Arc::new(tx());
        let block = Block::new(&b"in parent"[..]);
        parent.put(block.clone());
        let child = Transaction::new(parent);
        assert_eq!(child.get(&block.cid()).await.unwrap(), block);
        assert!(child.fetch_local(&block.cid()).is_none());
    }

    #[tokio::test]
    async fn miss_everywhere_is_missing_block() {
        let err = tx().get(&Cid::from_bytes(b"nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingBlock(_)));
    }

    #[test]
    fn keeps_insertion_order_and_dedupes() {
        let tx = tx();
        let a = Block::new(&b"a"[..]);
        let b = Block::new(&b"b"[..]);
        tx.put(a.clone());
        tx.put(b.clone());
        tx.put(a.clone());
        assert_eq!(tx.entries(), vec![a, b.clone()]);
        assert_eq!(tx.last(), Some(b.cid()));
        assert_eq!(tx.len(), 2);
    }
}
