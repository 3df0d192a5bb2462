use std::collections::HashMap;

use bytes::Bytes;
use cairn_types::{Block, Cid};

use crate::error::{CarError, CarResult};
use crate::varint::decode_varint;

/// A parsed container. Every block digest is verified on open.
#[derive(Debug, Clone)]
pub struct CarReader {
    roots: Vec<Cid>,
    blocks: Vec<Block>,
    index: HashMap<Cid, usize>,
}

impl CarReader {
    pub fn from_bytes(data: impl Into<Bytes>) -> CarResult<Self> {
        let data: Bytes = data.into();

        let (prelude_len, consumed) = decode_varint(&data, 0)?;
        let mut pos = consumed;
        let end = pos
            .checked_add(prelude_len as usize)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| CarError::Corrupt {
                offset: pos,
                reason: "root list extends beyond container".into(),
            })?;
        let roots: Vec<Cid> = bincode::deserialize(&data[pos..end])
            .map_err(|e| CarError::Serialization(e.to_string()))?;
        if roots.is_empty() {
            return Err(CarError::NoRoots);
        }
        pos = end;

        let mut blocks = Vec::new();
        let mut index = HashMap::new();
        while pos < data.len() {
            let offset = pos;
            let (len, consumed) = decode_varint(&data, pos)?;
            pos += consumed;
            let len = len as usize;
            if len < 32 || len > data.len() - pos {
                return Err(CarError::Corrupt {
                    offset,
                    reason: format!("section length {len} out of range"),
                });
            }
            let cid = Cid::try_from(&data[pos..pos + 32])?;
            let block = Block::from_parts(cid, data.slice(pos + 32..pos + len))?;
            pos += len;
            index.insert(cid, blocks.len());
            blocks.push(block);
        }

        for root in &roots {
            if !index.contains_key(root) {
                return Err(CarError::MissingRoot(*root));
            }
        }

        Ok(Self {
            roots,
            blocks,
            index,
        })
    }

    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    /// The first root: the commit header (or vault index) block.
    pub fn root(&self) -> Cid {
        self.roots[0]
    }

    pub fn get(&self, cid: &Cid) -> Option<&Block> {
        self.index.get(cid).map(|&i| &self.blocks[i])
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.index.contains_key(cid)
    }

    /// Blocks in file order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
