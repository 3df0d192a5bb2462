use std::collections::HashSet;

use bytes::Bytes;
use cairn_types::{Block, Cid};
use tracing::debug;

use crate::error::{CarError, CarResult};
use crate::varint::encode_varint;

/// An encoded container: its id and its bytes.
///
/// The id is the digest of the whole file, so a container is itself
/// content-addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarFile {
    pub cid: Cid,
    pub bytes: Bytes,
}

/// Builds a container from a root list and a batch of blocks.
///
/// Layout: `varint(n) || bincode(roots)`, then one section per block,
/// `varint(32 + len) || cid(32) || bytes(len)`.
pub struct CarWriter {
    roots: Vec<Cid>,
    blocks: Vec<Block>,
    seen: HashSet<Cid>,
}

impl CarWriter {
    pub fn new(roots: Vec<Cid>) -> Self {
        Self {
            roots,
            blocks: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Queue a block. Adding the same block twice stores it once.
    pub fn add_block(&mut self, block: Block) {
        if self.seen.insert(block.cid()) {
            self.blocks.push(block);
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Encode the container. Every root must have been added as a block.
    pub fn finish(self) -> CarResult<CarFile> {
        if self.roots.is_empty() {
            return Err(CarError::NoRoots);
        }
        if let Some(missing) = self.roots.iter().find(|r| !self.seen.contains(r)) {
            return Err(CarError::MissingRoot(*missing));
        }

        let prelude =
            bincode::serialize(&self.roots).map_err(|e| CarError::Serialization(e.to_string()))?;
        let body: usize = self.blocks.iter().map(|b| b.len() + 32 + 10).sum();
        let mut out = Vec::with_capacity(prelude.len() + 10 + body);
        encode_varint(&mut out, prelude.len() as u64);
        out.extend_from_slice(&prelude);

        for block in &self.blocks {
            encode_varint(&mut out, (32 + block.len()) as u64);
            out.extend_from_slice(block.cid().as_bytes());
            out.extend_from_slice(block.bytes());
        }

        let cid = Cid::from_bytes(&out);
        debug!(car = %cid.short_hex(), blocks = self.blocks.len(), size = out.len(), "encoded container");
        Ok(CarFile {
            cid,
            bytes: Bytes::from(out),
        })
    }
}

/// Encode `blocks` into a container rooted at `roots`.
pub fn encode_car_file(roots: Vec<Cid>, blocks: impl IntoIterator<Item = Block>) -> CarResult<CarFile> {
    let mut writer = CarWriter::new(roots);
    for block in blocks {
        writer.add_block(block);
    }
    writer.finish()
}
