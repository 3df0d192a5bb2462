use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::cid::Cid;
use crate::error::TypeError;

/// An immutable, content-addressed byte buffer.
///
/// The id is always the digest of the bytes. Blocks are never mutated; a
/// changed value is a new block with a new id. Cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    bytes: Bytes,
}

impl Block {
    /// Build a block, hashing the bytes to obtain its id.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            cid: Cid::from_bytes(&bytes),
            bytes,
        }
    }

    /// Rebuild a block read from untrusted storage, checking that the bytes
    /// hash to the claimed id.
    pub fn from_parts(cid: Cid, bytes: impl Into<Bytes>) -> Result<Self, TypeError> {
        let block = Self::new(bytes);
        if block.cid != cid {
            return Err(TypeError::HashMismatch {
                expected: cid,
                actual: block.cid,
            });
        }
        Ok(block)
    }

    /// Encode a structured value as a JSON block.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, TypeError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self::new(bytes))
    }

    /// Decode the block's bytes as a JSON value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, TypeError> {
        serde_json::from_slice(&self.bytes).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Re-hash the bytes and compare against the id.
    pub fn verify(&self) -> bool {
        Cid::from_bytes(&self.bytes) == self.cid
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("cid", &self.cid)
            .field("len", &self.bytes.len())
            .finish()
    }
}
