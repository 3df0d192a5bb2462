use cairn_types::Cid;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Branch used when none is given.
pub const DEFAULT_BRANCH: &str = "main";

/// The small persisted pointer to a database's newest container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbMeta {
    /// Newest committed container; its header lists the rest of the log.
    pub car: Cid,
    /// Hex key material, absent for public databases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl DbMeta {
    pub fn to_json(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> StoreResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}
