use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::meta::DEFAULT_BRANCH;

/// Options for opening a database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database name. `None` opens an ephemeral store with no containers.
    pub name: Option<String>,
    /// Root directory for on-disk databases. `None` keeps containers in memory.
    pub path: Option<PathBuf>,
    /// Public databases write containers in clear.
    pub public: bool,
    pub branch: String,
    /// Compact once the car log grows past this many entries. 0 disables.
    pub auto_compact: usize,
    /// Explicit hex key material instead of a generated one.
    pub key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: None,
            path: None,
            public: false,
            branch: DEFAULT_BRANCH.to_string(),
            auto_compact: 100,
            key: None,
        }
    }
}

impl StoreConfig {
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn with_auto_compact(mut self, threshold: usize) -> Self {
        self.auto_compact = threshold;
        self
    }

    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }
}
