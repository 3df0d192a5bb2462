//! Transactional, content-addressed blockstore for cairn.
//!
//! Blocks are immutable and identified by their digest. Every write goes
//! through a [`Transaction`] overlay; committing one writes an immutable
//! container file and appends it to the database's car log. The [`Loader`]
//! owns that log: it commits, loads containers on demand (decrypting them
//! when the database has key material), and compacts the log into a single
//! container.
//!
//! # Read path
//!
//! 1. blocks in open transactions
//! 2. the committed in-memory cache
//! 3. containers in the car log, loaded lazily
//! 4. an optional remote fetcher; hits are committed locally
//!
//! A miss everywhere is [`StoreError::MissingBlock`].
//!
//! # Collaborators
//!
//! Storage is pluggable through [`DataStore`] (container bytes), [`MetaStore`]
//! (the per-branch pointer to the newest container) and [`RemoteTransport`].
//! [`FsStore`] and the in-memory types in [`memory`] are provided.

pub mod blockstore;
pub mod config;
pub mod error;
pub mod fs;
pub mod loader;
pub mod memory;
pub mod meta;
pub mod traits;
pub mod transaction;

pub use blockstore::{Blockstore, LoggingFetcher, ReplicationSink};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use fs::FsStore;
pub use loader::{CommitOpts, LoadedCar, Loader, LoaderOptions};
pub use memory::{MemoryDataStore, MemoryMetaStore, MemoryTransport};
pub use meta::{DbMeta, DEFAULT_BRANCH};
pub use traits::{BlockFetcher, DataParams, DataStore, MetaParams, MetaStore, RemoteTransport};
pub use transaction::{EmptyFetcher, Transaction};
