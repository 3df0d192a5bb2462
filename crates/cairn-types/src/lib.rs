//! Foundation types for cairn.
//!
//! Every other cairn crate depends on `cairn-types`. The two types here are
//! the unit of storage for the whole engine:
//!
//! - [`Cid`]: content identifier (BLAKE3 digest of a block's bytes)
//! - [`Block`]: an immutable, content-addressed byte buffer

pub mod block;
pub mod cid;
pub mod error;

pub use block::Block;
pub use cid::Cid;
pub use error::TypeError;
