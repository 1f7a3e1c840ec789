//! Generation store.
//!
//! This crate provides:
//! - Per-generation serialized, validated mutations
//! - Status recomputation through the aggregator on every write
//! - The fail-fast cascade and the single assembly claim
//! - In-memory and directory-of-JSON persistence

pub mod backend;
pub mod config;
pub mod error;
pub mod store;

pub use backend::{DocumentBackend, FileBackend, MemoryBackend};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use store::{GenerationStore, StoreUpdate};
