//! Storage backends
//!
//! Per-torrent storage behind the [`StorageBackend`] contract: the
//! collapsed single-file backend, the in-memory variant, and the factory
//! the engine uses to construct either.

pub mod backend;
pub mod flatfile;
pub mod memory;
mod paths;

pub use backend::{
    new_storage, DeleteFlags, FinishedProbe, StorageBackend, StorageKind, StorageOptions,
    StorageParams,
};
pub use flatfile::FlatFileStorage;
pub use memory::MemoryStorage;
