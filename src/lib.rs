//! flatfile-storage
//!
//! A collapsed single-file storage backend for BitTorrent engines.
//!
//! Whatever a torrent's declared file layout, this backend maps every
//! piece onto one backing file at `<save_path>/<name>`, managing the
//! pooled file handle's lifetime and reporting results through a
//! structured error channel. The engine integrates it through
//! [`storage::new_storage`], which returns a boxed
//! [`storage::StorageBackend`].
//!
//! ```no_run
//! use flatfile_storage::pool::FileHandlePool;
//! use flatfile_storage::storage::{new_storage, StorageOptions, StorageParams};
//! use flatfile_storage::torrent::{FileLayout, TorrentFile};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let pool = Arc::new(FileHandlePool::new());
//! let params = StorageParams {
//!     layout: FileLayout {
//!         name: "debian.iso".to_string(),
//!         info_hash: [0; 20],
//!         piece_length: 262144,
//!         piece_count: 2624,
//!         files: vec![TorrentFile {
//!             path: vec!["debian.iso".to_string()],
//!             length: 687865856,
//!         }],
//!     },
//!     save_path: "./downloads".into(),
//! };
//!
//! let storage = new_storage(params, StorageOptions::default(), pool)?;
//! storage.initialize()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod pool;
pub mod storage;
pub mod torrent;

pub use error::{FileOp, StorageError};
pub use pool::{FileHandlePool, OpenMode, PooledHandle, StorageIndex};
pub use storage::{
    new_storage, DeleteFlags, FinishedProbe, FlatFileStorage, MemoryStorage, StorageBackend,
    StorageKind, StorageOptions, StorageParams,
};
pub use torrent::{CollapsedLayout, FileLayout, ResumeData, TorrentFile};

#[cfg(test)]
pub(crate) fn test_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
