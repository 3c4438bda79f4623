//! Storage backend abstraction
//!
//! The engine's per-torrent storage contract, plus the factory it calls
//! to select this backend instead of its default one. All methods are
//! blocking: the engine drives them from its own pool of disk worker
//! threads, with lifecycle calls arriving from a separate control thread,
//! so implementations take `&self` and guard their own state.

use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::Result;
use crate::pool::{FileHandlePool, OpenMode};
use crate::storage::flatfile::FlatFileStorage;
use crate::storage::memory::MemoryStorage;
use crate::storage::paths;
use crate::torrent::{FileLayout, ResumeData};

bitflags::bitflags! {
    /// What `delete_files` should remove
    pub struct DeleteFlags: u8 {
        /// The backing file itself
        const FILES    = 0x01;
        /// The partial-download artifact
        const PARTFILE = 0x02;
    }
}

/// Engine-injected capability reporting whether the owning torrent has
/// finished downloading
///
/// Attached after construction; while absent, storage assumes the torrent
/// is still running and keeps its handle open.
pub type FinishedProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Storage backend discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Single backing file on disk, all pieces collapsed onto it
    FlatFile,
    /// In-memory piece map, no disk I/O
    Memory,
}

/// Construction parameters handed over by the engine
#[derive(Debug, Clone)]
pub struct StorageParams {
    /// The torrent's real (possibly multi-file) layout
    pub layout: FileLayout,
    /// Configured save path; resolved to absolute form at construction
    pub save_path: PathBuf,
}

/// Policy knobs for storage construction
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Which backend variant to build
    pub kind: StorageKind,
    /// Remove a stale partial backing file during `initialize`
    ///
    /// Off by default: removing on every initialize would destroy
    /// resume state on each session restart.
    pub remove_stale_partfile: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            kind: StorageKind::FlatFile,
            remove_stale_partfile: false,
        }
    }
}

/// Abstract per-torrent storage consumed by the engine
///
/// `readv`/`writev` are called concurrently from the engine's disk
/// worker threads; `release_files`, `delete_files`, and drop may arrive
/// from a different thread while I/O is in flight. `release_files` and
/// `delete_files` are idempotent.
pub trait StorageBackend: Send + Sync {
    /// Initialize storage; called exactly once after construction
    fn initialize(&self) -> Result<()>;

    /// Fill `bufs` in order with data of `piece` starting at `offset`
    ///
    /// Returns the number of bytes filled. A short count means the
    /// backing store ends inside the requested range and is not an error.
    fn readv(&self, bufs: &mut [BytesMut], piece: u32, offset: u32, mode: OpenMode) -> Result<u64>;

    /// Write `bufs` in order to `piece` starting at `offset`
    ///
    /// Returns the number of bytes written, which equals the total size
    /// of the buffer list on success.
    fn writev(&self, bufs: &[Bytes], piece: u32, offset: u32, mode: OpenMode) -> Result<u64>;

    /// Release the backing handle unless the torrent is still running
    fn release_files(&self) -> Result<()>;

    /// Force-release the backing handle and erase the selected files
    fn delete_files(&self, flags: DeleteFlags) -> Result<()>;

    /// Whether any declared file already exists; collapsed storage always
    /// reports false
    fn has_any_file(&self) -> Result<bool>;

    /// Per-declared-file priorities; not applicable to collapsed storage
    fn set_file_priority(&self, priorities: &[u8]) -> Result<()>;

    /// Renaming a declared file; not applicable to collapsed storage
    fn rename_file(&self, file_index: u32, new_name: &str) -> Result<()>;

    /// Moving storage to a new path; reported as success without moving
    fn move_storage(&self, new_path: &Path) -> Result<()>;

    /// Resume-data verification; collapsed storage never checks file
    /// state and always reports false
    fn verify_resume_data(&self, resume: &ResumeData) -> Result<bool>;

    /// Attach the engine's finished probe
    fn set_finished_probe(&self, probe: FinishedProbe);

    /// Which backend variant this is
    fn kind(&self) -> StorageKind;
}

/// Build a storage backend for one torrent
///
/// This is the sole integration point the engine uses to select this
/// backend: it resolves the save path, allocates the instance's pool
/// slot, and returns the variant picked by `options`.
pub fn new_storage(
    params: StorageParams,
    options: StorageOptions,
    pool: Arc<FileHandlePool>,
) -> anyhow::Result<Box<dyn StorageBackend>> {
    params.layout.validate()?;
    let save_path = paths::absolute_save_path(&params.save_path)?;
    let index = pool.allocate_index();

    info!(
        "creating {:?} storage for \"{}\" ({}) at {}, slot {}",
        options.kind,
        params.layout.name,
        params.layout.info_hash_hex(),
        save_path.display(),
        index
    );

    Ok(match options.kind {
        StorageKind::FlatFile => Box::new(FlatFileStorage::new(
            &params.layout,
            save_path,
            options,
            pool,
            index,
        )),
        StorageKind::Memory => Box::new(MemoryStorage::new(&params.layout, pool, index)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentFile;

    fn params(save: &Path) -> StorageParams {
        StorageParams {
            layout: FileLayout {
                name: "factory.bin".to_string(),
                info_hash: [3; 20],
                piece_length: 16384,
                piece_count: 2,
                files: vec![TorrentFile {
                    path: vec!["factory.bin".to_string()],
                    length: 20000,
                }],
            },
            save_path: save.to_path_buf(),
        }
    }

    #[test]
    fn test_factory_dispatches_on_kind() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(FileHandlePool::new());

        let disk = new_storage(
            params(dir.path()),
            StorageOptions::default(),
            pool.clone(),
        )
        .unwrap();
        assert_eq!(disk.kind(), StorageKind::FlatFile);

        let mem = new_storage(
            params(dir.path()),
            StorageOptions {
                kind: StorageKind::Memory,
                ..Default::default()
            },
            pool,
        )
        .unwrap();
        assert_eq!(mem.kind(), StorageKind::Memory);
    }

    #[test]
    fn test_factory_rejects_invalid_layout() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(FileHandlePool::new());

        let mut bad = params(dir.path());
        bad.layout.piece_count = 1;
        assert!(new_storage(bad, StorageOptions::default(), pool).is_err());
    }
}
