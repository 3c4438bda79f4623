//! Shared file-handle pool
//!
//! Opens, caches, and releases OS file handles on behalf of every storage
//! instance in a session. Each instance is keyed by a [`StorageIndex`]
//! allocated from the pool; the pool serializes handle reuse across
//! instances so storage itself never has to.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

use crate::torrent::CollapsedLayout;

bitflags::bitflags! {
    /// Mode and hint flags for opening a backing file
    pub struct OpenMode: u8 {
        /// Open for both reading and writing
        const READ_WRITE       = 0x01;
        /// Do not preallocate; unwritten regions stay holes on disk
        const SPARSE           = 0x02;
        /// Access pattern hint: piece I/O lands at arbitrary offsets
        const RANDOM_ACCESS    = 0x04;
        /// Caller intends to batch adjacent buffers into single transfers
        const COALESCE_BUFFERS = 0x08;
    }
}

/// Identity token of a storage instance within the pool
///
/// Unique per instance and stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageIndex(u32);

impl StorageIndex {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StorageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Refcounted reference to an open file owned by the pool
///
/// Clones share the same OS handle. Releasing the pool slot drops the
/// pool's reference only; outstanding clones keep the file usable until
/// the last one is dropped, so in-flight I/O never observes a closed
/// handle.
#[derive(Debug, Clone)]
pub struct PooledHandle {
    file: Arc<File>,
}

impl PooledHandle {
    /// The open file behind this handle
    pub fn file(&self) -> &File {
        &self.file
    }
}

#[derive(Debug)]
struct Slot {
    file: Arc<File>,
    mode: OpenMode,
}

/// Pool of open backing-file handles, shared across storage instances
#[derive(Debug, Default)]
pub struct FileHandlePool {
    slots: Mutex<HashMap<StorageIndex, Slot>>,
    next_index: AtomicU32,
}

impl FileHandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh identity token for a storage instance
    pub fn allocate_index(&self) -> StorageIndex {
        StorageIndex(self.next_index.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the cached handle for `index`, or open the backing file
    ///
    /// The file is created when missing. Without [`OpenMode::SPARSE`] the
    /// file is grown to the layout's total size up front; with it, size
    /// grows only as pieces are written. Requesting a different mode than
    /// the cached handle was opened with reopens and replaces it.
    pub fn open_file(
        &self,
        index: StorageIndex,
        path: &Path,
        layout: &CollapsedLayout,
        mode: OpenMode,
    ) -> io::Result<PooledHandle> {
        let mut slots = self.slots.lock().unwrap();

        if let Some(slot) = slots.get(&index) {
            if slot.mode == mode {
                trace!("reusing pooled handle for slot {}", index);
                return Ok(PooledHandle {
                    file: slot.file.clone(),
                });
            }
            debug!(
                "mode change for slot {} ({:?} -> {:?}), reopening",
                index, slot.mode, mode
            );
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(mode.contains(OpenMode::READ_WRITE))
            .truncate(false)
            .open(path)?;

        if !mode.contains(OpenMode::SPARSE) && file.metadata()?.len() < layout.total_size() {
            file.set_len(layout.total_size())?;
        }

        debug!(
            "opened {} for slot {} ({} pieces, {} bytes)",
            path.display(),
            index,
            layout.piece_count(),
            layout.total_size()
        );

        let file = Arc::new(file);
        slots.insert(
            index,
            Slot {
                file: file.clone(),
                mode,
            },
        );
        Ok(PooledHandle { file })
    }

    /// Drop the pool's cached handle for `index`
    ///
    /// No-op when the slot holds nothing. Outstanding [`PooledHandle`]
    /// clones are unaffected.
    pub fn release(&self, index: StorageIndex) {
        let removed = self.slots.lock().unwrap().remove(&index);
        if removed.is_some() {
            debug!("released pooled handle for slot {}", index);
        }
    }

    /// Whether the pool currently caches a handle for `index`
    pub fn is_open(&self, index: StorageIndex) -> bool {
        self.slots.lock().unwrap().contains_key(&index)
    }

    /// Number of handles currently cached
    pub fn open_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}
