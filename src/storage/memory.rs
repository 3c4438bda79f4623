//! In-memory storage
//!
//! Keeps piece data in a map instead of touching disk. Useful for
//! streaming setups and tests where durability does not matter; selected
//! through [`StorageKind::Memory`](crate::storage::StorageKind).

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::pool::{FileHandlePool, OpenMode, StorageIndex};
use crate::storage::backend::{
    DeleteFlags, FinishedProbe, StorageBackend, StorageKind,
};
use crate::torrent::{CollapsedLayout, FileLayout, ResumeData};

/// Storage backend holding pieces in memory
pub struct MemoryStorage {
    layout: CollapsedLayout,
    pool: Arc<FileHandlePool>,
    index: StorageIndex,
    pieces: Mutex<HashMap<u32, Vec<u8>>>,
}

impl MemoryStorage {
    pub(crate) fn new(layout: &FileLayout, pool: Arc<FileHandlePool>, index: StorageIndex) -> Self {
        Self {
            layout: CollapsedLayout::new(layout),
            pool,
            index,
            pieces: Mutex::new(HashMap::new()),
        }
    }

    /// The identity token of this instance within the pool
    pub fn storage_index(&self) -> StorageIndex {
        self.index
    }
}

impl StorageBackend for MemoryStorage {
    fn initialize(&self) -> Result<()> {
        info!(
            "initialized in-memory storage for \"{}\": piece_length {}, piece_count {}",
            self.layout.name(),
            self.layout.piece_length(),
            self.layout.piece_count()
        );
        Ok(())
    }

    fn readv(&self, bufs: &mut [BytesMut], piece: u32, offset: u32, _mode: OpenMode) -> Result<u64> {
        let pieces = self.pieces.lock().unwrap();
        let Some(data) = pieces.get(&piece) else {
            return Ok(0);
        };

        let mut remaining = match data.get(offset as usize..) {
            Some(tail) => tail,
            None => return Ok(0),
        };
        let mut total: u64 = 0;
        for buf in bufs.iter_mut() {
            let n = buf.len().min(remaining.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
            total += n as u64;
            if remaining.is_empty() {
                break;
            }
        }

        trace!("read {} bytes of piece {} at offset {}", total, piece, offset);
        Ok(total)
    }

    fn writev(&self, bufs: &[Bytes], piece: u32, offset: u32, _mode: OpenMode) -> Result<u64> {
        let mut pieces = self.pieces.lock().unwrap();
        let data = pieces.entry(piece).or_default();

        let mut cursor = offset as usize;
        let mut total: u64 = 0;
        for buf in bufs {
            let end = cursor + buf.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[cursor..end].copy_from_slice(buf);
            cursor = end;
            total += buf.len() as u64;
        }

        trace!("wrote {} bytes to piece {} at offset {}", total, piece, offset);
        Ok(total)
    }

    fn release_files(&self) -> Result<()> {
        // nothing is held open, but the pool slot lifecycle stays uniform
        self.pool.release(self.index);
        Ok(())
    }

    fn delete_files(&self, flags: DeleteFlags) -> Result<()> {
        debug!(
            "dropping in-memory pieces for \"{}\" (flags {:?})",
            self.layout.name(),
            flags
        );
        self.pool.release(self.index);
        self.pieces.lock().unwrap().clear();
        Ok(())
    }

    fn has_any_file(&self) -> Result<bool> {
        Ok(false)
    }

    fn set_file_priority(&self, _priorities: &[u8]) -> Result<()> {
        Ok(())
    }

    fn rename_file(&self, _file_index: u32, _new_name: &str) -> Result<()> {
        Ok(())
    }

    fn move_storage(&self, _new_path: &Path) -> Result<()> {
        Ok(())
    }

    fn verify_resume_data(&self, _resume: &ResumeData) -> Result<bool> {
        Ok(false)
    }

    fn set_finished_probe(&self, _probe: FinishedProbe) {}

    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::TorrentFile;

    fn storage() -> MemoryStorage {
        let pool = Arc::new(FileHandlePool::new());
        let index = pool.allocate_index();
        let layout = FileLayout {
            name: "memory.bin".to_string(),
            info_hash: [5; 20],
            piece_length: 16384,
            piece_count: 3,
            files: vec![TorrentFile {
                path: vec!["memory.bin".to_string()],
                length: 49152,
            }],
        };
        let storage = MemoryStorage::new(&layout, pool, index);
        storage.initialize().unwrap();
        storage
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let storage = storage();
        let data = Bytes::from(vec![42u8; 300]);

        let written = storage
            .writev(&[data.clone()], 2, 64, OpenMode::empty())
            .unwrap();
        assert_eq!(written, 300);

        let mut bufs = [BytesMut::zeroed(300)];
        let read = storage.readv(&mut bufs, 2, 64, OpenMode::empty()).unwrap();
        assert_eq!(read, 300);
        assert_eq!(&bufs[0][..], &data[..]);
    }

    #[test]
    fn test_read_of_missing_piece_is_empty() {
        let storage = storage();
        let mut bufs = [BytesMut::zeroed(16)];
        assert_eq!(storage.readv(&mut bufs, 1, 0, OpenMode::empty()).unwrap(), 0);
    }

    #[test]
    fn test_short_read_returns_available_bytes() {
        let storage = storage();
        storage
            .writev(&[Bytes::from(vec![7u8; 100])], 0, 0, OpenMode::empty())
            .unwrap();

        let mut bufs = [BytesMut::zeroed(256)];
        let read = storage.readv(&mut bufs, 0, 50, OpenMode::empty()).unwrap();
        assert_eq!(read, 50);
        assert_eq!(&bufs[0][..50], &[7u8; 50][..]);
    }

    #[test]
    fn test_gap_write_zero_fills() {
        let storage = storage();
        storage
            .writev(&[Bytes::from(vec![9u8; 10])], 0, 100, OpenMode::empty())
            .unwrap();

        let mut bufs = [BytesMut::zeroed(110)];
        let read = storage.readv(&mut bufs, 0, 0, OpenMode::empty()).unwrap();
        assert_eq!(read, 110);
        assert!(bufs[0][..100].iter().all(|&b| b == 0));
        assert_eq!(&bufs[0][100..], &[9u8; 10][..]);
    }

    #[test]
    fn test_delete_files_clears_pieces() {
        let storage = storage();
        storage
            .writev(&[Bytes::from(vec![1u8; 64])], 1, 0, OpenMode::empty())
            .unwrap();

        storage.delete_files(DeleteFlags::FILES).unwrap();
        let mut bufs = [BytesMut::zeroed(64)];
        assert_eq!(storage.readv(&mut bufs, 1, 0, OpenMode::empty()).unwrap(), 0);

        // idempotent
        storage.delete_files(DeleteFlags::FILES).unwrap();
    }
}
