//! Collapsed single-file storage
//!
//! Maps every piece of a torrent onto one backing file at
//! `<save_path>/<name>`, regardless of the declared file layout. The
//! backing file grows sparsely as pieces are written; the handle is
//! opened on demand through the shared pool and held until the torrent
//! finishes or the engine forces a release.

use bytes::{Bytes, BytesMut};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, StorageError};
use crate::pool::{FileHandlePool, OpenMode, PooledHandle, StorageIndex};
use crate::storage::backend::{
    DeleteFlags, FinishedProbe, StorageBackend, StorageKind, StorageOptions,
};
use crate::torrent::{CollapsedLayout, FileLayout, ResumeData};

/// Synthetic index of the single backing file
const BACKING_FILE_INDEX: u32 = 0;

/// Storage backend collapsing all pieces onto a single backing file
pub struct FlatFileStorage {
    save_path: PathBuf,
    layout: CollapsedLayout,
    options: StorageOptions,
    pool: Arc<FileHandlePool>,
    index: StorageIndex,
    /// The only mutable shared state: the held pool handle, if any
    handle: Mutex<Option<PooledHandle>>,
    finished_probe: Mutex<Option<FinishedProbe>>,
}

impl FlatFileStorage {
    pub(crate) fn new(
        layout: &FileLayout,
        save_path: PathBuf,
        options: StorageOptions,
        pool: Arc<FileHandlePool>,
        index: StorageIndex,
    ) -> Self {
        Self {
            save_path,
            layout: CollapsedLayout::new(layout),
            options,
            pool,
            index,
            handle: Mutex::new(None),
            finished_probe: Mutex::new(None),
        }
    }

    /// Path of the backing file on disk
    pub fn backing_path(&self) -> PathBuf {
        self.layout.backing_path(&self.save_path)
    }

    /// The identity token of this instance within the pool
    pub fn storage_index(&self) -> StorageIndex {
        self.index
    }

    /// Base open mode plus any coalescing hint the caller carried
    fn open_mode(extra: OpenMode) -> OpenMode {
        OpenMode::READ_WRITE
            | OpenMode::SPARSE
            | OpenMode::RANDOM_ACCESS
            | (extra & OpenMode::COALESCE_BUFFERS)
    }

    /// Idempotent open-on-demand: reuse the held handle or request one
    /// from the pool
    fn ensure_open(&self, mode: OpenMode) -> Result<PooledHandle> {
        let mut slot = self.handle.lock().unwrap();
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }

        let path = self.backing_path();
        trace!("opening backing file {} (mode {:?})", path.display(), mode);
        let handle = self
            .pool
            .open_file(self.index, &path, &self.layout, mode)
            .map_err(|e| StorageError::open_error(e, BACKING_FILE_INDEX))?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Release the held handle back to the pool
    ///
    /// With `force` unset, the handle stays open while the torrent is
    /// still running so in-flight reads after completion stay fast.
    fn release_handle(&self, force: bool) {
        if !force && !self.is_finished() {
            trace!("torrent not finished, keeping handle for slot {}", self.index);
            return;
        }

        // Detach the handle from our state before telling the pool: a
        // concurrent open from a worker thread then sees an empty slot
        // and opens fresh instead of racing the cleanup of the old one.
        let taken = self.handle.lock().unwrap().take();
        self.pool.release(self.index);
        if taken.is_some() {
            debug!("released handle for \"{}\" (slot {})", self.layout.name(), self.index);
        }
        drop(taken);
    }

    fn is_finished(&self) -> bool {
        match self.finished_probe.lock().unwrap().as_ref() {
            Some(probe) => probe(),
            // probe not attached yet: assume still running
            None => false,
        }
    }

    fn remove_on_disk(&self, flags: DeleteFlags) -> Result<()> {
        if flags.contains(DeleteFlags::FILES) {
            let path = self.backing_path();
            if remove_if_exists(&path)
                .map_err(|e| StorageError::remove_error(e, BACKING_FILE_INDEX))?
            {
                debug!("removed backing file {}", path.display());
            }
        }
        if flags.contains(DeleteFlags::PARTFILE) {
            let path = self.layout.partfile_path(&self.save_path);
            if remove_if_exists(&path)
                .map_err(|e| StorageError::remove_error(e, BACKING_FILE_INDEX))?
            {
                debug!("removed partfile {}", path.display());
            }
        }
        Ok(())
    }
}

impl StorageBackend for FlatFileStorage {
    fn initialize(&self) -> Result<()> {
        info!(
            "initialized storage for \"{}\": piece_length {}, piece_count {}, total_size {}",
            self.layout.name(),
            self.layout.piece_length(),
            self.layout.piece_count(),
            self.layout.total_size()
        );

        if self.options.remove_stale_partfile {
            self.remove_on_disk(DeleteFlags::FILES | DeleteFlags::PARTFILE)?;
        }
        Ok(())
    }

    fn readv(&self, bufs: &mut [BytesMut], piece: u32, offset: u32, mode: OpenMode) -> Result<u64> {
        let handle = self.ensure_open(Self::open_mode(mode))?;
        let mut absolute = self.layout.piece_offset(piece, offset);
        let mut total: u64 = 0;

        for buf in bufs.iter_mut() {
            let n = read_full_at(handle.file(), &mut buf[..], absolute)
                .map_err(|e| StorageError::read_error(e, BACKING_FILE_INDEX))?;
            total += n as u64;
            absolute += n as u64;
            if n < buf.len() {
                // hit end of file; a short count is not an error
                break;
            }
        }

        trace!("read {} bytes of piece {} at offset {}", total, piece, offset);
        Ok(total)
    }

    fn writev(&self, bufs: &[Bytes], piece: u32, offset: u32, mode: OpenMode) -> Result<u64> {
        let handle = self.ensure_open(Self::open_mode(mode))?;
        let requested: u64 = bufs.iter().map(|b| b.len() as u64).sum();
        let mut absolute = self.layout.piece_offset(piece, offset);
        let mut total: u64 = 0;

        for buf in bufs {
            write_all_at(handle.file(), buf, absolute)
                .map_err(|e| StorageError::write_error(e, BACKING_FILE_INDEX))?;
            absolute += buf.len() as u64;
            total += buf.len() as u64;
        }

        debug_assert_eq!(total, requested);
        trace!("wrote {} bytes to piece {} at offset {}", total, piece, offset);
        Ok(total)
    }

    fn release_files(&self) -> Result<()> {
        self.release_handle(false);
        Ok(())
    }

    fn delete_files(&self, flags: DeleteFlags) -> Result<()> {
        debug!(
            "deleting files for \"{}\" (flags {:?})",
            self.layout.name(),
            flags
        );
        self.release_handle(true);
        self.remove_on_disk(flags)
    }

    fn has_any_file(&self) -> Result<bool> {
        Ok(false)
    }

    fn set_file_priority(&self, _priorities: &[u8]) -> Result<()> {
        Ok(())
    }

    fn rename_file(&self, file_index: u32, new_name: &str) -> Result<()> {
        warn!(
            "rename_file({}, {}) ignored: collapsed storage has no per-file names",
            file_index, new_name
        );
        Ok(())
    }

    fn move_storage(&self, new_path: &Path) -> Result<()> {
        warn!(
            "move_storage({}) ignored: collapsed storage does not move",
            new_path.display()
        );
        Ok(())
    }

    fn verify_resume_data(&self, resume: &ResumeData) -> Result<bool> {
        debug!(
            "resume data for {} not verified against the backing file",
            resume.info_hash
        );
        Ok(false)
    }

    fn set_finished_probe(&self, probe: FinishedProbe) {
        *self.finished_probe.lock().unwrap() = Some(probe);
    }

    fn kind(&self) -> StorageKind {
        StorageKind::FlatFile
    }
}

impl Drop for FlatFileStorage {
    fn drop(&mut self) {
        // may run on a different thread than the one that did the I/O
        self.pool.release(self.index);
    }
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}

/// Read into `buf` at `offset` until it is full or the file ends
///
/// Returns the number of bytes actually read.
fn read_full_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<usize> {
    let mut total = 0;
    while !buf.is_empty() {
        match read_at(file, buf, offset) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                offset += n as u64;
                let tmp = buf;
                buf = &mut tmp[n..];
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Write all of `buf` at `offset`
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    while !buf.is_empty() {
        match write_at(file, buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FileOp;
    use crate::torrent::TorrentFile;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn layout(piece_length: u64, piece_count: u32, total: u64) -> FileLayout {
        FileLayout {
            name: "payload.bin".to_string(),
            info_hash: [9; 20],
            piece_length,
            piece_count,
            files: vec![TorrentFile {
                path: vec!["payload.bin".to_string()],
                length: total,
            }],
        }
    }

    fn storage(save: &Path) -> (Arc<FlatFileStorage>, Arc<FileHandlePool>) {
        storage_with_options(save, StorageOptions::default())
    }

    fn storage_with_options(
        save: &Path,
        options: StorageOptions,
    ) -> (Arc<FlatFileStorage>, Arc<FileHandlePool>) {
        crate::test_tracing();
        let pool = Arc::new(FileHandlePool::new());
        let index = pool.allocate_index();
        let storage = Arc::new(FlatFileStorage::new(
            &layout(16384, 3, 49152),
            save.to_path_buf(),
            options,
            pool.clone(),
            index,
        ));
        storage.initialize().unwrap();
        (storage, pool)
    }

    fn patterned(len: usize, seed: u8) -> Bytes {
        (0..len)
            .map(|i| seed.wrapping_add(i as u8))
            .collect::<Vec<u8>>()
            .into()
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        let data = patterned(50, 7);
        let written = storage
            .writev(&[data.clone()], 1, 100, OpenMode::empty())
            .unwrap();
        assert_eq!(written, 50);

        let mut bufs = [BytesMut::zeroed(50)];
        let read = storage.readv(&mut bufs, 1, 100, OpenMode::empty()).unwrap();
        assert_eq!(read, 50);
        assert_eq!(&bufs[0][..], &data[..]);
    }

    #[test]
    fn test_piece_lands_at_absolute_offset() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        storage
            .writev(&[patterned(50, 1)], 1, 100, OpenMode::empty())
            .unwrap();
        storage
            .writev(&[patterned(16384, 2)], 2, 0, OpenMode::empty())
            .unwrap();

        // verify placement by reading the backing file directly
        let raw = fs::read(storage.backing_path()).unwrap();
        assert_eq!(&raw[16484..16534], &patterned(50, 1)[..]);
        assert_eq!(&raw[32768..49152], &patterned(16384, 2)[..]);
        assert_eq!(raw.len(), 49152);
    }

    #[test]
    fn test_writev_spreads_multiple_buffers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        let bufs = [patterned(10, 3), patterned(20, 40), patterned(5, 90)];
        let written = storage.writev(&bufs, 0, 8, OpenMode::empty()).unwrap();
        assert_eq!(written, 35);

        let mut out = [BytesMut::zeroed(35)];
        storage.readv(&mut out, 0, 8, OpenMode::empty()).unwrap();
        let mut expected = Vec::new();
        for b in &bufs {
            expected.extend_from_slice(b);
        }
        assert_eq!(&out[0][..], &expected[..]);
    }

    #[test]
    fn test_readv_short_read_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        storage
            .writev(&[patterned(100, 5)], 0, 0, OpenMode::empty())
            .unwrap();

        // ask for more than was ever written
        let mut bufs = [BytesMut::zeroed(64), BytesMut::zeroed(64)];
        let read = storage.readv(&mut bufs, 0, 0, OpenMode::empty()).unwrap();
        assert_eq!(read, 100);
        assert_eq!(&bufs[0][..], &patterned(100, 5)[..64]);
        assert_eq!(&bufs[1][..36], &patterned(100, 5)[64..]);
    }

    #[test]
    fn test_sparse_gap_reads_back_zero_filled() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        // write only piece 2, leaving a hole over pieces 0 and 1
        storage
            .writev(&[patterned(16384, 11)], 2, 0, OpenMode::empty())
            .unwrap();

        let mut bufs = [BytesMut::zeroed(100)];
        let read = storage.readv(&mut bufs, 0, 0, OpenMode::empty()).unwrap();
        assert_eq!(read, 100);
        assert!(bufs[0].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_release_files_keeps_handle_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, pool) = storage(dir.path());
        let index = storage.storage_index();

        storage
            .writev(&[patterned(10, 0)], 0, 0, OpenMode::empty())
            .unwrap();
        assert!(pool.is_open(index));

        // no probe attached: assume not finished, keep the handle
        storage.release_files().unwrap();
        assert!(pool.is_open(index));

        let finished = Arc::new(AtomicBool::new(false));
        let probe_flag = finished.clone();
        storage.set_finished_probe(Arc::new(move || probe_flag.load(Ordering::SeqCst)));

        storage.release_files().unwrap();
        assert!(pool.is_open(index));

        finished.store(true, Ordering::SeqCst);
        storage.release_files().unwrap();
        assert!(!pool.is_open(index));

        // idempotent after the effective release
        storage.release_files().unwrap();
        assert!(!pool.is_open(index));
    }

    #[test]
    fn test_delete_files_removes_backing_file_and_reopens_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, pool) = storage(dir.path());

        storage
            .writev(&[patterned(100, 21)], 0, 0, OpenMode::empty())
            .unwrap();
        assert!(storage.backing_path().exists());

        storage.delete_files(DeleteFlags::FILES).unwrap();
        assert!(!storage.backing_path().exists());
        assert!(!pool.is_open(storage.storage_index()));

        // repeated delete is a no-op
        storage.delete_files(DeleteFlags::FILES | DeleteFlags::PARTFILE).unwrap();

        // a subsequent write reopens a fresh sparse file
        storage
            .writev(&[patterned(10, 33)], 1, 0, OpenMode::empty())
            .unwrap();
        let mut bufs = [BytesMut::zeroed(10)];
        assert_eq!(storage.readv(&mut bufs, 1, 0, OpenMode::empty()).unwrap(), 10);
        assert_eq!(&bufs[0][..], &patterned(10, 33)[..]);
    }

    #[test]
    fn test_concurrent_writes_to_distinct_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        let writers: Vec<_> = [(0u32, 1u8), (1, 2), (2, 3)]
            .into_iter()
            .map(|(piece, seed)| {
                let storage = storage.clone();
                thread::spawn(move || {
                    storage
                        .writev(&[patterned(16384, seed)], piece, 0, OpenMode::empty())
                        .unwrap()
                })
            })
            .collect();
        for w in writers {
            assert_eq!(w.join().unwrap(), 16384);
        }

        for (piece, seed) in [(0u32, 1u8), (1, 2), (2, 3)] {
            let mut bufs = [BytesMut::zeroed(16384)];
            assert_eq!(
                storage.readv(&mut bufs, piece, 0, OpenMode::empty()).unwrap(),
                16384
            );
            assert_eq!(&bufs[0][..], &patterned(16384, seed)[..]);
        }
    }

    #[test]
    fn test_initialize_removes_stale_files_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("payload.bin");
        let partfile = dir.path().join(".payload.bin.parts");

        fs::write(&stale, b"stale").unwrap();
        fs::write(&partfile, b"parts").unwrap();
        let (_storage, _pool) = storage(dir.path());
        assert!(stale.exists(), "default policy must keep existing data");
        assert!(partfile.exists());

        let (_storage, _pool) = storage_with_options(
            dir.path(),
            StorageOptions {
                remove_stale_partfile: true,
                ..Default::default()
            },
        );
        assert!(!stale.exists());
        assert!(!partfile.exists());
    }

    #[test]
    fn test_open_failure_reports_code_and_operation() {
        let dir = tempfile::tempdir().unwrap();
        // occupy the save path component with a regular file so the
        // backing file cannot be created beneath it
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"x").unwrap();
        let (storage, _pool) = storage(&blocked);

        let err = storage
            .writev(&[patterned(4, 0)], 0, 0, OpenMode::empty())
            .unwrap_err();
        assert_eq!(err.op(), FileOp::Open);
        assert_eq!(err.file_index(), 0);
        assert!(err.os_code().is_some());
    }

    #[test]
    fn test_stubs_report_fixed_results() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, _pool) = storage(dir.path());

        assert!(!storage.has_any_file().unwrap());
        storage.set_file_priority(&[1, 2, 3]).unwrap();
        storage.rename_file(0, "renamed.bin").unwrap();
        storage.move_storage(Path::new("/elsewhere")).unwrap();

        let resume = ResumeData::new("09".repeat(20), 3);
        assert!(!storage.verify_resume_data(&resume).unwrap());
        assert_eq!(storage.kind(), StorageKind::FlatFile);
    }

    #[test]
    fn test_drop_releases_pool_slot() {
        let dir = tempfile::tempdir().unwrap();
        let (storage, pool) = storage(dir.path());
        let index = storage.storage_index();

        storage
            .writev(&[patterned(10, 0)], 0, 0, OpenMode::empty())
            .unwrap();
        assert!(pool.is_open(index));

        drop(storage);
        assert!(!pool.is_open(index));
    }
}
