//! Torrent layout descriptors
//!
//! The engine hands storage a description of the torrent's declared file
//! layout. Collapsed storage never materializes that layout on disk; it
//! derives a synthetic single-file descriptor from it and addresses all
//! I/O through that.

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Represents a file in the torrent's declared layout
#[derive(Debug, Clone)]
pub struct TorrentFile {
    /// File path components (e.g., ["folder", "subfolder", "file.txt"])
    pub path: Vec<String>,
    /// File size in bytes
    pub length: u64,
}

/// The real (possibly multi-file) layout as reported by the engine
#[derive(Debug, Clone)]
pub struct FileLayout {
    /// Torrent name
    pub name: String,
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u64,
    /// Number of pieces in the torrent
    pub piece_count: u32,
    /// Declared files, in torrent order
    pub files: Vec<TorrentFile>,
}

impl FileLayout {
    /// Calculate the total size of all declared files
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    /// Check if this is a multi-file torrent
    pub fn is_multi_file(&self) -> bool {
        self.files.len() > 1
    }

    /// Get the info hash as a hex string
    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    /// Validate the piece geometry against the declared files
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("torrent name cannot be empty"));
        }

        if self.piece_length == 0 {
            return Err(anyhow::anyhow!("piece_length cannot be 0"));
        }

        if self.files.is_empty() {
            return Err(anyhow::anyhow!("layout must declare at least one file"));
        }

        let total = self.total_size();
        if total == 0 {
            return Err(anyhow::anyhow!("total size cannot be 0"));
        }

        let spanned = self.piece_length * self.piece_count as u64;
        if spanned < total {
            return Err(anyhow::anyhow!(
                "piece geometry spans {} bytes but layout declares {}",
                spanned,
                total
            ));
        }

        // The last piece must not be empty
        if self.piece_count > 0 && self.piece_length * (self.piece_count as u64 - 1) >= total {
            return Err(anyhow::anyhow!(
                "piece count {} is too large for total size {}",
                self.piece_count,
                total
            ));
        }

        Ok(())
    }
}

/// Synthetic single-file descriptor addressing the backing file
///
/// Built once from the real layout's metrics; always describes exactly
/// one logical file spanning the whole torrent.
#[derive(Debug, Clone)]
pub struct CollapsedLayout {
    piece_length: u64,
    piece_count: u32,
    total_size: u64,
    name: String,
}

impl CollapsedLayout {
    /// Collapse the real layout into a single-file descriptor
    pub fn new(layout: &FileLayout) -> Self {
        Self {
            piece_length: layout.piece_length,
            piece_count: layout.piece_count,
            total_size: layout.total_size(),
            name: layout.name.clone(),
        }
    }

    /// Size of each piece in bytes
    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    /// Number of pieces
    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Total size of the backing file once complete
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Display name; also the backing file's name on disk
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute byte offset of (piece, in-piece offset) within the
    /// backing file
    ///
    /// Plain u64 arithmetic; valid for torrents well past a terabyte.
    pub fn piece_offset(&self, piece: u32, offset: u32) -> u64 {
        self.piece_length * piece as u64 + offset as u64
    }

    /// Path of the backing file under the given save path
    pub fn backing_path(&self, save_path: &Path) -> PathBuf {
        save_path.join(&self.name)
    }

    /// Path of the partial-download artifact under the given save path
    pub fn partfile_path(&self, save_path: &Path) -> PathBuf {
        save_path.join(format!(".{}.parts", self.name))
    }
}
