//! Resume data container
//!
//! Carries the piece bitfield the engine hands to
//! [`verify_resume_data`](crate::storage::StorageBackend::verify_resume_data).
//! Collapsed storage never checks it against actual file state; the type
//! exists so the contract surface is complete and the engine can persist
//! its own view of progress.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Resume data for a torrent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeData {
    /// Info hash as hex string
    pub info_hash: String,
    /// Which pieces are downloaded (bitfield)
    pub have_pieces: Vec<u8>,
}

impl ResumeData {
    /// Create new, empty resume data
    pub fn new(info_hash: String, piece_count: usize) -> Self {
        Self {
            info_hash,
            have_pieces: vec![0u8; (piece_count + 7) / 8],
        }
    }

    /// Mark a piece as downloaded in the bitfield
    pub fn set_piece_downloaded(&mut self, piece_index: usize) {
        if piece_index < self.have_pieces.len() * 8 {
            self.have_pieces[piece_index / 8] |= 1 << (7 - (piece_index % 8));
        }
    }

    /// Check if a piece is marked downloaded
    pub fn is_piece_downloaded(&self, piece_index: usize) -> bool {
        if piece_index >= self.have_pieces.len() * 8 {
            return false;
        }
        (self.have_pieces[piece_index / 8] & (1 << (7 - (piece_index % 8)))) != 0
    }

    /// Number of pieces marked downloaded
    pub fn downloaded_count(&self) -> usize {
        self.have_pieces
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum()
    }

    /// Serialize to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize()?)?;
        Ok(())
    }

    /// Load from file, returning None when no resume file exists
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        Ok(Some(Self::deserialize(&data)?))
    }
}
