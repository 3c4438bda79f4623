//! Torrent metadata consumed by the storage layer
//!
//! The engine owns parsing and verification; storage only needs the
//! layout metrics and the resume container.

pub mod layout;
pub mod resume;

pub use layout::{CollapsedLayout, FileLayout, TorrentFile};
pub use resume::ResumeData;
