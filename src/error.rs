//! Error types for the storage backend
//!
//! Defines the structured error channel through which storage failures
//! are reported back to the engine.

use std::fmt;
use std::io;

/// Convenience result alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// The operation that produced a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    /// Opening the backing file through the handle pool
    Open,
    /// Reading piece data from the backing file
    Read,
    /// Writing piece data to the backing file
    Write,
    /// Removing the backing file or a partfile from disk
    Remove,
    /// Any other file operation
    File,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileOp::Open => "open",
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::Remove => "remove",
            FileOp::File => "file",
        };
        f.write_str(name)
    }
}

/// Structured storage error reported to the engine
///
/// Carries the failed operation, the index of the file the operation was
/// addressed to (always the single synthetic index for collapsed
/// storage), and the underlying OS error.
#[derive(Debug)]
pub struct StorageError {
    op: FileOp,
    file_index: u32,
    source: io::Error,
}

impl StorageError {
    /// Create a new error for a failed file open
    pub fn open_error(source: io::Error, file_index: u32) -> Self {
        Self {
            op: FileOp::Open,
            file_index,
            source,
        }
    }

    /// Create a new error for a failed read
    pub fn read_error(source: io::Error, file_index: u32) -> Self {
        Self {
            op: FileOp::Read,
            file_index,
            source,
        }
    }

    /// Create a new error for a failed write
    pub fn write_error(source: io::Error, file_index: u32) -> Self {
        Self {
            op: FileOp::Write,
            file_index,
            source,
        }
    }

    /// Create a new error for a failed file removal
    pub fn remove_error(source: io::Error, file_index: u32) -> Self {
        Self {
            op: FileOp::Remove,
            file_index,
            source,
        }
    }

    /// Create a new error for a generic file operation
    pub fn file_error(source: io::Error, file_index: u32) -> Self {
        Self {
            op: FileOp::File,
            file_index,
            source,
        }
    }

    /// The operation that failed
    pub fn op(&self) -> FileOp {
        self.op
    }

    /// Index of the file the operation was addressed to
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    /// Underlying OS error code, when one is available
    pub fn os_code(&self) -> Option<i32> {
        self.source.raw_os_error()
    }

    /// Kind of the underlying I/O error
    pub fn io_kind(&self) -> io::ErrorKind {
        self.source.kind()
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.os_code() {
            Some(code) => write!(
                f,
                "file {} error: {} (file index: {}, os code: {})",
                self.op, self.source, self.file_index, code
            ),
            None => write!(
                f,
                "file {} error: {} (file index: {})",
                self.op, self.source, self.file_index
            ),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::file_error(err, 0)
    }
}
