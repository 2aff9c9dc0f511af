use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A required database file does not exist.
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A store path has no corresponding archive entry.
    #[error("Entry not found in archive: {0}")]
    EntryNotFound(String),

    /// The diff payload cannot reconstruct its declared output.
    #[error("Malformed patch: {0}")]
    MalformedPatch(String),

    /// The patched output does not have the fingerprint the store declares.
    #[error("Verification failed for {path}: expected {expected}, got {actual}")]
    VerificationMismatch {
        path: String,
        expected: Fingerprint,
        actual: Fingerprint,
    },

    /// The entry is at an unexpected revision and the store has no diff for it.
    #[error("File is of an unexpected version: {path} - {actual}")]
    Unpatchable { path: String, actual: Fingerprint },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A `.pat` or `.ren` file is truncated or otherwise unreadable.
    #[error("Corrupt store: {0}")]
    CorruptStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Opening or saving an archive failed.
    #[error(transparent)]
    Container(#[from] anyhow::Error),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedPatch(msg.into())
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptStore(msg.into())
    }
}
