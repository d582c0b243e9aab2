// src/error.rs

//! Error types for the Entropy client library

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::compression::CompressionError;

/// Errors raised by the Entropy client library
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O failure propagated with `?`
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Remote object could not be retrieved
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Malformed data (revision files, cache entries, marker names)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Invalid or inconsistent settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A file does not match its expected digest
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Requested object does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// Lock API misuse (releasing a lock never acquired, upgrading shared to
    /// exclusive). This is a programming error and is never recovered from.
    #[error("Lock misuse: {0}")]
    LockUsage(String),

    /// Decompression of a repository artifact failed
    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
