// src/hash.rs

//! Checksum computation and verification for repository artifacts
//!
//! Repositories publish a checksum file next to their database. The file
//! carries a hex digest as the first whitespace-separated token of its first
//! line, optionally followed by a filename. The digest algorithm is not named
//! in the file, so it is inferred from the digest length:
//!
//! | Digest length | Algorithm |
//! |---------------|-----------|
//! | 32 hex chars  | MD5       |
//! | 64 hex chars  | SHA-256   |

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// MD5, the format of `packages.db.md5` files
    #[default]
    Md5,
    /// SHA-256
    Sha256,
}

impl HashAlgorithm {
    /// Get the hash output length as a hex string
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Infer the algorithm that produced a hex digest of this length
    pub fn from_hex_len(len: usize) -> Option<Self> {
        [Self::Md5, Self::Sha256]
            .into_iter()
            .find(|algorithm| algorithm.hex_len() == len)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Streaming hasher over any supported algorithm
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self { state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(hasher) => hasher.update(data),
            HasherState::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Md5(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Compute the hex digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the hex digest of a file without loading it into memory
pub fn hash_file(algorithm: HashAlgorithm, path: &Path) -> Result<String> {
    let file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    hash_reader(algorithm, &mut reader)
        .map_err(|e| Error::IoError(format!("Failed to read {}: {}", path.display(), e)))
}

/// Read the expected digest from a checksum file
///
/// Only the first token of the first line is used. A missing, empty, or
/// malformed checksum file is an error; callers treat it as a verification
/// failure.
pub fn read_checksum_file(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read checksum file {}: {}", path.display(), e))
    })?;

    let digest = content
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().next())
        .ok_or_else(|| {
            Error::ParseError(format!("Checksum file {} is empty", path.display()))
        })?;

    if HashAlgorithm::from_hex_len(digest.len()).is_none()
        || !digest.chars().all(|c| c.is_ascii_hexdigit())
    {
        return Err(Error::ParseError(format!(
            "Checksum file {} does not contain a valid digest",
            path.display()
        )));
    }

    Ok(digest.to_lowercase())
}

/// Verify a file against an expected hex digest
///
/// The algorithm is inferred from the digest length and comparison is
/// case-insensitive.
///
/// # Example
/// ```no_run
/// use entropy::hash::verify_file;
/// use std::path::Path;
///
/// verify_file(Path::new("packages.db"), "d41d8cd98f00b204e9800998ecf8427e")?;
/// # Ok::<(), entropy::Error>(())
/// ```
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let algorithm = HashAlgorithm::from_hex_len(expected.len()).ok_or_else(|| {
        Error::ParseError(format!("Unrecognized digest length: {}", expected.len()))
    })?;

    let actual = hash_file(algorithm, path)?;
    debug!("{} of {}: {}", algorithm, path.display(), actual);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_lowercase(),
            actual,
        })
    }
}
