// src/compression/mod.rs
//! Repository database decompression
//!
//! Repositories publish their database as a compressed artifact whose name and
//! decoder depend on the repository's `compression_format` tag. The tag is
//! resolved into a [`CompressionFormat`] once, when settings are loaded, so an
//! unknown tag is a configuration error rather than a runtime surprise.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),
}

/// Supported repository database compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompressionFormat {
    /// Bzip2 compression (.bz2), the historical default
    #[default]
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    Xz,
    /// Zstandard compression (.zst)
    Zstd,
}

impl CompressionFormat {
    /// Get the file extension for this format, including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Bzip2 => ".bz2",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
        }
    }

    /// Get the configuration tag for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bzip2 => "bz2",
            Self::Gzip => "gz",
            Self::Xz => "xz",
            Self::Zstd => "zst",
        }
    }

    /// Name of the compressed artifact published for `database_name`
    ///
    /// ```
    /// use entropy::compression::CompressionFormat;
    ///
    /// assert_eq!(CompressionFormat::Bzip2.artifact_name("packages.db"), "packages.db.bz2");
    /// assert_eq!(CompressionFormat::Zstd.artifact_name("packages.db"), "packages.db.zst");
    /// ```
    pub fn artifact_name(&self, database_name: &str) -> String {
        format!("{}{}", database_name, self.extension())
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CompressionFormat {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bz2" | "bzip2" => Ok(Self::Bzip2),
            "gz" | "gzip" => Ok(Self::Gzip),
            "xz" => Ok(Self::Xz),
            "zst" | "zstd" => Ok(Self::Zstd),
            _ => Err(CompressionError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for CompressionFormat {
    type Error = CompressionError;

    fn try_from(tag: String) -> Result<Self, Self::Error> {
        tag.parse()
    }
}

impl From<CompressionFormat> for String {
    fn from(format: CompressionFormat) -> Self {
        format.name().to_string()
    }
}

/// Create a decompressing reader for the given format
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionFormat::Bzip2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::DecoderCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Decompress `source` into `dest`
///
/// Output is streamed into a temporary sibling of `dest` and renamed into place
/// once complete, so `dest` is either the previous file or the full result.
/// Returns the number of decompressed bytes written.
pub fn unpack_file(
    source: &Path,
    dest: &Path,
    format: CompressionFormat,
) -> Result<u64, CompressionError> {
    let decompression_error = |e: io::Error| CompressionError::Decompression {
        format: format.name(),
        source: e,
    };

    let input = File::open(source).map_err(decompression_error)?;
    let mut decoder = create_decoder(BufReader::new(input), format)?;

    let temp_path = dest.with_extension("unpack");
    let written = (|| {
        let mut output = BufWriter::new(File::create(&temp_path)?);
        let written = io::copy(&mut decoder, &mut output)?;
        output.flush()?;
        output.get_ref().sync_all()?;
        Ok(written)
    })()
    .map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        decompression_error(e)
    })?;

    fs::rename(&temp_path, dest).map_err(decompression_error)?;
    Ok(written)
}
