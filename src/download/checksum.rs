//! Checksum verification and file hashing.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use digest::DynDigest;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use super::constants::DEFAULT_BUFFER_SIZE;
use super::error::DownloadError;

/// Supported hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// MD5 (RFC 1321).
    Md5,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    #[default]
    Sha256,
}

/// Error returned when parsing an unknown algorithm name.
#[derive(Debug, Error)]
#[error("unsupported hash algorithm: {0} (expected md5, sha1 or sha256)")]
pub struct UnknownAlgorithm(pub String);

impl HashAlgorithm {
    /// Lower-case algorithm name, as accepted by [`FromStr`].
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Returns a fresh hasher for this algorithm.
    #[must_use]
    pub fn hasher(self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5 => Box::new(md5::Md5::default()),
            Self::Sha1 => Box::new(sha1::Sha1::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
        }
    }

    /// Digest of an in-memory buffer.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize().into_vec()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Checksum expected for a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    /// Algorithm used to hash the destination.
    pub algorithm: HashAlgorithm,
    /// Expected raw digest bytes.
    pub expected: Vec<u8>,
    /// Remove the destination when the digest does not match.
    pub delete_on_error: bool,
}

impl Checksum {
    /// Returns true if `actual` equals the expected digest.
    #[must_use]
    pub fn matches(&self, actual: &[u8]) -> bool {
        self.expected == actual
    }
}

/// Hashes the file at `path` in fixed-size chunks.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if the file cannot be opened or read.
pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<Vec<u8>, DownloadError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE];

    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into_vec())
}
