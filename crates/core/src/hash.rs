//! Content digests, selected by session version

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// Session format version.
///
/// The version is fixed for the lifetime of a session and selects the digest
/// algorithm used to address file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Version {
    /// SHA-256 content digests
    Version1,
    /// BLAKE3 content digests
    #[default]
    Version2,
}

impl Version {
    /// Create a fresh streaming hasher for this version's digest algorithm.
    #[must_use]
    pub fn hasher(self) -> Hasher {
        match self {
            Self::Version1 => Hasher::Sha256(sha2::Sha256::new()),
            Self::Version2 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Digest arbitrary bytes
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest a file by path
    ///
    /// # Errors
    /// Returns an error if the file cannot be read
    pub fn digest_file(self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = self.hasher();
        let mut buffer = [0u8; 64 * 1024];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(hasher.finalize())
    }

    /// Length in bytes of the digests produced by this version
    #[must_use]
    pub fn digest_len(self) -> usize {
        match self {
            Self::Version1 => 32,
            Self::Version2 => blake3::OUT_LEN,
        }
    }
}

impl From<Version> for u32 {
    fn from(version: Version) -> Self {
        match version {
            Version::Version1 => 1,
            Version::Version2 => 2,
        }
    }
}

impl TryFrom<u32> for Version {
    type Error = UnknownVersion;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Version1),
            2 => Ok(Self::Version2),
            other => Err(UnknownVersion(other.to_string())),
        }
    }
}

impl FromStr for Version {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map_err(|_| UnknownVersion(s.to_string()))
            .and_then(Self::try_from)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u32::from(*self))
    }
}

/// Unrecognized session version
#[derive(Debug, thiserror::Error)]
#[error("unknown session version: {0}")]
pub struct UnknownVersion(String);

/// Streaming digest accumulator produced by [`Version::hasher`]
#[derive(Clone)]
pub enum Hasher {
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    /// Feed bytes into the digest. This can't fail.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(hasher) => hasher.update(data),
            Self::Blake3(hasher) => {
                hasher.update(data);
            }
        }
    }

    /// Consume the accumulator and produce the final digest
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            Self::Blake3(hasher) => hasher.finalize().as_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256(_) => f.write_str("Hasher(sha256)"),
            Self::Blake3(_) => f.write_str("Hasher(blake3)"),
        }
    }
}

/// Reader adapter digesting every byte read through it, so content can be
/// streamed somewhere and hashed in a single pass.
#[derive(Debug)]
pub struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> HashingReader<R> {
    /// Wrap `inner`, digesting with `version`'s algorithm
    pub fn new(inner: R, version: Version) -> Self {
        Self {
            inner,
            hasher: version.hasher(),
        }
    }

    /// Digest of everything read so far
    #[must_use]
    pub fn finalize(self) -> Vec<u8> {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
