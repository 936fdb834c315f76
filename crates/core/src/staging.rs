//! Content-addressed staging for received file content
//!
//! A [`StagingCoordinator`] receives files through [`Sink`]s (implementing
//! [`Sinker`]) and later hands them to the apply phase (implementing
//! [`Provider`]). Staged files live at:
//!
//! ```text
//! <root>/
//!   <first digest byte, 2 hex chars>/
//!     <full digest, hex>
//! ```
//!
//! The destination depends only on the digest, so identical content staged
//! under different paths collapses onto one file. The coordinator is not
//! safe for concurrent use: a sink mutably borrows its coordinator, so only
//! one sink can be open at a time.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use color_eyre::eyre::ensure;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::entry::Entry;
use crate::hash::{Hasher, Version};
use crate::paths;

/// Number of shard directories (one per value of the first digest byte)
pub const SHARD_COUNT: usize = 1 << 8;

/// Prefix for temporary files receiving content
const STORAGE_PREFIX: &str = "staging";

/// Which endpoint of a session a coordinator stages for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Alpha,
    Beta,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alpha => "alpha",
            Self::Beta => "beta",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = UnknownSide;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alpha" => Ok(Self::Alpha),
            "beta" => Ok(Self::Beta),
            other => Err(UnknownSide(other.to_string())),
        }
    }
}

/// Unrecognized endpoint side
#[derive(Debug, thiserror::Error)]
#[error("unknown side '{0}', expected 'alpha' or 'beta'")]
pub struct UnknownSide(String);

/// Errors produced while staging or providing content
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// A filesystem operation failed
    #[error("unable to {context}: {source}; path: '{}'", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Nothing is staged for the requested digest
    #[error("staged content not found: '{}'", .0.display())]
    NotFound(PathBuf),
    /// An empty digest can't be addressed
    #[error("unable to compute staging path for empty digest")]
    EmptyDigest,
    /// Only file entries have staged content
    #[error("entry is not a file")]
    NotAFile,
}

impl StagingError {
    fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// Opens sinks for incoming file content
pub trait Sinker {
    type Sink<'a>: Sink
    where
        Self: 'a;

    /// Open a sink receiving the content for `path`.
    ///
    /// # Errors
    /// Returns an error if storage for the content can't be created.
    fn sink(&mut self, path: &str) -> Result<Self::Sink<'_>, StagingError>;
}

/// Destination for the bytes of one file
pub trait Sink: Write {
    /// Finish receiving and publish the content.
    ///
    /// # Errors
    /// Returns an error if the content can't be published. Nothing is left
    /// behind in that case.
    fn close(self) -> Result<(), StagingError>;
}

/// Resolves staged content for entries being applied
pub trait Provider {
    /// Locate the staged content for a file entry, with permissions matching
    /// the entry's executability.
    ///
    /// # Errors
    /// Returns [`StagingError::NotFound`] if the content was never staged.
    fn provide(&self, path: &str, entry: &Entry) -> Result<PathBuf, StagingError>;
}

/// Per-session, per-side staging storage
#[derive(Debug)]
pub struct StagingCoordinator {
    version: Version,
    root: PathBuf,
    /// Whether we've created the root since the last wipe
    root_created: bool,
    /// Whether we've created each shard since the last wipe
    prefix_created: [bool; SHARD_COUNT],
}

/// Staging root for a session side: `<data_dir>/staging/<session>_<side>`
///
/// # Errors
/// Returns an error if the session identifier can't be used as a path
/// component or the data directory is unknown.
pub fn staging_root(session: &str, side: Side) -> color_eyre::Result<PathBuf> {
    ensure!(
        !session.is_empty()
            && session != "."
            && session != ".."
            && !session.contains(['/', '\\']),
        "invalid session identifier: {session:?}"
    );
    Ok(paths::data_dir()?
        .join(paths::STAGING_DIR_NAME)
        .join(format!("{session}_{side}")))
}

/// Shard name and full storage path for a digest
///
/// # Errors
/// Returns [`StagingError::EmptyDigest`] for an empty digest.
pub fn path_for_staging(root: &Path, digest: &[u8]) -> Result<(PathBuf, String), StagingError> {
    let first = digest.first().ok_or(StagingError::EmptyDigest)?;
    let prefix = format!("{first:02x}");
    let path = root.join(&prefix).join(hex::encode(digest));
    Ok((path, prefix))
}

impl StagingCoordinator {
    /// Create a coordinator for a session side, rooted in the data directory.
    /// Nothing is created on disk until the first sink is opened.
    ///
    /// # Errors
    /// Returns an error if the staging root can't be computed.
    pub fn new(session: &str, version: Version, side: Side) -> color_eyre::Result<Self> {
        Ok(Self::with_root(staging_root(session, side)?, version))
    }

    /// Create a coordinator with an explicit storage root
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>, version: Version) -> Self {
        Self {
            version,
            root: root.into(),
            root_created: false,
            prefix_created: [false; SHARD_COUNT],
        }
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Session version, which fixes the digest algorithm
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    fn ensure_root_exists(&mut self) -> Result<(), StagingError> {
        if self.root_created {
            return Ok(());
        }
        create_private_dir(&self.root)
            .map_err(|e| StagingError::io("create staging root", &self.root, e))?;
        self.root_created = true;
        Ok(())
    }

    fn ensure_prefix_exists(&mut self, shard: u8, prefix: &str) -> Result<(), StagingError> {
        if self.prefix_created[usize::from(shard)] {
            return Ok(());
        }

        // The root is an intermediate directory, so it exists afterwards too.
        let path = self.root.join(prefix);
        create_private_dir(&path)
            .map_err(|e| StagingError::io("create prefix directory", &path, e))?;
        self.root_created = true;
        self.prefix_created[usize::from(shard)] = true;
        Ok(())
    }

    /// Remove all staged content and forget which directories exist.
    /// Wiping storage that doesn't exist succeeds.
    ///
    /// # Errors
    /// Returns an error if the staging root exists but can't be removed.
    pub fn wipe(&mut self) -> Result<(), StagingError> {
        self.prefix_created = [false; SHARD_COUNT];
        self.root_created = false;

        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!("Wiped staging root {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StagingError::io("remove staging directory", &self.root, e)),
        }
    }
}

impl Sinker for StagingCoordinator {
    type Sink<'a> = StagingSink<'a>;

    fn sink(&mut self, path: &str) -> Result<StagingSink<'_>, StagingError> {
        self.ensure_root_exists()?;

        let storage = tempfile::Builder::new()
            .prefix(STORAGE_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| StagingError::io("create temporary storage file", &self.root, e))?;
        debug!("Receiving {path} into {}", storage.path().display());

        let hasher = self.version.hasher();
        Ok(StagingSink {
            coordinator: self,
            path: path.to_string(),
            storage,
            hasher,
        })
    }
}

impl Provider for StagingCoordinator {
    fn provide(&self, path: &str, entry: &Entry) -> Result<PathBuf, StagingError> {
        let Entry::File { executable, digest } = entry else {
            return Err(StagingError::NotAFile);
        };

        let (location, _) = path_for_staging(&self.root, digest)?;

        // This fails if nothing was staged at the location.
        set_private_permissions(&location, *executable).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StagingError::NotFound(location.clone())
            } else {
                StagingError::io("set file permissions", &location, e)
            }
        })?;

        debug!("Providing {path} from {}", location.display());
        Ok(location)
    }
}

/// Receives one file, digesting it as it's written.
///
/// Dropping the sink without calling [`Sink::close`] discards the content.
pub struct StagingSink<'a> {
    coordinator: &'a mut StagingCoordinator,
    /// The path being staged, not the storage location
    path: String,
    storage: NamedTempFile,
    hasher: Hasher,
}

impl fmt::Debug for StagingSink<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingSink")
            .field("path", &self.path)
            .field("storage", &self.storage.path())
            .finish_non_exhaustive()
    }
}

impl Write for StagingSink<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.storage.write(data)?;
        self.hasher.update(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.storage.flush()
    }
}

impl Sink for StagingSink<'_> {
    fn close(self) -> Result<(), StagingError> {
        let Self {
            coordinator,
            path,
            storage,
            hasher,
        } = self;

        storage
            .as_file()
            .sync_all()
            .map_err(|e| StagingError::io("close underlying storage", storage.path(), e))?;

        // From here on the temporary file is removed when `storage` drops,
        // which covers every early return below.
        let storage = storage.into_temp_path();

        let digest = hasher.finalize();
        let (destination, prefix) = path_for_staging(&coordinator.root, &digest)?;
        coordinator.ensure_prefix_exists(digest[0], &prefix)?;

        storage
            .persist(&destination)
            .map_err(|e| StagingError::io("relocate file", &destination, e.error))?;

        debug!("Staged {path} at {}", destination.display());
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt as _;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn set_private_permissions(path: &Path, executable: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    let mode = if executable { 0o700 } else { 0o600 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_private_permissions(path: &Path, _executable: bool) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions)
}
