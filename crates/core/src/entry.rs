//! Entry: the recursive, content-addressable representation of a snapshot
//!
//! A snapshot is an `Option<Entry>`. `None` represents the absence of
//! content and is a valid snapshot on its own. Directories exclusively own
//! their children, so a tree never shares nodes and never contains cycles.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind tag used by the serialized form.
pub const KIND_DIRECTORY: i32 = 0;
/// Kind tag used by the serialized form.
pub const KIND_FILE: i32 = 1;
/// Kind tag used by the serialized form.
pub const KIND_SYMLINK: i32 = 2;

/// A single filesystem object in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// A directory and its named children
    Directory {
        /// Children keyed by name. Names are non-empty and contain no `/`.
        contents: BTreeMap<String, Entry>,
    },
    /// A regular file
    File {
        /// Whether the file is executable
        executable: bool,
        /// Content digest, never empty
        digest: Vec<u8>,
    },
    /// A symbolic link
    Symlink {
        /// Raw link target, never empty
        target: String,
    },
}

/// A structural invariant violation found while validating an entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entry at '{path}': {violation}")]
pub struct InvalidEntry {
    /// Slash-separated location of the offending entry, empty for the root
    pub path: String,
    /// What was wrong with it
    pub violation: Violation,
}

/// The specific invariant an entry violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("executable directory detected")]
    ExecutableDirectory,
    #[error("non-nil directory digest detected")]
    DirectoryDigest,
    #[error("non-empty symlink target detected for directory")]
    DirectoryTarget,
    #[error("empty content name detected")]
    EmptyName,
    #[error("content name contains path separator")]
    NameContainsSeparator,
    #[error("nil content detected")]
    NullContent,
    #[error("non-nil file contents detected")]
    FileContents,
    #[error("non-empty symlink target detected for file")]
    FileTarget,
    #[error("file with empty digest detected")]
    EmptyDigest,
    #[error("executable symlink detected")]
    ExecutableSymlink,
    #[error("non-nil symlink digest detected")]
    SymlinkDigest,
    #[error("non-nil symlink contents detected")]
    SymlinkContents,
    #[error("symlink with empty target detected")]
    EmptyTarget,
    #[error("unknown entry kind detected")]
    UnknownKind,
}

impl InvalidEntry {
    fn at(path: &str, violation: Violation) -> Self {
        Self {
            path: path.to_string(),
            violation,
        }
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn check_name(parent: &str, name: &str) -> Result<(), InvalidEntry> {
    if name.is_empty() {
        Err(InvalidEntry::at(parent, Violation::EmptyName))
    } else if name.contains('/') {
        Err(InvalidEntry::at(&join(parent, name), Violation::NameContainsSeparator))
    } else {
        Ok(())
    }
}

impl Entry {
    /// Create an empty directory
    #[must_use]
    pub fn directory() -> Self {
        Self::Directory {
            contents: BTreeMap::new(),
        }
    }

    /// Create a file entry
    #[must_use]
    pub fn file(digest: Vec<u8>, executable: bool) -> Self {
        Self::File { executable, digest }
    }

    /// Create a symlink entry
    #[must_use]
    pub fn symlink(target: impl Into<String>) -> Self {
        Self::Symlink {
            target: target.into(),
        }
    }

    /// Add a child to a directory, builder style.
    ///
    /// Only directories have children: on a file or symlink this panics in
    /// debug builds and discards `child` in release builds.
    #[must_use]
    pub fn with_child(mut self, name: impl Into<String>, child: Entry) -> Self {
        debug_assert!(
            matches!(self, Self::Directory { .. }),
            "with_child called on a non-directory entry"
        );
        if let Self::Directory { contents } = &mut self {
            contents.insert(name.into(), child);
        }
        self
    }

    /// Kind tag of this entry
    #[must_use]
    pub fn kind(&self) -> i32 {
        match self {
            Self::Directory { .. } => KIND_DIRECTORY,
            Self::File { .. } => KIND_FILE,
            Self::Symlink { .. } => KIND_SYMLINK,
        }
    }

    /// Whether the entry is an executable file
    #[must_use]
    pub fn executable(&self) -> bool {
        matches!(self, Self::File { executable: true, .. })
    }

    /// File digest, empty for other kinds
    #[must_use]
    pub fn digest(&self) -> &[u8] {
        match self {
            Self::File { digest, .. } => digest,
            _ => &[],
        }
    }

    /// Symlink target, empty for other kinds
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::Symlink { target } => target,
            _ => "",
        }
    }

    /// Directory contents, `None` for other kinds
    #[must_use]
    pub fn contents(&self) -> Option<&BTreeMap<String, Entry>> {
        match self {
            Self::Directory { contents } => Some(contents),
            _ => None,
        }
    }

    /// Mutable directory contents, `None` for other kinds
    pub fn contents_mut(&mut self) -> Option<&mut BTreeMap<String, Entry>> {
        match self {
            Self::Directory { contents } => Some(contents),
            _ => None,
        }
    }

    /// Ensure the invariants that construction can't rule out hold for the
    /// whole hierarchy: file digests and symlink targets are non-empty, and
    /// child names are non-empty and free of path separators.
    ///
    /// # Errors
    /// Returns the first violation found, at any depth.
    pub fn ensure_valid(&self) -> Result<(), InvalidEntry> {
        self.ensure_valid_at("")
    }

    fn ensure_valid_at(&self, path: &str) -> Result<(), InvalidEntry> {
        match self {
            Self::Directory { contents } => {
                for (name, child) in contents {
                    check_name(path, name)?;
                    child.ensure_valid_at(&join(path, name))?;
                }
                Ok(())
            }
            Self::File { digest, .. } => {
                if digest.is_empty() {
                    Err(InvalidEntry::at(path, Violation::EmptyDigest))
                } else {
                    Ok(())
                }
            }
            // The target itself is deliberately not validated: there's
            // nothing to check it against in raw mode.
            Self::Symlink { target } => {
                if target.is_empty() {
                    Err(InvalidEntry::at(path, Violation::EmptyTarget))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Total number of entries in the hierarchy rooted at this entry,
    /// including itself
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            // Overflow would need 2^64 nodes in memory.
            Self::Directory { contents } => 1 + contents.values().map(Entry::count).sum::<u64>(),
            _ => 1,
        }
    }

    /// Compare kind, executability, digest and target, ignoring contents
    pub(crate) fn equal_shallow(&self, other: &Self) -> bool {
        self.kind() == other.kind()
            && self.executable() == other.executable()
            && self.digest() == other.digest()
            && self.target() == other.target()
    }

    /// Full recursive equality. Child ordering is irrelevant.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        if !self.equal_shallow(other) {
            return false;
        }

        match (self, other) {
            (Self::Directory { contents }, Self::Directory { contents: others }) => {
                contents.len() == others.len()
                    && contents.iter().all(|(name, child)| {
                        others.get(name).is_some_and(|other| child.equal(other))
                    })
            }
            _ => true,
        }
    }

    /// Deep copy of the hierarchy. The copy shares no nodes with `self`.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Copy kind, executability, digest and target only. Directories come
    /// back empty.
    pub(crate) fn copy_slim(&self) -> Self {
        match self {
            Self::Directory { .. } => Self::directory(),
            other => other.clone(),
        }
    }

    /// Every entry in the hierarchy keyed by its slash-separated path (the
    /// root is keyed by the empty string). Directories appear without their
    /// contents.
    #[must_use]
    pub fn flatten(&self) -> BTreeMap<String, Entry> {
        let mut result = BTreeMap::new();
        self.flatten_into(String::new(), &mut result);
        result
    }

    fn flatten_into(&self, path: String, result: &mut BTreeMap<String, Entry>) {
        if let Self::Directory { contents } = self {
            for (name, child) in contents {
                child.flatten_into(join(&path, name), result);
            }
        }
        result.insert(path, self.copy_slim());
    }
}

/// Number of entries in a possibly-absent hierarchy
#[must_use]
pub fn count(entry: Option<&Entry>) -> u64 {
    entry.map_or(0, Entry::count)
}

/// Recursive equality of two possibly-absent hierarchies
#[must_use]
pub fn equal(a: Option<&Entry>, b: Option<&Entry>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.equal(b),
        _ => false,
    }
}

/// Validate a possibly-absent hierarchy. Absence is always valid.
///
/// # Errors
/// Returns the first violation found.
pub fn ensure_valid(entry: Option<&Entry>) -> Result<(), InvalidEntry> {
    entry.map_or(Ok(()), Entry::ensure_valid)
}

/// Untrusted, serialized form of an [`Entry`].
///
/// Every field is optional so that data from disk or the wire can express
/// anything, including illegal combinations. Convert with
/// `Entry::try_from`, which enforces the full set of invariants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawEntry {
    pub kind: i32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub executable: bool,
    #[serde(with = "hex_digest", skip_serializing_if = "Option::is_none")]
    pub digest: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<BTreeMap<String, Option<RawEntry>>>,
}

impl RawEntry {
    fn into_entry(self, path: &str) -> Result<Entry, InvalidEntry> {
        let fail = |violation| Err(InvalidEntry::at(path, violation));

        match self.kind {
            KIND_DIRECTORY => {
                if self.executable {
                    return fail(Violation::ExecutableDirectory);
                } else if self.digest.as_ref().is_some_and(|d| !d.is_empty()) {
                    return fail(Violation::DirectoryDigest);
                } else if !self.target.is_empty() {
                    return fail(Violation::DirectoryTarget);
                }

                let mut contents = BTreeMap::new();
                for (name, child) in self.contents.unwrap_or_default() {
                    check_name(path, &name)?;
                    let child_path = join(path, &name);
                    let Some(child) = child else {
                        return Err(InvalidEntry::at(&child_path, Violation::NullContent));
                    };
                    let child = child.into_entry(&child_path)?;
                    contents.insert(name, child);
                }
                Ok(Entry::Directory { contents })
            }
            KIND_FILE => {
                if self.contents.is_some() {
                    return fail(Violation::FileContents);
                } else if !self.target.is_empty() {
                    return fail(Violation::FileTarget);
                }

                match self.digest {
                    Some(digest) if !digest.is_empty() => Ok(Entry::File {
                        executable: self.executable,
                        digest,
                    }),
                    _ => fail(Violation::EmptyDigest),
                }
            }
            KIND_SYMLINK => {
                if self.executable {
                    return fail(Violation::ExecutableSymlink);
                } else if self.digest.as_ref().is_some_and(|d| !d.is_empty()) {
                    return fail(Violation::SymlinkDigest);
                } else if self.contents.is_some() {
                    return fail(Violation::SymlinkContents);
                } else if self.target.is_empty() {
                    return fail(Violation::EmptyTarget);
                }
                Ok(Entry::Symlink {
                    target: self.target,
                })
            }
            _ => fail(Violation::UnknownKind),
        }
    }
}

impl TryFrom<RawEntry> for Entry {
    type Error = InvalidEntry;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        raw.into_entry("")
    }
}

impl From<&Entry> for RawEntry {
    fn from(entry: &Entry) -> Self {
        match entry {
            Entry::Directory { contents } => Self {
                kind: KIND_DIRECTORY,
                contents: Some(
                    contents
                        .iter()
                        .map(|(name, child)| (name.clone(), Some(Self::from(child))))
                        .collect(),
                ),
                ..Self::default()
            },
            Entry::File { executable, digest } => Self {
                kind: KIND_FILE,
                executable: *executable,
                digest: Some(digest.clone()),
                ..Self::default()
            },
            Entry::Symlink { target } => Self {
                kind: KIND_SYMLINK,
                target: target.clone(),
                ..Self::default()
            },
        }
    }
}

impl Serialize for Entry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawEntry::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawEntry::deserialize(deserializer)?;
        Entry::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Digests travel as lowercase hex strings.
mod hex_digest {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(digest: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match digest {
            Some(digest) => serializer.serialize_str(&hex::encode(digest)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
