//! Build snapshot trees from disk with gitignore support via the `ignore` crate

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use color_eyre::eyre::{OptionExt as _, bail, eyre};
use ignore::WalkBuilder;
use tracing::debug;

use crate::entry::Entry;
use crate::hash::Version;

/// Scanner producing an [`Entry`] hierarchy for a path on disk
pub struct Scanner {
    root: PathBuf,
    /// Additional ignore files beyond .gitignore
    extra_ignores: Vec<PathBuf>,
}

impl Scanner {
    /// Create a new scanner for the given root
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_ignores: Vec::new(),
        }
    }

    /// Add an extra gitignore-format file to respect
    #[must_use]
    pub fn ignore_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_ignores.push(path.into());
        self
    }

    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(false) // Include hidden files
            .git_ignore(true) // Respect .gitignore
            .git_global(true) // Respect global gitignore
            .git_exclude(true) // Respect .git/info/exclude
            .require_git(false) // Work even without .git directory
            .follow_links(false) // Record links, don't traverse them
            .filter_entry(|e| e.file_name() != ".git");

        for path in &self.extra_ignores {
            if let Some(err) = builder.add_ignore(path) {
                debug!("Ignoring unreadable ignore file {}: {err}", path.display());
            }
        }

        builder
    }

    /// Scan the root with digests from `version`.
    ///
    /// Returns `None` if the root doesn't exist. A root that is itself a
    /// file yields a single file entry.
    ///
    /// # Errors
    /// Returns an error if traversal, hashing, or reading a link fails, or if
    /// a name isn't valid UTF-8.
    pub fn scan(&self, version: Version) -> Result<Option<Entry>> {
        let metadata = match fs::symlink_metadata(&self.root) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_file() {
            return Ok(Some(file_entry(&self.root, &metadata, version)?));
        } else if !metadata.is_dir() {
            bail!("scan root {} is not a directory or file", self.root.display());
        }

        let mut root = Entry::directory();
        for result in self.walk_builder().build() {
            let entry = result?;
            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root)?;
            let file_type = entry
                .file_type()
                .ok_or_eyre("walker yielded an entry without a file type")?;

            let node = if file_type.is_dir() {
                Entry::directory()
            } else if file_type.is_symlink() {
                let target = fs::read_link(path)?
                    .into_os_string()
                    .into_string()
                    .map_err(|t| eyre!("non UTF-8 symlink target: {t:?}"))?;
                Entry::symlink(target)
            } else if file_type.is_file() {
                file_entry(path, &entry.metadata()?, version)?
            } else {
                debug!("Skipping special file {}", path.display());
                continue;
            };

            insert(&mut root, relative, node)?;
        }

        Ok(Some(root))
    }
}

fn file_entry(path: &Path, metadata: &fs::Metadata, version: Version) -> Result<Entry> {
    let digest = version.digest_file(path)?;

    #[cfg(unix)]
    let executable = {
        use std::os::unix::fs::PermissionsExt as _;
        metadata.permissions().mode() & 0o100 != 0
    };
    #[cfg(not(unix))]
    let executable = {
        let _ = metadata;
        false
    };

    Ok(Entry::file(digest, executable))
}

/// Place `node` at `relative` inside `root`. Parents are walked before their
/// children, so they already exist.
fn insert(root: &mut Entry, relative: &Path, node: Entry) -> Result<()> {
    let mut names = relative
        .components()
        .map(|c| {
            c.as_os_str()
                .to_str()
                .map(str::to_string)
                .ok_or_else(|| eyre!("non UTF-8 path: {}", relative.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let name = names.pop().ok_or_eyre("empty relative path")?;

    let mut parent = root;
    for component in &names {
        parent = parent
            .contents_mut()
            .and_then(|contents| contents.get_mut(component))
            .ok_or_else(|| eyre!("parent of {} was not scanned", relative.display()))?;
    }

    parent
        .contents_mut()
        .ok_or_else(|| eyre!("parent of {} is not a directory", relative.display()))?
        .insert(name, node);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_missing_root() {
        let dir = TempDir::new().unwrap();
        let scanned = Scanner::new(dir.path().join("nope"))
            .scan(Version::Version2)
            .unwrap();
        assert!(scanned.is_none());
    }

    #[test]
    fn test_scan_file_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("single.txt");
        fs::write(&path, "hello").unwrap();

        let scanned = Scanner::new(&path).scan(Version::Version2).unwrap().unwrap();
        assert_eq!(scanned, Entry::file(Version::Version2.digest(b"hello"), false));
    }

    #[test]
    fn test_scan_nested_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/dir")).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("sub/dir/deep.txt"), "deep").unwrap();

        let scanned = Scanner::new(dir.path())
            .scan(Version::Version1)
            .unwrap()
            .unwrap();
        scanned.ensure_valid().unwrap();

        // root, empty, root.txt, sub, sub/nested.txt, sub/dir, sub/dir/deep.txt
        assert_eq!(scanned.count(), 7);
        let flat = scanned.flatten();
        assert_eq!(
            flat["sub/dir/deep.txt"],
            Entry::file(Version::Version1.digest(b"deep"), false)
        );
        assert_eq!(flat["empty"], Entry::directory());
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), "").unwrap();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("keep.txt"), "keep").unwrap();
        fs::write(dir.path().join("ignore.log"), "ignore").unwrap();

        let scanned = Scanner::new(dir.path())
            .scan(Version::Version2)
            .unwrap()
            .unwrap();
        let names: Vec<_> = scanned.contents().unwrap().keys().cloned().collect();
        assert_eq!(names, vec![".gitignore", "keep.txt"]);
    }

    #[test]
    fn test_scan_extra_ignore_file() {
        let dir = TempDir::new().unwrap();
        let ignores = TempDir::new().unwrap();
        let ignore_path = ignores.path().join("ignore");
        fs::write(&ignore_path, "secret.txt\n").unwrap();
        fs::write(dir.path().join("secret.txt"), "s").unwrap();
        fs::write(dir.path().join("public.txt"), "p").unwrap();

        let scanned = Scanner::new(dir.path())
            .ignore_file(&ignore_path)
            .scan(Version::Version2)
            .unwrap()
            .unwrap();
        let contents = scanned.contents().unwrap();
        assert!(contents.contains_key("public.txt"));
        assert!(!contents.contains_key("secret.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_symlinks_and_executables() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink("/does/not/exist", dir.path().join("dangling")).unwrap();

        let scanned = Scanner::new(dir.path())
            .scan(Version::Version2)
            .unwrap()
            .unwrap();
        let contents = scanned.contents().unwrap();
        assert!(contents["run.sh"].executable());
        assert_eq!(contents["link"], Entry::symlink("run.sh"));
        assert_eq!(contents["dangling"], Entry::symlink("/does/not/exist"));
    }
}
