//! Staging round trips through the public Sinker/Provider surface

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use duosync_core::staging::path_for_staging;
use duosync_core::{
    Entry, HashingReader, Provider, Sink, Sinker, StagingCoordinator, StagingError, Version,
};
use tempfile::TempDir;

fn stage(coordinator: &mut StagingCoordinator, path: &str, data: &[u8]) {
    let mut sink = coordinator.sink(path).unwrap();
    // Several writes, so digesting has to be incremental.
    for chunk in data.chunks(7) {
        sink.write_all(chunk).unwrap();
    }
    sink.close().unwrap();
}

fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}

#[test]
fn test_round_trip() {
    for version in [Version::Version1, Version::Version2] {
        let dir = TempDir::new().unwrap();
        let mut coordinator = StagingCoordinator::with_root(dir.path().join("staging"), version);
        let data = b"the quick brown fox jumps over the lazy dog";

        stage(&mut coordinator, "docs/fox.txt", data);

        let entry = Entry::file(version.digest(data), false);
        let provided = coordinator.provide("docs/fox.txt", &entry).unwrap();
        assert_eq!(fs::read(&provided).unwrap(), data);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = fs::metadata(&provided).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}

#[test]
fn test_empty_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);

    let sink = coordinator.sink("empty").unwrap();
    sink.close().unwrap();

    let entry = Entry::file(Version::Version2.digest(b""), false);
    let provided = coordinator.provide("empty", &entry).unwrap();
    assert!(fs::read(provided).unwrap().is_empty());
}

#[test]
fn test_identical_content_deduplicated() {
    let dir = TempDir::new().unwrap();
    let mut coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);
    let data = b"shared content";

    stage(&mut coordinator, "a/one.txt", data);
    stage(&mut coordinator, "b/two.txt", data);

    let files = files_under(dir.path());
    assert_eq!(files.len(), 1, "{files:?}");

    let entry = Entry::file(Version::Version2.digest(data), false);
    let first = coordinator.provide("a/one.txt", &entry).unwrap();
    let second = coordinator.provide("b/two.txt", &entry).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(first).unwrap(), data);
}

#[test]
fn test_failed_relocation_leaves_no_temporary_file() {
    let dir = TempDir::new().unwrap();
    let data = b"blocked content";
    let digest = Version::Version2.digest(data);
    let (_, prefix) = path_for_staging(dir.path(), &digest).unwrap();

    // A regular file where the shard directory should go.
    let blocker = dir.path().join(&prefix);
    fs::write(&blocker, b"in the way").unwrap();

    let mut coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);
    let mut sink = coordinator.sink("blocked.txt").unwrap();
    sink.write_all(data).unwrap();
    let err = sink.close().unwrap_err();
    assert!(matches!(err, StagingError::Io { .. }), "{err}");

    assert_eq!(files_under(dir.path()), vec![blocker]);
}

#[test]
fn test_stage_from_reader_digests_in_one_pass() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("source.bin");
    let data: Vec<u8> = (0..=255u8).cycle().take(150 * 1024).collect();
    fs::write(&source, &data).unwrap();

    let mut coordinator = StagingCoordinator::with_root(dir.path().join("staging"), Version::Version1);
    let mut reader = HashingReader::new(fs::File::open(&source).unwrap(), Version::Version1);
    let mut sink = coordinator.sink("source.bin").unwrap();
    std::io::copy(&mut reader, &mut sink).unwrap();
    sink.close().unwrap();

    let digest = reader.finalize();
    assert_eq!(digest, Version::Version1.digest_file(&source).unwrap());

    let provided = coordinator
        .provide("source.bin", &Entry::file(digest, false))
        .unwrap();
    assert_eq!(fs::read(provided).unwrap(), data);
}

#[test]
fn test_provide_unstaged_is_not_found() {
    let dir = TempDir::new().unwrap();
    let coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);

    let entry = Entry::file(Version::Version2.digest(b"never sent"), false);
    let err = coordinator.provide("missing.txt", &entry).unwrap_err();
    assert!(matches!(err, StagingError::NotFound(_)), "{err}");
}

#[test]
fn test_provide_empty_digest() {
    let dir = TempDir::new().unwrap();
    let coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);

    let err = coordinator
        .provide("bad", &Entry::file(Vec::new(), false))
        .unwrap_err();
    assert!(matches!(err, StagingError::EmptyDigest));
}

#[test]
fn test_wipe_then_provide_and_restage() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("staging");
    let mut coordinator = StagingCoordinator::with_root(&root, Version::Version1);
    let data = b"staged before wipe";
    let entry = Entry::file(Version::Version1.digest(data), false);

    stage(&mut coordinator, "file.txt", data);
    coordinator.provide("file.txt", &entry).unwrap();

    coordinator.wipe().unwrap();
    let err = coordinator.provide("file.txt", &entry).unwrap_err();
    assert!(matches!(err, StagingError::NotFound(_)), "{err}");

    // Storage is recreated from scratch, including the shard directory.
    stage(&mut coordinator, "file.txt", data);
    let provided = coordinator.provide("file.txt", &entry).unwrap();
    assert_eq!(fs::read(provided).unwrap(), data);
}

#[test]
fn test_wipe_nonexistent_root() {
    let dir = TempDir::new().unwrap();
    let mut coordinator =
        StagingCoordinator::with_root(dir.path().join("never-created"), Version::Version2);
    coordinator.wipe().unwrap();
    coordinator.wipe().unwrap();
}

#[cfg(unix)]
#[test]
fn test_executable_bit_propagation() {
    use std::os::unix::fs::PermissionsExt as _;

    let dir = TempDir::new().unwrap();
    let mut coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);
    let data = b"#!/bin/sh\necho hi\n";
    let digest = Version::Version2.digest(data);
    stage(&mut coordinator, "run.sh", data);

    let mode_for = |executable: bool| {
        let entry = Entry::file(digest.clone(), executable);
        let path = coordinator.provide("run.sh", &entry).unwrap();
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    };

    assert_eq!(mode_for(true), 0o700);
    assert_eq!(mode_for(false), 0o600);
    assert_eq!(mode_for(true) & 0o100, 0o100);
}

#[test]
fn test_generic_sinker_and_provider() {
    fn receive<S: Sinker>(sinker: &mut S, path: &str, data: &[u8]) -> Result<(), StagingError> {
        let mut sink = sinker.sink(path)?;
        sink.write_all(data).map_err(|e| StagingError::Io {
            context: "write",
            path: PathBuf::from(path),
            source: e,
        })?;
        sink.close()
    }

    fn resolve(provider: &impl Provider, path: &str, entry: &Entry) -> PathBuf {
        provider.provide(path, entry).unwrap()
    }

    let dir = TempDir::new().unwrap();
    let mut coordinator = StagingCoordinator::with_root(dir.path(), Version::Version2);
    receive(&mut coordinator, "x", b"generic").unwrap();

    let entry = Entry::file(Version::Version2.digest(b"generic"), false);
    assert_eq!(fs::read(resolve(&coordinator, "x", &entry)).unwrap(), b"generic");
}
