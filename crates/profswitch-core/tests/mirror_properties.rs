//! Properties of the tree synchronizer
//!
//! Idempotence, exclusion preservation, completeness and exactness of
//! `mirror` on realistic application state trees.

use profswitch_core::{mirror, Exclusions, ProfileError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    kind: &'static str,
    content: Vec<u8>,
    readonly: bool,
    #[cfg(unix)]
    mode: u32,
    mtime: filetime::FileTime,
}

/// Everything observable about a tree, keyed by relative path
fn snapshot(root: &Path) -> BTreeMap<PathBuf, Entry> {
    let mut entries = BTreeMap::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let meta = entry.path().symlink_metadata().unwrap();
        let (kind, content) = if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path()).unwrap();
            ("link", target.to_string_lossy().into_owned().into_bytes())
        } else if meta.is_dir() {
            ("dir", Vec::new())
        } else {
            ("file", fs::read(entry.path()).unwrap())
        };
        entries.insert(
            entry.path().strip_prefix(root).unwrap().to_path_buf(),
            Entry {
                kind,
                content,
                readonly: meta.permissions().readonly(),
                #[cfg(unix)]
                mode: std::os::unix::fs::PermissionsExt::mode(&meta.permissions()),
                mtime: filetime::FileTime::from_last_modification_time(&meta),
            },
        );
    }
    entries
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A trimmed-down Chromium-embedding app state directory
fn app_state(root: &Path) {
    write(root, "config.json", r#"{"theme":"dark"}"#);
    write(root, "Cookies", "session=abc");
    write(root, "Local Storage/leveldb/000003.log", "token");
    write(root, "Local Storage/leveldb/CURRENT", "MANIFEST-000001");
    write(root, "IndexedDB/https_open.spotify.com_0.indexeddb.leveldb/LOG", "log");
    write(root, "Cache/Cache_Data/data_0", "cached bytes");
    write(root, "GPUCache/index", "gpu");
    write(root, "Service Worker/Database/000001.log", "sw db");
    write(root, "Service Worker/CacheStorage/abc/index", "sw cache");
}

fn exclusions() -> Exclusions {
    Exclusions::from_paths(["Cache", "GPUCache", "Service Worker/CacheStorage"])
}

#[test]
fn mirror_is_idempotent() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    app_state(a.path());
    write(b.path(), "stale/file", "old");

    mirror(a.path(), b.path(), &exclusions()).unwrap();
    let first = snapshot(b.path());
    let report = mirror(a.path(), b.path(), &exclusions()).unwrap();
    let second = snapshot(b.path());

    assert_eq!(first, second);
    assert!(report.is_noop(), "second mirror did work: {report:?}");
}

#[test]
fn excluded_paths_are_never_copied_or_touched() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    app_state(a.path());
    write(b.path(), "Cache/Cache_Data/data_9", "destination cache");
    let before = snapshot(b.path());

    mirror(a.path(), b.path(), &exclusions()).unwrap();
    let after = snapshot(b.path());

    // Source caches never arrive.
    assert!(!b.path().join("GPUCache").exists());
    assert!(!b.path().join("Service Worker/CacheStorage").exists());
    assert!(!b.path().join("Cache/Cache_Data/data_0").exists());
    // Destination caches stay exactly as they were.
    for (rel, entry) in before.iter().filter(|(rel, _)| rel.starts_with("Cache")) {
        assert_eq!(after.get(rel), Some(entry), "{} changed", rel.display());
    }
    // The non-excluded sibling is mirrored.
    assert_eq!(
        fs::read_to_string(b.path().join("Service Worker/Database/000001.log")).unwrap(),
        "sw db"
    );
}

#[test]
fn mirror_is_complete() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    app_state(a.path());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(a.path().join("Cookies"), fs::Permissions::from_mode(0o600)).unwrap();
        fs::set_permissions(a.path().join("config.json"), fs::Permissions::from_mode(0o444))
            .unwrap();
    }

    mirror(a.path(), b.path(), &exclusions()).unwrap();

    let ex = exclusions();
    let src = snapshot(a.path());
    let dst = snapshot(b.path());
    for (rel, entry) in src.iter().filter(|(rel, _)| !ex.is_excluded(rel)) {
        let copied = dst.get(rel).unwrap_or_else(|| panic!("{} missing", rel.display()));
        assert_eq!(copied.kind, entry.kind);
        assert_eq!(copied.content, entry.content);
        assert_eq!(copied.readonly, entry.readonly);
        #[cfg(unix)]
        assert_eq!(copied.mode, entry.mode, "{} mode differs", rel.display());
        if entry.kind == "file" {
            assert_eq!(copied.mtime, entry.mtime, "{} mtime differs", rel.display());
        }
    }
}

#[test]
fn mirror_is_exact() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    app_state(a.path());
    write(b.path(), "Cookies-journal", "leftover");
    write(b.path(), "Old Profile Data/blob", "leftover");
    write(b.path(), "Local Storage/leveldb/000002.log", "leftover");

    mirror(a.path(), b.path(), &exclusions()).unwrap();

    let ex = exclusions();
    let src = snapshot(a.path());
    let dst = snapshot(b.path());
    for rel in dst.keys().filter(|rel| !ex.is_excluded(rel)) {
        assert!(src.contains_key(rel), "{} should have been removed", rel.display());
    }
    assert!(!b.path().join("Old Profile Data").exists());
}

#[test]
fn modified_files_are_recopied() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    app_state(a.path());
    mirror(a.path(), b.path(), &exclusions()).unwrap();

    write(a.path(), "config.json", r#"{"theme":"light","zoom":1.25}"#);
    let report = mirror(a.path(), b.path(), &exclusions()).unwrap();

    assert_eq!(report.files_copied, 1);
    assert_eq!(
        fs::read_to_string(b.path().join("config.json")).unwrap(),
        r#"{"theme":"light","zoom":1.25}"#
    );
}

#[test]
fn same_size_rewrite_within_one_tick_is_recopied() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    app_state(a.path());
    mirror(a.path(), b.path(), &exclusions()).unwrap();

    // Same length, and the clock has not ticked as far as the filesystem can tell.
    let cookies = a.path().join("Cookies");
    let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&cookies).unwrap());
    fs::write(&cookies, "session=xyz").unwrap();
    filetime::set_file_mtime(&cookies, mtime).unwrap();

    let report = mirror(a.path(), b.path(), &exclusions()).unwrap();

    assert_eq!(report.files_copied, 1);
    assert_eq!(
        snapshot(b.path()).get(Path::new("Cookies")),
        snapshot(a.path()).get(Path::new("Cookies"))
    );
    assert_eq!(fs::read_to_string(b.path().join("Cookies")).unwrap(), "session=xyz");
}

#[test]
fn missing_source_changes_nothing() {
    let b = TempDir::new().unwrap();
    write(b.path(), "Cookies", "keep");
    let before = snapshot(b.path());

    let err = mirror(&b.path().join("nope"), b.path(), &exclusions()).unwrap_err();

    assert!(matches!(err, ProfileError::SourceMissing(_)));
    assert_eq!(snapshot(b.path()), before);
}

#[cfg(unix)]
#[test]
fn same_directory_through_symlink_is_rejected() {
    let a = TempDir::new().unwrap();
    let links = TempDir::new().unwrap();
    let alias = links.path().join("alias");
    std::os::unix::fs::symlink(a.path(), &alias).unwrap();

    let err = mirror(a.path(), &alias, &exclusions()).unwrap_err();
    assert!(matches!(err, ProfileError::InvalidOperation(_)));
}
