//! Tree synchronizer
//!
//! `mirror(source, destination, exclusions)` makes `destination` an exact
//! copy of `source` outside the excluded sub-paths. It runs in two phases:
//! [`SyncPlan::build`] walks both trees and diffs them into an ordered list
//! of [`SyncOp`]s, then [`SyncPlan::apply`] executes that list.
//!
//! Apply order:
//!
//! 1. removals of destination entries that are absent from `source`
//! 2. creations and copies, parents before children
//! 3. directory permissions and timestamps, deepest first
//!
//! Anything under an excluded path in `destination` is never read, changed
//! or removed.

use filetime::FileTime;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs::{self, FileType, Metadata, Permissions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ProfileError, Result};

/// Suffix of the temporary sibling a file is copied to before being renamed into place
const PARTIAL_SUFFIX: &str = ".profswitch-partial";

const COMPARE_CHUNK: usize = 64 * 1024;

/// Relative sub-paths skipped by a mirror, anchored at the tree root
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    paths: Vec<PathBuf>,
}

impl Exclusions {
    /// No exclusions
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from relative paths; `.` components are dropped
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths = paths
            .into_iter()
            .map(|p| {
                let p: PathBuf = p.into();
                p.components()
                    .filter(|c| !matches!(c, Component::CurDir))
                    .collect::<PathBuf>()
            })
            .collect();
        Self { paths }
    }

    /// Rejects empty, absolute and `..` entries
    pub fn validate(&self) -> Result<()> {
        for path in &self.paths {
            let plain = path.components().next().is_some()
                && path.components().all(|c| matches!(c, Component::Normal(_)));
            if !plain {
                return Err(ProfileError::Configuration(format!(
                    "exclusion {} must be a relative path without '..'",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    /// True if `rel` is an excluded path or lies beneath one
    pub fn is_excluded(&self, rel: &Path) -> bool {
        self.paths.iter().any(|ex| rel.starts_with(ex))
    }

    /// True if some excluded path lies strictly beneath `rel`
    pub fn contains_excluded(&self, rel: &Path) -> bool {
        self.paths
            .iter()
            .any(|ex| ex.starts_with(rel) && ex.as_path() != rel)
    }

    /// Iterate over the excluded paths
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    /// Number of exclusions
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// True when nothing is excluded
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Kind of a tree entry; links are never followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    /// Sockets, FIFOs and device nodes
    Special,
}

impl EntryKind {
    fn of(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Dir
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Special
        }
    }
}

/// Single step of a synchronization, relative to the tree roots
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    /// Delete a destination entry (recursively for directories)
    Remove { rel: PathBuf, kind: EntryKind },
    /// Create a destination directory
    CreateDir { rel: PathBuf },
    /// Copy a regular file with its permissions and timestamps
    CopyFile { rel: PathBuf },
    /// Recreate a symbolic link pointing at `target`
    CopyLink { rel: PathBuf, target: PathBuf },
    /// Fix permission bits of an otherwise unchanged file
    SetPermissions { rel: PathBuf, permissions: Permissions },
    /// Apply directory permissions and timestamps once its contents are final
    FinishDir {
        rel: PathBuf,
        permissions: Permissions,
        atime: FileTime,
        mtime: FileTime,
    },
}

impl SyncOp {
    /// Path the operation acts on, relative to the roots
    pub fn rel(&self) -> &Path {
        match self {
            Self::Remove { rel, .. }
            | Self::CreateDir { rel }
            | Self::CopyFile { rel }
            | Self::CopyLink { rel, .. }
            | Self::SetPermissions { rel, .. }
            | Self::FinishDir { rel, .. } => rel,
        }
    }

    /// Directory whose listing this operation changes
    fn touched_parent(&self) -> Option<PathBuf> {
        match self {
            Self::Remove { rel, .. }
            | Self::CreateDir { rel }
            | Self::CopyFile { rel }
            | Self::CopyLink { rel, .. } => rel.parent().map(Path::to_path_buf),
            Self::SetPermissions { .. } | Self::FinishDir { .. } => None,
        }
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove { rel, .. } => write!(f, "remove  {}", rel.display()),
            Self::CreateDir { rel } => write!(f, "mkdir   {}", rel.display()),
            Self::CopyFile { rel } => write!(f, "copy    {}", rel.display()),
            Self::CopyLink { rel, target } => {
                write!(f, "link    {} -> {}", rel.display(), target.display())
            }
            Self::SetPermissions { rel, .. } => write!(f, "chmod   {}", rel.display()),
            Self::FinishDir { rel, .. } => write!(f, "touch   {}/", rel.display()),
        }
    }
}

/// Counters describing what a mirror did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub dirs_created: usize,
    pub files_copied: usize,
    pub links_copied: usize,
    pub permissions_updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl SyncReport {
    /// True when the destination already matched the source
    pub fn is_noop(&self) -> bool {
        self.dirs_created == 0
            && self.files_copied == 0
            && self.links_copied == 0
            && self.permissions_updated == 0
            && self.removed == 0
    }
}

/// Diff between a source and a destination tree
#[derive(Debug)]
pub struct SyncPlan {
    source: PathBuf,
    destination: PathBuf,
    ops: Vec<SyncOp>,
    unchanged: usize,
}

impl SyncPlan {
    /// Walk both trees and compute the operations that make `destination`
    /// mirror `source`. Nothing is written.
    pub fn build(source: &Path, destination: &Path, exclusions: &Exclusions) -> Result<Self> {
        exclusions.validate()?;
        check_roots(source, destination)?;

        let mut ops = Vec::new();
        let mut removals = Vec::new();
        let mut seen: HashMap<PathBuf, EntryKind> = HashMap::new();
        let mut dir_meta: HashMap<PathBuf, Metadata> = HashMap::new();
        let mut stale_dirs: BTreeSet<PathBuf> = BTreeSet::new();
        // Directories created by this plan; their children cannot exist yet.
        let mut fresh_dirs: HashSet<PathBuf> = HashSet::new();
        let mut unchanged = 0;

        let root_meta =
            fs::metadata(source).map_err(|e| ProfileError::sync("read", source, e))?;
        dir_meta.insert(PathBuf::new(), root_meta);
        // The roots themselves may be symlinks to directories.
        let dest_root = match fs::metadata(destination) {
            Ok(meta) => Some(meta),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(ProfileError::sync("inspect", destination, e)),
        };
        match dest_root {
            None => {
                ops.push(SyncOp::CreateDir { rel: PathBuf::new() });
                stale_dirs.insert(PathBuf::new());
                fresh_dirs.insert(PathBuf::new());
            }
            Some(meta) if meta.is_dir() => {
                if dir_differs(&dir_meta[Path::new("")], &meta) {
                    stale_dirs.insert(PathBuf::new());
                }
            }
            Some(_) => {
                return Err(ProfileError::InvalidOperation(format!(
                    "destination {} exists and is not a directory",
                    destination.display()
                )))
            }
        }

        // Source pass: everything that must exist in the destination.
        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(source) {
                Ok(rel) => !exclusions.is_excluded(rel),
                Err(_) => true,
            });

        for entry in walker {
            let entry = entry.map_err(|e| walk_error(source, e))?;
            let rel = relative(entry.path(), source)?;
            let kind = EntryKind::of(entry.file_type());
            let src_meta = entry
                .metadata()
                .map_err(|e| walk_error(entry.path(), e))?;
            let dst_path = destination.join(&rel);
            let parent_fresh = rel.parent().map_or(false, |p| fresh_dirs.contains(p));
            let dst_meta = if parent_fresh {
                None
            } else {
                inspect(&dst_path)?
            };
            let dst_kind = dst_meta.as_ref().map(|m| EntryKind::of(m.file_type()));

            if kind == EntryKind::Special {
                debug!(path = %rel.display(), "skipping special file");
                continue;
            }
            seen.insert(rel.clone(), kind);

            if let Some(existing) = dst_kind {
                if existing != kind {
                    if existing == EntryKind::Dir && exclusions.contains_excluded(&rel) {
                        return Err(ProfileError::sync(
                            "replace",
                            dst_path,
                            std::io::Error::new(
                                ErrorKind::Other,
                                "directory holds excluded paths and cannot be replaced",
                            ),
                        ));
                    }
                    ops.push(SyncOp::Remove {
                        rel: rel.clone(),
                        kind: existing,
                    });
                }
            }
            let same_kind = dst_kind == Some(kind);

            match kind {
                EntryKind::Dir => {
                    match dst_meta.as_ref().filter(|_| same_kind) {
                        Some(meta) => {
                            if dir_differs(&src_meta, meta) {
                                stale_dirs.insert(rel.clone());
                            }
                        }
                        None => {
                            ops.push(SyncOp::CreateDir { rel: rel.clone() });
                            stale_dirs.insert(rel.clone());
                            fresh_dirs.insert(rel.clone());
                        }
                    }
                    dir_meta.insert(rel, src_meta);
                }
                EntryKind::File => {
                    let current = match dst_meta.as_ref().filter(|_| same_kind) {
                        Some(meta) if file_matches(&src_meta, meta) => {
                            same_contents(entry.path(), &dst_path)?.then_some(meta)
                        }
                        _ => None,
                    };
                    match current {
                        Some(meta) if src_meta.permissions() != meta.permissions() => {
                            ops.push(SyncOp::SetPermissions {
                                rel,
                                permissions: src_meta.permissions(),
                            });
                        }
                        Some(_) => unchanged += 1,
                        None => ops.push(SyncOp::CopyFile { rel }),
                    }
                }
                EntryKind::Symlink => {
                    let target = fs::read_link(entry.path())
                        .map_err(|e| ProfileError::sync("read link", entry.path(), e))?;
                    let current = if same_kind {
                        Some(
                            fs::read_link(&dst_path)
                                .map_err(|e| ProfileError::sync("read link", &dst_path, e))?,
                        )
                    } else {
                        None
                    };
                    if current.as_ref() == Some(&target) {
                        unchanged += 1;
                    } else {
                        if same_kind {
                            ops.push(SyncOp::Remove {
                                rel: rel.clone(),
                                kind: EntryKind::Symlink,
                            });
                        }
                        ops.push(SyncOp::CopyLink { rel, target });
                    }
                }
                EntryKind::Special => {}
            }
        }

        // Destination pass: everything that must go.
        if destination.is_dir() {
            let mut walker = WalkDir::new(destination)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter();

            while let Some(entry) = walker.next() {
                let entry = entry.map_err(|e| walk_error(destination, e))?;
                let rel = relative(entry.path(), destination)?;
                let is_dir = entry.file_type().is_dir();

                if exclusions.is_excluded(&rel) {
                    if is_dir {
                        walker.skip_current_dir();
                    }
                    continue;
                }

                match seen.get(&rel) {
                    Some(kind) => {
                        // Already scheduled for wholesale replacement.
                        if is_dir && *kind != EntryKind::Dir {
                            walker.skip_current_dir();
                        }
                    }
                    None => {
                        if is_dir && exclusions.contains_excluded(&rel) {
                            continue;
                        }
                        removals.push(SyncOp::Remove {
                            rel,
                            kind: EntryKind::of(entry.file_type()),
                        });
                        if is_dir {
                            walker.skip_current_dir();
                        }
                    }
                }
            }
        }

        for op in removals.iter().chain(ops.iter()) {
            if let Some(parent) = op.touched_parent() {
                stale_dirs.insert(parent);
            }
        }

        let mut finish: Vec<PathBuf> = stale_dirs
            .into_iter()
            .filter(|rel| dir_meta.contains_key(rel))
            .collect();
        finish.sort_by(|a, b| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then_with(|| a.cmp(b))
        });

        let mut plan_ops = removals;
        plan_ops.extend(ops);
        for rel in finish {
            let meta = &dir_meta[&rel];
            plan_ops.push(SyncOp::FinishDir {
                permissions: meta.permissions(),
                atime: FileTime::from_last_access_time(meta),
                mtime: FileTime::from_last_modification_time(meta),
                rel,
            });
        }

        Ok(Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            ops: plan_ops,
            unchanged,
        })
    }

    /// Planned operations, in apply order
    pub fn ops(&self) -> &[SyncOp] {
        &self.ops
    }

    /// Entries already in sync
    pub fn unchanged(&self) -> usize {
        self.unchanged
    }

    /// True when applying would change nothing
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Execute the plan. Stops at the first error; the destination is then
    /// partially synchronized.
    pub fn apply(self) -> Result<SyncReport> {
        let mut report = SyncReport {
            unchanged: self.unchanged,
            ..SyncReport::default()
        };

        for op in &self.ops {
            debug!(op = %op, "sync");
            let src = self.source.join(op.rel());
            let dst = self.destination.join(op.rel());
            match op {
                SyncOp::Remove { kind, .. } => {
                    remove_entry(&dst, *kind)?;
                    report.removed += 1;
                }
                SyncOp::CreateDir { .. } => {
                    fs::create_dir_all(&dst).map_err(|e| ProfileError::sync("create", &dst, e))?;
                    report.dirs_created += 1;
                }
                SyncOp::CopyFile { .. } => {
                    copy_file(&src, &dst)?;
                    report.files_copied += 1;
                }
                SyncOp::CopyLink { target, .. } => {
                    copy_link(&src, target, &dst)?;
                    report.links_copied += 1;
                }
                SyncOp::SetPermissions { permissions, .. } => {
                    fs::set_permissions(&dst, permissions.clone())
                        .map_err(|e| ProfileError::sync("set permissions on", &dst, e))?;
                    report.permissions_updated += 1;
                }
                SyncOp::FinishDir {
                    permissions,
                    atime,
                    mtime,
                    ..
                } => {
                    fs::set_permissions(&dst, permissions.clone())
                        .map_err(|e| ProfileError::sync("set permissions on", &dst, e))?;
                    filetime::set_file_times(&dst, *atime, *mtime)
                        .map_err(|e| ProfileError::sync("set times on", &dst, e))?;
                }
            }
        }

        info!(
            source = %self.source.display(),
            destination = %self.destination.display(),
            copied = report.files_copied,
            removed = report.removed,
            unchanged = report.unchanged,
            "mirror complete"
        );
        Ok(report)
    }
}

/// Make `destination` an exact mirror of `source` outside `exclusions`.
pub fn mirror(source: &Path, destination: &Path, exclusions: &Exclusions) -> Result<SyncReport> {
    SyncPlan::build(source, destination, exclusions)?.apply()
}

fn check_roots(source: &Path, destination: &Path) -> Result<()> {
    let source_real = match fs::canonicalize(source) {
        Ok(path) if path.is_dir() => path,
        Ok(_) => return Err(ProfileError::SourceMissing(source.to_path_buf())),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ProfileError::SourceMissing(source.to_path_buf()))
        }
        Err(e) => return Err(ProfileError::sync("resolve", source, e)),
    };
    let destination_real = resolve_lenient(destination);

    if source_real == destination_real {
        return Err(ProfileError::InvalidOperation(format!(
            "source and destination are the same directory: {}",
            source_real.display()
        )));
    }
    if destination_real.starts_with(&source_real) || source_real.starts_with(&destination_real) {
        return Err(ProfileError::InvalidOperation(format!(
            "{} and {} are nested inside each other",
            source.display(),
            destination.display()
        )));
    }
    Ok(())
}

/// Canonicalize the longest existing prefix of `path`, keeping the rest as is.
fn resolve_lenient(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return real;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            resolve_lenient(parent).join(name)
        }
        _ => path.to_path_buf(),
    }
}

fn inspect(path: &Path) -> Result<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProfileError::sync("inspect", path, e)),
    }
}

fn relative(path: &Path, root: &Path) -> Result<PathBuf> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| {
            ProfileError::InvalidOperation(format!(
                "{} escaped the tree rooted at {}",
                path.display(),
                root.display()
            ))
        })
}

fn walk_error(path: &Path, err: walkdir::Error) -> ProfileError {
    let path = err.path().unwrap_or(path).to_path_buf();
    let io = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "filesystem loop detected"));
    ProfileError::sync("walk", path, io)
}

fn file_matches(src: &Metadata, dst: &Metadata) -> bool {
    src.len() == dst.len()
        && FileTime::from_last_modification_time(src) == FileTime::from_last_modification_time(dst)
}

/// Byte comparison of two files already known to have the same length.
/// Timestamps only advance once per filesystem clock tick, so equal
/// size and mtime do not prove equal content.
fn same_contents(src: &Path, dst: &Path) -> Result<bool> {
    let mut a = BufReader::with_capacity(COMPARE_CHUNK, open(src)?);
    let mut b = BufReader::with_capacity(COMPARE_CHUNK, open(dst)?);
    loop {
        let left = a.fill_buf().map_err(|e| ProfileError::sync("read", src, e))?;
        if left.is_empty() {
            let right = b.fill_buf().map_err(|e| ProfileError::sync("read", dst, e))?;
            return Ok(right.is_empty());
        }
        let right = b.fill_buf().map_err(|e| ProfileError::sync("read", dst, e))?;
        let n = left.len().min(right.len());
        if n == 0 || left[..n] != right[..n] {
            return Ok(false);
        }
        a.consume(n);
        b.consume(n);
    }
}

fn open(path: &Path) -> Result<fs::File> {
    fs::File::open(path).map_err(|e| ProfileError::sync("open", path, e))
}

fn dir_differs(src: &Metadata, dst: &Metadata) -> bool {
    src.permissions() != dst.permissions()
        || FileTime::from_last_modification_time(src) != FileTime::from_last_modification_time(dst)
}

fn remove_entry(path: &Path, kind: EntryKind) -> Result<()> {
    let result = match kind {
        EntryKind::Dir => fs::remove_dir_all(path),
        _ => fs::remove_file(path).or_else(|e| {
            // Directory symlinks on Windows are removed as directories.
            if cfg!(windows) && kind == EntryKind::Symlink {
                fs::remove_dir(path)
            } else {
                Err(e)
            }
        }),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProfileError::sync("remove", path, e)),
    }
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(dst.file_name().unwrap_or_default());
    name.push(PARTIAL_SUFFIX);
    dst.with_file_name(name)
}

fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|e| ProfileError::sync("read", src, e))?;
    let partial = partial_path(dst);

    let staged = fs::copy(src, &partial)
        .map_err(|e| ProfileError::sync("copy", src, e))
        .and_then(|_| {
            filetime::set_file_times(
                &partial,
                FileTime::from_last_access_time(&meta),
                FileTime::from_last_modification_time(&meta),
            )
            .map_err(|e| ProfileError::sync("set times on", dst, e))
        })
        .and_then(|()| fs::rename(&partial, dst).map_err(|e| ProfileError::sync("replace", dst, e)));

    if staged.is_err() {
        let _ = fs::remove_file(&partial);
    }
    staged
}

fn copy_link(src: &Path, target: &Path, dst: &Path) -> Result<()> {
    create_symlink(src, target, dst).map_err(|e| ProfileError::sync("link", dst, e))?;
    let meta = fs::symlink_metadata(src).map_err(|e| ProfileError::sync("read", src, e))?;
    filetime::set_symlink_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .map_err(|e| ProfileError::sync("set times on", dst, e))
}

#[cfg(unix)]
fn create_symlink(_src: &Path, target: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(windows)]
fn create_symlink(src: &Path, target: &Path, dst: &Path) -> std::io::Result<()> {
    if fs::metadata(src).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(target, dst)
    } else {
        std::os::windows::fs::symlink_file(target, dst)
    }
}
