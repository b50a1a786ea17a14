use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use tracing::warn;

use beanckup_types::FileNode;

use crate::error::{BeanckupError, Result};
use crate::hash::sha256_file;
use crate::history::HistoricalState;
use crate::platform::fs::entry_times;
use crate::workspace::{Workspace, META_DIR_NAME};

/// Junk file names skipped everywhere, compared case-insensitively.
const DENY_NAMES: &[&str] = &["thumbs.db"];

/// Entries skipped at filesystem roots only: OS trash, paging and
/// hibernation files that live directly under the root.
const ROOT_DENY_NAMES: &[&str] = &[
    "$recycle.bin",
    "system volume information",
    "pagefile.sys",
    "swapfile.sys",
    "hiberfil.sys",
    "dumpstack.log.tmp",
];

/// Per-job progress snapshot handed to the scan callback.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub processed: u64,
    pub total: u64,
    pub current: String,
}

struct FileJob {
    abs_path: PathBuf,
    rel_path: String,
    size: u64,
    mod_time: Option<DateTime<Utc>>,
    create_time: Option<DateTime<Utc>>,
}

enum ScanMessage {
    File(FileNode),
    FileSkipped(String),
    Dir(FileNode),
    Fatal(BeanckupError),
}

/// Returns `true` for I/O errors safe to skip (permission denied, vanished).
fn is_soft_io_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
    )
}

fn is_soft_walk_error(e: &ignore::Error) -> bool {
    e.io_error().is_some_and(is_soft_io_error)
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Walk the workspace and classify every file as new or reference.
///
/// The walk runs on a producer thread; hashing and classification run on a
/// pool of workers sized to hardware parallelism. Directories never hash, so
/// the producer emits their nodes directly. The progress callback fires on
/// the calling thread, once per completed file job.
pub fn scan_workspace(
    workspace: &Workspace,
    history: &HistoricalState,
    mut progress: impl FnMut(&ScanProgress),
) -> Result<Vec<FileNode>> {
    if !workspace.root().is_dir() {
        return Err(BeanckupError::Other(format!(
            "workspace does not exist: {}",
            workspace.root().display()
        )));
    }
    let total = count_files(workspace);

    let workers = worker_count();
    let mut nodes: Vec<FileNode> = Vec::new();
    let mut fatal: Option<BeanckupError> = None;
    let mut processed: u64 = 0;

    std::thread::scope(|s| {
        let (job_tx, job_rx) = crossbeam_channel::bounded::<FileJob>(workers * 2);
        let (msg_tx, msg_rx) = crossbeam_channel::bounded::<ScanMessage>(workers * 2);

        // Producer: directory traversal. Sends directory nodes straight to
        // the collector and file jobs to the workers.
        let walker_tx = msg_tx.clone();
        let root = workspace.root().to_path_buf();
        let at_fs_root = workspace.is_filesystem_root();
        s.spawn(move || {
            walk_tree(&root, at_fs_root, &job_tx, &walker_tx);
            // job_tx drops here; workers drain the queue and exit.
        });

        // Workers: hash + classify.
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = msg_tx.clone();
            s.spawn(move || {
                for job in rx {
                    let rel = job.rel_path.clone();
                    let msg = match classify_file(job, history) {
                        Some(node) => ScanMessage::File(node),
                        None => ScanMessage::FileSkipped(rel),
                    };
                    if tx.send(msg).is_err() {
                        return;
                    }
                }
            });
        }
        drop(job_rx);
        drop(msg_tx);

        // Collector: runs on the caller thread so the progress callback
        // needs no synchronization.
        for msg in msg_rx {
            match msg {
                ScanMessage::File(node) => {
                    processed += 1;
                    progress(&ScanProgress {
                        processed,
                        total,
                        current: node.path.clone(),
                    });
                    nodes.push(node);
                }
                ScanMessage::FileSkipped(path) => {
                    processed += 1;
                    progress(&ScanProgress {
                        processed,
                        total,
                        current: path,
                    });
                }
                ScanMessage::Dir(node) => nodes.push(node),
                ScanMessage::Fatal(e) => {
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }
    });

    match fatal {
        Some(e) => Err(e),
        None => Ok(nodes),
    }
}

/// Pre-pass counting the files the scan will visit, for progress totals.
fn count_files(workspace: &Workspace) -> u64 {
    build_walker(workspace.root(), workspace.is_filesystem_root())
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.depth() > 0)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .count() as u64
}

fn build_walker(root: &Path, at_fs_root: bool) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder.follow_links(false);
    builder.hidden(false);
    builder.ignore(false);
    builder.git_global(false);
    builder.git_exclude(false);
    builder.git_ignore(false);
    builder.parents(false);
    builder.require_git(false);
    builder.sort_by_file_name(std::ffi::OsStr::cmp);

    builder.filter_entry(move |entry| {
        let name = entry.file_name().to_string_lossy();
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());

        if is_dir && name == META_DIR_NAME {
            return false;
        }
        if !is_dir && DENY_NAMES.iter().any(|d| name.eq_ignore_ascii_case(d)) {
            return false;
        }
        if at_fs_root
            && entry.depth() == 1
            && ROOT_DENY_NAMES.iter().any(|d| name.eq_ignore_ascii_case(d))
        {
            return false;
        }
        true
    });

    builder
}

fn walk_tree(
    root: &Path,
    at_fs_root: bool,
    job_tx: &crossbeam_channel::Sender<FileJob>,
    msg_tx: &crossbeam_channel::Sender<ScanMessage>,
) {
    for entry in build_walker(root, at_fs_root).build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if is_soft_walk_error(&e) {
                    warn!(error = %e, "skipping entry (walk error)");
                    continue;
                }
                let _ = msg_tx.send(ScanMessage::Fatal(BeanckupError::Other(format!(
                    "walk error: {e}"
                ))));
                return;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let rel_path = relative_path(root, entry.path());
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping entry (stat error)");
                continue;
            }
        };
        let (mod_time, create_time) = entry_times(&metadata);

        let file_type = entry.file_type();
        if file_type.is_some_and(|t| t.is_dir()) {
            let _ = msg_tx.send(ScanMessage::Dir(FileNode::directory(
                rel_path,
                mod_time,
                create_time,
            )));
        } else if file_type.is_some_and(|t| t.is_file()) {
            let job = FileJob {
                abs_path: entry.path().to_path_buf(),
                rel_path,
                size: metadata.len(),
                mod_time,
                create_time,
            };
            if job_tx.send(job).is_err() {
                return;
            }
        }
        // Symlinks and special files are not backed up.
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let s = rel.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Classify one file against history.
///
/// 1. Five-tuple pre-filter: an unchanged path (same size, mtime, creation
///    time) inherits hash and reference without rehashing.
/// 2. Content hash lookup: known content inherits the original node's
///    reference regardless of path (move/rename/duplicate).
/// 3. Anything else is new: empty reference, to be placed by the planner.
///
/// Returns `None` when the file must be skipped (unreadable for permission
/// reasons).
fn classify_file(job: FileJob, history: &HistoricalState) -> Option<FileNode> {
    let mut node = FileNode::file(job.rel_path, job.size, job.mod_time, job.create_time);

    if let Some(prior) = history.by_path(&node.path) {
        if !prior.is_dir()
            && prior.size == node.size
            && prior.mod_time == node.mod_time
            && prior.create_time == node.create_time
        {
            node.hash = prior.hash.clone();
            node.reference = prior.reference.clone();
            return Some(node);
        }
    }

    match sha256_file(&job.abs_path) {
        Ok(hash) => node.hash = hash,
        Err(BeanckupError::Io(e)) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            warn!(path = %node.path, error = %e, "permission denied, skipping file");
            return None;
        }
        Err(e) => {
            // Unhashable content must be treated as new so it gets stored.
            warn!(path = %node.path, error = %e, "could not hash, treating file as new");
            return Some(node);
        }
    }

    if let Some(original) = history.by_hash(&node.hash) {
        node.reference = original.reference.clone();
    }

    Some(node)
}

/// Counts shown in the post-scan summary: how the workspace changed against
/// history.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSummary {
    pub new_files: usize,
    pub moved_files: usize,
    pub deleted_files: usize,
    pub new_size: u64,
}

impl ChangeSummary {
    pub fn has_changes(&self) -> bool {
        self.new_files > 0 || self.moved_files > 0
    }
}

/// Compare a scan result against history: new files, files whose content
/// moved to a previously unknown path, and paths that vanished without their
/// content surviving elsewhere.
pub fn summarize_changes(nodes: &[FileNode], history: &HistoricalState) -> ChangeSummary {
    let mut summary = ChangeSummary::default();

    for node in nodes {
        if node.is_dir() {
            continue;
        }
        if node.is_new() {
            summary.new_files += 1;
            summary.new_size += node.size;
        } else if history.by_path(&node.path).is_none() {
            summary.moved_files += 1;
        }
    }

    for prior in history.known_paths() {
        let still_present = nodes.iter().any(|n| !n.is_dir() && n.path == prior.path);
        if !still_present {
            let content_survives = nodes
                .iter()
                .any(|n| !n.hash.is_empty() && n.hash == prior.hash);
            if !content_survives {
                summary.deleted_files += 1;
            }
        }
    }

    summary
}
