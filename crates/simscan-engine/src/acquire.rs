//! Repository acquisition: turn a source locator into a read-only tree.

use simscan_core::config::PipelineOptions;
use simscan_core::error::{PipelineError, code};
use simscan_core::types::{FileEntry, MaterializedTree, SourceLocator};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Upper bound on concurrent in-flight acquisitions, process-wide.
const MAX_INFLIGHT_ACQUISITIONS: usize = 4;

/// VCS metadata directories excluded from every inventory.
const VCS_DIRS: [&str; 3] = [".git", ".hg", ".svn"];

/// Materialize the submission's tree under `scratch_dir` (git clones
/// land there; local paths are snapshotted by reference).
pub fn acquire(
    locator: &SourceLocator,
    options: &PipelineOptions,
    scratch_dir: &Path,
) -> Result<MaterializedTree, PipelineError> {
    let _slot = AcquireSlot::take();
    match locator {
        SourceLocator::Local { path } => acquire_local(path, options),
        SourceLocator::Git { url, reference } => {
            acquire_git(url, reference.as_deref(), options, scratch_dir)
        }
    }
}

fn acquire_local(
    path: &Path,
    options: &PipelineOptions,
) -> Result<MaterializedTree, PipelineError> {
    let canonical = path.canonicalize().map_err(|e| PipelineError::Acquisition {
        code: code::ACQUISITION_FAILED,
        message: format!("cannot resolve {}: {e}", path.display()),
    })?;

    if let Some(root) = &options.allowed_source_root {
        let root = root
            .canonicalize()
            .map_err(|e| PipelineError::Acquisition {
                code: code::ACQUISITION_FAILED,
                message: format!("cannot resolve allowed root {}: {e}", root.display()),
            })?;
        if !canonical.starts_with(&root) {
            return Err(PipelineError::Acquisition {
                code: code::PATH_NOT_ALLOWED,
                message: format!(
                    "{} resolves outside the allowed source root {}",
                    path.display(),
                    root.display(),
                ),
            });
        }
    }

    if !canonical.is_dir() {
        return Err(PipelineError::Acquisition {
            code: code::ACQUISITION_FAILED,
            message: format!("{} is not a directory", canonical.display()),
        });
    }

    build_inventory(&canonical, options.total_tree_byte_cap)
}

fn acquire_git(
    url: &str,
    reference: Option<&str>,
    options: &PipelineOptions,
    scratch_dir: &Path,
) -> Result<MaterializedTree, PipelineError> {
    let checkout = scratch_dir.join("checkout");
    let cap = options.total_tree_byte_cap;
    let over_cap = AtomicBool::new(false);

    let mut callbacks = git2::RemoteCallbacks::new();
    callbacks.transfer_progress(|progress| {
        // Abort the fetch as soon as the wire bytes exceed the cap; the
        // checkout can only be larger.
        if progress.received_bytes() as u64 > cap {
            over_cap.store(true, Ordering::Relaxed);
            return false;
        }
        true
    });

    let mut fetch = git2::FetchOptions::new();
    fetch.remote_callbacks(callbacks);
    fetch.depth(1);

    let mut builder = git2::build::RepoBuilder::new();
    builder.fetch_options(fetch);
    if let Some(reference) = reference {
        builder.branch(reference);
    }

    debug!(url, ?reference, "cloning submission repository");
    if let Err(e) = builder.clone(url, &checkout) {
        if over_cap.load(Ordering::Relaxed) {
            return Err(PipelineError::Acquisition {
                code: code::REPOSITORY_TOO_LARGE,
                message: format!("clone of {url} exceeded the {cap}-byte cap"),
            });
        }
        return Err(PipelineError::Acquisition {
            code: code::ACQUISITION_FAILED,
            message: format!("clone of {url} failed: {e}"),
        });
    }

    build_inventory(&checkout, cap)
}

/// Walk the tree, skipping VCS metadata, and enforce the byte cap.
/// A tree at exactly the cap passes; one byte over fails.
fn build_inventory(root: &Path, cap: u64) -> Result<MaterializedTree, PipelineError> {
    let mut files = Vec::new();
    let mut total: u64 = 0;

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .is_some_and(|name| VCS_DIRS.contains(&name)))
        });

    for entry in walker {
        let entry = entry.map_err(|e| PipelineError::Acquisition {
            code: code::ACQUISITION_FAILED,
            message: format!("walk of {} failed: {e}", root.display()),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry
            .metadata()
            .map_err(|e| PipelineError::Acquisition {
                code: code::ACQUISITION_FAILED,
                message: format!("stat of {} failed: {e}", entry.path().display()),
            })?
            .len();
        total = total.saturating_add(size);
        if total > cap {
            warn!(root = %root.display(), total, cap, "tree exceeds byte cap");
            return Err(PipelineError::Acquisition {
                code: code::REPOSITORY_TOO_LARGE,
                message: format!("tree at {} exceeds the {cap}-byte cap", root.display()),
            });
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walk entries live under the root")
            .to_path_buf();
        files.push(FileEntry {
            path: relative,
            size,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(MaterializedTree {
        root: root.to_path_buf(),
        files,
        total_bytes: total,
    })
}

// ─── acquisition slots ──────────────────────────────────────────────────

/// Counting semaphore bounding concurrent acquisitions process-wide.
struct Semaphore {
    free: Mutex<usize>,
    cv: Condvar,
}

struct AcquireSlot;

static SLOTS: OnceLock<Semaphore> = OnceLock::new();

impl AcquireSlot {
    fn take() -> Self {
        let sem = SLOTS.get_or_init(|| Semaphore {
            free: Mutex::new(MAX_INFLIGHT_ACQUISITIONS),
            cv: Condvar::new(),
        });
        let mut free = sem.free.lock().expect("semaphore lock");
        while *free == 0 {
            free = sem.cv.wait(free).expect("semaphore wait");
        }
        *free -= 1;
        Self
    }
}

impl Drop for AcquireSlot {
    fn drop(&mut self) {
        let sem = SLOTS.get().expect("slot taken before drop");
        *sem.free.lock().expect("semaphore lock") += 1;
        sem.cv.notify_one();
    }
}
