//! Parallelism helpers and small file utilities.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use rayon::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether independent units of work may run on the rayon pool.
///
/// The pool itself is configured once by the caller (see [`run_with_threads`]);
/// components only respect this flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Parallelism {
    #[default]
    Sequential,
    Parallel,
}

impl Parallelism {
    /// - 0 = auto (parallel if the rayon pool has multiple threads)
    /// - 1 = sequential
    /// - >1 = parallel
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        if n_threads == 1 || (n_threads == 0 && rayon::current_num_threads() == 1) {
            Parallelism::Sequential
        } else {
            Parallelism::Parallel
        }
    }

    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }

    /// Map `f` over `items`, in parallel when allowed, preserving order.
    pub fn maybe_par_map<T, R, F>(self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        if self.is_parallel() {
            items.into_par_iter().map(f).collect()
        } else {
            items.into_iter().map(f).collect()
        }
    }
}

/// Run `f` inside a dedicated rayon pool with `n_threads` workers.
///
/// `0` uses the global pool as-is.
pub fn run_with_threads<R: Send>(n_threads: usize, f: impl FnOnce(Parallelism) -> R + Send) -> R {
    let parallelism = Parallelism::from_threads(n_threads);
    if n_threads <= 1 {
        return f(parallelism);
    }
    match rayon::ThreadPoolBuilder::new().num_threads(n_threads).build() {
        Ok(pool) => pool.install(|| f(parallelism)),
        Err(e) => {
            tracing::warn!(error = %e, "failed to build thread pool, using global pool");
            f(parallelism)
        }
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between a controller and workers.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// JSON files
// =============================================================================

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::json(path, e))
}

/// Read a JSON document, or `None` if the file does not exist.
pub(crate) fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Write JSON through a sibling temporary file and rename it into place, so
/// readers never observe a half-written document.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| Error::json(path, e))?;
    write_atomic(path, &bytes)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::io(parent, e))?;
    tmp.write_all(bytes).map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

// =============================================================================
// Per-file locks
// =============================================================================

type FileLocks = Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>;

static FILE_LOCKS: LazyLock<FileLocks> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Canonical key for `path`, which need not exist yet.
pub(crate) fn canonical_key(path: &Path) -> PathBuf {
    let parent = parent_dir(path);
    match (fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// Run `f` while holding the process-wide lock of `path`.
///
/// Every handle to the same file shares one lock, however it was spelled.
fn with_file_lock<R>(path: &Path, f: impl FnOnce() -> R) -> R {
    // Poisoning only means another writer panicked; files are replaced
    // atomically, so what is on disk is whole.
    let lock = {
        let mut locks = FILE_LOCKS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(canonical_key(path)).or_default())
    };
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}

/// Reload a JSON map, apply `f` and write it back, all under the file lock.
pub(crate) fn update_json<T, R>(path: &Path, f: impl FnOnce(&mut T) -> R) -> Result<R>
where
    T: Serialize + DeserializeOwned + Default,
{
    // The key resolves through the parent, which must exist first.
    let parent = parent_dir(path);
    fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    with_file_lock(path, || {
        let mut value: T = read_json_opt(path)?.unwrap_or_default();
        let out = f(&mut value);
        write_json_atomic(path, &value)?;
        Ok(out)
    })
}
