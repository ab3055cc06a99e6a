use anyhow::{anyhow, bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

type SharedStream = Arc<AsyncMutex<Option<BufWriter<File>>>>;

struct OpenFile {
    stream: SharedStream,
    format: String,
    refs: usize,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct PoolState {
    open: FxHashMap<PathBuf, OpenFile>,
    closed: bool,
    peak_open: usize,
}

/// Bounded set of open output files, keyed by path.
///
/// At most `bound` files are open at once; further requests wait in FIFO
/// order for a slot. A request for a path that is already open shares the
/// existing stream instead of taking a slot. The last [`release`] of a path
/// flushes and closes it, freeing the slot.
///
/// [`release`]: WriterPool::release
pub struct WriterPool {
    bound: usize,
    slots: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

/// A reference to an open output file. Must be given back with
/// [`WriterPool::release`].
pub struct WriterHandle {
    path: PathBuf,
    format: String,
    stream: SharedStream,
}

impl WriterHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock().await;
        match guard.as_mut() {
            Some(writer) => writer
                .write_all(bytes)
                .await
                .with_context(|| format!("Failed to write {}", self.path.display())),
            None => bail!("Writer for {} is already closed", self.path.display()),
        }
    }
}

impl WriterPool {
    pub fn new(bound: usize) -> Result<Self> {
        if bound == 0 {
            bail!("Writer pool bound must be at least 1");
        }
        Ok(Self {
            bound,
            slots: Arc::new(Semaphore::new(bound)),
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().map(|s| s.open.len()).unwrap_or(0)
    }

    pub fn peak_open_handles(&self) -> usize {
        self.state.lock().map(|s| s.peak_open).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, PoolState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("Writer pool state is poisoned"))
    }

    /// Returns a handle for `path`, opening the file in append mode if it is
    /// not open yet. Parent directories are created as needed.
    pub async fn acquire(&self, path: &Path, format: &str) -> Result<WriterHandle> {
        if let Some(handle) = self.share_open(path, format)? {
            return Ok(handle);
        }

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("Writer pool is closed, cannot open {}", path.display()))?;

        // opened by someone else while we were queued; the permit goes back
        if let Some(handle) = self.share_open(path, format)? {
            return Ok(handle);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let stream: SharedStream = Arc::new(AsyncMutex::new(Some(BufWriter::new(file))));
        let mut state = self.lock()?;
        if state.closed {
            bail!("Writer pool is closed, cannot open {}", path.display());
        }
        if let Some(existing) = state.open.get_mut(path) {
            ensure_format(path, &existing.format, format)?;
            existing.refs += 1;
            return Ok(WriterHandle {
                path: path.to_path_buf(),
                format: existing.format.clone(),
                stream: existing.stream.clone(),
            });
        }

        state.open.insert(
            path.to_path_buf(),
            OpenFile {
                stream: stream.clone(),
                format: format.to_string(),
                refs: 1,
                _permit: permit,
            },
        );
        state.peak_open = state.peak_open.max(state.open.len());
        debug!(path = %path.display(), open = state.open.len(), "Opened writer");

        Ok(WriterHandle {
            path: path.to_path_buf(),
            format: format.to_string(),
            stream,
        })
    }

    fn share_open(&self, path: &Path, format: &str) -> Result<Option<WriterHandle>> {
        let mut state = self.lock()?;
        if state.closed {
            bail!("Writer pool is closed, cannot open {}", path.display());
        }
        let Some(existing) = state.open.get_mut(path) else {
            return Ok(None);
        };
        ensure_format(path, &existing.format, format)?;
        existing.refs += 1;
        Ok(Some(WriterHandle {
            path: path.to_path_buf(),
            format: existing.format.clone(),
            stream: existing.stream.clone(),
        }))
    }

    /// Drops one reference. The last one flushes and closes the file.
    pub async fn release(&self, handle: WriterHandle) -> Result<()> {
        {
            let mut guard = handle.stream.lock().await;
            if let Some(writer) = guard.as_mut() {
                writer
                    .flush()
                    .await
                    .with_context(|| format!("Failed to flush {}", handle.path.display()))?;
            }
        }

        let closing = {
            let mut state = self.lock()?;
            let remaining = match state.open.get_mut(&handle.path) {
                Some(entry) if Arc::ptr_eq(&entry.stream, &handle.stream) => {
                    entry.refs -= 1;
                    entry.refs
                }
                // already taken down by close_all
                _ => return Ok(()),
            };
            if remaining == 0 {
                state.open.remove(&handle.path)
            } else {
                None
            }
        };

        if let Some(entry) = closing {
            shutdown(&handle.path, &entry.stream).await?;
            debug!(path = %handle.path.display(), "Closed writer");
        }
        Ok(())
    }

    /// Flushes and closes every open file and refuses any further use.
    /// Queued acquisitions fail. Calling this twice is an error.
    pub async fn close_all(&self) -> Result<()> {
        let entries: Vec<(PathBuf, OpenFile)> = {
            let mut state = self.lock()?;
            if state.closed {
                bail!("Writer pool was already closed");
            }
            state.closed = true;
            state.open.drain().collect()
        };
        self.slots.close();

        let mut first_error = None;
        for (path, entry) in &entries {
            if let Err(e) = shutdown(path, &entry.stream).await {
                warn!(path = %path.display(), error = %e, "Failed to close writer");
                first_error.get_or_insert(e);
            }
        }
        debug!(closed = entries.len(), "Writer pool closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn ensure_format(path: &Path, open_as: &str, requested: &str) -> Result<()> {
    if open_as != requested {
        bail!(
            "{} is already open as {}, cannot reopen as {}",
            path.display(),
            open_as,
            requested
        );
    }
    Ok(())
}

async fn shutdown(path: &Path, stream: &SharedStream) -> Result<()> {
    let mut guard = stream.lock().await;
    if let Some(mut writer) = guard.take() {
        writer
            .shutdown()
            .await
            .with_context(|| format!("Failed to close {}", path.display()))?;
    }
    Ok(())
}

/// One complete file to write.
#[derive(Debug, Clone)]
pub struct FileJob {
    pub path: PathBuf,
    pub format: String,
    pub contents: String,
}

/// Writes every job through `pool`, keeping at most `pool.bound()` writes in
/// flight. Returns the number of files written.
pub async fn write_files(
    pool: Arc<WriterPool>,
    jobs: Vec<FileJob>,
    pb: Option<&ProgressBar>,
) -> Result<u64> {
    let total = jobs.len();
    if total == 0 {
        return Ok(0);
    }

    let mut in_flight = FuturesUnordered::new();
    let mut job_iter = jobs.into_iter();
    let mut written = 0u64;
    let mut failed = 0u64;
    let mut first_error = None;

    for job in job_iter.by_ref().take(pool.bound().min(total)) {
        in_flight.push(tokio::spawn(write_one(pool.clone(), job)));
    }

    while let Some(join_result) = in_flight.next().await {
        let (path, result) = join_result.context("Task join error")?;
        match result {
            Ok(()) => written += 1,
            Err(e) => {
                failed += 1;
                warn!(path = %path.display(), error = %e, "Write failed");
                first_error.get_or_insert(e);
            }
        }
        if let Some(pb) = pb {
            pb.inc(1);
        }

        if let Some(job) = job_iter.next() {
            in_flight.push(tokio::spawn(write_one(pool.clone(), job)));
        }
    }

    if let Some(e) = first_error {
        return Err(e.context(format!("{failed} of {total} file writes failed")));
    }
    Ok(written)
}

async fn write_one(pool: Arc<WriterPool>, job: FileJob) -> (PathBuf, Result<()>) {
    let result = async {
        let handle = pool.acquire(&job.path, &job.format).await?;
        let written = handle.write_all(job.contents.as_bytes()).await;
        let released = pool.release(handle).await;
        written.and(released)
    }
    .await;
    (job.path, result)
}
