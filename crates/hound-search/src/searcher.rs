//! Per-repository supervisor: owns the current index generation, polls the
//! VCS driver, rebuilds when the remote revision moves, and swaps readers
//! atomically under concurrent queries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hound_index::{build_index, Error as IndexError, IndexReader};

use crate::config::RepoConfig;
use crate::error::SearchError;
use crate::vcs::VcsDriver;

const BACKOFF_INITIAL: Duration = Duration::from_secs(30);
const BACKOFF_MAX: Duration = Duration::from_secs(30 * 60);

/// Name of the pointer file inside a repo's db directory naming the active
/// generation directory.
pub const CURRENT_POINTER_FILE: &str = "current";
const WORKDIR_NAME: &str = "checkout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearcherState {
    Initializing,
    Ready,
    Polling,
    Reindexing,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for SearcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearcherState::Initializing => "initializing",
            SearcherState::Ready => "ready",
            SearcherState::Polling => "polling",
            SearcherState::Reindexing => "reindexing",
            SearcherState::Stopping => "stopping",
            SearcherState::Stopped => "stopped",
            SearcherState::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct CurrentIndex {
    reader: Arc<IndexReader>,
    revision: String,
}

#[derive(Debug, Default)]
struct SearcherMetrics {
    polls_run: AtomicU64,
    polls_failed: AtomicU64,
    builds_ok: AtomicU64,
    builds_failed: AtomicU64,
    last_poll_unix: AtomicU64,
}

/// Point-in-time copy of a searcher's counters, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SearcherMetricsSnapshot {
    pub polls_run: u64,
    pub polls_failed: u64,
    pub builds_ok: u64,
    pub builds_failed: u64,
    pub last_poll_unix: u64,
}

pub struct Searcher {
    name: String,
    repo: RepoConfig,
    repo_dir: PathBuf,
    driver: Arc<dyn VcsDriver>,
    state_tx: watch::Sender<SearcherState>,
    /// Writer latch: swaps take the write side, queries only clone the Arc
    /// under the read side. Scans themselves never hold the lock.
    current: RwLock<Option<CurrentIndex>>,
    /// Superseded readers awaiting their last outstanding query handle.
    retired: Mutex<Vec<Arc<IndexReader>>>,
    rebuild: Notify,
    shutdown: watch::Sender<bool>,
    build_cancel: Arc<AtomicBool>,
    next_generation: AtomicU32,
    metrics: SearcherMetrics,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Searcher {
    /// Construct the supervisor and start its background task. Must run
    /// inside a tokio runtime. The initial build is bounded by
    /// `build_permits` (the `max-concurrent-indexers` semaphore).
    pub fn spawn(
        name: String,
        repo: RepoConfig,
        dbpath: &Path,
        driver: Arc<dyn VcsDriver>,
        build_permits: Arc<Semaphore>,
    ) -> Arc<Searcher> {
        let (state_tx, _) = watch::channel(SearcherState::Initializing);
        let (shutdown, _) = watch::channel(false);
        let repo_dir = dbpath.join(&name);
        let searcher = Arc::new(Searcher {
            name,
            repo,
            repo_dir,
            driver,
            state_tx,
            current: RwLock::new(None),
            retired: Mutex::new(Vec::new()),
            rebuild: Notify::new(),
            shutdown,
            build_cancel: Arc::new(AtomicBool::new(false)),
            next_generation: AtomicU32::new(1),
            metrics: SearcherMetrics::default(),
            task: Mutex::new(None),
        });
        let handle = tokio::spawn(Searcher::run(searcher.clone(), build_permits));
        *searcher.task.lock() = Some(handle);
        searcher
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn repo(&self) -> &RepoConfig {
        &self.repo
    }

    pub fn state(&self) -> SearcherState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SearcherState> {
        self.state_tx.subscribe()
    }

    /// Shared handle to the current generation. The handle keeps the
    /// generation's files mapped until released.
    pub fn current(&self) -> Result<Arc<IndexReader>, SearchError> {
        self.current
            .read()
            .as_ref()
            .map(|c| c.reader.clone())
            .ok_or(SearchError::Unavailable)
    }

    /// Source revision of the current generation.
    pub fn revision(&self) -> Option<String> {
        self.current.read().as_ref().map(|c| c.revision.clone())
    }

    pub fn metrics(&self) -> SearcherMetricsSnapshot {
        SearcherMetricsSnapshot {
            polls_run: self.metrics.polls_run.load(Ordering::SeqCst),
            polls_failed: self.metrics.polls_failed.load(Ordering::SeqCst),
            builds_ok: self.metrics.builds_ok.load(Ordering::SeqCst),
            builds_failed: self.metrics.builds_failed.load(Ordering::SeqCst),
            last_poll_unix: self.metrics.last_poll_unix.load(Ordering::SeqCst),
        }
    }

    /// Request a rebuild out of band. Idempotent; repeated triggers coalesce
    /// with an in-flight rebuild.
    pub fn trigger_reindex(&self) {
        self.rebuild.notify_one();
    }

    /// Begin graceful shutdown: stop polling, cancel any in-flight build at
    /// the next file boundary.
    pub fn stop(&self) {
        info!(repo = %self.name, "stopping searcher");
        self.set_state(SearcherState::Stopping);
        self.build_cancel.store(true, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
    }

    /// Wait for the background task to terminate.
    pub async fn wait(&self) {
        let handle = self.task.lock().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }

    fn workdir(&self) -> PathBuf {
        self.repo_dir.join(WORKDIR_NAME)
    }

    fn set_state(&self, next: SearcherState) {
        self.state_tx.send_if_modified(|s| {
            // Stopping is sticky until the loop exits with Stopped.
            if matches!(*s, SearcherState::Stopping | SearcherState::Stopped)
                && next != SearcherState::Stopped
            {
                return false;
            }
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
    }

    /// Ready when a generation is being served, Failed otherwise.
    fn settle_state(&self) {
        if self.current.read().is_some() {
            self.set_state(SearcherState::Ready);
        } else {
            self.set_state(SearcherState::Failed);
        }
    }

    async fn run(self: Arc<Self>, permits: Arc<Semaphore>) {
        let mut shutdown = self.shutdown.subscribe();
        if let Err(e) = std::fs::create_dir_all(&self.repo_dir) {
            warn!(repo = %self.name, error = %e, "cannot create repo db dir");
        }
        self.startup_gc();

        let mut backoff = BACKOFF_INITIAL;
        let mut retry_at: Option<tokio::time::Instant> = None;
        let ok = if self.restore_current() {
            self.set_state(SearcherState::Ready);
            true
        } else {
            self.sync(&permits, true).await
        };
        schedule_retry(&mut retry_at, &mut backoff, ok);

        loop {
            if *shutdown.borrow() {
                break;
            }
            let poll_enabled = self.repo.enable_poll_updates;
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.rebuild.notified() => {
                    let ok = self.sync(&permits, true).await;
                    schedule_retry(&mut retry_at, &mut backoff, ok);
                }
                _ = tokio::time::sleep_until(retry_at.unwrap_or_else(far_future)),
                    if retry_at.is_some() =>
                {
                    let ok = self.sync(&permits, true).await;
                    schedule_retry(&mut retry_at, &mut backoff, ok);
                }
                _ = tokio::time::sleep(Duration::from_millis(self.repo.ms_between_poll)),
                    if poll_enabled =>
                {
                    let ok = self.sync(&permits, false).await;
                    schedule_retry(&mut retry_at, &mut backoff, ok);
                }
            }
        }

        // Release our reference to the current generation; in-flight queries
        // keep it mapped until they finish. Committed files stay on disk for
        // the next startup.
        self.current.write().take();
        self.drain_retired();
        self.set_state(SearcherState::Stopped);
        info!(repo = %self.name, "searcher stopped");
    }

    /// One poll/reindex cycle. `force` rebuilds even when the revision is
    /// unchanged (out-of-band triggers and retries). Returns false when the
    /// cycle failed and a backoff retry should be scheduled.
    async fn sync(&self, permits: &Arc<Semaphore>, force: bool) -> bool {
        if *self.shutdown.subscribe().borrow() {
            return true;
        }
        // Polling/Reindexing are only published once a generation has been
        // served; cycles starting from Initializing or Failed are absorbed
        // into that state until the first successful install.
        let publish_transitions = self.state() == SearcherState::Ready;
        if publish_transitions {
            self.set_state(SearcherState::Polling);
        }
        self.metrics.polls_run.fetch_add(1, Ordering::SeqCst);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.metrics.last_poll_unix.store(now, Ordering::SeqCst);
        let driver = self.driver.clone();
        let workdir = self.workdir();
        let pulled = tokio::task::spawn_blocking(move || driver.pull(&workdir)).await;
        let revision = match pulled {
            Ok(Ok(rev)) => rev,
            Ok(Err(e)) => {
                warn!(repo = %self.name, vcs = self.driver.name(), error = %e, "pull failed");
                self.metrics.polls_failed.fetch_add(1, Ordering::SeqCst);
                self.settle_state();
                return false;
            }
            Err(e) => {
                warn!(repo = %self.name, error = %e, "pull task failed");
                self.metrics.polls_failed.fetch_add(1, Ordering::SeqCst);
                self.settle_state();
                return false;
            }
        };

        let unchanged = self
            .current
            .read()
            .as_ref()
            .map(|c| c.revision == revision)
            .unwrap_or(false);
        if unchanged && !force {
            debug!(repo = %self.name, revision = %revision, "revision unchanged");
            self.settle_state();
            return true;
        }

        if publish_transitions {
            self.set_state(SearcherState::Reindexing);
        }
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return true,
        };
        if *self.shutdown.subscribe().borrow() {
            return true;
        }
        self.build_cancel.store(false, Ordering::SeqCst);
        let cancel = self.build_cancel.clone();
        let workdir = self.workdir();
        let repo_dir = self.repo_dir.clone();
        let opts = self.repo.index_options();
        let generation = self.next_generation.load(Ordering::SeqCst);
        let rev = revision.clone();
        let built = tokio::task::spawn_blocking(move || {
            build_index(&workdir, &rev, &repo_dir, generation, &opts, &cancel)
        })
        .await;
        drop(permit);

        match built {
            Ok(Ok(reader)) => {
                self.metrics.builds_ok.fetch_add(1, Ordering::SeqCst);
                self.install(reader, revision);
                true
            }
            Ok(Err(IndexError::Canceled)) => {
                debug!(repo = %self.name, "reindex canceled");
                true
            }
            Ok(Err(e)) => {
                warn!(repo = %self.name, error = %e, "index build failed");
                self.metrics.builds_failed.fetch_add(1, Ordering::SeqCst);
                self.settle_state();
                false
            }
            Err(e) => {
                warn!(repo = %self.name, error = %e, "build task failed");
                self.metrics.builds_failed.fetch_add(1, Ordering::SeqCst);
                self.settle_state();
                false
            }
        }
    }

    /// Atomic swap: publish the new reader under the writer latch, retire
    /// the old one, persist the current pointer, drain freed generations.
    fn install(&self, reader: IndexReader, revision: String) {
        let reader = Arc::new(reader);
        self.next_generation
            .store(reader.generation().wrapping_add(1), Ordering::SeqCst);
        {
            let mut cur = self.current.write();
            if let Some(old) = cur.take() {
                self.retired.lock().push(old.reader);
            }
            *cur = Some(CurrentIndex {
                reader: reader.clone(),
                revision: revision.clone(),
            });
        }
        if let Err(e) = write_current_pointer(&self.repo_dir, reader.dir()) {
            warn!(repo = %self.name, error = %e, "failed to persist current pointer");
        }
        self.drain_retired();
        self.set_state(SearcherState::Ready);
        info!(
            repo = %self.name,
            revision = %revision,
            generation = reader.generation(),
            files = reader.file_count(),
            "index generation swapped"
        );
    }

    /// Close and delete retired generations whose last query handle is gone.
    fn drain_retired(&self) {
        let mut queue = self.retired.lock();
        let pending = std::mem::take(&mut *queue);
        for reader in pending {
            if Arc::strong_count(&reader) > 1 {
                queue.push(reader);
                continue;
            }
            let dir = reader.dir().to_path_buf();
            drop(reader);
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => debug!(repo = %self.name, dir = %dir.display(), "retired generation removed"),
                Err(e) => warn!(repo = %self.name, dir = %dir.display(), error = %e, "failed to remove retired generation"),
            }
        }
    }

    /// Delete generation directories that are not the current one: staging
    /// leftovers without a manifest and superseded generations from earlier
    /// runs.
    fn startup_gc(&self) {
        let current_name = read_current_pointer(&self.repo_dir)
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
        let entries = match std::fs::read_dir(&self.repo_dir) {
            Ok(e) => e,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("idx-") {
                continue;
            }
            if Some(&name) == current_name.as_ref() {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => info!(repo = %self.name, dir = %name, "removed stale generation"),
                Err(e) => warn!(repo = %self.name, dir = %name, error = %e, "failed to remove stale generation"),
            }
        }
    }

    /// Reopen the committed generation named by the current pointer, if any.
    fn restore_current(&self) -> bool {
        let Some(dir) = read_current_pointer(&self.repo_dir) else {
            return false;
        };
        match IndexReader::open(&dir) {
            Ok(reader) => {
                let revision = dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(hound_index::build::revision_from_dir_name)
                    .unwrap_or_default()
                    .to_string();
                self.next_generation
                    .store(reader.generation().wrapping_add(1), Ordering::SeqCst);
                info!(
                    repo = %self.name,
                    revision = %revision,
                    generation = reader.generation(),
                    "restored committed index"
                );
                *self.current.write() = Some(CurrentIndex {
                    reader: Arc::new(reader),
                    revision,
                });
                true
            }
            Err(e) => {
                warn!(repo = %self.name, error = %e, "current index unusable; rebuilding");
                let _ = std::fs::remove_dir_all(&dir);
                let _ = std::fs::remove_file(self.repo_dir.join(CURRENT_POINTER_FILE));
                false
            }
        }
    }
}

fn schedule_retry(
    retry_at: &mut Option<tokio::time::Instant>,
    backoff: &mut Duration,
    ok: bool,
) {
    if ok {
        *retry_at = None;
        *backoff = BACKOFF_INITIAL;
    } else {
        *retry_at = Some(tokio::time::Instant::now() + *backoff);
        *backoff = (*backoff * 2).min(BACKOFF_MAX);
    }
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86_400 * 365)
}

/// Atomically rewrite the pointer file naming the active generation.
pub fn write_current_pointer(repo_dir: &Path, gen_dir: &Path) -> std::io::Result<()> {
    let name = gen_dir
        .file_name()
        .ok_or_else(|| std::io::Error::other("generation dir has no name"))?;
    let tmp = repo_dir.join(".current.tmp");
    std::fs::write(&tmp, name.to_string_lossy().as_bytes())?;
    std::fs::rename(&tmp, repo_dir.join(CURRENT_POINTER_FILE))
}

/// Resolve the pointer file to the active generation directory.
pub fn read_current_pointer(repo_dir: &Path) -> Option<PathBuf> {
    let name = std::fs::read_to_string(repo_dir.join(CURRENT_POINTER_FILE)).ok()?;
    let name = name.trim();
    if name.is_empty() || name.contains('/') || name.contains("..") {
        return None;
    }
    Some(repo_dir.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let gen_dir = tmp.path().join("idx-abc-123");
        write_current_pointer(tmp.path(), &gen_dir).unwrap();
        assert_eq!(read_current_pointer(tmp.path()), Some(gen_dir));
    }

    #[test]
    fn pointer_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CURRENT_POINTER_FILE), "../escape").unwrap();
        assert_eq!(read_current_pointer(tmp.path()), None);
    }

    #[test]
    fn retry_schedule_doubles_to_cap() {
        let mut retry_at = None;
        let mut backoff = BACKOFF_INITIAL;
        schedule_retry(&mut retry_at, &mut backoff, false);
        assert!(retry_at.is_some());
        assert_eq!(backoff, Duration::from_secs(60));
        for _ in 0..10 {
            schedule_retry(&mut retry_at, &mut backoff, false);
        }
        assert_eq!(backoff, BACKOFF_MAX);
        schedule_retry(&mut retry_at, &mut backoff, true);
        assert!(retry_at.is_none());
        assert_eq!(backoff, BACKOFF_INITIAL);
    }
}
