use crate::engine::audit;
use crate::engine::collaborators::Notifier;
use crate::engine::paths::ArchiverPaths;
use crate::engine::util::{now_epoch_secs_f64, write_atomic};
use crate::engine::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Two delete times closer than this are considered the same entry.
const TIME_MATCH_TOLERANCE_SECS: f64 = 1.0;
const WORKER_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeletion {
    pub path: String,
    #[serde(alias = "deleteTime")]
    pub delete_time: f64,
}

impl PendingDeletion {
    fn matches(&self, path: &str, delete_time: f64) -> bool {
        self.path == path && (self.delete_time - delete_time).abs() <= TIME_MATCH_TOLERANCE_SECS
    }
}

/// Held for the duration of one load-modify-save sequence.
pub struct StoreLock(Option<File>);

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.0.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

pub trait DeletionStore: Send + Sync {
    fn load(&self) -> Result<Vec<PendingDeletion>>;
    fn save(&self, entries: &[PendingDeletion]) -> Result<()>;

    /// Exclude other processes sharing the same backing file.
    fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock(None))
    }
}

/// JSON array on disk, rewritten atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonDeletionStore {
    path: PathBuf,
}

impl JsonDeletionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }
}

impl DeletionStore for JsonDeletionStore {
    fn load(&self) -> Result<Vec<PendingDeletion>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn save(&self, entries: &[PendingDeletion]) -> Result<()> {
        let data = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.path, format!("{data}\n").as_bytes())
    }

    fn lock(&self) -> Result<StoreLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock {}", lock_path.display()))?;
        Ok(StoreLock(Some(file)))
    }
}

/// Physical removal of a queued target.
pub trait Remover: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl Remover for FsRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }
}

fn target_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub deleted: Vec<String>,
    pub missing: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub pending: usize,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        !self.deleted.is_empty() || !self.missing.is_empty()
    }
}

/// Persisted set of sources waiting for their safety delay to elapse.
///
/// The backing store is the source of truth: every mutation reloads it under
/// the store lock, applies the change and saves the whole collection before
/// the lock is released, so several processes can share one file.
pub struct DeletionQueue {
    store: Box<dyn DeletionStore>,
    remover: Box<dyn Remover>,
    entries: Mutex<Vec<PendingDeletion>>,
    delay_secs: AtomicU64,
}

impl DeletionQueue {
    pub fn open(store: Box<dyn DeletionStore>, delay_secs: u64) -> Result<Self> {
        Self::with_remover(store, Box::new(FsRemover), delay_secs)
    }

    pub fn with_remover(
        store: Box<dyn DeletionStore>,
        remover: Box<dyn Remover>,
        delay_secs: u64,
    ) -> Result<Self> {
        let entries = store.load()?;
        info!(pending = entries.len(), delay_secs, "deletion queue loaded");
        Ok(Self {
            store,
            remover,
            entries: Mutex::new(entries),
            delay_secs: AtomicU64::new(delay_secs),
        })
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay_secs.load(Ordering::Relaxed)
    }

    pub fn set_delay(&self, delay_secs: u64) {
        let previous = self.delay_secs.swap(delay_secs, Ordering::Relaxed);
        if previous != delay_secs {
            info!(previous, delay_secs, "deletion delay updated");
        }
    }

    fn cache(&self) -> Result<MutexGuard<'_, Vec<PendingDeletion>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("deletion queue lock poisoned"))
    }

    /// Run `change` against the freshly loaded collection and persist the
    /// result. Nothing is saved when `change` reports no modification.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<PendingDeletion>) -> (bool, T),
    ) -> Result<T> {
        let mut cache = self.cache()?;
        let _store_lock = self.store.lock()?;
        let mut entries = self.store.load()?;
        let (modified, out) = change(&mut entries);
        if modified {
            self.store.save(&entries)?;
        }
        *cache = entries;
        Ok(out)
    }

    pub fn enqueue(&self, path: &str) -> Result<bool> {
        self.enqueue_at(path, now_epoch_secs_f64())
    }

    /// Schedule `path` for `now + delay`. Returns false when it was already
    /// queued; the existing delete time is kept.
    pub fn enqueue_at(&self, path: &str, now: f64) -> Result<bool> {
        let path = path.trim();
        if path.is_empty() {
            anyhow::bail!("deletion path cannot be empty");
        }
        let delete_time = now + self.delay_secs() as f64;
        let added = self.mutate(|entries| {
            if entries.iter().any(|e| e.path == path) {
                return (false, false);
            }
            entries.push(PendingDeletion {
                path: path.to_string(),
                delete_time,
            });
            (true, true)
        })?;
        if added {
            info!(path, delete_time, "deletion scheduled");
        }
        Ok(added)
    }

    /// Snapshot of the in-memory view; refreshed on every mutation.
    pub fn list(&self) -> Vec<PendingDeletion> {
        match self.cache() {
            Ok(entries) => entries.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Re-read the store, picking up entries added by other processes.
    pub fn refresh(&self) -> Result<Vec<PendingDeletion>> {
        let mut cache = self.cache()?;
        let _store_lock = self.store.lock()?;
        *cache = self.store.load()?;
        Ok(cache.clone())
    }

    pub fn remove_one(&self, path: &str, delete_time: f64) -> Result<bool> {
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| !e.matches(path, delete_time));
            let removed = entries.len() != before;
            (removed, removed)
        })
    }

    pub fn remove_all(&self) -> Result<usize> {
        self.mutate(|entries| {
            let count = entries.len();
            entries.clear();
            (count > 0, count)
        })
    }

    /// Delete a queued target immediately. The entry is dropped only when the
    /// target is gone afterwards.
    pub fn delete_now(&self, path: &str) -> Result<()> {
        let queued = self.refresh()?.iter().any(|e| e.path == path);
        if !queued {
            anyhow::bail!("{path} is not in the deletion queue");
        }

        let target = Path::new(path);
        if target_exists(target) {
            self.remover
                .remove(target)
                .with_context(|| format!("failed to delete {path}"))?;
        }
        self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| e.path != path);
            (entries.len() != before, ())
        })?;
        info!(path, "deleted on request");
        Ok(())
    }

    /// One pass over the queue at time `now`.
    pub fn reconcile_at(&self, now: f64) -> Result<CycleReport> {
        let snapshot = self.refresh()?;
        let mut report = CycleReport::default();
        let mut resolved: Vec<PendingDeletion> = Vec::new();

        for entry in snapshot {
            let target = Path::new(&entry.path);
            if !target_exists(target) {
                info!(path = %entry.path, "queued target already gone");
                report.missing.push(entry.path.clone());
                resolved.push(entry);
                continue;
            }
            if now < entry.delete_time {
                continue;
            }
            match self.remover.remove(target) {
                Ok(()) => {
                    info!(path = %entry.path, "queued target deleted");
                    report.deleted.push(entry.path.clone());
                    resolved.push(entry);
                }
                Err(err) => {
                    warn::emit(WarnEvent {
                        code: "DELETE_FAILED",
                        stage: "deletion",
                        action: "remove",
                        target: &entry.path,
                        retry: "next-cycle",
                        reason: "io",
                        err: &err.to_string(),
                    });
                    report.failed.push((entry.path.clone(), err.to_string()));
                }
            }
            thread::yield_now();
        }

        report.pending = self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| !resolved.iter().any(|r| r.matches(&e.path, e.delete_time)));
            (entries.len() != before, entries.len())
        })?;
        Ok(report)
    }
}

/// Reconcile once, then log, audit and notify about the result.
pub fn run_cycle(
    queue: &DeletionQueue,
    notifier: &dyn Notifier,
    paths: Option<&ArchiverPaths>,
) -> Result<CycleReport> {
    let report = queue.reconcile_at(now_epoch_secs_f64())?;
    info!(
        deleted = report.deleted.len(),
        missing = report.missing.len(),
        failed = report.failed.len(),
        pending = report.pending,
        "deletion cycle finished"
    );

    if let Some(paths) = paths
        && (report.changed() || !report.failed.is_empty())
    {
        audit::record(
            paths,
            "deletion",
            if report.failed.is_empty() { "ok" } else { "partial" },
            &format!(
                "deleted={} missing={} failed={} pending={}",
                report.deleted.len(),
                report.missing.len(),
                report.failed.len(),
                report.pending
            ),
        );
    }

    if !report.deleted.is_empty() {
        notifier.send(&format!(
            "Deleted {} archived source(s):\n{}",
            report.deleted.len(),
            report.deleted.join("\n")
        ));
    }
    if !report.failed.is_empty() {
        let lines: Vec<String> = report
            .failed
            .iter()
            .map(|(path, err)| format!("{path}: {err}"))
            .collect();
        notifier.send(&format!(
            "Failed to delete {} source(s), will retry:\n{}",
            report.failed.len(),
            lines.join("\n")
        ));
    }
    Ok(report)
}

/// Background deletion loop. Sleeps in short slices so `shutdown` is
/// honoured promptly.
pub fn spawn_worker(
    queue: Arc<DeletionQueue>,
    notifier: Arc<dyn Notifier>,
    paths: Option<ArchiverPaths>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.load(Ordering::SeqCst) {
            if let Err(err) = run_cycle(&queue, notifier.as_ref(), paths.as_ref()) {
                error!(error = %format!("{err:#}"), "deletion cycle failed");
            }
            sleep_unless(&shutdown, interval);
        }
        info!("deletion worker stopped");
    })
}

fn sleep_unless(shutdown: &AtomicBool, total: Duration) {
    let started = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        let elapsed = started.elapsed();
        if elapsed >= total {
            break;
        }
        thread::sleep(WORKER_SLICE.min(total - elapsed));
    }
}
