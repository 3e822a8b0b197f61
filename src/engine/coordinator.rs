use crate::engine::audit;
use crate::engine::collaborators::{HealthTracker, Notifier, RefreshQueue};
use crate::engine::config::ArchiverConfig;
use crate::engine::deletion_queue::DeletionQueue;
use crate::engine::paths::ArchiverPaths;
use crate::engine::pathnorm::join_remote;
use crate::engine::pointer::PointerGenerator;
use crate::engine::policy::{self, PolicyStore};
use crate::engine::remote_copy::{PollSettings, RemoteCopier};
use crate::engine::scanner::{self, ArchiveCandidate, BlockKind, MediaContext, ScanFilter};
use crate::engine::state::{self, ArchiverState};
use crate::engine::thresholds::policy_for;
use crate::engine::util::{format_mb, now_epoch_secs, now_epoch_secs_f64};
use crate::error::ArchiverError;
use crate::remote::client::RemoteFs;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

const WRITE_PROBE_NAME: &str = ".strm_archiver_write_probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Archived,
    WouldArchive,
    AlreadyExisted,
    SkippedRecentFiles,
    SkippedNoPolicy,
    SkippedEmpty,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Archived => "archived",
            Self::WouldArchive => "would-archive",
            Self::AlreadyExisted => "already-existed",
            Self::SkippedRecentFiles => "skipped-recent-files",
            Self::SkippedNoPolicy => "skipped-no-policy",
            Self::SkippedEmpty => "skipped-empty",
            Self::Error => "error",
        }
    }

    fn counts_toward_totals(self) -> bool {
        matches!(
            self,
            Self::Archived | Self::WouldArchive | Self::AlreadyExisted
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryOutcome {
    pub media_type: String,
    pub directory: String,
    pub display_name: String,
    pub status: OutcomeStatus,
    pub files: usize,
    pub bytes: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveSummary {
    pub test_mode: bool,
    pub stopped: bool,
    pub total_files: u64,
    pub total_bytes: u64,
    pub outcomes: Vec<DirectoryOutcome>,
}

impl ArchiveSummary {
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    fn push(&mut self, outcome: DirectoryOutcome) {
        if outcome.status.counts_toward_totals() {
            self.total_files += outcome.files as u64;
            self.total_bytes += outcome.bytes;
        }
        self.outcomes.push(outcome);
    }

    pub fn headline(&self) -> String {
        let skipped = self.count(OutcomeStatus::SkippedRecentFiles)
            + self.count(OutcomeStatus::SkippedNoPolicy)
            + self.count(OutcomeStatus::SkippedEmpty);
        let done = if self.test_mode {
            format!("{} would archive", self.count(OutcomeStatus::WouldArchive))
        } else {
            format!(
                "{} archived, {} already existed",
                self.count(OutcomeStatus::Archived),
                self.count(OutcomeStatus::AlreadyExisted)
            )
        };
        format!(
            "{}{}: {done}, {skipped} skipped, {} errors; {} files, {}",
            if self.test_mode { "Test run" } else { "Archive run" },
            if self.stopped { " stopped" } else { " finished" },
            self.count(OutcomeStatus::Error),
            self.total_files,
            format_mb(self.total_bytes)
        )
    }
}

/// Everything the coordinator talks to, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub remote: Arc<dyn RemoteFs>,
    pub deletions: Arc<DeletionQueue>,
    pub notifier: Arc<dyn Notifier>,
    pub health: Arc<dyn HealthTracker>,
    pub refresh: Option<Arc<dyn RefreshQueue>>,
    pub policies: Arc<dyn PolicyStore>,
}

/// Ask a run in another process to stop at its next directory boundary.
pub fn request_stop(paths: &ArchiverPaths) -> anyhow::Result<PathBuf> {
    let marker = paths.stop_marker_file();
    if let Some(parent) = marker.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&marker, now_epoch_secs()?.to_string())?;
    Ok(marker)
}

/// Whether another process currently holds the run lock.
pub fn run_lock_held(paths: &ArchiverPaths) -> bool {
    let Ok(file) = File::open(paths.run_lock_file()) else {
        return false;
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

struct RunGuard<'a> {
    coordinator: &'a ArchiveCoordinator,
    lock_file: File,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.clear_stop_marker();
        let _ = FileExt::unlock(&self.lock_file);
        self.coordinator.running.store(false, Ordering::SeqCst);
    }
}

pub struct ArchiveCoordinator {
    cfg: ArchiverConfig,
    paths: ArchiverPaths,
    deps: Collaborators,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl ArchiveCoordinator {
    pub fn new(cfg: ArchiverConfig, paths: ArchiverPaths, deps: Collaborators) -> Self {
        Self {
            cfg,
            paths,
            deps,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cooperative stop; takes effect at the next directory boundary.
    /// Returns whether a run was active.
    pub fn stop(&self) -> bool {
        let active = self.is_running();
        if active {
            self.stop_requested.store(true, Ordering::SeqCst);
            info!("stop requested");
        }
        active
    }

    fn should_stop(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst) || self.paths.stop_marker_file().exists()
    }

    fn clear_stop_marker(&self) {
        let marker = self.paths.stop_marker_file();
        if marker.exists()
            && let Err(err) = fs::remove_file(&marker)
        {
            warn!(path = %marker.display(), error = %err, "failed to clear stop marker");
        }
    }

    fn acquire(&self) -> Result<RunGuard<'_>, ArchiverError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ArchiverError::RunInProgress);
        }

        let lock_path = self.paths.run_lock_file();
        let opened = fs::create_dir_all(&self.paths.state_dir).and_then(|_| {
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)
        });
        let lock_file = match opened {
            Ok(file) => file,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(ArchiverError::StateCorrupt(format!(
                    "cannot open {}: {err}",
                    lock_path.display()
                )));
            }
        };
        if lock_file.try_lock_exclusive().is_err() {
            self.running.store(false, Ordering::SeqCst);
            return Err(ArchiverError::Locked(lock_path));
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.clear_stop_marker();
        Ok(RunGuard {
            coordinator: self,
            lock_file,
        })
    }

    pub fn run_archive(&self, test_mode: bool) -> Result<ArchiveSummary, ArchiverError> {
        self.run_archive_at(test_mode, now_epoch_secs_f64())
    }

    /// Full pass over every configured media directory, judging file ages
    /// against `now`.
    pub fn run_archive_at(
        &self,
        test_mode: bool,
        now: f64,
    ) -> Result<ArchiveSummary, ArchiverError> {
        let _guard = self.acquire()?;

        let mut run_state = state::load(&self.paths).unwrap_or_default();
        run_state.last_run_started_epoch_secs = Some(now as u64);
        run_state.last_run_finished_epoch_secs = None;
        run_state.last_run_test_mode = test_mode;
        run_state.last_run_error = None;
        self.save_state(&run_state);

        info!(test_mode, "archive run started");
        audit::record(
            &self.paths,
            "archive",
            "started",
            if test_mode { "test mode" } else { "full run" },
        );
        self.deps.notifier.send(if test_mode {
            "Archive test run started"
        } else {
            "Archive run started"
        });

        let result = self.run_inner(test_mode, now);
        run_state.last_run_finished_epoch_secs = now_epoch_secs().ok();
        match &result {
            Ok(summary) => {
                run_state.last_run_files = summary.total_files;
                run_state.last_run_bytes = summary.total_bytes;
                run_state.last_run_stopped = summary.stopped;
                let headline = summary.headline();
                info!(
                    total_files = summary.total_files,
                    total_bytes = summary.total_bytes,
                    stopped = summary.stopped,
                    "{headline}"
                );
                audit::record(&self.paths, "archive", "finished", &headline);
                self.deps.notifier.send(&headline);
            }
            Err(err) => {
                run_state.last_run_error = Some(err.to_string());
                error!(code = err.code().as_str(), error = %err, "archive run aborted");
                audit::record(&self.paths, "archive", "aborted", &err.to_string());
                self.deps
                    .notifier
                    .send(&format!("Archive run aborted: {err}"));
            }
        }
        self.save_state(&run_state);
        result
    }

    fn save_state(&self, run_state: &ArchiverState) {
        if let Err(err) = state::save(&self.paths, run_state) {
            warn!(error = %format!("{err:#}"), "failed to save archiver state");
        }
    }

    fn check_source_root(&self, test_mode: bool) -> Result<PathBuf, ArchiverError> {
        let root = PathBuf::from(&self.cfg.archive.local_root);
        if !root.is_dir() {
            return Err(ArchiverError::SourceRootMissing(root));
        }
        if !test_mode {
            let probe = root.join(WRITE_PROBE_NAME);
            fs::write(&probe, b"probe")
                .and_then(|_| fs::remove_file(&probe))
                .map_err(|err| ArchiverError::SourceNotWritable {
                    path: root.clone(),
                    reason: err.to_string(),
                })?;
        }
        Ok(root)
    }

    /// Local directory mirroring the remote archive root, when the archive
    /// root lives inside the source tree.
    fn archive_mirror(&self, local_root: &Path) -> Option<PathBuf> {
        let source = self.cfg.remote.source_root.trim_end_matches('/');
        let archive = self.cfg.remote.archive_root.trim_end_matches('/');
        let rest = archive.strip_prefix(source)?;
        if !rest.starts_with('/') {
            return None;
        }
        Some(
            rest.split('/')
                .filter(|s| !s.is_empty())
                .fold(local_root.to_path_buf(), |acc, seg| acc.join(seg)),
        )
    }

    fn run_inner(&self, test_mode: bool, now: f64) -> Result<ArchiveSummary, ArchiverError> {
        let local_root = self.check_source_root(test_mode)?;
        let policies =
            policy::load_or_default(self.deps.policies.as_ref(), &self.cfg.archive.scan_dirs)
                .map_err(|err| ArchiverError::StateCorrupt(format!("{err:#}")))?;
        let mut filter = ScanFilter::from_config(&self.cfg)
            .map_err(|err| ArchiverError::InvalidConfig(format!("{err:#}")))?;
        filter.archive_mirror = self.archive_mirror(&local_root);

        let mut summary = ArchiveSummary {
            test_mode,
            ..ArchiveSummary::default()
        };
        let should_stop = || self.should_stop();

        for scan_dir in &self.cfg.archive.scan_dirs {
            if should_stop() {
                summary.stopped = true;
                break;
            }

            let Some(policy) = policy_for(&policies, scan_dir) else {
                info!(scan_dir = %scan_dir, "no media type policy for directory");
                summary.push(DirectoryOutcome {
                    media_type: String::new(),
                    directory: scan_dir.clone(),
                    display_name: scan_dir.clone(),
                    status: OutcomeStatus::SkippedNoPolicy,
                    files: 0,
                    bytes: 0,
                    message: "no media type policy configured".to_string(),
                });
                continue;
            };
            let ctx = MediaContext {
                policy,
                local_root: &local_root,
            };
            let media_path = ctx.media_path();
            if !media_path.is_dir() {
                warn!(media_type = ctx.media_type(), path = %media_path.display(), "media directory missing");
                summary.push(DirectoryOutcome {
                    media_type: ctx.media_type().to_string(),
                    directory: media_path.display().to_string(),
                    display_name: scan_dir.clone(),
                    status: OutcomeStatus::SkippedEmpty,
                    files: 0,
                    bytes: 0,
                    message: "media directory does not exist".to_string(),
                });
                continue;
            }

            let report = scanner::scan(ctx, &filter, now, &should_stop);
            info!(
                media_type = ctx.media_type(),
                eligible = report.eligible.len(),
                blocked = report.blocked.len(),
                "scan finished"
            );
            for blocked in report.blocked {
                summary.push(DirectoryOutcome {
                    media_type: ctx.media_type().to_string(),
                    directory: blocked.path.display().to_string(),
                    display_name: blocked.display_name,
                    status: match blocked.kind {
                        BlockKind::RecentFiles => OutcomeStatus::SkippedRecentFiles,
                        BlockKind::Empty => OutcomeStatus::SkippedEmpty,
                    },
                    files: 0,
                    bytes: 0,
                    message: blocked.reason,
                });
            }

            for candidate in &report.eligible {
                if should_stop() {
                    summary.stopped = true;
                    break;
                }
                let outcome = if test_mode {
                    DirectoryOutcome {
                        media_type: ctx.media_type().to_string(),
                        directory: candidate.source_path.display().to_string(),
                        display_name: candidate.display_name.clone(),
                        status: OutcomeStatus::WouldArchive,
                        files: candidate.files.len(),
                        bytes: candidate.total_size,
                        message: format!(
                            "would archive {} files ({})",
                            candidate.files.len(),
                            format_mb(candidate.total_size)
                        ),
                    }
                } else {
                    self.archive_candidate(ctx, candidate)
                };
                self.report_outcome(&outcome);
                summary.push(outcome);
            }

            if report.stopped || summary.stopped {
                summary.stopped = true;
                break;
            }
        }

        Ok(summary)
    }

    fn archive_candidate(
        &self,
        ctx: MediaContext<'_>,
        candidate: &ArchiveCandidate,
    ) -> DirectoryOutcome {
        let source_remote = join_remote(&self.cfg.remote.source_root, &candidate.relative_path);
        let dest_remote = join_remote(&self.cfg.remote.archive_root, &candidate.relative_path);
        let mut outcome = DirectoryOutcome {
            media_type: ctx.media_type().to_string(),
            directory: candidate.source_path.display().to_string(),
            display_name: candidate.display_name.clone(),
            status: OutcomeStatus::Error,
            files: candidate.files.len(),
            bytes: candidate.total_size,
            message: String::new(),
        };

        let copier = RemoteCopier::new(
            self.deps.remote.as_ref(),
            PollSettings::from(&self.cfg.poll),
        );
        let copied = copier.copy(ctx.media_type(), &source_remote, &dest_remote);
        if !copied.success {
            outcome.message = copied.message;
            return outcome;
        }

        let generator = PointerGenerator::new(
            &self.cfg,
            self.deps.health.as_ref(),
            self.deps.refresh.as_deref(),
        );
        let pointers = match generator.generate(ctx, &dest_remote, candidate) {
            Ok(report) => report,
            Err(err) => {
                outcome.message = format!("copied but pointer generation failed: {err:#}");
                return outcome;
            }
        };

        let mut message = format!(
            "{}; pointers written={} unchanged={}",
            copied.message, pointers.written, pointers.unchanged
        );
        if self.cfg.archive.delete_source {
            let path = candidate.source_path.to_string_lossy();
            match self.deps.deletions.enqueue(&path) {
                Ok(_) => message.push_str("; source deletion scheduled"),
                Err(err) => {
                    outcome.message = format!("{message}; failed to schedule deletion: {err:#}");
                    return outcome;
                }
            }
        }

        outcome.status = if copied.already_exists {
            OutcomeStatus::AlreadyExisted
        } else {
            OutcomeStatus::Archived
        };
        outcome.message = message;
        outcome
    }

    fn report_outcome(&self, outcome: &DirectoryOutcome) {
        let line = format!(
            "[{}] {} {}: {} files, {} ({})",
            outcome.media_type,
            outcome.status.as_str(),
            outcome.display_name,
            outcome.files,
            format_mb(outcome.bytes),
            outcome.message
        );
        if outcome.status == OutcomeStatus::Error {
            warn!(media_type = %outcome.media_type, directory = %outcome.directory, "{line}");
        } else {
            info!(media_type = %outcome.media_type, directory = %outcome.directory, "{line}");
        }
        if outcome.status != OutcomeStatus::WouldArchive {
            audit::record(&self.paths, "archive", outcome.status.as_str(), &line);
            self.deps.notifier.send(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collaborators::fakes::{RecordingHealth, RecordingNotifier};
    use crate::engine::deletion_queue::fakes::MemoryStore;
    use crate::engine::policy::JsonPolicyStore;
    use crate::engine::remote_copy::fake::{FakeRemote, ok_copy, rejected_copy, task};
    use crate::engine::thresholds::MediaTypePolicy;
    use crate::engine::util::SECS_PER_DAY;
    use crate::remote::client::{ApiResponse, CopyData, CopyRequest, RemoteEntry, TaskInfo};
    use std::time::{Duration, SystemTime};
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _tmp: TempDir,
        root: PathBuf,
        pointer_root: PathBuf,
        paths: ArchiverPaths,
        cfg: ArchiverConfig,
        remote: Arc<FakeRemote>,
        notifier: Arc<RecordingNotifier>,
        health: Arc<RecordingHealth>,
        deletions: Arc<DeletionQueue>,
    }

    impl Fixture {
        fn new(creation_days: u32, mtime_days: u32) -> Self {
            let tmp = tempdir().expect("tempdir");
            let root = tmp.path().join("media");
            let pointer_root = tmp.path().join("strm");
            fs::create_dir_all(root.join("电影")).expect("mkdir");
            let paths = ArchiverPaths::under(&tmp.path().join("home"));

            let mut cfg = ArchiverConfig::default();
            cfg.remote.base_url = "http://host".to_string();
            cfg.remote.source_root = "/media".to_string();
            cfg.remote.archive_root = "/archive".to_string();
            cfg.remote.encode_urls = false;
            cfg.archive.local_root = root.to_string_lossy().to_string();
            cfg.archive.pointer_root = pointer_root.to_string_lossy().to_string();
            cfg.archive.scan_dirs = vec!["电影".to_string()];
            cfg.archive.min_video_size_mb = 0;
            cfg.archive.delete_source = true;
            cfg.poll.interval_secs = 0;

            let store = JsonPolicyStore::new(&paths.policies_file);
            policy::upsert(
                &store,
                &[],
                MediaTypePolicy::new("movies", "电影", creation_days, mtime_days),
            )
            .expect("policy");

            let deletions = Arc::new(
                DeletionQueue::open(Box::new(Arc::new(MemoryStore::default())), 86_400)
                    .expect("queue"),
            );
            Self {
                _tmp: tmp,
                root,
                pointer_root,
                paths,
                cfg,
                remote: Arc::new(FakeRemote::default()),
                notifier: Arc::new(RecordingNotifier::default()),
                health: Arc::new(RecordingHealth::default()),
                deletions,
            }
        }

        fn add_file(&self, rel: &str, bytes: usize, modified_days_ago: f64) -> PathBuf {
            let path = self.root.join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(&path, vec![0u8; bytes]).expect("write");
            let mtime = SystemTime::now()
                - Duration::from_secs_f64(modified_days_ago * SECS_PER_DAY);
            File::options()
                .write(true)
                .open(&path)
                .expect("open")
                .set_modified(mtime)
                .expect("set mtime");
            path
        }

        fn coordinator_with(&self, remote: Arc<dyn RemoteFs>) -> ArchiveCoordinator {
            ArchiveCoordinator::new(
                self.cfg.clone(),
                self.paths.clone(),
                Collaborators {
                    remote,
                    deletions: self.deletions.clone(),
                    notifier: self.notifier.clone(),
                    health: self.health.clone(),
                    refresh: None,
                    policies: Arc::new(JsonPolicyStore::new(&self.paths.policies_file)),
                },
            )
        }

        fn coordinator(&self) -> ArchiveCoordinator {
            self.coordinator_with(self.remote.clone())
        }
    }

    #[test]
    fn test_mode_counts_without_remote_calls() {
        let fx = Fixture::new(0, 0);
        fx.add_file("电影/Avatar/Avatar.mkv", 1_000, 40.0);
        fx.add_file("电影/Avatar/Avatar.nfo", 24, 40.0);
        fx.add_file("电影/Heat/Heat.mp4", 500, 40.0);

        let summary = fx.coordinator().run_archive(true).expect("run");
        assert!(summary.test_mode);
        assert_eq!(summary.count(OutcomeStatus::WouldArchive), 2);
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.total_bytes, 1_524);
        assert!(fx.remote.copy_calls().is_empty());
        assert!(fx.deletions.list().is_empty());
        assert!(!fx.pointer_root.exists());
    }

    #[test]
    fn aged_directory_is_archived_with_pointer_and_deletion() {
        let fx = Fixture::new(20, 20);
        let video = fx.add_file("电影/Avatar/Avatar.mkv", 2_048, 25.0);
        fx.remote.push_copy(ok_copy(&["t1"]));
        fx.remote.push_task("t1", task(1, ""));

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.count(OutcomeStatus::Archived), 1, "{summary:?}");

        let calls = fx.remote.copy_calls();
        assert_eq!(
            calls,
            vec![CopyRequest {
                src_dir: "/media/电影".to_string(),
                dst_dir: "/archive/电影".to_string(),
                names: vec!["Avatar".to_string()],
            }]
        );

        let pointer = fx.pointer_root.join("电影/Avatar/Avatar.strm");
        assert_eq!(
            fs::read_to_string(&pointer).expect("pointer"),
            "http://host/d/archive/电影/Avatar/Avatar.mkv"
        );
        let queued = fx.deletions.list();
        assert_eq!(queued.len(), 1);
        assert_eq!(
            PathBuf::from(&queued[0].path),
            video.parent().expect("dir").to_path_buf()
        );
        assert!(video.exists());
    }

    #[test]
    fn recent_subdirectory_keeps_its_parent_out_of_copy_and_deletion() {
        let fx = Fixture::new(20, 20);
        fx.add_file("电影/Saga/poster.mkv", 10, 40.0);
        let recent = fx.add_file("电影/Saga/Part 1/part1.mkv", 10, 2.0);

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.outcomes.len(), 1, "{summary:?}");
        assert_eq!(summary.outcomes[0].status, OutcomeStatus::SkippedRecentFiles);
        assert_eq!(
            PathBuf::from(&summary.outcomes[0].directory),
            fx.root.join("电影/Saga")
        );
        assert!(fx.remote.copy_calls().is_empty());
        assert!(fx.deletions.list().is_empty());
        assert!(recent.exists());
    }

    #[test]
    fn aged_nested_directory_is_copied_and_queued_once() {
        let fx = Fixture::new(20, 20);
        fx.add_file("电影/Saga/poster.mkv", 10, 40.0);
        fx.add_file("电影/Saga/Part 1/part1.mkv", 10, 40.0);
        fx.remote.push_copy(ok_copy(&["t1"]));
        fx.remote.push_task("t1", task(1, ""));

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.outcomes.len(), 1, "{summary:?}");
        assert_eq!(summary.count(OutcomeStatus::Archived), 1);
        assert_eq!(summary.total_files, 2);

        assert_eq!(
            fx.remote.copy_calls(),
            vec![CopyRequest {
                src_dir: "/media/电影".to_string(),
                dst_dir: "/archive/电影".to_string(),
                names: vec!["Saga".to_string()],
            }]
        );
        let queued: Vec<_> = fx.deletions.list().into_iter().map(|e| e.path).collect();
        assert_eq!(queued, vec![fx.root.join("电影/Saga").to_string_lossy().to_string()]);
        assert_eq!(
            fs::read_to_string(fx.pointer_root.join("电影/Saga/Part 1/part1.strm"))
                .expect("nested pointer"),
            "http://host/d/archive/电影/Saga/Part 1/part1.mkv"
        );
    }

    #[test]
    fn loose_file_is_archived_alone_and_media_directory_is_never_queued() {
        let fx = Fixture::new(20, 20);
        let loose = fx.add_file("电影/loose.mkv", 10, 40.0);
        fx.add_file("电影/New Movie/new.mkv", 10, 1.0);
        fx.remote.push_copy(ok_copy(&["t1"]));
        fx.remote.push_task("t1", task(1, ""));

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.count(OutcomeStatus::Archived), 1, "{summary:?}");
        assert_eq!(summary.count(OutcomeStatus::SkippedRecentFiles), 1);

        assert_eq!(
            fx.remote.copy_calls(),
            vec![CopyRequest {
                src_dir: "/media/电影".to_string(),
                dst_dir: "/archive/电影".to_string(),
                names: vec!["loose.mkv".to_string()],
            }]
        );
        let queued: Vec<_> = fx.deletions.list().into_iter().map(|e| e.path).collect();
        assert_eq!(queued, vec![loose.to_string_lossy().to_string()]);
        assert_eq!(
            fs::read_to_string(fx.pointer_root.join("电影/loose.strm")).expect("pointer"),
            "http://host/d/archive/电影/loose.mkv"
        );
    }

    #[test]
    fn recently_modified_file_blocks_directory() {
        let fx = Fixture::new(20, 20);
        fx.add_file("电影/Avatar/Avatar.mkv", 10, 2.0);

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.count(OutcomeStatus::SkippedRecentFiles), 1);
        let outcome = &summary.outcomes[0];
        assert!(outcome.message.contains("Avatar.mkv"), "{}", outcome.message);
        assert!(outcome.message.contains("2.0"), "{}", outcome.message);
        assert!(fx.remote.copy_calls().is_empty());
    }

    #[test]
    fn already_existing_target_still_schedules_deletion() {
        let fx = Fixture::new(0, 0);
        fx.add_file("电影/Avatar/Avatar.mkv", 10, 30.0);
        fx.remote
            .push_copy(rejected_copy(403, "object already exists"));

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.count(OutcomeStatus::AlreadyExisted), 1);
        assert_eq!(fx.deletions.list().len(), 1);
    }

    #[test]
    fn failed_copy_is_an_error_outcome_without_deletion() {
        let fx = Fixture::new(0, 0);
        fx.add_file("电影/Avatar/Avatar.mkv", 10, 30.0);
        fx.remote.push_copy(ok_copy(&["t1"]));
        fx.remote.push_task("t1", task(2, "quota exceeded"));

        let summary = fx.coordinator().run_archive(false).expect("run");
        assert_eq!(summary.count(OutcomeStatus::Error), 1);
        assert_eq!(summary.total_files, 0);
        assert!(fx.deletions.list().is_empty());
        assert!(
            fx.notifier
                .messages()
                .iter()
                .any(|m| m.contains("quota exceeded"))
        );
    }

    #[test]
    fn scan_dir_without_policy_is_reported() {
        let mut fx = Fixture::new(0, 0);
        fx.cfg.archive.scan_dirs.push("纪录片".to_string());
        let summary = fx.coordinator().run_archive(true).expect("run");
        assert_eq!(summary.count(OutcomeStatus::SkippedNoPolicy), 1);
    }

    #[test]
    fn missing_source_root_aborts() {
        let mut fx = Fixture::new(0, 0);
        fx.cfg.archive.local_root = fx.root.join("gone").to_string_lossy().to_string();
        let coordinator = fx.coordinator();
        let err = coordinator.run_archive(false).expect_err("abort");
        assert!(matches!(err, ArchiverError::SourceRootMissing(_)));
        assert!(!coordinator.is_running());

        let saved = state::load(&fx.paths).expect("state");
        assert!(saved.last_run_error.is_some());
    }

    #[test]
    fn second_start_is_rejected() {
        let fx = Fixture::new(0, 0);
        let coordinator = fx.coordinator();
        coordinator.running.store(true, Ordering::SeqCst);
        assert!(matches!(
            coordinator.run_archive(true),
            Err(ArchiverError::RunInProgress)
        ));
    }

    #[test]
    fn lock_held_elsewhere_is_rejected() {
        let fx = Fixture::new(0, 0);
        fs::create_dir_all(&fx.paths.state_dir).expect("mkdir");
        let held = File::create(fx.paths.run_lock_file()).expect("lock file");
        held.try_lock_exclusive().expect("lock");
        assert!(run_lock_held(&fx.paths));

        let coordinator = fx.coordinator();
        assert!(matches!(
            coordinator.run_archive(true),
            Err(ArchiverError::Locked(_))
        ));
        assert!(!coordinator.is_running());
    }

    /// Drops a stop marker the first time a copy is requested.
    struct StopAfterFirstCopy {
        inner: Arc<FakeRemote>,
        marker: PathBuf,
    }

    impl RemoteFs for StopAfterFirstCopy {
        fn list(&self, path: &str) -> anyhow::Result<Vec<RemoteEntry>> {
            self.inner.list(path)
        }

        fn copy(&self, request: &CopyRequest) -> anyhow::Result<ApiResponse<CopyData>> {
            fs::write(&self.marker, b"stop")?;
            self.inner.copy(request)
        }

        fn task_status(&self, task_id: &str) -> anyhow::Result<ApiResponse<TaskInfo>> {
            self.inner.task_status(task_id)
        }
    }

    #[test]
    fn stop_marker_ends_run_between_directories() {
        let fx = Fixture::new(0, 0);
        fx.add_file("电影/A/A.mkv", 10, 30.0);
        fx.add_file("电影/B/B.mkv", 10, 30.0);
        fx.remote.push_task("default", task(1, ""));

        let remote = Arc::new(StopAfterFirstCopy {
            inner: fx.remote.clone(),
            marker: fx.paths.stop_marker_file(),
        });
        let summary = fx.coordinator_with(remote).run_archive(false).expect("run");
        assert!(summary.stopped);
        assert_eq!(summary.count(OutcomeStatus::Archived), 1);
        assert_eq!(fx.remote.copy_calls().len(), 1);
        assert!(!fx.paths.stop_marker_file().exists());
    }

    #[test]
    fn archive_mirror_inside_source_is_skipped() {
        let mut fx = Fixture::new(0, 0);
        fx.cfg.remote.archive_root = "/media/电影/归档".to_string();
        fx.add_file("电影/归档/Old/Old.mkv", 10, 90.0);
        fx.add_file("电影/New/New.mkv", 10, 90.0);

        let summary = fx.coordinator().run_archive(true).expect("run");
        assert_eq!(summary.count(OutcomeStatus::WouldArchive), 1);
        assert!(summary.outcomes[0].directory.ends_with("New"));
    }

    #[test]
    fn stop_without_run_is_a_no_op() {
        let fx = Fixture::new(0, 0);
        assert!(!fx.coordinator().stop());
    }
}
