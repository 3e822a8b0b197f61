use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::commands::{CommandReport, open_deletion_queue};
use crate::engine::collaborators::build_notifier;
use crate::engine::config::load_config;
use crate::engine::deletion_queue::{run_cycle, spawn_worker};
use crate::engine::paths::resolve_paths;
use crate::engine::util::{format_epoch, now_epoch_secs_f64};

const STOP_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub once: bool,
}

/// Contents of the daemon lock file, read back by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLockPayload {
    pub pid: u32,
    pub build_uuid: String,
    pub start_time: String,
}

pub fn run(opts: &DaemonOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("daemon");

    fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
    let lock_path = paths.daemon_lock_file();
    let mut lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        report.issue(format!(
            "deletion daemon already running (lock held: {})",
            lock_path.display()
        ));
        return Ok(report);
    }
    let payload = DaemonLockPayload {
        pid: std::process::id(),
        build_uuid: env!("BUILD_UUID").to_string(),
        start_time: format_epoch(now_epoch_secs_f64()),
    };
    lock_file.set_len(0)?;
    lock_file.write_all(serde_json::to_string(&payload)?.as_bytes())?;

    let queue = open_deletion_queue(&cfg, &paths)?;
    let notifier = build_notifier(&cfg.notify);

    if opts.once {
        let cycle = run_cycle(&queue, notifier.as_ref(), Some(&paths))?;
        report.detail(format!("deleted={}", cycle.deleted.len()));
        report.detail(format!("missing={}", cycle.missing.len()));
        report.detail(format!("failed={}", cycle.failed.len()));
        report.detail(format!("pending={}", cycle.pending));
        for path in &cycle.deleted {
            report.detail(format!("deleted.path={path}"));
        }
        for (path, err) in &cycle.failed {
            report.issue(format!("delete failed for {path}: {err}"));
        }
        return Ok(report);
    }

    let stop_marker = paths.daemon_stop_marker_file();
    if stop_marker.exists() {
        let _ = fs::remove_file(&stop_marker);
    }

    let interval = Duration::from_secs(cfg.deletion.interval_secs.max(1));
    let shutdown = Arc::new(AtomicBool::new(false));
    let worker = spawn_worker(
        queue.clone(),
        notifier,
        Some(paths.clone()),
        interval,
        shutdown.clone(),
    );
    info!(
        pid = payload.pid,
        interval_secs = interval.as_secs(),
        delay_secs = queue.delay_secs(),
        "deletion daemon started"
    );

    let mut last_reload = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        if stop_marker.exists() {
            let _ = fs::remove_file(&stop_marker);
            info!("daemon stop requested");
            shutdown.store(true, Ordering::SeqCst);
            break;
        }
        if last_reload.elapsed() >= interval {
            match load_config() {
                Ok(fresh) => queue.set_delay(fresh.deletion.delay_secs),
                Err(err) => warn!(error = %format!("{err:#}"), "config reload failed; keeping previous delay"),
            }
            last_reload = Instant::now();
        }
        thread::sleep(STOP_POLL);
    }

    worker
        .join()
        .map_err(|_| anyhow!("deletion worker panicked"))?;
    report.detail("deletion daemon stopped");
    report.detail(format!("pending={}", queue.list().len()));
    Ok(report)
}
