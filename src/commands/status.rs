use anyhow::Result;
use std::env;
use std::fs::{self, File};

use fs2::FileExt;

use crate::commands::CommandReport;
use crate::commands::daemon::DaemonLockPayload;
use crate::engine::config::{ArchiverConfig, load_config, resolve_config_path};
use crate::engine::coordinator::run_lock_held;
use crate::engine::deletion_queue::{DeletionStore, JsonDeletionStore};
use crate::engine::paths::{ArchiverPaths, resolve_paths};
use crate::engine::pointer_registry::PointerRegistry;
use crate::engine::policy::{self, JsonPolicyStore};
use crate::engine::state;
use crate::engine::util::{format_epoch, format_mb};

mod generated {
    include!(concat!(env!("OUT_DIR"), "/archiver_env_allowlist.rs"));
}

fn report_daemon(paths: &ArchiverPaths, report: &mut CommandReport) {
    let lock_path = paths.daemon_lock_file();
    let Ok(file) = File::open(&lock_path) else {
        report.detail("daemon.lock=not_found (daemon likely not running)");
        return;
    };
    if file.try_lock_exclusive().is_ok() {
        let _ = FileExt::unlock(&file);
        report.detail("daemon.running=false");
        return;
    }
    report.detail("daemon.running=true");
    match fs::read_to_string(&lock_path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| Ok(serde_json::from_str::<DaemonLockPayload>(&raw)?))
    {
        Ok(payload) => {
            report.detail(format!("daemon.pid={}", payload.pid));
            report.detail(format!("daemon.start_time={}", payload.start_time));
            if payload.build_uuid != env!("BUILD_UUID") {
                report.detail(format!(
                    "daemon.build_mismatch=found (lock={} current={})",
                    payload.build_uuid,
                    env!("BUILD_UUID")
                ));
            }
        }
        Err(err) => report.issue(format!("daemon.lock=corrupt ({err:#})")),
    }
}

fn report_config(cfg: &ArchiverConfig, report: &mut CommandReport) {
    report.detail(format!("remote.base_url={}", cfg.remote.base_url));
    report.detail(format!("remote.source_root={}", cfg.remote.source_root));
    report.detail(format!("remote.archive_root={}", cfg.remote.archive_root));
    report.detail(format!("remote.encode_urls={}", cfg.remote.encode_urls));
    report.detail(format!(
        "remote.token={}",
        if cfg.remote.token.is_empty() { "unset" } else { "set" }
    ));
    report.detail(format!("archive.local_root={}", cfg.archive.local_root));
    report.detail(format!("archive.pointer_root={}", cfg.archive.pointer_root));
    report.detail(format!("archive.scan_dirs={}", cfg.archive.scan_dirs.join(",")));
    report.detail(format!("archive.delete_source={}", cfg.archive.delete_source));
    report.detail(format!("deletion.delay_secs={}", cfg.deletion.delay_secs));
    report.detail(format!("deletion.interval_secs={}", cfg.deletion.interval_secs));
    report.detail(format!(
        "notify.webhook={}",
        if cfg.notify.webhook_url.is_some() { "set" } else { "unset" }
    ));
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("archiver_home={}", paths.archiver_home.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    if let Some(config_path) = resolve_config_path() {
        report.detail(format!(
            "config_file={} ({})",
            config_path.display(),
            if config_path.exists() { "present" } else { "absent" }
        ));
    }

    let cfg = match load_config() {
        Ok(cfg) => {
            report_config(&cfg, &mut report);
            if !std::path::Path::new(&cfg.archive.local_root).is_dir() {
                report.issue(format!(
                    "local root missing ({})",
                    cfg.archive.local_root
                ));
            }
            Some(cfg)
        }
        Err(err) => {
            report.issue(format!("config invalid: {err:#}"));
            None
        }
    };

    match JsonDeletionStore::new(&paths.pending_deletions_file).load() {
        Ok(entries) => {
            report.detail(format!("deletions.pending={}", entries.len()));
            if let Some(next) = entries
                .iter()
                .map(|e| e.delete_time)
                .min_by(|a, b| a.total_cmp(b))
            {
                report.detail(format!("deletions.next={}", format_epoch(next)));
            }
        }
        Err(err) => report.issue(format!("deletions.queue=unreadable ({err:#})")),
    }

    if let Some(cfg) = &cfg {
        match policy::load_or_default(
            &JsonPolicyStore::new(&paths.policies_file),
            &cfg.archive.scan_dirs,
        ) {
            Ok(policies) => report.detail(format!("policies={}", policies.len())),
            Err(err) => report.issue(format!("policies=unreadable ({err:#})")),
        }
    }

    match PointerRegistry::new(&paths.pointer_registry_file).load() {
        Ok(map) => report.detail(format!("pointers.registered={}", map.len())),
        Err(err) => report.issue(format!("pointers.registry=unreadable ({err:#})")),
    }

    report.detail(format!("archive.running={}", run_lock_held(&paths)));
    match state::load(&paths) {
        Ok(last) => {
            if let Some(started) = last.last_run_started_epoch_secs {
                report.detail(format!("last_run.started={}", format_epoch(started as f64)));
                report.detail(format!("last_run.test_mode={}", last.last_run_test_mode));
                report.detail(format!("last_run.files={}", last.last_run_files));
                report.detail(format!("last_run.bytes={}", format_mb(last.last_run_bytes)));
                report.detail(format!("last_run.stopped={}", last.last_run_stopped));
            } else {
                report.detail("last_run=never");
            }
            if let Some(finished) = last.last_run_finished_epoch_secs {
                report.detail(format!("last_run.finished={}", format_epoch(finished as f64)));
            }
            if let Some(err) = last.last_run_error {
                report.detail(format!("last_run.error={err}"));
            }
        }
        Err(err) => report.issue(format!("state=unreadable ({err:#})")),
    }

    report_daemon(&paths, &mut report);

    for key in generated::GENERATED_ARCHIVER_ENV_ALLOWLIST {
        if env::var_os(key).is_some() {
            report.detail(format!("env.override={key}"));
        }
    }

    Ok(report)
}
