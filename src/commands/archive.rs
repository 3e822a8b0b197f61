use anyhow::Result;
use std::sync::Arc;

use crate::commands::{CommandReport, open_deletion_queue};
use crate::engine::collaborators::{build_notifier, build_refresh_queue};
use crate::engine::config::load_config;
use crate::engine::coordinator::{ArchiveCoordinator, Collaborators};
use crate::engine::paths::resolve_paths;
use crate::engine::pointer_registry::PointerRegistry;
use crate::engine::policy::JsonPolicyStore;
use crate::engine::util::format_mb;
use crate::remote::client::HttpRemoteFs;

#[derive(Debug, Clone, Default)]
pub struct ArchiveOptions {
    pub test_mode: bool,
}

pub fn run(opts: &ArchiveOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("archive");
    let cfg = load_config()?;
    let paths = resolve_paths()?;

    let deps = Collaborators {
        remote: Arc::new(HttpRemoteFs::new(&cfg.remote)?),
        deletions: open_deletion_queue(&cfg, &paths)?,
        notifier: build_notifier(&cfg.notify),
        health: Arc::new(PointerRegistry::new(&paths.pointer_registry_file)),
        refresh: build_refresh_queue(&cfg.notify),
        policies: Arc::new(JsonPolicyStore::new(&paths.policies_file)),
    };
    let coordinator = ArchiveCoordinator::new(cfg, paths, deps);

    let summary = match coordinator.run_archive(opts.test_mode) {
        Ok(summary) => summary,
        Err(err) => {
            report.issue(format!("{}: {err}", err.code().as_str()));
            return Ok(report);
        }
    };

    report.detail(format!("test_mode={}", summary.test_mode));
    report.detail(format!("stopped={}", summary.stopped));
    report.detail(format!("total_files={}", summary.total_files));
    report.detail(format!(
        "total_bytes={} ({})",
        summary.total_bytes,
        format_mb(summary.total_bytes)
    ));
    for outcome in &summary.outcomes {
        report.detail(format!(
            "outcome media_type={} status={} name={} files={} bytes={} message={}",
            outcome.media_type,
            outcome.status.as_str(),
            outcome.display_name,
            outcome.files,
            outcome.bytes,
            outcome.message
        ));
    }
    report.detail(summary.headline());
    Ok(report)
}
