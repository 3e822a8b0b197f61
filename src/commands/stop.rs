use anyhow::{Context, Result};
use std::fs;

use crate::commands::CommandReport;
use crate::engine::coordinator::{request_stop, run_lock_held};
use crate::engine::paths::resolve_paths;
use crate::engine::util::now_epoch_secs;

pub fn run(daemon: bool) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("stop");

    if daemon {
        let marker = paths.daemon_stop_marker_file();
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&marker, now_epoch_secs()?.to_string())
            .with_context(|| format!("failed to write {}", marker.display()))?;
        report.detail(format!("daemon stop requested via {}", marker.display()));
        return Ok(report);
    }

    if !run_lock_held(&paths) {
        report.detail("no archive run in progress");
        return Ok(report);
    }
    let marker = request_stop(&paths)?;
    report.detail(format!(
        "stop requested via {}; the run ends at the next directory boundary",
        marker.display()
    ));
    Ok(report)
}
