use anyhow::Result;

use crate::commands::{CommandReport, open_deletion_queue};
use crate::engine::audit;
use crate::engine::config::load_config;
use crate::engine::paths::resolve_paths;
use crate::engine::util::{format_epoch, now_epoch_secs_f64};

#[derive(Debug, Clone)]
pub enum DeletionAction {
    List,
    Enqueue { path: String },
    Remove { path: String, time: f64 },
    Clear,
    DeleteNow { path: String },
}

pub fn run(action: DeletionAction) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let queue = open_deletion_queue(&cfg, &paths)?;
    let mut report = CommandReport::new("deletions");

    match action {
        DeletionAction::List => {
            let entries = queue.list();
            let now = now_epoch_secs_f64();
            report.detail(format!("pending={}", entries.len()));
            for entry in entries {
                let due = if entry.delete_time <= now {
                    "due".to_string()
                } else {
                    format!("in {:.0}s", entry.delete_time - now)
                };
                report.detail(format!(
                    "path={} delete_time={:.3} at={} ({due})",
                    entry.path,
                    entry.delete_time,
                    format_epoch(entry.delete_time)
                ));
            }
        }
        DeletionAction::Enqueue { path } => {
            if queue.enqueue(&path)? {
                audit::record(&paths, "deletion", "enqueued", &path);
                report.detail(format!(
                    "scheduled {path} for deletion in {}s",
                    queue.delay_secs()
                ));
            } else {
                report.detail(format!("{path} is already scheduled"));
            }
        }
        DeletionAction::Remove { path, time } => {
            if queue.remove_one(&path, time)? {
                audit::record(&paths, "deletion", "removed", &path);
                report.detail(format!("removed {path} from the queue"));
            } else {
                report.issue(format!("no queued entry matches {path} at {time}"));
            }
        }
        DeletionAction::Clear => {
            let removed = queue.remove_all()?;
            audit::record(&paths, "deletion", "cleared", &format!("removed={removed}"));
            report.detail(format!("removed {removed} queued entries"));
        }
        DeletionAction::DeleteNow { path } => match queue.delete_now(&path) {
            Ok(()) => {
                audit::record(&paths, "deletion", "deleted-now", &path);
                report.detail(format!("deleted {path}"));
            }
            Err(err) => report.issue(format!("{err:#}")),
        },
    }

    Ok(report)
}
