use anyhow::Result;

use crate::commands::CommandReport;
use crate::engine::config::load_config;
use crate::engine::paths::resolve_paths;
use crate::engine::policy::{self, JsonPolicyStore};
use crate::engine::thresholds::MediaTypePolicy;

#[derive(Debug, Clone)]
pub enum PolicyAction {
    List,
    Set {
        name: String,
        dir: String,
        creation_days: u32,
        mtime_days: u32,
    },
    Remove {
        name: String,
    },
}

fn describe(policy: &MediaTypePolicy) -> String {
    format!(
        "name={} dir={} creation_days={} mtime_days={}",
        policy.name, policy.relative_dir, policy.creation_days_threshold, policy.mtime_days_threshold
    )
}

pub fn run(action: PolicyAction) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let store = JsonPolicyStore::new(&paths.policies_file);
    let scan_dirs = &cfg.archive.scan_dirs;
    let mut report = CommandReport::new("policy");

    match action {
        PolicyAction::List => {
            let policies = policy::load_or_default(&store, scan_dirs)?;
            report.detail(format!("policies_file={}", store.path().display()));
            if !store.path().exists() {
                report.detail("source=defaults");
            }
            for p in policies.values() {
                report.detail(describe(p));
            }
        }
        PolicyAction::Set {
            name,
            dir,
            creation_days,
            mtime_days,
        } => {
            let updated = MediaTypePolicy::new(name.trim(), dir.trim(), creation_days, mtime_days);
            let line = describe(&updated);
            policy::upsert(&store, scan_dirs, updated)?;
            report.detail(format!("saved {line}"));
        }
        PolicyAction::Remove { name } => {
            if policy::remove(&store, scan_dirs, &name)? {
                report.detail(format!("removed {name}"));
            } else {
                report.issue(format!("no media type named {name}"));
            }
        }
    }

    Ok(report)
}
