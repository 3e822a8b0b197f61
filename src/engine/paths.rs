use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchiverPaths {
    pub archiver_home: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub pending_deletions_file: PathBuf,
    pub policies_file: PathBuf,
    pub pointer_registry_file: PathBuf,
}

impl ArchiverPaths {
    pub fn under(home: &Path) -> Self {
        let state_dir = home.join("state");
        Self {
            archiver_home: home.to_path_buf(),
            logs_dir: home.join("logs"),
            pending_deletions_file: state_dir.join("pending_deletions.json"),
            policies_file: state_dir.join("media_policies.json"),
            pointer_registry_file: state_dir.join("pointer_registry.json"),
            state_dir,
        }
    }

    pub fn run_lock_file(&self) -> PathBuf {
        self.state_dir.join("archive.lock")
    }

    pub fn stop_marker_file(&self) -> PathBuf {
        self.state_dir.join("archive.stop")
    }

    pub fn daemon_lock_file(&self) -> PathBuf {
        self.state_dir.join("deletion-daemon.lock")
    }

    pub fn daemon_stop_marker_file(&self) -> PathBuf {
        self.state_dir.join("deletion-daemon.stop")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ArchiverPaths> {
    let home = required_home_dir()?;
    let archiver_home = env_or_default_path("ARCHIVER_HOME", home.join(".strm_archiver"));

    let mut paths = ArchiverPaths::under(&archiver_home);
    paths.logs_dir = env_or_default_path("ARCHIVER_LOGS_DIR", paths.logs_dir);
    paths.pending_deletions_file =
        env_or_default_path("ARCHIVER_PENDING_DELETIONS_FILE", paths.pending_deletions_file);
    paths.policies_file = env_or_default_path("ARCHIVER_POLICIES_FILE", paths.policies_file);
    Ok(paths)
}
