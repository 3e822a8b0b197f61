use crate::engine::paths::ArchiverPaths;
use crate::engine::util::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverState {
    pub schema_version: u32,
    pub last_run_started_epoch_secs: Option<u64>,
    pub last_run_finished_epoch_secs: Option<u64>,
    pub last_run_test_mode: bool,
    pub last_run_files: u64,
    pub last_run_bytes: u64,
    pub last_run_stopped: bool,
    pub last_run_error: Option<String>,
}

impl Default for ArchiverState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_run_started_epoch_secs: None,
            last_run_finished_epoch_secs: None,
            last_run_test_mode: false,
            last_run_files: 0,
            last_run_bytes: 0,
            last_run_stopped: false,
            last_run_error: None,
        }
    }
}

pub fn state_file_path(paths: &ArchiverPaths) -> PathBuf {
    paths.state_dir.join("archiver_state.json")
}

pub fn load(paths: &ArchiverPaths) -> Result<ArchiverState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(ArchiverState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: ArchiverState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &ArchiverPaths, state: &ArchiverState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    let data = serde_json::to_string_pretty(state)?;
    write_atomic(&file, format!("{data}\n").as_bytes())?;
    Ok(file)
}
