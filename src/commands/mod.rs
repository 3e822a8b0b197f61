pub mod archive;
pub mod daemon;
pub mod deletions;
pub mod policy;
pub mod status;
pub mod stop;

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::engine::config::ArchiverConfig;
use crate::engine::deletion_queue::{DeletionQueue, JsonDeletionStore};
use crate::engine::paths::ArchiverPaths;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

pub fn open_deletion_queue(
    cfg: &ArchiverConfig,
    paths: &ArchiverPaths,
) -> Result<Arc<DeletionQueue>> {
    let store = JsonDeletionStore::new(&paths.pending_deletions_file);
    Ok(Arc::new(DeletionQueue::open(
        Box::new(store),
        cfg.deletion.delay_secs,
    )?))
}
