use crate::engine::collaborators::HealthTracker;
use crate::engine::util::{now_epoch_secs, write_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRecord {
    pub pointer_path: String,
    pub remote_source_path: String,
    pub registered_at_epoch_secs: u64,
}

/// JSON map of pointer path to the remote file it points at.
#[derive(Debug)]
pub struct PointerRegistry {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl PointerRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<BTreeMap<String, PointerRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", self.path.display()))
    }

    fn save(&self, map: &BTreeMap<String, PointerRecord>) -> Result<()> {
        let data = serde_json::to_string_pretty(map)?;
        write_atomic(&self.path, format!("{data}\n").as_bytes())
    }

    pub fn upsert(&self, pointer_path: &str, remote_source_path: &str) -> Result<PointerRecord> {
        if pointer_path.trim().is_empty() {
            anyhow::bail!("pointer path cannot be empty");
        }
        if remote_source_path.trim().is_empty() {
            anyhow::bail!("remote source path cannot be empty");
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("pointer registry lock poisoned"))?;
        let mut map = self.load()?;
        let record = PointerRecord {
            pointer_path: pointer_path.to_string(),
            remote_source_path: remote_source_path.to_string(),
            registered_at_epoch_secs: now_epoch_secs()?,
        };
        map.insert(pointer_path.to_string(), record.clone());
        self.save(&map)?;
        Ok(record)
    }
}

impl HealthTracker for PointerRegistry {
    fn register_pointer(&self, pointer_path: &Path, remote_source_path: &str) -> Result<()> {
        self.upsert(&pointer_path.to_string_lossy(), remote_source_path)
            .map(|_| ())
    }
}
