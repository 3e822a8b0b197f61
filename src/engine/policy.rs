use crate::engine::thresholds::MediaTypePolicy;
use crate::engine::util::write_atomic;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub type PolicyMap = BTreeMap<String, MediaTypePolicy>;

const DEFAULT_THRESHOLD_DAYS: u32 = 30;

pub trait PolicyStore: Send + Sync {
    fn load(&self) -> Result<Option<PolicyMap>>;
    fn save(&self, policies: &PolicyMap) -> Result<()>;
}

/// Policies stored as one JSON object keyed by media type name.
#[derive(Debug, Clone)]
pub struct JsonPolicyStore {
    path: PathBuf,
}

impl JsonPolicyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyStore for JsonPolicyStore {
    fn load(&self) -> Result<Option<PolicyMap>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut parsed: PolicyMap = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        for (name, policy) in parsed.iter_mut() {
            policy.name = name.clone();
        }
        Ok(Some(parsed))
    }

    fn save(&self, policies: &PolicyMap) -> Result<()> {
        let data = serde_json::to_string_pretty(policies)?;
        write_atomic(&self.path, format!("{data}\n").as_bytes())
    }
}

/// One policy per scan directory, named after the directory.
pub fn default_policies(scan_dirs: &[String]) -> PolicyMap {
    scan_dirs
        .iter()
        .map(|dir| dir.trim_matches('/'))
        .filter(|dir| !dir.is_empty())
        .map(|dir| {
            (
                dir.to_string(),
                MediaTypePolicy::new(dir, dir, DEFAULT_THRESHOLD_DAYS, DEFAULT_THRESHOLD_DAYS),
            )
        })
        .collect()
}

pub fn load_or_default(store: &dyn PolicyStore, scan_dirs: &[String]) -> Result<PolicyMap> {
    Ok(store
        .load()?
        .unwrap_or_else(|| default_policies(scan_dirs)))
}

/// Insert or replace one policy and persist the whole map.
pub fn upsert(
    store: &dyn PolicyStore,
    scan_dirs: &[String],
    policy: MediaTypePolicy,
) -> Result<PolicyMap> {
    if policy.name.trim().is_empty() {
        anyhow::bail!("media type name cannot be empty");
    }
    if policy.relative_dir.trim_matches('/').is_empty() {
        anyhow::bail!("media type directory cannot be empty");
    }

    let mut policies = load_or_default(store, scan_dirs)?;
    policies.insert(policy.name.clone(), policy);
    store.save(&policies)?;
    Ok(policies)
}

pub fn remove(store: &dyn PolicyStore, scan_dirs: &[String], name: &str) -> Result<bool> {
    let mut policies = load_or_default(store, scan_dirs)?;
    let removed = policies.remove(name).is_some();
    if removed {
        store.save(&policies)?;
    }
    Ok(removed)
}
