use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: String,
    /// Remote path that the local root mirrors.
    pub source_root: String,
    /// Remote path archived directories are copied under.
    pub archive_root: String,
    pub encode_urls: bool,
    pub request_timeout_secs: u64,
}

fn default_encode_urls() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    90
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5244".to_string(),
            token: String::new(),
            source_root: "/media".to_string(),
            archive_root: "/archive".to_string(),
            encode_urls: default_encode_urls(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub local_root: String,
    pub pointer_root: String,
    pub scan_dirs: Vec<String>,
    pub delete_source: bool,
    pub video_extensions: Vec<String>,
    pub excluded_extensions: Vec<String>,
    pub min_video_size_mb: u64,
    pub skip_folders: Vec<String>,
    pub skip_patterns: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            local_root: "/mnt/media".to_string(),
            pointer_root: "./strm".to_string(),
            scan_dirs: vec![
                "电视剧".to_string(),
                "电影".to_string(),
                "动漫/完结动漫".to_string(),
                "综艺".to_string(),
            ],
            delete_source: false,
            video_extensions: [
                ".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".m4v", ".rmvb", ".ts", ".iso",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            excluded_extensions: [".nfo", ".jpg", ".jpeg", ".png", ".txt", ".srt", ".ass"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_video_size_mb: 100,
            skip_folders: Vec::new(),
            skip_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionConfig {
    pub delay_secs: u64,
    pub interval_secs: u64,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            delay_secs: 86_400,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub max_consecutive_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            timeout_secs: 3_600,
            max_consecutive_errors: 5,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub refresh_queue_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiverConfig {
    pub remote: RemoteConfig,
    pub archive: ArchiveConfig,
    pub deletion: DeletionConfig,
    pub poll: PollConfig,
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialArchiverConfig {
    remote: Option<RemoteConfig>,
    archive: Option<ArchiveConfig>,
    deletion: Option<DeletionConfig>,
    poll: Option<PollConfig>,
    notify: Option<NotifyConfig>,
}

impl ArchiverConfig {
    pub fn is_video(&self, file_name: &str) -> bool {
        extension_in(file_name, &self.archive.video_extensions)
    }

    pub fn min_video_size_bytes(&self) -> u64 {
        self.archive.min_video_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn compiled_skip_patterns(&self) -> Result<Vec<Regex>> {
        self.archive
            .skip_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(|err| anyhow!("invalid skip pattern `{p}`: {err}")))
            .collect()
    }
}

/// Case-insensitive extension match; entries may be written with or without
/// the leading dot.
fn extension_in(file_name: &str, extensions: &[String]) -> bool {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    extensions
        .iter()
        .any(|e| e.trim().trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional_string(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

pub fn validate(cfg: &ArchiverConfig) -> Result<()> {
    if cfg.remote.base_url.trim().is_empty() {
        return Err(anyhow!("invalid remote base url: cannot be empty"));
    }
    if !cfg.remote.source_root.starts_with('/') || !cfg.remote.archive_root.starts_with('/') {
        return Err(anyhow!(
            "invalid remote roots: source_root and archive_root must be absolute remote paths"
        ));
    }
    if cfg.archive.local_root.trim().is_empty() {
        return Err(anyhow!("invalid archive local root: cannot be empty"));
    }
    if cfg.archive.pointer_root.trim().is_empty() {
        return Err(anyhow!("invalid pointer root: cannot be empty"));
    }
    if cfg.deletion.interval_secs == 0 {
        return Err(anyhow!(
            "invalid deletion interval: must be >= 1 second"
        ));
    }
    if cfg.poll.interval_secs == 0 {
        return Err(anyhow!("invalid poll interval: must be >= 1 second"));
    }
    if cfg.poll.timeout_secs == 0 {
        return Err(anyhow!("invalid poll timeout: must be >= 1 second"));
    }
    if cfg.poll.max_consecutive_errors == 0 {
        return Err(anyhow!(
            "invalid poll max consecutive errors: must be >= 1"
        ));
    }
    cfg.compiled_skip_patterns()?;
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("ARCHIVER_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".strm_archiver").join("archiver.toml"))
}

fn merge_file_config(base: &mut ArchiverConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed = parse_partial(&raw)
        .map_err(|err| anyhow!("failed to parse archiver config {}: {err}", path.display()))?;
    apply_partial(base, parsed);
    Ok(())
}

fn parse_partial(raw: &str) -> std::result::Result<PartialArchiverConfig, toml::de::Error> {
    toml::from_str(raw)
}

fn apply_partial(base: &mut ArchiverConfig, parsed: PartialArchiverConfig) {
    if let Some(remote) = parsed.remote {
        base.remote = remote;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(deletion) = parsed.deletion {
        base.deletion = deletion;
    }
    if let Some(poll) = parsed.poll {
        base.poll = poll;
    }
    if let Some(notify) = parsed.notify {
        base.notify = notify;
    }
}

fn apply_env_overrides(cfg: &mut ArchiverConfig) {
    cfg.remote.base_url = env_or_string("ARCHIVER_REMOTE_URL", &cfg.remote.base_url);
    cfg.remote.token = env_or_string("ARCHIVER_REMOTE_TOKEN", &cfg.remote.token);
    cfg.remote.source_root = env_or_string("ARCHIVER_REMOTE_SOURCE_ROOT", &cfg.remote.source_root);
    cfg.remote.archive_root =
        env_or_string("ARCHIVER_REMOTE_ARCHIVE_ROOT", &cfg.remote.archive_root);
    cfg.remote.encode_urls = env_or_bool("ARCHIVER_ENCODE_URLS", cfg.remote.encode_urls);
    cfg.remote.request_timeout_secs = env_or_u64(
        "ARCHIVER_REQUEST_TIMEOUT_SECS",
        cfg.remote.request_timeout_secs,
    );

    cfg.archive.local_root = env_or_string("ARCHIVER_LOCAL_ROOT", &cfg.archive.local_root);
    cfg.archive.pointer_root = env_or_string("ARCHIVER_POINTER_ROOT", &cfg.archive.pointer_root);
    cfg.archive.scan_dirs = env_or_csv("ARCHIVER_SCAN_DIRS", &cfg.archive.scan_dirs);
    cfg.archive.delete_source = env_or_bool("ARCHIVER_DELETE_SOURCE", cfg.archive.delete_source);
    cfg.archive.video_extensions =
        env_or_csv("ARCHIVER_VIDEO_EXTENSIONS", &cfg.archive.video_extensions);
    cfg.archive.excluded_extensions = env_or_csv(
        "ARCHIVER_EXCLUDED_EXTENSIONS",
        &cfg.archive.excluded_extensions,
    );
    cfg.archive.min_video_size_mb =
        env_or_u64("ARCHIVER_MIN_VIDEO_SIZE_MB", cfg.archive.min_video_size_mb);
    cfg.archive.skip_folders = env_or_csv("ARCHIVER_SKIP_FOLDERS", &cfg.archive.skip_folders);
    cfg.archive.skip_patterns = env_or_csv("ARCHIVER_SKIP_PATTERNS", &cfg.archive.skip_patterns);

    cfg.deletion.delay_secs = env_or_u64("ARCHIVER_DELETE_DELAY_SECS", cfg.deletion.delay_secs);
    cfg.deletion.interval_secs =
        env_or_u64("ARCHIVER_DELETE_INTERVAL_SECS", cfg.deletion.interval_secs);

    cfg.poll.interval_secs = env_or_u64("ARCHIVER_POLL_INTERVAL_SECS", cfg.poll.interval_secs);
    cfg.poll.timeout_secs = env_or_u64("ARCHIVER_POLL_TIMEOUT_SECS", cfg.poll.timeout_secs);
    cfg.poll.max_consecutive_errors = env_or_u64(
        "ARCHIVER_POLL_MAX_ERRORS",
        u64::from(cfg.poll.max_consecutive_errors),
    )
    .min(u64::from(u32::MAX)) as u32;

    cfg.notify.webhook_url =
        env_or_optional_string("ARCHIVER_NOTIFY_WEBHOOK_URL", cfg.notify.webhook_url.take());
    cfg.notify.refresh_queue_file = env_or_optional_string(
        "ARCHIVER_REFRESH_QUEUE_FILE",
        cfg.notify.refresh_queue_file.take(),
    );
}

pub fn load_config() -> Result<ArchiverConfig> {
    let mut cfg = ArchiverConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
