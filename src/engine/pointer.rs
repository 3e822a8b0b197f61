use crate::engine::collaborators::{HealthTracker, RefreshQueue};
use crate::engine::config::ArchiverConfig;
use crate::engine::pathnorm::{download_url, final_remote_path, pointer_file_name};
use crate::engine::scanner::{ArchiveCandidate, MediaContext};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerReport {
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

pub struct PointerGenerator<'a> {
    cfg: &'a ArchiverConfig,
    health: &'a dyn HealthTracker,
    refresh: Option<&'a dyn RefreshQueue>,
}

impl<'a> PointerGenerator<'a> {
    pub fn new(
        cfg: &'a ArchiverConfig,
        health: &'a dyn HealthTracker,
        refresh: Option<&'a dyn RefreshQueue>,
    ) -> Self {
        Self {
            cfg,
            health,
            refresh,
        }
    }

    fn pointer_root(&self) -> PathBuf {
        PathBuf::from(&self.cfg.archive.pointer_root)
    }

    /// Write one pointer per archived video in `candidate`, each pointing at
    /// the file's new home under `dest_remote_path`.
    pub fn generate(
        &self,
        ctx: MediaContext<'_>,
        dest_remote_path: &str,
        candidate: &ArchiveCandidate,
    ) -> Result<PointerReport> {
        let mut report = PointerReport::default();
        let min_size = self.cfg.min_video_size_bytes();
        let pointer_dir = candidate
            .pointer_dir()
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.pointer_root(), |acc, seg| acc.join(seg));

        for file in &candidate.files {
            if !self.cfg.is_video(&file.relative_to_directory) || file.size < min_size {
                report.skipped += 1;
                continue;
            }

            let remote_path = final_remote_path(dest_remote_path, &file.relative_to_directory);
            let url = download_url(
                &self.cfg.remote.base_url,
                &remote_path,
                self.cfg.remote.encode_urls,
            );

            let rel = Path::new(&file.relative_to_directory);
            let file_name = rel
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.relative_to_directory.clone());
            let target_dir = match rel.parent() {
                Some(parent) => pointer_dir.join(parent),
                None => pointer_dir.clone(),
            };
            let pointer_path = target_dir.join(pointer_file_name(&file_name));

            if write_pointer(&pointer_path, &url)? {
                report.written += 1;
                info!(
                    media_type = ctx.media_type(),
                    pointer = %pointer_path.display(),
                    url = %url,
                    "pointer written"
                );
            } else {
                report.unchanged += 1;
                debug!(pointer = %pointer_path.display(), "pointer unchanged");
            }

            if let Err(err) = self.health.register_pointer(&pointer_path, &remote_path) {
                warn!(pointer = %pointer_path.display(), error = %format!("{err:#}"), "pointer registration failed");
            }
            if let Some(refresh) = self.refresh
                && let Err(err) = refresh.queue(&pointer_path)
            {
                warn!(pointer = %pointer_path.display(), error = %format!("{err:#}"), "refresh queue failed");
            }
        }

        Ok(report)
    }
}

/// Returns false when the file already holds exactly `url`.
fn write_pointer(path: &Path, url: &str) -> Result<bool> {
    if let Ok(existing) = fs::read(path)
        && existing == url.as_bytes()
    {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, url.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
