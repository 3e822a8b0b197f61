use crate::engine::config::ArchiverConfig;
use crate::engine::pathnorm::{display_name, relative_to_remote};
use crate::engine::thresholds::{Eligibility, FileStats, MediaTypePolicy, evaluate};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Housekeeping entries left behind by NAS boxes and desktop OSes.
pub const SYSTEM_DIR_DENYLIST: &[&str] = &[
    "@eaDir",
    "#recycle",
    "#snapshot",
    ".@__thumb",
    "$RECYCLE.BIN",
    "System Volume Information",
    "lost+found",
    ".Trash",
    ".Trashes",
    ".DS_Store",
    ".AppleDouble",
];

/// Media type being processed, threaded through scan, copy and pointer calls.
#[derive(Debug, Clone, Copy)]
pub struct MediaContext<'a> {
    pub policy: &'a MediaTypePolicy,
    pub local_root: &'a Path,
}

impl MediaContext<'_> {
    pub fn media_type(&self) -> &str {
        &self.policy.name
    }

    pub fn media_path(&self) -> PathBuf {
        self.local_root.join(self.policy.relative_dir.trim_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
    /// Relative to the candidate's source path; just the file name for a
    /// single-file candidate.
    pub relative_to_directory: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// A directory copied and deleted as a whole, subdirectories included.
    Directory,
    /// A loose file sitting directly in a container directory.
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveCandidate {
    pub media_type: String,
    pub kind: CandidateKind,
    /// What gets copied and, later, deleted.
    pub source_path: PathBuf,
    /// Relative to the local root, `/`-separated.
    pub relative_path: String,
    pub display_name: String,
    pub files: Vec<CandidateFile>,
    pub total_size: u64,
}

impl ArchiveCandidate {
    /// Directory, relative to the local root, whose mirror holds this
    /// candidate's pointers.
    pub fn pointer_dir(&self) -> &str {
        match self.kind {
            CandidateKind::Directory => &self.relative_path,
            CandidateKind::File => self
                .relative_path
                .rsplit_once('/')
                .map(|(parent, _)| parent)
                .unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    RecentFiles,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockedDirectory {
    pub path: PathBuf,
    pub display_name: String,
    pub kind: BlockKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub eligible: Vec<ArchiveCandidate>,
    pub blocked: Vec<BlockedDirectory>,
    pub stopped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    pub skip_folders: Vec<String>,
    pub skip_patterns: Vec<Regex>,
    pub excluded_extensions: Vec<String>,
    /// Local mirror of the archive destination; never scanned.
    pub archive_mirror: Option<PathBuf>,
}

impl ScanFilter {
    pub fn from_config(cfg: &ArchiverConfig) -> Result<Self> {
        Ok(Self {
            skip_folders: cfg
                .archive
                .skip_folders
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            skip_patterns: cfg.compiled_skip_patterns()?,
            excluded_extensions: cfg
                .archive
                .excluded_extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            archive_mirror: None,
        })
    }

    pub fn skips_dir_name(&self, name: &str) -> bool {
        SYSTEM_DIR_DENYLIST.contains(&name)
            || self.skip_folders.iter().any(|s| name.contains(s.as_str()))
            || self.skip_patterns.iter().any(|re| re.is_match(name))
    }

    fn skips_path(&self, path: &Path) -> bool {
        self.archive_mirror
            .as_deref()
            .is_some_and(|mirror| path.starts_with(mirror))
    }

    pub fn is_qualifying(&self, file_name: &str) -> bool {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        !self.excluded_extensions.contains(&ext)
    }
}

#[derive(Default)]
struct DirGroup {
    files: Vec<(CandidateFile, Option<FileStats>)>,
}

/// Walk the context's media directory and split it into archive units.
///
/// Files are grouped by containing directory; a group then absorbs every
/// group beneath it, so a unit is judged on all qualifying files in the
/// subtree it will be copied and deleted as. Loose files in the media
/// directory itself (or in an ancestor of the archive mirror) become
/// single-file units; those directories are never a unit.
pub fn scan(
    ctx: MediaContext<'_>,
    filter: &ScanFilter,
    now_epoch_secs: f64,
    should_stop: &dyn Fn() -> bool,
) -> ScanReport {
    let media_path = ctx.media_path();
    let mut report = ScanReport::default();
    let mut groups: BTreeMap<PathBuf, DirGroup> = BTreeMap::new();

    let walker = WalkDir::new(&media_path)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_dir() {
                !filter.skips_dir_name(&name) && !filter.skips_path(entry.path())
            } else {
                !SYSTEM_DIR_DENYLIST.contains(&&*name)
            }
        });

    for entry in walker {
        if should_stop() {
            report.stopped = true;
            return report;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(media_type = ctx.media_type(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(parent) = path.parent() else {
            continue;
        };
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to stat file");
                continue;
            }
        };

        let file_name = entry.file_name().to_string_lossy().to_string();
        let stats = filter
            .is_qualifying(&file_name)
            .then(|| FileStats::from_metadata(path, &meta));
        groups.entry(parent.to_path_buf()).or_default().files.push((
            CandidateFile {
                path: path.to_path_buf(),
                size: meta.len(),
                relative_to_directory: file_name,
            },
            stats,
        ));
    }

    let is_container = |dir: &Path| {
        dir == media_path.as_path()
            || filter
                .archive_mirror
                .as_deref()
                .is_some_and(|mirror| mirror.starts_with(dir))
    };

    // Path ordering is component-wise, so a directory's descendants follow
    // it directly in the map.
    let mut units: Vec<(PathBuf, CandidateKind, DirGroup)> = Vec::new();
    for (dir, group) in groups {
        if is_container(&dir) {
            for (file, stats) in group.files {
                units.push((
                    file.path.clone(),
                    CandidateKind::File,
                    DirGroup {
                        files: vec![(file, stats)],
                    },
                ));
            }
            continue;
        }
        let nested = matches!(
            units.last(),
            Some((root, CandidateKind::Directory, _)) if dir.starts_with(root)
        );
        if nested && let Some((_, _, unit)) = units.last_mut() {
            unit.files.extend(group.files);
        } else {
            units.push((dir, CandidateKind::Directory, group));
        }
    }

    for (source_path, kind, group) in units {
        if should_stop() {
            report.stopped = true;
            break;
        }
        if let Some(candidate) =
            judge_unit(ctx, source_path, kind, group, now_epoch_secs, &mut report)
        {
            report.eligible.push(candidate);
        }
        thread::yield_now();
    }

    report
}

fn judge_unit(
    ctx: MediaContext<'_>,
    source_path: PathBuf,
    kind: CandidateKind,
    group: DirGroup,
    now_epoch_secs: f64,
    report: &mut ScanReport,
) -> Option<ArchiveCandidate> {
    let name = display_name(&source_path);
    let qualifying: Vec<FileStats> = group
        .files
        .iter()
        .filter_map(|(_, stats)| stats.clone())
        .collect();

    match evaluate(&qualifying, ctx.policy, now_epoch_secs) {
        Eligibility::Eligible => {
            let relative_path = source_path
                .strip_prefix(ctx.local_root)
                .map(relative_to_remote)
                .unwrap_or_else(|_| relative_to_remote(&source_path));
            let files: Vec<CandidateFile> = group
                .files
                .into_iter()
                .map(|(mut file, _)| {
                    if kind == CandidateKind::Directory
                        && let Ok(rel) = file.path.strip_prefix(&source_path)
                    {
                        file.relative_to_directory = relative_to_remote(rel);
                    }
                    file
                })
                .collect();
            let total_size = files.iter().map(|f| f.size).sum();
            debug!(source = %source_path.display(), files = files.len(), total_size, "eligible");
            Some(ArchiveCandidate {
                media_type: ctx.media_type().to_string(),
                kind,
                source_path,
                relative_path,
                display_name: name,
                files,
                total_size,
            })
        }
        blocked @ Eligibility::Blocked { .. } => {
            report.blocked.push(BlockedDirectory {
                path: source_path,
                display_name: name,
                kind: BlockKind::RecentFiles,
                reason: blocked.reason(),
            });
            None
        }
        Eligibility::Empty => {
            report.blocked.push(BlockedDirectory {
                path: source_path,
                display_name: name,
                kind: BlockKind::Empty,
                reason: Eligibility::Empty.reason(),
            });
            None
        }
    }
}
