use crate::engine::util::{SECS_PER_DAY, system_time_epoch_secs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTypePolicy {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "dir")]
    pub relative_dir: String,
    #[serde(alias = "creation_days")]
    pub creation_days_threshold: u32,
    #[serde(alias = "mtime_days")]
    pub mtime_days_threshold: u32,
}

impl MediaTypePolicy {
    pub fn new(
        name: impl Into<String>,
        relative_dir: impl Into<String>,
        creation_days_threshold: u32,
        mtime_days_threshold: u32,
    ) -> Self {
        Self {
            name: name.into(),
            relative_dir: relative_dir.into(),
            creation_days_threshold,
            mtime_days_threshold,
        }
    }
}

/// Look up the policy whose directory matches `relative_dir`.
pub fn policy_for<'a>(
    policies: &'a BTreeMap<String, MediaTypePolicy>,
    relative_dir: &str,
) -> Option<&'a MediaTypePolicy> {
    let wanted = relative_dir.trim_matches('/');
    policies
        .values()
        .find(|p| p.relative_dir.trim_matches('/') == wanted)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileStats {
    pub path: PathBuf,
    pub created_epoch_secs: f64,
    pub modified_epoch_secs: f64,
}

impl FileStats {
    /// Creation time falls back to modification time where the platform
    /// does not record a birth time.
    pub fn from_metadata(path: &Path, meta: &Metadata) -> Self {
        let modified = meta.modified().map(system_time_epoch_secs).unwrap_or(0.0);
        let created = meta
            .created()
            .map(system_time_epoch_secs)
            .unwrap_or(modified);
        Self {
            path: path.to_path_buf(),
            created_epoch_secs: created,
            modified_epoch_secs: modified,
        }
    }

    pub fn age_at(&self, now_epoch_secs: f64) -> FileAge {
        FileAge {
            creation_days: (now_epoch_secs - self.created_epoch_secs) / SECS_PER_DAY,
            mtime_days: (now_epoch_secs - self.modified_epoch_secs) / SECS_PER_DAY,
        }
    }

    fn last_touched(&self) -> f64 {
        self.created_epoch_secs.max(self.modified_epoch_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileAge {
    pub creation_days: f64,
    pub mtime_days: f64,
}

impl FileAge {
    /// A file holds its directory back only while it is younger than both
    /// thresholds.
    pub fn blocks(&self, policy: &MediaTypePolicy) -> bool {
        self.creation_days < f64::from(policy.creation_days_threshold)
            && self.mtime_days < f64::from(policy.mtime_days_threshold)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    Eligible,
    Blocked { path: PathBuf, age: FileAge },
    Empty,
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Eligible => "eligible".to_string(),
            Self::Empty => "no qualifying files".to_string(),
            Self::Blocked { path, age } => format!(
                "recent file {} (created {:.1} days ago, modified {:.1} days ago)",
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string()),
                age.creation_days,
                age.mtime_days
            ),
        }
    }
}

/// Evaluate the qualifying files of one directory against `policy`.
pub fn evaluate(files: &[FileStats], policy: &MediaTypePolicy, now_epoch_secs: f64) -> Eligibility {
    if files.is_empty() {
        return Eligibility::Empty;
    }

    let blocker = files
        .iter()
        .filter(|f| f.age_at(now_epoch_secs).blocks(policy))
        .max_by(|a, b| a.last_touched().total_cmp(&b.last_touched()));

    match blocker {
        Some(file) => Eligibility::Blocked {
            path: file.path.clone(),
            age: file.age_at(now_epoch_secs),
        },
        None => Eligibility::Eligible,
    }
}

pub fn is_eligible(files: &[FileStats], policy: &MediaTypePolicy, now_epoch_secs: f64) -> bool {
    evaluate(files, policy, now_epoch_secs).is_eligible()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_700_000_000.0;

    fn file(name: &str, created_days_ago: f64, modified_days_ago: f64) -> FileStats {
        FileStats {
            path: PathBuf::from(format!("/m/{name}")),
            created_epoch_secs: NOW - created_days_ago * SECS_PER_DAY,
            modified_epoch_secs: NOW - modified_days_ago * SECS_PER_DAY,
        }
    }

    fn policy(creation: u32, mtime: u32) -> MediaTypePolicy {
        MediaTypePolicy::new("movies", "电影", creation, mtime)
    }

    #[test]
    fn old_files_are_eligible() {
        let files = vec![file("a.mkv", 25.0, 25.0), file("b.mkv", 40.0, 30.0)];
        assert!(is_eligible(&files, &policy(20, 20), NOW));
    }

    #[test]
    fn clearing_either_window_is_enough() {
        let policy = policy(20, 20);
        // Created long ago, touched two days ago.
        assert!(!file("retagged.mkv", 25.0, 2.0).age_at(NOW).blocks(&policy));
        // Created two days ago with an old mtime, as after a copy that keeps times.
        assert!(!file("restored.mkv", 2.0, 25.0).age_at(NOW).blocks(&policy));
        assert!(file("new.mkv", 2.0, 2.0).age_at(NOW).blocks(&policy));

        let files = vec![file("old.mkv", 25.0, 25.0), file("retagged.mkv", 25.0, 2.0)];
        assert!(is_eligible(&files, &policy, NOW));
    }

    #[test]
    fn file_younger_than_both_thresholds_blocks_and_is_named() {
        let files = vec![file("old.mkv", 25.0, 25.0), file("new.mkv", 2.0, 2.0)];
        let got = evaluate(&files, &policy(20, 20), NOW);
        match &got {
            Eligibility::Blocked { path, age } => {
                assert_eq!(path, &PathBuf::from("/m/new.mkv"));
                assert!((age.mtime_days - 2.0).abs() < 1e-6);
            }
            other => panic!("expected blocked, got {other:?}"),
        }
        assert!(got.reason().contains("new.mkv"));
        assert!(got.reason().contains("2.0 days"));
    }

    #[test]
    fn most_recently_touched_blocker_is_reported() {
        let files = vec![
            file("a.mkv", 5.0, 5.0),
            file("b.mkv", 1.0, 3.0),
            file("c.mkv", 4.0, 4.0),
        ];
        match evaluate(&files, &policy(20, 20), NOW) {
            Eligibility::Blocked { path, .. } => assert_eq!(path, PathBuf::from("/m/b.mkv")),
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn zero_thresholds_never_block() {
        let files = vec![file("now.mkv", 0.0, 0.0)];
        assert!(is_eligible(&files, &policy(0, 0), NOW));
    }

    #[test]
    fn no_files_is_empty_not_eligible() {
        let got = evaluate(&[], &policy(1, 1), NOW);
        assert_eq!(got, Eligibility::Empty);
        assert!(!got.is_eligible());
    }

    #[test]
    fn policy_lookup_ignores_slashes() {
        let mut map = BTreeMap::new();
        map.insert("anime".to_string(), MediaTypePolicy::new("anime", "动漫/完结动漫", 1, 1));
        assert!(policy_for(&map, "/动漫/完结动漫/").is_some());
        assert!(policy_for(&map, "电影").is_none());
    }

    #[test]
    fn policy_accepts_legacy_field_names() {
        let raw = r#"{"dir":"电影","creation_days":10,"mtime_days":30}"#;
        let parsed: MediaTypePolicy = serde_json::from_str(raw).expect("parse");
        assert_eq!(parsed.relative_dir, "电影");
        assert_eq!(parsed.creation_days_threshold, 10);
        assert_eq!(parsed.mtime_days_threshold, 30);
    }
}
