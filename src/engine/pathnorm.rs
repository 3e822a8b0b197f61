//! Pure string surgery on local and remote paths.
//!
//! Nothing in here touches the filesystem. Remote paths are always
//! `/`-separated; local relative paths are converted to that form before they
//! are joined onto a remote root.

use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

const UNSAFE_DISPLAY_CHARS: [char; 8] = [':', '\\', '*', '?', '"', '<', '>', '|'];

static SEASON_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^season[\s._-]*\d+$",
        r"(?i)(^|[\s._-])S\d{1,3}(E\d{1,4})?($|[\s._-])",
        r"第\s*[0-9零一二三四五六七八九十百]+\s*季",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// True for directory names that look like a TV season (`Season 2`,
/// `S02`, `S01E03`, `第二季`).
pub fn is_season_dir(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && SEASON_PATTERNS.iter().any(|re| re.is_match(name))
}

/// Replace characters that are unsafe in file names on common filesystems.
pub fn sanitize_display_name(name: &str) -> String {
    name.chars()
        .map(|c| if UNSAFE_DISPLAY_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Human-facing name for a candidate directory. Season directories are
/// prefixed with their series directory so `Show/Season 1` reads as
/// `Show Season 1`.
pub fn display_name(dir: &Path) -> String {
    let name = file_name_lossy(dir);
    if is_season_dir(&name)
        && let Some(series) = dir.parent().map(file_name_lossy)
        && !series.is_empty()
    {
        return sanitize_display_name(&format!("{series} {name}"));
    }
    sanitize_display_name(&name)
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Render a relative local path with `/` separators, dropping `.` and any
/// root or prefix components.
pub fn relative_to_remote(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join `rel` onto a remote `base`, collapsing duplicate separators.
pub fn join_remote(base: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    parts.extend(rel.split('/').filter(|s| !s.is_empty()));
    format!("/{}", parts.join("/"))
}

/// Split a remote path into its parent directory and final name.
pub fn split_remote(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// Final remote location of a file archived under `dest`.
///
/// When `dest` already names the file itself (single-file archives) the
/// trailing segment is not appended a second time.
pub fn final_remote_path(dest: &str, relative_file: &str) -> String {
    let file_name = relative_file.rsplit('/').next().unwrap_or(relative_file);
    let (_, last) = split_remote(dest);
    if !file_name.is_empty() && last == file_name && !relative_file.contains('/') {
        return join_remote(dest, "");
    }
    join_remote(dest, relative_file)
}

/// Percent-encode every segment of a `/`-separated path, keeping the
/// separators themselves.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn is_ascii_path(path: &str) -> bool {
    path.is_ascii()
}

/// `"{base}/d{path}"`, with the path optionally percent-encoded.
pub fn download_url(base_url: &str, remote_path: &str, encode: bool) -> String {
    let path = if encode {
        encode_path(remote_path)
    } else {
        remote_path.to_string()
    };
    format!("{}/d{}", base_url.trim_end_matches('/'), path)
}

/// Pointer file name for a media file: same stem, `.strm` extension.
pub fn pointer_file_name(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => format!("{stem}.strm"),
        _ => format!("{file_name}.strm"),
    }
}
