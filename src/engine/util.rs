use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat, TimeZone};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SECS_PER_DAY: f64 = 86_400.0;

/// Return the current Unix epoch in seconds.
///
/// Every module takes its clock reading from here so tests can pass an
/// explicit `now` to the `*_at` variants instead.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Fractional epoch seconds, for comparisons against file timestamps.
pub fn now_epoch_secs_f64() -> f64 {
    system_time_epoch_secs(SystemTime::now())
}

/// Seconds since the epoch for a filesystem timestamp, clamped at zero.
pub fn system_time_epoch_secs(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(_) => 0.0,
    }
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Render epoch seconds as a local RFC 3339 timestamp for reports.
pub fn format_epoch(epoch_secs: f64) -> String {
    let secs = epoch_secs.floor() as i64;
    match Local.timestamp_opt(secs, 0).single() {
        Some(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, false),
        None => format!("{epoch_secs:.0}"),
    }
}

/// Replace `path` with `contents` via a sibling temp file and rename, so a
/// crash mid-write never leaves a truncated file behind.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
