use crate::engine::config::PollConfig;
use crate::engine::pathnorm::{encode_path, is_ascii_path, split_remote};
use crate::engine::warn::{self, WarnEvent};
use crate::remote::client::{
    ApiResponse, CopyData, CopyRequest, RemoteFs, TASK_DONE, TASK_FAILED, TASK_RUNNING,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyOutcome {
    pub success: bool,
    pub already_exists: bool,
    pub message: String,
}

impl CopyOutcome {
    fn copied(message: impl Into<String>) -> Self {
        Self {
            success: true,
            already_exists: false,
            message: message.into(),
        }
    }

    fn exists(message: impl Into<String>) -> Self {
        Self {
            success: true,
            already_exists: true,
            message: message.into(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            already_exists: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
    pub max_consecutive_errors: u32,
}

impl From<&PollConfig> for PollSettings {
    fn from(cfg: &PollConfig) -> Self {
        Self {
            interval: cfg.interval(),
            timeout: cfg.timeout(),
            max_consecutive_errors: cfg.max_consecutive_errors.max(1),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

pub fn is_already_exists(code: i64, message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    code != 200
        && (m.contains("already exists") || m.contains("file exists") || m.contains("exists already"))
}

pub fn is_storage_not_found(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("storage not found") || m.contains("failed get storage") || m.contains("object not found")
}

enum TaskWait {
    Done,
    Failed(String),
    TimedOut { pending: Vec<String> },
}

enum Attempt {
    Finished(CopyOutcome),
    StorageNotFound(String),
}

pub struct RemoteCopier<'a> {
    remote: &'a dyn RemoteFs,
    poll: PollSettings,
}

impl<'a> RemoteCopier<'a> {
    pub fn new(remote: &'a dyn RemoteFs, poll: PollSettings) -> Self {
        Self { remote, poll }
    }

    /// Copy `source_path` (a directory or a single file) so that it lands at
    /// `dest_path`. The source is never touched.
    pub fn copy(&self, media_type: &str, source_path: &str, dest_path: &str) -> CopyOutcome {
        let (src_dir, name) = split_remote(source_path);
        let (dst_dir, _) = split_remote(dest_path);
        let request = CopyRequest {
            src_dir,
            dst_dir,
            names: vec![name],
        };
        info!(
            media_type,
            src_dir = %request.src_dir,
            dst_dir = %request.dst_dir,
            names = ?request.names,
            "requesting remote copy"
        );

        match self.attempt(&request) {
            Attempt::Finished(outcome) => outcome,
            Attempt::StorageNotFound(reason) => {
                let non_ascii = !is_ascii_path(&request.src_dir)
                    || !is_ascii_path(&request.dst_dir)
                    || request.names.iter().any(|n| !is_ascii_path(n));
                if !non_ascii {
                    return CopyOutcome::failed(format!("copy rejected: {reason}"));
                }

                let encoded = CopyRequest {
                    src_dir: encode_path(&request.src_dir),
                    dst_dir: encode_path(&request.dst_dir),
                    names: request
                        .names
                        .iter()
                        .map(|n| urlencoding::encode(n).into_owned())
                        .collect(),
                };
                warn!(
                    media_type,
                    src_dir = %encoded.src_dir,
                    "retrying copy with percent-encoded paths"
                );
                match self.attempt(&encoded) {
                    Attempt::Finished(outcome) => outcome,
                    Attempt::StorageNotFound(reason) => CopyOutcome::failed(format!(
                        "copy rejected after encoded retry: {reason}"
                    )),
                }
            }
        }
    }

    fn attempt(&self, request: &CopyRequest) -> Attempt {
        let response: ApiResponse<CopyData> = match self.remote.copy(request) {
            Ok(response) => response,
            Err(err) => {
                let text = format!("{err:#}");
                if is_storage_not_found(&text) {
                    return Attempt::StorageNotFound(text);
                }
                return Attempt::Finished(CopyOutcome::failed(format!(
                    "copy request failed: {text}"
                )));
            }
        };

        if !response.is_ok() {
            if is_already_exists(response.code, &response.message) {
                info!(src_dir = %request.src_dir, "target already exists on remote");
                return Attempt::Finished(CopyOutcome::exists(format!(
                    "already exists: {}",
                    response.message
                )));
            }
            let reason = format!("code={} message={}", response.code, response.message);
            if is_storage_not_found(&response.message) {
                return Attempt::StorageNotFound(reason);
            }
            return Attempt::Finished(CopyOutcome::failed(format!("copy rejected: {reason}")));
        }

        let task_ids: Vec<String> = response
            .data
            .map(|d| d.tasks.into_iter().map(|t| t.id).collect())
            .unwrap_or_default();
        if task_ids.is_empty() {
            return Attempt::Finished(CopyOutcome::failed("copy accepted but no task ids returned"));
        }

        let started = Instant::now();
        let outcome = match self.wait_for_tasks(&task_ids) {
            TaskWait::Done => CopyOutcome::copied(format!(
                "copied via {} task(s) in {:.1}s",
                task_ids.len(),
                started.elapsed().as_secs_f64()
            )),
            TaskWait::Failed(reason) => CopyOutcome::failed(reason),
            TaskWait::TimedOut { pending } => {
                let observed = self.target_observed(request);
                warn::emit(WarnEvent {
                    code: "COPY_WAIT_TIMEOUT",
                    stage: "remote-copy",
                    action: "wait-tasks",
                    target: &request.dst_dir,
                    retry: "next-run",
                    reason: "poll-timeout",
                    err: &format!("pending={} target_observed={observed}", pending.join(",")),
                });
                CopyOutcome::failed(format!(
                    "timed out after {}s waiting for task(s) {}; target {} on remote, completion unconfirmed",
                    self.poll.timeout.as_secs(),
                    pending.join(","),
                    if observed { "present" } else { "not present" }
                ))
            }
        };
        Attempt::Finished(outcome)
    }

    fn wait_for_tasks(&self, task_ids: &[String]) -> TaskWait {
        let started = Instant::now();
        let mut pending: Vec<String> = task_ids.to_vec();
        let mut consecutive_errors: BTreeMap<String, u32> = BTreeMap::new();
        let mut failures: Vec<String> = Vec::new();

        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for task_id in pending {
                match self.remote.task_status(&task_id) {
                    Ok(resp) if resp.is_ok() => {
                        consecutive_errors.remove(&task_id);
                        let info = resp.data.unwrap_or_default();
                        match info.state {
                            TASK_RUNNING => {
                                debug!(task_id = %task_id, progress = info.progress, "task running");
                                still_pending.push(task_id);
                            }
                            TASK_DONE if info.error.trim().is_empty() => {
                                debug!(task_id = %task_id, "task done");
                            }
                            TASK_DONE | TASK_FAILED => {
                                failures.push(format!("task {task_id} failed: {}", info.error));
                            }
                            other => {
                                failures.push(format!("task {task_id} reported unknown state {other}"));
                            }
                        }
                    }
                    result => {
                        let reason = match result {
                            Ok(resp) => format!("code={} message={}", resp.code, resp.message),
                            Err(err) => format!("{err:#}"),
                        };
                        let count = consecutive_errors.entry(task_id.clone()).or_insert(0);
                        *count += 1;
                        warn!(task_id = %task_id, attempt = *count, reason = %reason, "task status fetch failed");
                        if *count >= self.poll.max_consecutive_errors {
                            failures.push(format!(
                                "task {task_id} status unavailable after {} consecutive errors: {reason}",
                                *count
                            ));
                        } else {
                            still_pending.push(task_id);
                        }
                    }
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                return if failures.is_empty() {
                    TaskWait::Done
                } else {
                    TaskWait::Failed(failures.join("; "))
                };
            }
            if started.elapsed() >= self.poll.timeout {
                return TaskWait::TimedOut { pending };
            }
            thread::sleep(self.poll.interval);
        }
    }

    fn target_observed(&self, request: &CopyRequest) -> bool {
        match self.remote.list(&request.dst_dir) {
            Ok(entries) => entries
                .iter()
                .any(|e| request.names.iter().any(|n| *n == e.name)),
            Err(err) => {
                warn!(dst_dir = %request.dst_dir, error = %format!("{err:#}"), "existence check failed");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeRemote, ok_copy, rejected_copy, task};
    use super::*;
    use crate::remote::client::RemoteEntry;

    fn fast_poll() -> PollSettings {
        PollSettings {
            interval: Duration::ZERO,
            timeout: Duration::from_secs(30),
            max_consecutive_errors: 5,
        }
    }

    #[test]
    fn successful_copy_polls_every_task() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&["a", "b"]));
        remote.push_task("a", task(0, ""));
        remote.push_task("a", task(1, ""));
        remote.push_task("b", task(1, ""));

        let out = RemoteCopier::new(&remote, fast_poll()).copy(
            "movies",
            "/media/电影/Avatar",
            "/archive/电影/Avatar",
        );
        assert!(out.success, "{out:?}");
        assert!(!out.already_exists);

        let calls = remote.copy_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].src_dir, "/media/电影");
        assert_eq!(calls[0].dst_dir, "/archive/电影");
        assert_eq!(calls[0].names, vec!["Avatar".to_string()]);
    }

    #[test]
    fn already_exists_is_success() {
        let remote = FakeRemote::default();
        remote.push_copy(rejected_copy(403, "object already exists"));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/m/A", "/a/A");
        assert!(out.success);
        assert!(out.already_exists);
    }

    #[test]
    fn done_with_error_field_is_failure() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&["a"]));
        remote.push_task("a", task(1, "disk full"));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/m/A", "/a/A");
        assert!(!out.success);
        assert!(out.message.contains("disk full"));
    }

    #[test]
    fn failed_state_is_failure() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&["a"]));
        remote.push_task("a", task(2, "quota"));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/m/A", "/a/A");
        assert!(!out.success);
        assert!(out.message.contains("quota"));
    }

    #[test]
    fn transient_status_errors_below_bound_are_tolerated() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&["a"]));
        for _ in 0..4 {
            remote.push_task("a", Err(anyhow::anyhow!("connection reset")));
        }
        remote.push_task("a", task(1, ""));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/m/A", "/a/A");
        assert!(out.success, "{out:?}");
    }

    #[test]
    fn consecutive_status_errors_exhaust_the_task() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&["a"]));
        remote.push_task("a", Err(anyhow::anyhow!("connection reset")));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/m/A", "/a/A");
        assert!(!out.success);
        assert!(out.message.contains("5 consecutive errors"), "{}", out.message);
    }

    #[test]
    fn timeout_reports_failure_and_existence_check() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&["slow"]));
        remote.push_task("slow", task(0, ""));
        remote.listing.lock().expect("lock").push(RemoteEntry {
            name: "A".to_string(),
            is_dir: true,
            size: 0,
            modified_time: String::new(),
        });

        let poll = PollSettings {
            timeout: Duration::ZERO,
            ..fast_poll()
        };
        let out = RemoteCopier::new(&remote, poll).copy("movies", "/m/A", "/a/A");
        assert!(!out.success);
        assert!(out.message.contains("timed out"));
        assert!(out.message.contains("present on remote"));
    }

    #[test]
    fn non_ascii_storage_error_retries_once_encoded() {
        let remote = FakeRemote::default();
        remote.push_copy(rejected_copy(500, "storage not found; please add a storage first"));
        remote.push_copy(ok_copy(&["a"]));

        let out = RemoteCopier::new(&remote, fast_poll()).copy(
            "movies",
            "/media/电影/阿凡达",
            "/archive/电影/阿凡达",
        );
        assert!(out.success, "{out:?}");

        let calls = remote.copy_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].src_dir, "/media/%E7%94%B5%E5%BD%B1");
        assert_eq!(calls[1].names, vec!["%E9%98%BF%E5%87%A1%E8%BE%BE".to_string()]);
    }

    #[test]
    fn storage_error_behind_http_error_status_still_retries_encoded() {
        use crate::engine::config::RemoteConfig;
        use crate::remote::client::HttpRemoteFs;
        use httpmock::prelude::*;

        let server = MockServer::start();
        let raw = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/copy")
                .json_body(serde_json::json!({
                    "src_dir": "/media/电影",
                    "dst_dir": "/archive/电影",
                    "names": ["Avatar"],
                }));
            then.status(500)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"code": 500, "message": "storage not found"}));
        });
        let encoded = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/copy")
                .json_body(serde_json::json!({
                    "src_dir": "/media/%E7%94%B5%E5%BD%B1",
                    "dst_dir": "/archive/%E7%94%B5%E5%BD%B1",
                    "names": ["Avatar"],
                }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "code": 200,
                    "data": {"tasks": [{"id": "t1"}]},
                }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/admin/task/status");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"code": 200, "data": {"state": 1, "error": ""}}));
        });

        let remote = HttpRemoteFs::new(&RemoteConfig {
            base_url: server.base_url(),
            ..RemoteConfig::default()
        })
        .expect("client");
        let out = RemoteCopier::new(&remote, fast_poll()).copy(
            "movies",
            "/media/电影/Avatar",
            "/archive/电影/Avatar",
        );

        assert!(out.success, "{out:?}");
        raw.assert();
        encoded.assert();
    }

    #[test]
    fn encoded_retry_happens_at_most_once() {
        let remote = FakeRemote::default();
        remote.push_copy(rejected_copy(500, "storage not found"));
        remote.push_copy(rejected_copy(500, "storage not found"));
        remote.push_copy(ok_copy(&["never"]));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/媒体/甲", "/归档/甲");
        assert!(!out.success);
        assert_eq!(remote.copy_calls().len(), 2);
    }

    #[test]
    fn ascii_storage_error_does_not_retry() {
        let remote = FakeRemote::default();
        remote.push_copy(rejected_copy(500, "storage not found"));

        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/media/A", "/archive/A");
        assert!(!out.success);
        assert_eq!(remote.copy_calls().len(), 1);
    }

    #[test]
    fn accepted_without_tasks_is_failure() {
        let remote = FakeRemote::default();
        remote.push_copy(ok_copy(&[]));
        let out = RemoteCopier::new(&remote, fast_poll()).copy("movies", "/m/A", "/a/A");
        assert!(!out.success);
        assert!(out.message.contains("no task ids"));
    }

    #[test]
    fn classifiers() {
        assert!(is_already_exists(403, "File exists"));
        assert!(!is_already_exists(200, "already exists"));
        assert!(is_storage_not_found("failed get storage: storage not found"));
        assert!(!is_storage_not_found("permission denied"));
    }
}
