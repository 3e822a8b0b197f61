use crate::engine::config::RemoteConfig;
use crate::engine::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CODE_OK: i64 = 200;

pub const TASK_RUNNING: i64 = 0;
pub const TASK_DONE: i64 = 1;
pub const TASK_FAILED: i64 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default, alias = "modified")]
    pub modified_time: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListData {
    #[serde(default)]
    content: Option<Vec<RemoteEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyRequest {
    pub src_dir: String,
    pub dst_dir: String,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopyData {
    #[serde(default)]
    pub tasks: Vec<TaskRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub state: i64,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub error: String,
}

/// The remote file-management service. Implementations must be usable from
/// the archive thread and the deletion worker at the same time.
pub trait RemoteFs: Send + Sync {
    fn list(&self, path: &str) -> Result<Vec<RemoteEntry>>;
    fn copy(&self, request: &CopyRequest) -> Result<ApiResponse<CopyData>>;
    fn task_status(&self, task_id: &str) -> Result<ApiResponse<TaskInfo>>;
}

#[derive(Debug, Clone)]
pub struct HttpRemoteFs {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemoteFs {
    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()
            .context("failed to build remote http client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
        })
    }

    fn post<B: Serialize, T: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.post(&url).json(body);
        if !self.token.is_empty() {
            request = request.header(AUTHORIZATION, self.token.as_str());
        }
        let response = request
            .send()
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let text = response
            .text()
            .with_context(|| format!("failed to read response body from {url}"))?;
        // The body carries the remote's own message, which callers classify.
        if !status.is_success() {
            anyhow::bail!(
                "{url} returned HTTP {status}: {}",
                truncate_with_ellipsis(&text, 200)
            );
        }
        if content_type.starts_with("text/html") {
            anyhow::bail!(
                "{url} returned html instead of json: {}",
                truncate_with_ellipsis(&text, 200)
            );
        }
        serde_json::from_str(&text).with_context(|| {
            format!(
                "invalid JSON from {url}: {}",
                truncate_with_ellipsis(&text, 200)
            )
        })
    }
}

impl RemoteFs for HttpRemoteFs {
    fn list(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let body = serde_json::json!({
            "path": path,
            "password": "",
            "page": 1,
            "per_page": 0,
            "refresh": false,
        });
        let response: ApiResponse<ListData> = self.post("/api/fs/list", &body)?;
        if !response.is_ok() {
            anyhow::bail!(
                "list {path} failed: code={} message={}",
                response.code,
                response.message
            );
        }
        Ok(response
            .data
            .and_then(|d| d.content)
            .unwrap_or_default())
    }

    fn copy(&self, request: &CopyRequest) -> Result<ApiResponse<CopyData>> {
        self.post("/api/fs/copy", request)
    }

    fn task_status(&self, task_id: &str) -> Result<ApiResponse<TaskInfo>> {
        self.post(
            "/api/admin/task/status",
            &serde_json::json!({ "id": task_id }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn remote_for(server: &MockServer) -> HttpRemoteFs {
        let cfg = RemoteConfig {
            base_url: server.base_url(),
            token: "secret-token".to_string(),
            ..RemoteConfig::default()
        };
        HttpRemoteFs::new(&cfg).expect("client")
    }

    #[test]
    fn copy_sends_batch_request_with_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/fs/copy")
                .header("authorization", "secret-token")
                .json_body(serde_json::json!({
                    "src_dir": "/media/电影",
                    "dst_dir": "/archive/电影",
                    "names": ["Avatar"],
                }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "code": 200,
                    "message": "success",
                    "data": {"tasks": [{"id": "t1"}, {"id": "t2"}]},
                }));
        });

        let remote = remote_for(&server);
        let response = remote
            .copy(&CopyRequest {
                src_dir: "/media/电影".to_string(),
                dst_dir: "/archive/电影".to_string(),
                names: vec!["Avatar".to_string()],
            })
            .expect("copy");

        mock.assert();
        assert!(response.is_ok());
        let ids: Vec<_> = response
            .data
            .expect("data")
            .tasks
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn task_status_parses_state() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/admin/task/status")
                .json_body(serde_json::json!({"id": "t1"}));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({
                    "code": 200,
                    "data": {"state": 1, "progress": 100.0, "error": ""},
                }));
        });

        let status = remote_for(&server).task_status("t1").expect("status");
        let info = status.data.expect("data");
        assert_eq!(info.state, TASK_DONE);
        assert!(info.error.is_empty());
    }

    #[test]
    fn list_treats_null_content_as_empty() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/fs/list");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"code": 200, "data": {"content": null}}));
        });

        let entries = remote_for(&server).list("/archive").expect("list");
        assert!(entries.is_empty());
    }

    #[test]
    fn error_status_keeps_remote_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/fs/copy");
            then.status(500)
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"code": 500, "message": "storage not found"}));
        });

        let err = remote_for(&server)
            .copy(&CopyRequest {
                src_dir: "/media".to_string(),
                dst_dir: "/archive".to_string(),
                names: vec!["A".to_string()],
            })
            .expect_err("error status");
        let text = format!("{err:#}");
        assert!(text.contains("500"), "{text}");
        assert!(text.contains("storage not found"), "{text}");
    }

    #[test]
    fn html_response_is_an_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/fs/list");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html>gateway</html>");
        });

        let err = remote_for(&server).list("/x").expect_err("html");
        assert!(format!("{err:#}").contains("html"));
    }
}
