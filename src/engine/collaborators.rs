use crate::engine::config::NotifyConfig;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fire-and-forget operator notifications.
pub trait Notifier: Send + Sync {
    fn send(&self, message: &str);
}

/// Records which remote file a pointer stands for.
pub trait HealthTracker: Send + Sync {
    fn register_pointer(&self, pointer_path: &Path, remote_source_path: &str) -> Result<()>;
}

/// Asks a media server to pick up a newly written pointer.
pub trait RefreshQueue: Send + Sync {
    fn queue(&self, pointer_path: &Path) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn send(&self, message: &str) {
        info!(target: "archiver::notify", "{message}");
    }
}

/// POSTs `{"text": message}` to a webhook. Delivery problems are logged and
/// otherwise ignored.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self {
            client,
            url: url.trim().to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, message: &str) {
        info!(target: "archiver::notify", "{message}");
        let result = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .and_then(|r| r.error_for_status());
        if let Err(err) = result {
            warn!(url = %self.url, error = %err, "webhook notification failed");
        }
    }
}

pub fn build_notifier(cfg: &NotifyConfig) -> Arc<dyn Notifier> {
    match cfg.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => match WebhookNotifier::new(url) {
            Ok(notifier) => Arc::new(notifier),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "falling back to log-only notifications");
                Arc::new(TracingNotifier)
            }
        },
        _ => Arc::new(TracingNotifier),
    }
}

/// One pointer path per line, appended for an external refresher to consume.
#[derive(Debug, Clone)]
pub struct FileRefreshQueue {
    path: PathBuf,
}

impl FileRefreshQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RefreshQueue for FileRefreshQueue {
    fn queue(&self, pointer_path: &Path) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        writeln!(file, "{}", pointer_path.display())?;
        Ok(())
    }
}

pub fn build_refresh_queue(cfg: &NotifyConfig) -> Option<Arc<dyn RefreshQueue>> {
    cfg.refresh_queue_file
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Arc::new(FileRefreshQueue::new(p)) as Arc<dyn RefreshQueue>)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingNotifier {
        pub messages: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().expect("lock").clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, message: &str) {
            self.messages.lock().expect("lock").push(message.to_string());
        }
    }

    #[derive(Default)]
    pub struct RecordingHealth {
        pub registered: Mutex<Vec<(PathBuf, String)>>,
    }

    impl HealthTracker for RecordingHealth {
        fn register_pointer(&self, pointer_path: &Path, remote_source_path: &str) -> Result<()> {
            self.registered
                .lock()
                .expect("lock")
                .push((pointer_path.to_path_buf(), remote_source_path.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct RecordingRefresh {
        pub queued: Mutex<Vec<PathBuf>>,
    }

    impl RefreshQueue for RecordingRefresh {
        fn queue(&self, pointer_path: &Path) -> Result<()> {
            self.queued.lock().expect("lock").push(pointer_path.to_path_buf());
            Ok(())
        }
    }
}
