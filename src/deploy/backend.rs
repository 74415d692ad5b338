use crate::events::{EventKind, EventSender};
use crate::generator::GeneratedBundle;
use crate::ids::{DeploymentId, ProjectId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Container,
    Native,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Container => "container",
            BackendKind::Native => "native",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-assigned handle for a running instance: a container id or a
/// `proc-…` process table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("unsafe bundle path: {0}")]
    UnsafePath(String),
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("build failed: {0}")]
    Build(String),
    #[error("start failed: {0}")]
    Start(String),
    #[error("process exited during startup ({status}): {output}")]
    Exited { status: String, output: String },
    #[error("unknown instance {0}")]
    NotFound(InstanceId),
    #[error("docker error: {0}")]
    Docker(String),
    #[error("process error: {0}")]
    Process(String),
}

/// Everything a backend needs to turn a bundle into a running instance.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub project_id: ProjectId,
    pub deployment_id: DeploymentId,
    pub bundle: Arc<GeneratedBundle>,
    pub env: BTreeMap<String, String>,
    /// Host port allocated by the orchestrator.
    pub port: u16,
    /// Database connection string for this project.
    pub database_url: String,
}

impl BuildRequest {
    /// Runtime environment with `port` as the listen port. Overrides win.
    pub fn runtime_env(&self, port: u16) -> BTreeMap<String, String> {
        runtime_env(port, &self.database_url, &self.env)
    }
}

/// Environment an instance runs with: the engine's variables for `port` and
/// `database_url`, then `overrides` on top.
pub fn runtime_env(
    port: u16,
    database_url: &str,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("NODE_ENV".to_string(), "production".to_string()),
        ("PORT".to_string(), port.to_string()),
        ("DATABASE_URL".to_string(), database_url.to_string()),
        ("MONGODB_URI".to_string(), database_url.to_string()),
    ]);
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Build output sink: each line goes out live as a `build-log` event and is
/// kept for the deployment record.
#[derive(Debug)]
pub struct BuildLog {
    events: EventSender,
    lines: Mutex<Vec<String>>,
}

impl BuildLog {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        self.events.emit(EventKind::BuildLog, json!({ "line": line }));
        self.lines.lock().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningInstance {
    pub instance_id: InstanceId,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub instance_id: InstanceId,
    pub running: bool,
    pub status: String,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub started_at: Option<String>,
    pub exit_code: Option<i64>,
}

/// Cancellable subscription to an instance's output.
///
/// Dropping the stream cancels the producer.
#[derive(Debug)]
pub struct LogStream {
    rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
}

/// Producer half of a [`LogStream`].
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl LogSink {
    /// Deliver one line. Returns false once the consumer is gone.
    pub async fn send(&self, line: String) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(line) => sent.is_ok(),
        }
    }

    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }
}

impl LogStream {
    pub fn channel(capacity: usize) -> (LogSink, LogStream) {
        let (tx, rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();
        (
            LogSink {
                tx,
                cancel: cancel.clone(),
            },
            LogStream { rx, cancel },
        )
    }

    /// Next line, or `None` once the producer has finished.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A way of turning a bundle into a running, reachable instance.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn build_and_run(
        &self,
        req: BuildRequest,
        log: &BuildLog,
    ) -> Result<RunningInstance, BackendError>;

    async fn stop(&self, id: &InstanceId) -> Result<(), BackendError>;

    /// Restart with `overrides` as the environment overrides.
    ///
    /// Returns the id the instance runs under afterwards, which differs from
    /// `id` when the backend had to recreate it.
    async fn restart(
        &self,
        id: &InstanceId,
        overrides: &BTreeMap<String, String>,
    ) -> Result<InstanceId, BackendError>;

    async fn remove(&self, id: &InstanceId) -> Result<(), BackendError>;

    async fn stream_logs(&self, id: &InstanceId) -> Result<LogStream, BackendError>;

    async fn inspect(&self, id: &InstanceId) -> Result<InstanceInfo, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;

    fn request(env: BTreeMap<String, String>) -> BuildRequest {
        let project = ProjectId::new("acme").unwrap();
        BuildRequest {
            bundle: Arc::new(GeneratedBundle::new(project.clone(), 1)),
            project_id: project,
            deployment_id: DeploymentId::new(),
            env,
            port: 4100,
            database_url: "mongodb://db/acme".to_string(),
        }
    }

    #[test]
    fn test_runtime_env_overrides_win() {
        let req = request(BTreeMap::from([
            ("NODE_ENV".to_string(), "staging".to_string()),
            ("API_KEY".to_string(), "k".to_string()),
        ]));
        let env = req.runtime_env(3000);
        assert_eq!(env["NODE_ENV"], "staging");
        assert_eq!(env["PORT"], "3000");
        assert_eq!(env["MONGODB_URI"], "mongodb://db/acme");
        assert_eq!(env["API_KEY"], "k");
    }

    #[test]
    fn test_build_log_relays_and_keeps_lines() {
        let (tx, mut rx) = events::channel();
        let log = BuildLog::new(tx);
        log.line("Step 1/4");
        log.line("Step 2/4");
        assert_eq!(log.lines(), vec!["Step 1/4", "Step 2/4"]);
        let names: Vec<_> = rx.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["build-log", "build-log"]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_sink() {
        let (sink, mut stream) = LogStream::channel(4);
        assert!(sink.send("hello".to_string()).await);
        assert_eq!(stream.recv().await.as_deref(), Some("hello"));
        drop(stream);
        assert!(sink.is_cancelled());
        assert!(!sink.send("late".to_string()).await);
    }
}
