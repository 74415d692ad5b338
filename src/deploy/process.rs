use super::backend::{
    runtime_env, BackendError, BackendKind, BuildLog, BuildRequest, ExecutionBackend, InstanceId,
    InstanceInfo, LogStream, RunningInstance,
};
use super::logs::follow_file;
use super::workspace::write_workspace;
use crate::config::{EngineConfig, NativeConfig};
use crate::ids::ProjectId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

const APP_LOG: &str = "app.log";
const EXIT_TAIL_LINES: usize = 20;

/// Runs bundles as child processes on the host.
///
/// Each instance lives in its own process group so that stop reaches
/// anything the runtime spawned. The table is process-local and is not
/// reconciled across engine restarts.
#[derive(Debug)]
pub struct ProcessBackend {
    config: NativeConfig,
    workspace_root: PathBuf,
    processes: DashMap<InstanceId, Arc<ProcessEntry>>,
}

#[derive(Debug)]
struct ProcessEntry {
    project: ProjectId,
    dir: PathBuf,
    database_url: String,
    port: u16,
    state: Mutex<ProcessState>,
}

#[derive(Debug)]
struct ProcessState {
    child: Option<Child>,
    started_at: DateTime<Utc>,
    last_exit: Option<i64>,
}

fn shell(command_line: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd
    }
}

fn relay<R>(reader: Option<R>, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else { return };
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Negative pid addresses the whole process group.
    unsafe { libc::kill(-pid, signal) == 0 }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "stop request failed");
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Last lines of a log file, for exit diagnostics.
async fn tail_of(path: &Path, lines: usize) -> String {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "exit diagnostics unavailable");
            return String::new();
        }
    };
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

impl ProcessBackend {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.native.clone(),
            workspace_root: config.workspace_dir.clone(),
            processes: DashMap::new(),
        }
    }

    fn entry(&self, id: &InstanceId) -> Result<Arc<ProcessEntry>, BackendError> {
        self.processes
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| BackendError::NotFound(id.clone()))
    }

    /// Run one install/build command, relaying its output line by line.
    async fn run_step(&self, dir: &Path, command_line: &str, log: &BuildLog) -> Result<(), BackendError> {
        log.line(format!("$ {command_line}"));
        let mut child = shell(command_line)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::Build(format!("{command_line}: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        relay(child.stdout.take(), tx.clone());
        relay(child.stderr.take(), tx);

        let outcome = tokio::time::timeout(self.config.command_timeout(), async {
            while let Some(line) = rx.recv().await {
                log.line(line);
            }
            child.wait().await
        })
        .await;

        match outcome {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(BackendError::Build(format!("{command_line} failed ({status})"))),
            Ok(Err(e)) => Err(BackendError::Build(format!("{command_line}: {e}"))),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(command = command_line, error = %e, "failed to kill timed out command");
                }
                Err(BackendError::Build(format!("{command_line} timed out")))
            }
        }
    }

    fn spawn(&self, dir: &Path, env: &BTreeMap<String, String>) -> Result<Child, BackendError> {
        let log_path = dir.join(APP_LOG);
        let open = || {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
        };
        let io = |source| BackendError::Io {
            path: log_path.clone(),
            source,
        };
        let stdout = open().map_err(io)?;
        let stderr = open().map_err(io)?;

        let mut cmd = Command::new(&self.config.runtime);
        cmd.arg(&self.config.entry)
            .current_dir(dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        cmd.process_group(0);
        cmd.spawn()
            .map_err(|e| BackendError::Start(format!("{} {}: {e}", self.config.runtime, self.config.entry)))
    }

    /// Spawn, wait the startup grace, and fail if the process already exited.
    async fn spawn_confirmed(&self, dir: &Path, env: &BTreeMap<String, String>) -> Result<Child, BackendError> {
        let mut child = self.spawn(dir, env)?;
        tokio::time::sleep(self.config.startup_grace()).await;
        match child.try_wait() {
            Ok(None) => Ok(child),
            Ok(Some(status)) => Err(BackendError::Exited {
                status: status.to_string(),
                output: tail_of(&dir.join(APP_LOG), EXIT_TAIL_LINES).await,
            }),
            Err(e) => Err(BackendError::Process(e.to_string())),
        }
    }

    /// SIGTERM the group, then SIGKILL once the stop timeout passes.
    async fn terminate(&self, child: &mut Child) -> Option<i64> {
        request_stop(child);
        match tokio::time::timeout(self.config.stop_timeout(), child.wait()).await {
            Ok(Ok(status)) => status.code().map(i64::from),
            _ => {
                kill_group(child);
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "kill after stop timeout failed");
                }
                child.wait().await.ok().and_then(|s| s.code()).map(i64::from)
            }
        }
    }

    async fn stop_entry(&self, entry: &ProcessEntry) {
        let mut state = entry.state.lock().await;
        if let Some(mut child) = state.child.take() {
            state.last_exit = self.terminate(&mut child).await;
        }
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn build_and_run(
        &self,
        req: BuildRequest,
        log: &BuildLog,
    ) -> Result<RunningInstance, BackendError> {
        let dir = write_workspace(&self.workspace_root, &req.project_id, &req.bundle).await?;
        if !self.config.install.trim().is_empty() {
            self.run_step(&dir, &self.config.install, log).await?;
        }
        let client = dir.join("client");
        if tokio::fs::try_exists(client.join("package.json")).await.unwrap_or(false) {
            self.run_step(&client, &self.config.frontend_install, log).await?;
            self.run_step(&client, &self.config.frontend_build, log).await?;
        }

        let env = req.runtime_env(req.port);
        log.line(format!(
            "Starting {} {} on port {}",
            self.config.runtime, self.config.entry, req.port
        ));
        let child = self.spawn_confirmed(&dir, &env).await?;
        let pid = child.id();

        let id = InstanceId::new(format!("proc-{}", ulid::Ulid::new().to_string().to_lowercase()));
        self.processes.insert(
            id.clone(),
            Arc::new(ProcessEntry {
                project: req.project_id.clone(),
                dir,
                database_url: req.database_url.clone(),
                port: req.port,
                state: Mutex::new(ProcessState {
                    child: Some(child),
                    started_at: Utc::now(),
                    last_exit: None,
                }),
            }),
        );
        info!(id = %id, project = %req.project_id, pid, port = req.port, "process started");
        Ok(RunningInstance {
            instance_id: id,
            port: req.port,
        })
    }

    async fn stop(&self, id: &InstanceId) -> Result<(), BackendError> {
        let entry = self.entry(id)?;
        self.stop_entry(&entry).await;
        debug!(id = %id, project = %entry.project, "process stopped");
        Ok(())
    }

    async fn restart(
        &self,
        id: &InstanceId,
        overrides: &BTreeMap<String, String>,
    ) -> Result<InstanceId, BackendError> {
        let entry = self.entry(id)?;
        self.stop_entry(&entry).await;
        tokio::time::sleep(self.config.restart_delay()).await;

        let env = runtime_env(entry.port, &entry.database_url, overrides);
        let child = self.spawn_confirmed(&entry.dir, &env).await?;
        let mut state = entry.state.lock().await;
        state.child = Some(child);
        state.started_at = Utc::now();
        state.last_exit = None;
        info!(id = %id, port = entry.port, "process restarted");
        Ok(id.clone())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), BackendError> {
        let entry = self.entry(id)?;
        self.stop_entry(&entry).await;
        self.processes.remove(id);
        Ok(())
    }

    async fn stream_logs(&self, id: &InstanceId) -> Result<LogStream, BackendError> {
        let entry = self.entry(id)?;
        Ok(follow_file(entry.dir.join(APP_LOG), self.config.log_tail))
    }

    async fn inspect(&self, id: &InstanceId) -> Result<InstanceInfo, BackendError> {
        let entry = self.entry(id)?;
        let mut state = entry.state.lock().await;
        let last_exit = state.last_exit;
        let (running, status, exit_code) = match state.child.as_mut() {
            Some(child) => match child
                .try_wait()
                .map_err(|e| BackendError::Process(e.to_string()))?
            {
                None => (true, "running", None),
                Some(exit) => (false, "exited", exit.code().map(i64::from)),
            },
            None => (false, "stopped", last_exit),
        };
        Ok(InstanceInfo {
            instance_id: id.clone(),
            running,
            status: status.to_string(),
            port: Some(entry.port),
            name: Some(entry.project.to_string()),
            started_at: Some(state.started_at.to_rfc3339()),
            exit_code,
        })
    }
}
