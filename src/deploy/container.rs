use super::backend::{
    runtime_env, BackendError, BackendKind, BuildLog, BuildRequest, ExecutionBackend, InstanceId,
    InstanceInfo, LogStream, RunningInstance,
};
use super::workspace::write_workspace;
use crate::config::{ContainerConfig, EngineConfig};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{
    ContainerCreateBody, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateContainerOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, RestartContainerOptionsBuilder, StopContainerOptionsBuilder,
};
use bollard::Docker;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const PING_TIMEOUT: Duration = Duration::from_secs(3);
const STOP_GRACE_SECS: i32 = 10;

const PROJECT_LABEL: &str = "forgekit.project";
const DEPLOYMENT_LABEL: &str = "forgekit.deployment";
const DATABASE_URL_LABEL: &str = "forgekit.database-url";
/// JSON of the overrides the container was created with.
const OVERRIDES_LABEL: &str = "forgekit.env";

/// Runs bundles as isolated containers on the local Docker daemon.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    docker: Docker,
    config: ContainerConfig,
    workspace_root: PathBuf,
}

/// Build descriptor for a generated bundle. With a client, a first stage
/// builds `client/` and the runtime image copies its `dist/` output.
pub fn synthesize_dockerfile(base_image: &str, internal_port: u16, with_client: bool) -> String {
    let mut out = String::new();
    if with_client {
        out.push_str(&format!(
            "FROM {base_image} AS client\n\
             WORKDIR /app/client\n\
             COPY client/package*.json ./\n\
             RUN npm install\n\
             COPY client/ ./\n\
             RUN npm run build\n\n"
        ));
    }
    out.push_str(&format!(
        "FROM {base_image}\n\
         WORKDIR /app\n\
         COPY package*.json ./\n\
         RUN npm install --production\n\
         COPY . .\n"
    ));
    if with_client {
        out.push_str("COPY --from=client /app/client/dist ./client/dist\n");
    }
    out.push_str(&format!(
        "ENV NODE_ENV=production\n\
         EXPOSE {internal_port}\n\
         CMD [\"node\", \"src/index.js\"]\n"
    ));
    out
}

fn docker_err(id: &InstanceId, err: DockerError) -> BackendError {
    match err {
        DockerError::DockerResponseServerError { status_code: 404, .. } => {
            BackendError::NotFound(id.clone())
        }
        other => BackendError::Docker(other.to_string()),
    }
}

fn overrides_label(overrides: &BTreeMap<String, String>) -> String {
    serde_json::to_string(overrides).unwrap_or_default()
}

fn env_list(env: BTreeMap<String, String>) -> Vec<String> {
    env.into_iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// 304 means the container was already in the requested state.
fn not_modified(err: &DockerError) -> bool {
    matches!(err, DockerError::DockerResponseServerError { status_code: 304, .. })
}

async fn tar_directory(dir: PathBuf) -> Result<Vec<u8>, BackendError> {
    tokio::task::spawn_blocking(move || {
        let mut archive = tar::Builder::new(Vec::new());
        archive
            .append_dir_all(".", &dir)
            .and_then(|()| archive.into_inner())
            .map_err(|source| BackendError::Io { path: dir, source })
    })
    .await
    .map_err(|e| BackendError::Build(format!("archive task failed: {e}")))?
}

impl ContainerBackend {
    /// Connect to the local daemon and confirm it answers a ping.
    pub async fn connect(config: &EngineConfig) -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        match tokio::time::timeout(PING_TIMEOUT, docker.ping()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(BackendError::Unavailable(e.to_string())),
            Err(_) => return Err(BackendError::Unavailable("docker ping timed out".to_string())),
        }
        Ok(Self {
            docker,
            config: config.container.clone(),
            workspace_root: config.workspace_dir.clone(),
        })
    }

    fn image_tag(&self, req: &BuildRequest) -> String {
        format!("{}-{}", self.config.image_prefix, req.project_id.slug())
    }

    fn container_name(&self, req: &BuildRequest) -> String {
        let id = req.deployment_id.to_string().to_lowercase();
        let suffix = &id[id.len().saturating_sub(8)..];
        format!("{}-{}-{suffix}", self.config.image_prefix, req.project_id.slug())
    }

    async fn build_image(&self, dir: &Path, tag: &str, log: &BuildLog) -> Result<(), BackendError> {
        let archive = tar_directory(dir.to_path_buf()).await?;
        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .forcerm(true)
            .build();
        let mut stream = Box::pin(self.docker.build_image(
            options,
            None,
            Some(bollard::body_full(Bytes::from(archive))),
        ));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| BackendError::Build(e.to_string()))?;
            if let Some(detail) = info.error_detail {
                let message = detail.message.unwrap_or_else(|| "image build failed".to_string());
                log.line(message.clone());
                return Err(BackendError::Build(message));
            }
            if let Some(text) = info.stream {
                for line in text.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
                    log.line(line);
                }
            }
            if let Some(status) = info.status {
                log.line(status);
            }
        }
        Ok(())
    }

    async fn create_and_start(
        &self,
        req: &BuildRequest,
        tag: &str,
    ) -> Result<InstanceId, BackendError> {
        let internal = self.config.internal_port;
        let bindings = HashMap::from([(
            format!("{internal}/tcp"),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(req.port.to_string()),
            }]),
        )]);
        let host_config = HostConfig {
            port_bindings: Some(bindings),
            memory: Some(self.config.memory_bytes),
            nano_cpus: Some(self.config.nano_cpus),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(3),
            }),
            ..Default::default()
        };
        let labels = HashMap::from([
            (PROJECT_LABEL.to_string(), req.project_id.to_string()),
            (DEPLOYMENT_LABEL.to_string(), req.deployment_id.to_string()),
            (DATABASE_URL_LABEL.to_string(), req.database_url.clone()),
            (OVERRIDES_LABEL.to_string(), overrides_label(&req.env)),
        ]);
        let body = ContainerCreateBody {
            image: Some(tag.to_string()),
            env: Some(env_list(req.runtime_env(internal))),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = self.container_name(req);
        let id = self.create_started(&name, body).await?;
        info!(container = %name, id = %id, port = req.port, "container started");
        Ok(id)
    }

    /// Create and start `name`; a container that fails to start is removed.
    async fn create_started(&self, name: &str, body: ContainerCreateBody) -> Result<InstanceId, BackendError> {
        let options = CreateContainerOptionsBuilder::default().name(name).build();
        let created = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| BackendError::Start(e.to_string()))?;
        let id = InstanceId::new(created.id);

        if let Err(e) = self.docker.start_container(id.as_str(), None).await {
            let remove = RemoveContainerOptionsBuilder::default().force(true).build();
            if let Err(cleanup) = self.docker.remove_container(id.as_str(), Some(remove)).await {
                warn!(container = %name, error = %cleanup, "failed to clean up unstarted container");
            }
            return Err(BackendError::Start(e.to_string()));
        }
        Ok(id)
    }

    /// Replace the container with one that runs the same image, name, labels
    /// and host settings under a new environment.
    async fn recreate(
        &self,
        id: &InstanceId,
        overrides: &BTreeMap<String, String>,
    ) -> Result<InstanceId, BackendError> {
        let details = self
            .docker
            .inspect_container(id.as_str(), None)
            .await
            .map_err(|e| docker_err(id, e))?;
        let config = details.config.unwrap_or_default();
        let image = config
            .image
            .ok_or_else(|| BackendError::Start(format!("container {id} has no image")))?;
        let name = details
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .ok_or_else(|| BackendError::Start(format!("container {id} has no name")))?;
        let mut labels = config.labels.unwrap_or_default();
        let database_url = labels.get(DATABASE_URL_LABEL).cloned().unwrap_or_default();
        labels.insert(OVERRIDES_LABEL.to_string(), overrides_label(overrides));
        let body = ContainerCreateBody {
            image: Some(image),
            env: Some(env_list(runtime_env(self.config.internal_port, &database_url, overrides))),
            labels: Some(labels),
            host_config: details.host_config,
            ..Default::default()
        };

        self.remove(id).await?;
        let next = self.create_started(&name, body).await?;
        info!(container = %name, id = %next, "container recreated with new environment");
        Ok(next)
    }

    /// Overrides label of the container, if it carries one.
    async fn current_overrides(&self, id: &InstanceId) -> Result<Option<String>, BackendError> {
        let details = self
            .docker
            .inspect_container(id.as_str(), None)
            .await
            .map_err(|e| docker_err(id, e))?;
        Ok(details
            .config
            .and_then(|c| c.labels)
            .and_then(|mut labels| labels.remove(OVERRIDES_LABEL)))
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn build_and_run(
        &self,
        req: BuildRequest,
        log: &BuildLog,
    ) -> Result<RunningInstance, BackendError> {
        let dir = write_workspace(&self.workspace_root, &req.project_id, &req.bundle).await?;
        let with_client = tokio::fs::try_exists(dir.join("client/package.json"))
            .await
            .unwrap_or(false);
        let dockerfile = dir.join("Dockerfile");
        tokio::fs::write(
            &dockerfile,
            synthesize_dockerfile(&self.config.base_image, self.config.internal_port, with_client),
        )
        .await
        .map_err(|source| BackendError::Io {
            path: dockerfile,
            source,
        })?;

        let tag = self.image_tag(&req);
        log.line(format!("Building image {tag}"));
        self.build_image(&dir, &tag, log).await?;
        log.line(format!("Starting container on port {}", req.port));
        let instance_id = self.create_and_start(&req, &tag).await?;
        Ok(RunningInstance {
            instance_id,
            port: req.port,
        })
    }

    async fn stop(&self, id: &InstanceId) -> Result<(), BackendError> {
        let options = StopContainerOptionsBuilder::default().t(STOP_GRACE_SECS).build();
        match self.docker.stop_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if not_modified(&e) => Ok(()),
            Err(e) => Err(docker_err(id, e)),
        }
    }

    async fn restart(
        &self,
        id: &InstanceId,
        overrides: &BTreeMap<String, String>,
    ) -> Result<InstanceId, BackendError> {
        // Docker cannot change the environment of an existing container.
        if self.current_overrides(id).await?.as_deref() != Some(overrides_label(overrides).as_str()) {
            return self.recreate(id, overrides).await;
        }
        let options = RestartContainerOptionsBuilder::default().t(STOP_GRACE_SECS).build();
        self.docker
            .restart_container(id.as_str(), Some(options))
            .await
            .map_err(|e| docker_err(id, e))?;
        Ok(id.clone())
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), BackendError> {
        if self.inspect(id).await?.running {
            self.stop(id).await?;
        }
        let options = RemoveContainerOptionsBuilder::default().force(true).v(true).build();
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await
            .map_err(|e| docker_err(id, e))?;
        debug!(id = %id, "container removed");
        Ok(())
    }

    async fn stream_logs(&self, id: &InstanceId) -> Result<LogStream, BackendError> {
        self.inspect(id).await?;
        let (sink, stream) = LogStream::channel(256);
        let docker = self.docker.clone();
        let id = id.clone();
        let tail = self.config.log_tail.to_string();
        tokio::spawn(async move {
            let options = LogsOptionsBuilder::default()
                .follow(true)
                .stdout(true)
                .stderr(true)
                .tail(&tail)
                .build();
            let mut logs = Box::pin(docker.logs(id.as_str(), Some(options)));
            loop {
                let next = tokio::select! {
                    _ = sink.cancelled() => break,
                    next = logs.next() => next,
                };
                let output: LogOutput = match next {
                    Some(Ok(output)) => output,
                    Some(Err(e)) => {
                        warn!(id = %id, error = %e, "container log stream failed");
                        break;
                    }
                    None => break,
                };
                for line in output.to_string().lines() {
                    if !sink.send(line.to_string()).await {
                        return;
                    }
                }
            }
            debug!(id = %id, "container log stream closed");
        });
        Ok(stream)
    }

    async fn inspect(&self, id: &InstanceId) -> Result<InstanceInfo, BackendError> {
        let details = self
            .docker
            .inspect_container(id.as_str(), None)
            .await
            .map_err(|e| docker_err(id, e))?;
        let state = details.state.unwrap_or_default();
        let port = details
            .host_config
            .and_then(|hc| hc.port_bindings)
            .and_then(|bindings| {
                bindings
                    .into_values()
                    .flatten()
                    .flatten()
                    .find_map(|b| b.host_port.and_then(|p| p.parse().ok()))
            });
        Ok(InstanceInfo {
            instance_id: id.clone(),
            running: state.running.unwrap_or(false),
            status: state
                .status
                .map(|s| format!("{s:?}").to_lowercase())
                .unwrap_or_else(|| "unknown".to_string()),
            port,
            name: details.name.map(|n| n.trim_start_matches('/').to_string()),
            started_at: state.started_at,
            exit_code: state.exit_code,
        })
    }
}
