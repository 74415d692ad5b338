use super::backend::{
    BackendError, BackendKind, BuildLog, BuildRequest, ExecutionBackend, InstanceId, InstanceInfo,
    LogStream,
};
use super::ports::{PortError, PortPool};
use crate::events::{EventKind, EventSender};
use crate::ids::{DeploymentId, ProjectId};
use crate::store::{BundleStore, DeploymentStore, StoreError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Building,
    Running,
    Stopped,
    Failed,
    Destroyed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Destroyed => "destroyed",
        }
    }

    /// Allowed edges of the deployment lifecycle. `destroyed` is terminal.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Pending, Building) => true,
            (Building, Running | Failed) => true,
            (Running, Running | Stopped | Failed) => true,
            (Stopped | Failed, Running) => true,
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        *self != DeploymentStatus::Destroyed
    }
}

impl Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub project_id: ProjectId,
    pub bundle_version: u32,
    pub backend: BackendKind,
    pub instance_id: Option<InstanceId>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub env: BTreeMap<String, String>,
    pub status: DeploymentStatus,
    pub build_log: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn new(
        project_id: ProjectId,
        bundle_version: u32,
        backend: BackendKind,
        env: BTreeMap<String, String>,
        port: u16,
    ) -> Self {
        Self {
            id: DeploymentId::new(),
            project_id,
            bundle_version,
            backend,
            instance_id: None,
            port: Some(port),
            url: None,
            env,
            status: DeploymentStatus::Pending,
            build_log: Vec::new(),
            error: None,
            created_at: Utc::now(),
            deployed_at: None,
            stopped_at: None,
            destroyed_at: None,
        }
    }

    /// Move to `next`, rejecting edges the lifecycle does not allow.
    pub fn transition(&mut self, next: DeploymentStatus) -> Result<(), DeployError> {
        if !self.status.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        let now = Utc::now();
        match next {
            DeploymentStatus::Running => self.deployed_at = Some(now),
            DeploymentStatus::Stopped => self.stopped_at = Some(now),
            DeploymentStatus::Destroyed => self.destroyed_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("project {0} has no complete bundle")]
    NoCompleteBundle(ProjectId),
    #[error(transparent)]
    PortsExhausted(#[from] PortError),
    #[error("project {0} has no running deployment")]
    NoRunningDeployment(ProjectId),
    #[error("project {0} has no active deployment")]
    NoActiveDeployment(ProjectId),
    #[error("project {0} has no deployed instance")]
    NoInstance(ProjectId),
    #[error("invalid deployment transition {from} -> {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Report a fatal error to the subscriber before returning it.
fn fail(events: &EventSender, err: DeployError) -> DeployError {
    warn!(error = %err, "deployment operation failed");
    events.emit(EventKind::Error, json!({ "message": err.to_string() }));
    err
}

/// Latest record plus what the backend reports for its instance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub record: DeploymentRecord,
    pub instance: Option<InstanceInfo>,
}

/// Drives deployments through their lifecycle on one execution backend.
///
/// Operations on the same project are serialized; different projects
/// proceed independently.
pub struct Orchestrator {
    backend: Arc<dyn ExecutionBackend>,
    bundles: Arc<dyn BundleStore>,
    deployments: Arc<dyn DeploymentStore>,
    ports: Arc<PortPool>,
    database_url: String,
    locks: DashMap<ProjectId, Arc<tokio::sync::Mutex<()>>>,
}

impl Orchestrator {
    /// `database_url` may contain `{project}`, replaced per deployment.
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        bundles: Arc<dyn BundleStore>,
        deployments: Arc<dyn DeploymentStore>,
        ports: Arc<PortPool>,
        database_url: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            bundles,
            deployments,
            ports,
            database_url: database_url.into(),
            locks: DashMap::new(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn ports(&self) -> &PortPool {
        &self.ports
    }

    async fn lock(&self, project: &ProjectId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(project.clone()).or_default().value());
        lock.lock_owned().await
    }

    async fn active(&self, project: &ProjectId) -> Result<Option<DeploymentRecord>, DeployError> {
        Ok(self
            .deployments
            .latest(project)
            .await?
            .filter(|r| r.status.is_active()))
    }

    /// Remove the instance (best effort), free the port, mark destroyed.
    async fn retire(&self, record: &mut DeploymentRecord) -> Result<(), DeployError> {
        if let Some(instance) = &record.instance_id {
            if let Err(e) = self.backend.remove(instance).await {
                warn!(deployment = %record.id, instance = %instance, error = %e, "instance removal failed");
            }
        }
        if let Some(port) = record.port {
            self.ports.release(port);
        }
        record.transition(DeploymentStatus::Destroyed)?;
        self.deployments.update(record).await?;
        Ok(())
    }

    /// Build and start the project's newest complete bundle, superseding any
    /// active deployment.
    ///
    /// Every failure is also reported to `events` as a terminal `error`.
    pub async fn deploy(
        &self,
        project: &ProjectId,
        env: BTreeMap<String, String>,
        events: &EventSender,
    ) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock(project).await;
        let bundle = match self.bundles.latest_complete(project).await {
            Ok(Some(bundle)) => bundle,
            Ok(None) => return Err(fail(events, DeployError::NoCompleteBundle(project.clone()))),
            Err(e) => return Err(fail(events, e.into())),
        };
        let port = self.ports.acquire().map_err(|e| fail(events, e.into()))?;

        let mut record = match self.prepare(project, bundle.version, env, port).await {
            Ok(record) => record,
            Err(e) => {
                self.ports.release(port);
                return Err(fail(events, e));
            }
        };
        events.emit(
            EventKind::Status,
            json!({
                "status": record.status,
                "deploymentId": record.id,
                "version": record.bundle_version,
                "backend": record.backend,
            }),
        );

        let log = BuildLog::new(events.clone());
        let req = BuildRequest {
            project_id: project.clone(),
            deployment_id: record.id,
            bundle: Arc::new(bundle),
            env: record.env.clone(),
            port,
            database_url: self.database_url.replace("{project}", project.as_str()),
        };
        let outcome = self.backend.build_and_run(req, &log).await;
        record.build_log = log.lines();

        let instance = match outcome {
            Ok(instance) => instance,
            Err(err) => {
                self.ports.release(port);
                record.port = None;
                record.error = Some(err.to_string());
                record.transition(DeploymentStatus::Failed)?;
                self.record_failure(&record).await;
                return Err(fail(events, DeployError::Backend(err)));
            }
        };

        record.instance_id = Some(instance.instance_id.clone());
        record.port = Some(instance.port);
        record.url = Some(format!("http://localhost:{}", instance.port));
        record.transition(DeploymentStatus::Running)?;
        if let Err(err) = self.deployments.update(&record).await {
            // Nothing could find this instance again, so take it down now.
            self.abandon(&mut record, &instance.instance_id, &err).await;
            return Err(fail(events, err.into()));
        }
        info!(project = %project, deployment = %record.id, port = instance.port, backend = %record.backend, "deployment running");
        events.emit(
            EventKind::Complete,
            json!({
                "status": record.status,
                "port": instance.port,
                "url": record.url,
                "instanceId": record.instance_id,
                "backend": record.backend,
                "deploymentId": record.id,
            }),
        );
        Ok(record)
    }

    async fn record_failure(&self, record: &DeploymentRecord) {
        if let Err(e) = self.deployments.update(record).await {
            warn!(deployment = %record.id, error = %e, "failed to record deployment failure");
        }
    }

    /// Undo a started instance whose record could not be saved.
    async fn abandon(&self, record: &mut DeploymentRecord, instance: &InstanceId, cause: &StoreError) {
        if let Err(e) = self.backend.remove(instance).await {
            warn!(deployment = %record.id, instance = %instance, error = %e, "instance removal failed");
        }
        if let Some(port) = record.port.take() {
            self.ports.release(port);
        }
        record.instance_id = None;
        record.url = None;
        record.error = Some(cause.to_string());
        if record.transition(DeploymentStatus::Failed).is_ok() {
            self.record_failure(record).await;
        }
    }

    /// Retire the previous deployment and persist a fresh `building` record.
    async fn prepare(
        &self,
        project: &ProjectId,
        version: u32,
        env: BTreeMap<String, String>,
        port: u16,
    ) -> Result<DeploymentRecord, DeployError> {
        if let Some(mut previous) = self.active(project).await? {
            info!(project = %project, deployment = %previous.id, "superseding active deployment");
            self.retire(&mut previous).await?;
        }
        let mut record = DeploymentRecord::new(project.clone(), version, self.backend.kind(), env, port);
        self.deployments.insert(&record).await?;
        record.transition(DeploymentStatus::Building)?;
        self.deployments.update(&record).await?;
        Ok(record)
    }

    pub async fn stop(&self, project: &ProjectId) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock(project).await;
        let mut record = self
            .active(project)
            .await?
            .filter(|r| r.status == DeploymentStatus::Running)
            .ok_or_else(|| DeployError::NoRunningDeployment(project.clone()))?;
        let instance = record
            .instance_id
            .clone()
            .ok_or_else(|| DeployError::NoInstance(project.clone()))?;
        self.backend.stop(&instance).await?;
        record.transition(DeploymentStatus::Stopped)?;
        self.deployments.update(&record).await?;
        info!(project = %project, deployment = %record.id, "deployment stopped");
        Ok(record)
    }

    /// Restart the active instance with the record's current env overrides.
    pub async fn restart(&self, project: &ProjectId) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock(project).await;
        let mut record = self
            .active(project)
            .await?
            .ok_or_else(|| DeployError::NoInstance(project.clone()))?;
        let instance = record
            .instance_id
            .clone()
            .ok_or_else(|| DeployError::NoInstance(project.clone()))?;
        if !record.status.can_transition_to(DeploymentStatus::Running) {
            return Err(DeployError::InvalidTransition {
                from: record.status,
                to: DeploymentStatus::Running,
            });
        }
        let next = self.backend.restart(&instance, &record.env).await?;
        record.instance_id = Some(next);
        record.transition(DeploymentStatus::Running)?;
        record.error = None;
        self.deployments.update(&record).await?;
        info!(project = %project, deployment = %record.id, "deployment restarted");
        Ok(record)
    }

    /// Replace the env overrides of the active deployment. The running
    /// instance picks them up on its next restart.
    pub async fn update_env(
        &self,
        project: &ProjectId,
        env: BTreeMap<String, String>,
    ) -> Result<DeploymentRecord, DeployError> {
        let _guard = self.lock(project).await;
        let mut record = self
            .active(project)
            .await?
            .ok_or_else(|| DeployError::NoActiveDeployment(project.clone()))?;
        record.env = env;
        self.deployments.update(&record).await?;
        info!(project = %project, deployment = %record.id, vars = record.env.len(), "deployment env updated");
        Ok(record)
    }

    pub async fn destroy(&self, project: &ProjectId) -> Result<DeploymentRecord, DeployError> {
        let guard = self.lock(project).await;
        let destroyed = match self.active(project).await {
            Ok(Some(mut record)) => self.retire(&mut record).await.map(|()| record),
            Ok(None) => Err(DeployError::NoActiveDeployment(project.clone())),
            Err(e) => Err(e),
        };
        drop(guard);
        self.prune_lock(project);
        let record = destroyed?;
        info!(project = %project, deployment = %record.id, "deployment destroyed");
        Ok(record)
    }

    /// Forget the project's lock unless someone else holds or awaits it.
    fn prune_lock(&self, project: &ProjectId) {
        self.locks
            .remove_if(project, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Follow the active instance's output. Drop the stream to stop.
    pub async fn logs(&self, project: &ProjectId) -> Result<LogStream, DeployError> {
        let instance = self
            .active(project)
            .await?
            .and_then(|r| r.instance_id)
            .ok_or_else(|| DeployError::NoInstance(project.clone()))?;
        Ok(self.backend.stream_logs(&instance).await?)
    }

    /// Relay the active instance's output to `events` as `log {line}` until
    /// the output ends or the receiver goes away. Drop the future to stop
    /// early.
    pub async fn follow_logs(&self, project: &ProjectId, events: &EventSender) -> Result<(), DeployError> {
        let mut stream = self.logs(project).await.map_err(|e| fail(events, e))?;
        while let Some(line) = stream.recv().await {
            events.emit(EventKind::Log, json!({ "line": line }));
            if events.is_closed() {
                break;
            }
        }
        Ok(())
    }

    pub async fn status(&self, project: &ProjectId) -> Result<Option<StatusReport>, DeployError> {
        let Some(record) = self.deployments.latest(project).await? else {
            return Ok(None);
        };
        let instance = match (&record.instance_id, record.status.is_active()) {
            (Some(id), true) => match self.backend.inspect(id).await {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(project = %project, instance = %id, error = %e, "inspect failed");
                    None
                }
            },
            _ => None,
        };
        Ok(Some(StatusReport { record, instance }))
    }

    /// Every deployment of the project, most recent first.
    pub async fn history(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, DeployError> {
        Ok(self.deployments.list(project).await?)
    }
}
