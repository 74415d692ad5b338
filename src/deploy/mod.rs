//! # Deployment
//!
//! Takes the newest complete bundle of a project and turns it into a running
//! instance reachable on a host port.
//!
//! ```text
//! Orchestrator ──acquire──▶ PortPool
//!      │
//!      ├──latest_complete──▶ BundleStore
//!      │
//!      └──build_and_run──▶ dyn ExecutionBackend
//!                              ├── ContainerBackend  (bollard, local Docker daemon)
//!                              └── ProcessBackend    (tokio::process, host runtime)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! pending → building → running ⇄ stopped
//!                  ╰─▶ failed ──▶ running (restart)
//! any non-destroyed ──▶ destroyed
//! ```
//!
//! The backend is chosen once by [`select_backend`]. Nothing else in the
//! crate branches on which backend is in use.

mod backend;
mod container;
mod logs;
mod orchestrator;
mod ports;
mod process;
mod workspace;

pub use backend::{
    BackendError, BackendKind, BuildLog, BuildRequest, ExecutionBackend, InstanceId, InstanceInfo,
    LogSink, LogStream, RunningInstance, runtime_env,
};
pub use container::{synthesize_dockerfile, ContainerBackend};
pub use logs::follow_file;
pub use orchestrator::{DeployError, DeploymentRecord, DeploymentStatus, Orchestrator, StatusReport};
pub use ports::{PortError, PortPool};
pub use process::ProcessBackend;
pub use workspace::{safe_relative, write_workspace};

use crate::config::{BackendPreference, EngineConfig};
use std::sync::Arc;
use tracing::{info, warn};

/// Pick the execution backend for this engine instance.
///
/// `auto` prefers containers and falls back to native processes when the
/// Docker daemon does not answer. A forced `container` preference fails
/// instead of falling back.
pub async fn select_backend(config: &EngineConfig) -> Result<Arc<dyn ExecutionBackend>, BackendError> {
    let backend: Arc<dyn ExecutionBackend> = match config.backend {
        BackendPreference::Native => Arc::new(ProcessBackend::new(config)),
        BackendPreference::Container => Arc::new(ContainerBackend::connect(config).await?),
        BackendPreference::Auto => match ContainerBackend::connect(config).await {
            Ok(container) => Arc::new(container),
            Err(e) => {
                warn!(error = %e, "docker unreachable, using native process backend");
                Arc::new(ProcessBackend::new(config))
            }
        },
    };
    info!(backend = %backend.kind(), "execution backend selected");
    Ok(backend)
}
