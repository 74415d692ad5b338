//! # Persistence
//!
//! Versioned bundle storage and deployment records. The engine only talks to
//! the [`BundleStore`] and [`DeploymentStore`] traits; the surrounding
//! application may back them with its own database.
//!
//! Bundle rules enforced by every implementation:
//!
//! - [`BundleStore::begin`] reserves `max(version) + 1` atomically, so two
//!   concurrent runs for one project never share a version.
//! - A bundle that was stored as `complete` is never modified again.

mod fs;
mod memory;

pub use fs::FsBundleStore;
pub use memory::{InMemoryBundleStore, InMemoryDeploymentStore};

use crate::deploy::DeploymentRecord;
use crate::generator::{BundleStatus, GeneratedBundle};
use crate::ids::{BundleId, DeploymentId, ProjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("bundle v{version} of project {project} does not exist")]
    BundleNotFound { project: ProjectId, version: u32 },
    #[error("bundle v{version} of project {project} is complete and cannot change")]
    Immutable { project: ProjectId, version: u32 },
    #[error("deployment {0} does not exist")]
    DeploymentNotFound(DeploymentId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Listing entry for a stored bundle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleSummary {
    pub id: BundleId,
    pub version: u32,
    pub status: BundleStatus,
    pub files: usize,
    pub digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&GeneratedBundle> for BundleSummary {
    fn from(bundle: &GeneratedBundle) -> Self {
        Self {
            id: bundle.id,
            version: bundle.version,
            status: bundle.status,
            files: bundle.files.len(),
            digest: bundle.digest.clone(),
            created_at: bundle.created_at,
            completed_at: bundle.completed_at,
        }
    }
}

#[async_trait]
pub trait BundleStore: Send + Sync {
    /// Reserve the next version and persist an empty `generating` bundle.
    async fn begin(&self, project: &ProjectId) -> Result<GeneratedBundle, StoreError>;

    /// Persist the current state of a bundle created by `begin`.
    async fn update(&self, bundle: &GeneratedBundle) -> Result<(), StoreError>;

    async fn get(&self, project: &ProjectId, version: u32) -> Result<Option<GeneratedBundle>, StoreError>;

    /// Highest-versioned `complete` bundle.
    async fn latest_complete(&self, project: &ProjectId) -> Result<Option<GeneratedBundle>, StoreError>;

    /// Every bundle of the project, oldest first.
    async fn list(&self, project: &ProjectId) -> Result<Vec<BundleSummary>, StoreError>;
}

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn insert(&self, record: &DeploymentRecord) -> Result<(), StoreError>;

    async fn update(&self, record: &DeploymentRecord) -> Result<(), StoreError>;

    /// Most recently created record of the project.
    async fn latest(&self, project: &ProjectId) -> Result<Option<DeploymentRecord>, StoreError>;

    /// Records of the project, most recent first.
    async fn list(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, StoreError>;
}

/// Shared check for `update`: the stored copy must exist and not be complete.
fn check_mutable(stored: Option<&GeneratedBundle>, incoming: &GeneratedBundle) -> Result<(), StoreError> {
    match stored {
        None => Err(StoreError::BundleNotFound {
            project: incoming.project_id.clone(),
            version: incoming.version,
        }),
        Some(existing) if existing.is_complete() => Err(StoreError::Immutable {
            project: incoming.project_id.clone(),
            version: incoming.version,
        }),
        Some(_) => Ok(()),
    }
}
