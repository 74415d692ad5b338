use super::{check_mutable, BundleStore, BundleSummary, StoreError};
use crate::generator::GeneratedBundle;
use crate::ids::ProjectId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

/// Bundles as JSON documents: `<root>/<project>/v<version>.json`.
///
/// Version reservation and updates are serialized through one lock, so the
/// store is safe to share within a process. Writes go to a temporary file
/// and are renamed into place.
#[derive(Debug)]
pub struct FsBundleStore {
    root: PathBuf,
    lock: Mutex<()>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FsBundleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join(project.as_str())
    }

    fn bundle_path(&self, project: &ProjectId, version: u32) -> PathBuf {
        self.project_dir(project).join(format!("v{version}.json"))
    }

    /// Stored version numbers, ascending.
    async fn versions(&self, project: &ProjectId) -> Result<Vec<u32>, StoreError> {
        let dir = self.project_dir(project);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir)(e)),
        };
        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
            let name = entry.file_name();
            let version = name
                .to_str()
                .and_then(|n| n.strip_prefix('v'))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<u32>().ok());
            if let Some(v) = version {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    async fn read(&self, project: &ProjectId, version: u32) -> Result<Option<GeneratedBundle>, StoreError> {
        let path = self.bundle_path(project, version);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }

    async fn write(&self, bundle: &GeneratedBundle) -> Result<(), StoreError> {
        let dir = self.project_dir(&bundle.project_id);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;
        let path = self.bundle_path(&bundle.project_id, bundle.version);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(bundle).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        tokio::fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))
    }
}

#[async_trait]
impl BundleStore for FsBundleStore {
    async fn begin(&self, project: &ProjectId) -> Result<GeneratedBundle, StoreError> {
        let _guard = self.lock.lock().await;
        let next = self.versions(project).await?.last().map_or(1, |v| v + 1);
        let bundle = GeneratedBundle::new(project.clone(), next);
        self.write(&bundle).await?;
        Ok(bundle)
    }

    async fn update(&self, bundle: &GeneratedBundle) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let stored = self.read(&bundle.project_id, bundle.version).await?;
        check_mutable(stored.as_ref(), bundle)?;
        self.write(bundle).await
    }

    async fn get(&self, project: &ProjectId, version: u32) -> Result<Option<GeneratedBundle>, StoreError> {
        self.read(project, version).await
    }

    async fn latest_complete(&self, project: &ProjectId) -> Result<Option<GeneratedBundle>, StoreError> {
        for version in self.versions(project).await?.into_iter().rev() {
            match self.read(project, version).await {
                Ok(Some(bundle)) if bundle.is_complete() => return Ok(Some(bundle)),
                Ok(_) => {}
                Err(StoreError::Corrupt(reason)) => {
                    warn!(project = %project, version, %reason, "skipping unreadable bundle");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<BundleSummary>, StoreError> {
        let mut out = Vec::new();
        for version in self.versions(project).await? {
            if let Some(bundle) = self.read(project, version).await? {
                out.push(BundleSummary::from(&bundle));
            }
        }
        Ok(out)
    }
}
