use super::{check_mutable, BundleStore, BundleSummary, DeploymentStore, StoreError};
use crate::deploy::DeploymentRecord;
use crate::generator::GeneratedBundle;
use crate::ids::ProjectId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Process-local bundle store.
#[derive(Debug, Default)]
pub struct InMemoryBundleStore {
    bundles: Mutex<HashMap<ProjectId, BTreeMap<u32, GeneratedBundle>>>,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn begin(&self, project: &ProjectId) -> Result<GeneratedBundle, StoreError> {
        let mut bundles = self.bundles.lock();
        let versions = bundles.entry(project.clone()).or_default();
        let next = versions.keys().next_back().map_or(1, |v| v + 1);
        let bundle = GeneratedBundle::new(project.clone(), next);
        versions.insert(next, bundle.clone());
        Ok(bundle)
    }

    async fn update(&self, bundle: &GeneratedBundle) -> Result<(), StoreError> {
        let mut bundles = self.bundles.lock();
        let versions = bundles.entry(bundle.project_id.clone()).or_default();
        check_mutable(versions.get(&bundle.version), bundle)?;
        versions.insert(bundle.version, bundle.clone());
        Ok(())
    }

    async fn get(&self, project: &ProjectId, version: u32) -> Result<Option<GeneratedBundle>, StoreError> {
        Ok(self
            .bundles
            .lock()
            .get(project)
            .and_then(|versions| versions.get(&version))
            .cloned())
    }

    async fn latest_complete(&self, project: &ProjectId) -> Result<Option<GeneratedBundle>, StoreError> {
        Ok(self.bundles.lock().get(project).and_then(|versions| {
            versions
                .values()
                .rev()
                .find(|bundle| bundle.is_complete())
                .cloned()
        }))
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<BundleSummary>, StoreError> {
        Ok(self
            .bundles
            .lock()
            .get(project)
            .map(|versions| versions.values().map(BundleSummary::from).collect())
            .unwrap_or_default())
    }
}

/// Process-local deployment records, in creation order.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentStore {
    records: Mutex<Vec<DeploymentRecord>>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn insert(&self, record: &DeploymentRecord) -> Result<(), StoreError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn update(&self, record: &DeploymentRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let slot = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or(StoreError::DeploymentNotFound(record.id))?;
        *slot = record.clone();
        Ok(())
    }

    async fn latest(&self, project: &ProjectId) -> Result<Option<DeploymentRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .rev()
            .find(|r| &r.project_id == project)
            .cloned())
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .iter()
            .rev()
            .filter(|r| &r.project_id == project)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::BundleStatus;
    use std::sync::Arc;

    fn project() -> ProjectId {
        ProjectId::new("acme").unwrap()
    }

    #[tokio::test]
    async fn test_versions_increase_from_one() {
        let store = InMemoryBundleStore::new();
        assert_eq!(store.begin(&project()).await.unwrap().version, 1);
        assert_eq!(store.begin(&project()).await.unwrap().version, 2);
        let other = ProjectId::new("other").unwrap();
        assert_eq!(store.begin(&other).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_begin_gets_distinct_versions() {
        let store = Arc::new(InMemoryBundleStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.begin(&project()).await.unwrap().version })
            })
            .collect();
        let mut versions = Vec::new();
        for h in handles {
            versions.push(h.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_complete_bundle_is_immutable() {
        let store = InMemoryBundleStore::new();
        let mut bundle = store.begin(&project()).await.unwrap();
        bundle.status = BundleStatus::Complete;
        store.update(&bundle).await.unwrap();
        bundle.advisor_calls = 9;
        let err = store.update(&bundle).await.unwrap_err();
        assert!(matches!(err, StoreError::Immutable { version: 1, .. }));
    }

    #[tokio::test]
    async fn test_latest_complete_skips_unfinished() {
        let store = InMemoryBundleStore::new();
        let mut first = store.begin(&project()).await.unwrap();
        first.status = BundleStatus::Complete;
        store.update(&first).await.unwrap();
        let mut second = store.begin(&project()).await.unwrap();
        second.status = BundleStatus::Error;
        store.update(&second).await.unwrap();
        store.begin(&project()).await.unwrap();

        let latest = store.latest_complete(&project()).await.unwrap().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(store.list(&project()).await.unwrap().len(), 3);
    }
}
