#![allow(dead_code)]

pub mod projects {
    use forgekit::spec::{
        normalize, EntitySpec, FieldKind, FieldSpec, ModuleCatalog, ModuleSpec, ProjectSpec,
        Settings,
    };
    use forgekit::ProjectId;

    /// inventory/Product with the catalog's default fields.
    pub fn inventory(frontend: bool, docker: bool) -> ProjectSpec {
        let project = ProjectSpec::new(ProjectId::new("acme-inventory").unwrap(), "Acme Inventory")
            .with_module(ModuleSpec::new("inventory").with_entity(EntitySpec::new("Product")))
            .with_settings(Settings {
                frontend,
                docker,
                ..Settings::default()
            });
        normalize(project, ModuleCatalog::builtin()).unwrap()
    }

    /// A hand-written module with one entity and no catalog defaults.
    pub fn custom(id: &str) -> ProjectSpec {
        let mut entity = EntitySpec::new("Ticket");
        entity.fields = vec![
            FieldSpec::new("title", FieldKind::String).required(),
            FieldSpec::new("priority", FieldKind::Number),
        ];
        let project = ProjectSpec::new(ProjectId::new(id).unwrap(), "Helpdesk")
            .with_module(ModuleSpec::new("support").with_entity(entity))
            .with_settings(Settings {
                frontend: false,
                docker: false,
                ..Settings::default()
            });
        normalize(project, ModuleCatalog::builtin()).unwrap()
    }
}

pub mod advisors {
    use async_trait::async_trait;
    use forgekit::advisor::{Advisor, AdvisorError, SuggestionKind};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every request and counts how often it was asked.
    #[derive(Debug, Default)]
    pub struct FailingAdvisor {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Advisor for FailingAdvisor {
        async fn suggest(&self, _kind: SuggestionKind, _payload: &Value) -> Result<Option<Value>, AdvisorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AdvisorError::Status {
                status: 503,
                message: "overloaded".to_string(),
            })
        }
    }

    /// Answers only the listed kinds, with a fixed value.
    #[derive(Debug)]
    pub struct ScriptedAdvisor {
        pub answers: Vec<(SuggestionKind, Value)>,
    }

    #[async_trait]
    impl Advisor for ScriptedAdvisor {
        async fn suggest(&self, kind: SuggestionKind, _payload: &Value) -> Result<Option<Value>, AdvisorError> {
            Ok(self
                .answers
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, v)| v.clone()))
        }
    }
}

pub mod stores {
    use async_trait::async_trait;
    use forgekit::generator::GeneratedBundle;
    use forgekit::deploy::{DeploymentRecord, DeploymentStatus};
    use forgekit::store::{
        BundleStore, BundleSummary, DeploymentStore, InMemoryBundleStore, InMemoryDeploymentStore,
        StoreError,
    };
    use forgekit::ProjectId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory store whose `update` starts failing after `ok_updates` calls.
    #[derive(Debug)]
    pub struct FlakyStore {
        pub inner: InMemoryBundleStore,
        pub ok_updates: usize,
        pub updates: AtomicUsize,
        pub reject_begin: bool,
    }

    impl FlakyStore {
        pub fn failing_after(ok_updates: usize) -> Self {
            Self {
                inner: InMemoryBundleStore::new(),
                ok_updates,
                updates: AtomicUsize::new(0),
                reject_begin: false,
            }
        }

        /// Refuses to allocate any bundle.
        pub fn unavailable() -> Self {
            Self {
                reject_begin: true,
                ..Self::failing_after(0)
            }
        }
    }

    #[async_trait]
    impl BundleStore for FlakyStore {
        async fn begin(&self, project: &ProjectId) -> Result<GeneratedBundle, StoreError> {
            if self.reject_begin {
                return Err(StoreError::Unavailable("read-only filesystem".to_string()));
            }
            self.inner.begin(project).await
        }

        async fn update(&self, bundle: &GeneratedBundle) -> Result<(), StoreError> {
            let n = self.updates.fetch_add(1, Ordering::SeqCst);
            if n >= self.ok_updates && bundle.status != forgekit::generator::BundleStatus::Error {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.update(bundle).await
        }

        async fn get(&self, project: &ProjectId, version: u32) -> Result<Option<GeneratedBundle>, StoreError> {
            self.inner.get(project, version).await
        }

        async fn latest_complete(&self, project: &ProjectId) -> Result<Option<GeneratedBundle>, StoreError> {
            self.inner.latest_complete(project).await
        }

        async fn list(&self, project: &ProjectId) -> Result<Vec<BundleSummary>, StoreError> {
            self.inner.list(project).await
        }
    }

    /// Deployment store that cannot persist a record once it is running.
    #[derive(Debug, Default)]
    pub struct RunningRejectingStore {
        pub inner: InMemoryDeploymentStore,
    }

    #[async_trait]
    impl DeploymentStore for RunningRejectingStore {
        async fn insert(&self, record: &DeploymentRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await
        }

        async fn update(&self, record: &DeploymentRecord) -> Result<(), StoreError> {
            if record.status == DeploymentStatus::Running {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.update(record).await
        }

        async fn latest(&self, project: &ProjectId) -> Result<Option<DeploymentRecord>, StoreError> {
            self.inner.latest(project).await
        }

        async fn list(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, StoreError> {
            self.inner.list(project).await
        }
    }
}

pub mod backends {
    use async_trait::async_trait;
    use forgekit::deploy::{
        BackendError, BackendKind, BuildLog, BuildRequest, ExecutionBackend, InstanceId,
        InstanceInfo, LogStream, RunningInstance,
    };
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Backend that tracks instances in memory and records every call.
    #[derive(Debug, Default)]
    pub struct FakeBackend {
        pub calls: Mutex<Vec<String>>,
        pub fail_builds: AtomicBool,
        pub fail_removes: AtomicBool,
        pub requests: Mutex<Vec<BuildRequest>>,
        /// Env overrides passed to each restart, in order.
        pub restarts: Mutex<Vec<BTreeMap<String, String>>>,
        instances: Mutex<HashMap<InstanceId, (u16, bool)>>,
    }

    impl FakeBackend {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        pub fn live_instances(&self) -> usize {
            self.instances.lock().len()
        }

        fn record(&self, call: String) {
            self.calls.lock().push(call);
        }

        fn set_running(&self, id: &InstanceId, running: bool) -> Result<(), BackendError> {
            let mut instances = self.instances.lock();
            let slot = instances
                .get_mut(id)
                .ok_or_else(|| BackendError::NotFound(id.clone()))?;
            slot.1 = running;
            Ok(())
        }
    }

    #[async_trait]
    impl ExecutionBackend for FakeBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Native
        }

        async fn build_and_run(&self, req: BuildRequest, log: &BuildLog) -> Result<RunningInstance, BackendError> {
            self.record(format!("build {} v{}", req.project_id, req.bundle.version));
            log.line(format!("building {} files", req.bundle.files.len()));
            let port = req.port;
            self.requests.lock().push(req);
            if self.fail_builds.load(Ordering::SeqCst) {
                log.line("npm ERR! missing script: start");
                return Err(BackendError::Build("npm install failed".to_string()));
            }
            let id = InstanceId::new(format!("fake-{}", self.calls.lock().len()));
            self.instances.lock().insert(id.clone(), (port, true));
            Ok(RunningInstance { instance_id: id, port })
        }

        async fn stop(&self, id: &InstanceId) -> Result<(), BackendError> {
            self.record(format!("stop {id}"));
            self.set_running(id, false)
        }

        async fn restart(&self, id: &InstanceId, overrides: &BTreeMap<String, String>) -> Result<InstanceId, BackendError> {
            self.record(format!("restart {id}"));
            self.restarts.lock().push(overrides.clone());
            self.set_running(id, true)?;
            Ok(id.clone())
        }

        async fn remove(&self, id: &InstanceId) -> Result<(), BackendError> {
            self.record(format!("remove {id}"));
            if self.fail_removes.load(Ordering::SeqCst) {
                return Err(BackendError::Docker("daemon went away".to_string()));
            }
            self.instances
                .lock()
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| BackendError::NotFound(id.clone()))
        }

        async fn stream_logs(&self, id: &InstanceId) -> Result<LogStream, BackendError> {
            self.record(format!("logs {id}"));
            if !self.instances.lock().contains_key(id) {
                return Err(BackendError::NotFound(id.clone()));
            }
            let (sink, stream) = LogStream::channel(8);
            tokio::spawn(async move {
                for line in ["Server listening", "Connected to database"] {
                    if !sink.send(line.to_string()).await {
                        return;
                    }
                }
                sink.cancelled().await;
            });
            Ok(stream)
        }

        async fn inspect(&self, id: &InstanceId) -> Result<InstanceInfo, BackendError> {
            let instances = self.instances.lock();
            let (port, running) = *instances
                .get(id)
                .ok_or_else(|| BackendError::NotFound(id.clone()))?;
            Ok(InstanceInfo {
                instance_id: id.clone(),
                running,
                status: if running { "running" } else { "exited" }.to_string(),
                port: Some(port),
                name: None,
                started_at: None,
                exit_code: None,
            })
        }
    }
}
