use super::bundle::{
    BundleStatus, FileOrigin, GeneratedBundle, GeneratedFile, GenerationLogEntry, LogStatus, Phase,
};
use crate::advisor::{AdvisorClient, Consulted, CustomEndpoint};
use crate::config::EngineConfig;
use crate::events::{EventKind, EventSender};
use crate::spec::{FieldKind, ProjectSpec};
use crate::store::{BundleStore, StoreError};
use crate::templates::context::{
    DeployContext, EntityContext, ModuleContext, OperationView, ProjectContext, ProjectView,
    WorkflowContext, WorkflowHandler,
};
use crate::templates::{fallback, names, TemplateEngine, TemplateError};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Fatal generation failure. Template and advisor problems never surface
/// here; they are recorded in the bundle log instead.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("bundle storage failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Port the generated server listens on inside its container.
    pub internal_port: u16,
    pub base_image: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            internal_port: 3000,
            base_image: "node:20-alpine".to_string(),
        }
    }
}

impl GeneratorOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            internal_port: config.container.internal_port,
            base_image: config.container.base_image.clone(),
        }
    }
}

/// Runs the five generation phases and persists the resulting bundle.
pub struct Generator {
    engine: Arc<TemplateEngine>,
    advisor: Arc<AdvisorClient>,
    store: Arc<dyn BundleStore>,
    options: GeneratorOptions,
}

impl Generator {
    pub fn new(
        engine: Arc<TemplateEngine>,
        advisor: Arc<AdvisorClient>,
        store: Arc<dyn BundleStore>,
        options: GeneratorOptions,
    ) -> Self {
        Self {
            engine,
            advisor,
            store,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.store
    }

    /// Generate a new bundle version for an already-normalized project.
    ///
    /// # Errors
    ///
    /// Only storage failures abort a run. The partially generated bundle is
    /// then stored with status `error` (best effort) and an `error` event is
    /// emitted; earlier versions are untouched.
    pub async fn generate(&self, project: &ProjectSpec, events: &EventSender) -> Result<GeneratedBundle, GenerationError> {
        let bundle = match self.store.begin(&project.id).await {
            Ok(bundle) => bundle,
            Err(err) => {
                error!(project = %project.id, error = %err, "could not allocate a bundle");
                events.emit(EventKind::Error, json!({ "message": err.to_string() }));
                return Err(GenerationError::Store(err));
            }
        };
        info!(project = %project.id, version = bundle.version, "generation started");
        events.emit(
            EventKind::Status,
            json!({ "status": "generating", "version": bundle.version, "bundleId": bundle.id }),
        );

        let mut run = Run {
            engine: &self.engine,
            advisor: &self.advisor,
            options: &self.options,
            events,
            spec: project.clone(),
            view: ProjectView::new(project),
            bundle,
            advisor_calls: 0,
            hybrid_models: HashMap::new(),
        };

        for phase in Phase::ALL {
            let enabled = match phase {
                Phase::Frontend => project.settings.frontend,
                Phase::DeploymentManifest => project.settings.docker,
                _ => true,
            };
            if !enabled {
                debug!(project = %project.id, phase = %phase, "phase skipped");
                continue;
            }
            let started = Instant::now();
            let files_before = run.bundle.files.len();
            events.emit(
                EventKind::Phase,
                json!({ "phase": phase.as_str(), "message": phase.message() }),
            );
            match phase {
                Phase::Scaffold => run.scaffold(),
                Phase::Models => run.models().await,
                Phase::Api => run.api().await,
                Phase::Frontend => run.frontend(),
                Phase::DeploymentManifest => run.deployment_manifest(),
            }
            let produced = run.bundle.files.len() - files_before;
            run.log(phase, LogStatus::Complete, format!("{produced} files"), started);
            run.bundle.advisor_calls = run.advisor_calls;
            if let Err(err) = self.store.update(&run.bundle).await {
                return Err(self.fail(run, phase, err).await);
            }
            events.emit(
                EventKind::Progress,
                json!({ "percent": phase.progress(), "filesGenerated": run.bundle.files.len() }),
            );
        }

        let mut bundle = run.bundle;
        bundle.structure = Some(bundle.compute_structure());
        bundle.digest = Some(bundle.compute_digest());
        bundle.status = BundleStatus::Complete;
        bundle.completed_at = Some(Utc::now());
        if let Err(err) = self.store.update(&bundle).await {
            return Err(self.fail_bundle(bundle, Phase::DeploymentManifest, err, events).await);
        }

        info!(
            project = %project.id,
            version = bundle.version,
            files = bundle.files.len(),
            advisor_calls = bundle.advisor_calls,
            "bundle complete"
        );
        events.emit(
            EventKind::Progress,
            json!({ "percent": 100, "filesGenerated": bundle.files.len() }),
        );
        events.emit(
            EventKind::Complete,
            json!({
                "version": bundle.version,
                "bundleId": bundle.id,
                "totalFiles": bundle.files.len(),
                "advisorCalls": bundle.advisor_calls,
                "digest": bundle.digest,
            }),
        );
        Ok(bundle)
    }

    async fn fail(&self, run: Run<'_>, phase: Phase, err: StoreError) -> GenerationError {
        let events = run.events;
        self.fail_bundle(run.bundle, phase, err, events).await
    }

    async fn fail_bundle(
        &self,
        mut bundle: GeneratedBundle,
        phase: Phase,
        err: StoreError,
        events: &EventSender,
    ) -> GenerationError {
        let message = err.to_string();
        error!(project = %bundle.project_id, version = bundle.version, phase = %phase, error = %message, "generation aborted");
        bundle.status = BundleStatus::Error;
        bundle.error = Some(message.clone());
        bundle.log.push(GenerationLogEntry {
            timestamp: Utc::now(),
            phase,
            status: LogStatus::Error,
            detail: message.clone(),
            duration_ms: 0,
        });
        if let Err(mark_err) = self.store.update(&bundle).await {
            warn!(project = %bundle.project_id, version = bundle.version, error = %mark_err, "could not mark bundle as failed");
        }
        events.emit(
            EventKind::Error,
            json!({ "message": message, "version": bundle.version, "phase": phase.as_str() }),
        );
        GenerationError::Store(err)
    }
}

/// Mutable state of one generation run.
struct Run<'a> {
    engine: &'a TemplateEngine,
    advisor: &'a AdvisorClient,
    options: &'a GeneratorOptions,
    events: &'a EventSender,
    /// Working copy; the models phase merges advisor fields into it.
    spec: ProjectSpec,
    view: ProjectView,
    bundle: GeneratedBundle,
    advisor_calls: u32,
    /// Entities whose model incorporates advisor suggestions.
    hybrid_models: HashMap<String, Vec<Value>>,
}

impl Run<'_> {
    fn log(&mut self, phase: Phase, status: LogStatus, detail: String, started: Instant) {
        self.bundle.log.push(GenerationLogEntry {
            timestamp: Utc::now(),
            phase,
            status,
            detail,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn note<T>(&mut self, phase: Phase, what: &str, consulted: &Consulted<T>) {
        if self.advisor.is_enabled() {
            self.advisor_calls += 1;
        }
        if let Some(failure) = &consulted.failure {
            warn!(project = %self.bundle.project_id, phase = %phase, what, failure = %failure, "advisor fallback");
            self.log(phase, LogStatus::AdvisorFallback, format!("{what}: {failure}"), Instant::now());
        }
    }

    /// Render a template, substituting the fallback generator on failure.
    /// Returns the content and whether the fallback was used.
    fn render<C: Serialize>(&mut self, phase: Phase, name: &str, ctx: &C, fallback: impl FnOnce(&C) -> String) -> (String, bool) {
        match self.engine.render(name, ctx) {
            Ok(content) => (content, false),
            Err(err) => {
                match &err {
                    TemplateError::NotFound { .. } => debug!(template = name, "template missing, using fallback"),
                    _ => warn!(template = name, error = %err, "template failed, using fallback"),
                }
                self.log(phase, LogStatus::Fallback, err.to_string(), Instant::now());
                (fallback(ctx), true)
            }
        }
    }

    fn push(&mut self, file: GeneratedFile, fell_back: bool) {
        let status = if fell_back { "fallback" } else { "generated" };
        self.events
            .emit(EventKind::File, json!({ "path": file.path, "status": status }));
        self.bundle.files.push(file);
    }

    fn emit_file<C: Serialize>(
        &mut self,
        phase: Phase,
        path: String,
        module: &str,
        name: &str,
        ctx: &C,
        fallback: impl FnOnce(&C) -> String,
    ) {
        let (content, fell_back) = self.render(phase, name, ctx, fallback);
        self.push(GeneratedFile::new(path, content, module), fell_back);
    }

    fn scaffold(&mut self) {
        let phase = Phase::Scaffold;
        let view = self.view.clone();
        let ctx = ProjectContext { project: &view };
        self.emit_file(phase, "package.json".into(), "core", names::PACKAGE_JSON, &ctx, fallback::package_json);
        self.emit_file(phase, ".env.example".into(), "core", names::ENV, &ctx, fallback::env_example);
        self.emit_file(phase, "README.md".into(), "core", names::README, &ctx, fallback::readme);
        self.emit_file(phase, ".gitignore".into(), "core", names::GITIGNORE, &ctx, |_| fallback::gitignore());
        self.emit_file(phase, "src/config/database.js".into(), "core", names::DATABASE, &ctx, fallback::database_config);
        if view.settings.authentication {
            self.emit_file(phase, "src/middleware/auth.js".into(), "core", names::AUTH_MIDDLEWARE, &ctx, |_| {
                fallback::auth_middleware()
            });
        }
        if view.settings.frontend {
            self.emit_file(phase, "client/package.json".into(), "frontend", names::CLIENT_PACKAGE_JSON, &ctx, fallback::client_package_json);
            self.emit_file(phase, "client/index.html".into(), "frontend", names::CLIENT_INDEX_HTML, &ctx, fallback::client_index_html);
            self.emit_file(phase, "client/vite.config.js".into(), "frontend", names::VITE_CONFIG, &ctx, |_| fallback::vite_config());
            self.emit_file(phase, "client/src/main.jsx".into(), "frontend", names::CLIENT_MAIN, &ctx, |_| fallback::client_main());
        }
    }

    /// Merge advisor entity suggestions into the working spec, then rebuild
    /// the view every later phase renders from.
    async fn enrich_entities(&mut self) {
        let phase = Phase::Models;
        for m in 0..self.spec.modules.len() {
            for e in 0..self.spec.modules[m].entities.len() {
                let consulted = {
                    let module = &self.spec.modules[m];
                    self.advisor.entity_fields(module, &module.entities[e]).await
                };
                let name = self.spec.modules[m].entities[e].name.clone();
                self.note(phase, &format!("entity {name}"), &consulted);
                if !consulted.from_advisor() {
                    continue;
                }
                let entity = &mut self.spec.modules[m].entities[e];
                let mut added = 0;
                for field in consulted.value.fields {
                    if entity.field(&field.name).is_none() {
                        entity.fields.push(field);
                        added += 1;
                    }
                }
                let indexes = consulted.value.indexes;
                if added > 0 || !indexes.is_empty() {
                    self.hybrid_models.insert(name, indexes);
                }
            }
        }
        let mut view = ProjectView::new(&self.spec);
        for module in &mut view.modules {
            for entity in &mut module.entities {
                if let Some(indexes) = self.hybrid_models.get(&entity.name) {
                    entity.indexes = indexes.clone();
                }
            }
        }
        self.view = view;
    }

    async fn models(&mut self) {
        let phase = Phase::Models;
        self.enrich_entities().await;
        let view = self.view.clone();
        let model_template = if view.uses_postgres() {
            names::SEQUELIZE_MODEL
        } else {
            names::MONGOOSE_MODEL
        };
        let no_ops: [OperationView; 0] = [];
        for module in &view.modules {
            let spec_module = self.spec.modules.iter().find(|m| m.id == module.id).cloned();
            for entity in &module.entities {
                let ctx = EntityContext {
                    project: &view,
                    module,
                    entity,
                    operations: &no_ops,
                };
                let (content, fell_back) = self.render(phase, model_template, &ctx, fallback::model);
                let origin = if self.hybrid_models.contains_key(&entity.name) {
                    FileOrigin::Hybrid
                } else {
                    FileOrigin::Template
                };
                self.push(
                    GeneratedFile::new(format!("src/models/{}.js", entity.name), content, &module.id).with_origin(origin),
                    fell_back,
                );

                let record = spec_module
                    .as_ref()
                    .and_then(|m| m.entities.iter().find(|e| e.name == entity.name))
                    .map(seed_record)
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let seeds = serde_json::to_string_pretty(&json!([record])).unwrap_or_else(|_| "[]".to_string()) + "\n";
                self.push(
                    GeneratedFile::new(format!("src/seeds/{}.json", entity.name), seeds, &module.id),
                    false,
                );
            }
        }
        let ctx = ProjectContext { project: &view };
        self.emit_file(phase, "src/seed.js".into(), "core", names::SEED_RUNNER, &ctx, fallback::seed_runner);
    }

    async fn api(&mut self) {
        let phase = Phase::Api;
        let view = self.view.clone();
        let ctx = ProjectContext { project: &view };
        self.emit_file(phase, "src/index.js".into(), "core", names::SERVER, &ctx, fallback::server);

        for (m, module) in view.modules.iter().enumerate() {
            let module_ctx = ModuleContext {
                project: &view,
                module,
            };
            self.emit_file(
                phase,
                format!("src/routes/{}.js", module.camel),
                &module.id,
                names::MODULE_ROUTER,
                &module_ctx,
                fallback::module_router,
            );

            for (e, entity) in module.entities.iter().enumerate() {
                let consulted = {
                    let spec_module = &self.spec.modules[m];
                    self.advisor.custom_endpoints(spec_module, &spec_module.entities[e]).await
                };
                self.note(phase, &format!("endpoints {}", entity.name), &consulted);
                let (operations, customized) = merge_operations(consulted.value);
                let origin = if customized {
                    FileOrigin::Hybrid
                } else {
                    FileOrigin::Template
                };
                let ctx = EntityContext {
                    project: &view,
                    module,
                    entity,
                    operations: &operations,
                };
                let (routes, fell_back) = self.render(phase, names::ROUTE, &ctx, fallback::route);
                self.push(
                    GeneratedFile::new(format!("src/routes/{}Routes.js", entity.camel), routes, &module.id).with_origin(origin),
                    fell_back,
                );
                let (handlers, fell_back) = self.render(phase, names::CONTROLLER, &ctx, fallback::controller);
                self.push(
                    GeneratedFile::new(format!("src/controllers/{}Controller.js", entity.camel), handlers, &module.id)
                        .with_origin(origin),
                    fell_back,
                );
            }

            if module.workflows.is_empty() {
                continue;
            }
            let mut handlers = Vec::with_capacity(module.workflows.len());
            let mut advised = 0;
            for (w, workflow) in module.workflows.iter().enumerate() {
                let consulted = {
                    let spec_module = &self.spec.modules[m];
                    self.advisor.workflow_logic(spec_module, &spec_module.workflows[w]).await
                };
                self.note(phase, &format!("workflow {}", workflow.name), &consulted);
                if consulted.from_advisor() {
                    advised += 1;
                }
                handlers.push(WorkflowHandler {
                    workflow: workflow.clone(),
                    logic: consulted.value,
                });
            }
            let origin = match advised {
                0 => FileOrigin::Template,
                n if n == handlers.len() => FileOrigin::AiAssisted,
                _ => FileOrigin::Hybrid,
            };
            let ctx = WorkflowContext {
                project: &view,
                module,
                workflows: &handlers,
            };
            let (content, fell_back) = self.render(phase, names::WORKFLOWS, &ctx, fallback::workflows);
            self.push(
                GeneratedFile::new(format!("src/workflows/{}Workflows.js", module.camel), content, &module.id)
                    .with_origin(origin),
                fell_back,
            );
        }
    }

    fn frontend(&mut self) {
        let phase = Phase::Frontend;
        let view = self.view.clone();
        let ctx = ProjectContext { project: &view };
        self.emit_file(phase, "client/src/App.jsx".into(), "frontend", names::APP, &ctx, fallback::app);
        for module in &view.modules {
            let ctx = ModuleContext {
                project: &view,
                module,
            };
            self.emit_file(
                phase,
                format!("client/src/pages/{}Page.jsx", module.pascal),
                &module.id,
                names::PAGE,
                &ctx,
                fallback::page,
            );
        }
    }

    fn deployment_manifest(&mut self) {
        let phase = Phase::DeploymentManifest;
        let view = self.view.clone();
        let ctx = DeployContext {
            project: &view,
            port: self.options.internal_port,
            base_image: &self.options.base_image,
        };
        self.emit_file(phase, "Dockerfile".into(), "deployment", names::DOCKERFILE, &ctx, fallback::dockerfile);
        self.emit_file(phase, "docker-compose.yml".into(), "deployment", names::COMPOSE, &ctx, fallback::compose);
        self.push(
            GeneratedFile::new(".dockerignore", fallback::dockerignore(), "deployment"),
            false,
        );
    }
}

/// Canonical CRUD operations with advisor endpoints applied.
///
/// An endpoint with the same method and path as a canonical operation
/// replaces that operation's body and keeps its handler name. Other
/// endpoints are appended when they carry a body and their name is free.
/// Returns the operations and whether any advisor endpoint was used.
pub fn merge_operations(endpoints: Vec<CustomEndpoint>) -> (Vec<OperationView>, bool) {
    let mut ops = OperationView::canonical_set();
    let mut customized = false;
    for endpoint in endpoints {
        let Some(body) = endpoint.body.filter(|b| !b.trim().is_empty()) else {
            continue;
        };
        if let Some(slot) = ops
            .iter_mut()
            .find(|op| op.method == endpoint.method && op.path == endpoint.path)
        {
            slot.body = Some(body);
            slot.custom = true;
            customized = true;
        } else if !ops.iter().any(|op| op.name == endpoint.name) {
            ops.push(OperationView {
                name: endpoint.name,
                method: endpoint.method,
                path: endpoint.path,
                body: Some(body),
                custom: true,
            });
            customized = true;
        }
    }
    (ops, customized)
}

/// One placeholder record for an entity's seed file.
pub fn seed_record(entity: &crate::spec::EntitySpec) -> Value {
    let mut record = Map::new();
    for field in &entity.fields {
        if let Some(default) = &field.default {
            record.insert(field.name.clone(), default.clone());
            continue;
        }
        let value = match &field.kind {
            FieldKind::String => json!(format!("Sample {}", field.name)),
            FieldKind::Number => json!(0),
            FieldKind::Boolean => json!(true),
            FieldKind::Date => json!("now"),
            FieldKind::Enum { values } => match values.first() {
                Some(first) => json!(first),
                None => continue,
            },
            FieldKind::Reference { .. } | FieldKind::Array => continue,
        };
        record.insert(field.name.clone(), value);
    }
    Value::Object(record)
}
