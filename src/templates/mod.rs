//! # Template Rendering Engine
//!
//! Named templates rendered with [minijinja] against the views in
//! [`context`]. Built-in sources live under `templates/` at the crate root and
//! are compiled in; a directory of `*.jinja` files can override any of them
//! by name (`express-api/controller.jinja` replaces `express-api/controller`).
//!
//! Rendering never escapes output: templates produce JavaScript, JSON,
//! YAML and Dockerfiles, not HTML.
//!
//! A render failure is never fatal for generation. Callers match on the
//! [`TemplateError`] and substitute the matching [`fallback`] generator.

pub mod context;
pub mod fallback;
pub mod helpers;

use minijinja::{AutoEscape, Environment, ErrorKind};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Template names known to the generator.
pub mod names {
    pub const PACKAGE_JSON: &str = "scaffold/package.json";
    pub const ENV: &str = "scaffold/env";
    pub const README: &str = "scaffold/readme";
    pub const GITIGNORE: &str = "scaffold/gitignore";
    pub const DATABASE: &str = "scaffold/database";
    pub const AUTH_MIDDLEWARE: &str = "scaffold/auth-middleware";
    pub const CLIENT_PACKAGE_JSON: &str = "frontend/package.json";
    pub const CLIENT_INDEX_HTML: &str = "frontend/index.html";
    pub const VITE_CONFIG: &str = "frontend/vite.config";
    pub const CLIENT_MAIN: &str = "frontend/main";
    pub const MONGOOSE_MODEL: &str = "database/mongoose-model";
    pub const SEQUELIZE_MODEL: &str = "database/sequelize-model";
    pub const SEED_RUNNER: &str = "database/seed-runner";
    pub const SERVER: &str = "express-api/server";
    pub const MODULE_ROUTER: &str = "express-api/module-router";
    pub const ROUTE: &str = "express-api/route";
    pub const CONTROLLER: &str = "express-api/controller";
    pub const WORKFLOWS: &str = "express-api/workflows";
    pub const APP: &str = "react-frontend/App";
    pub const PAGE: &str = "react-frontend/page";
    pub const DOCKERFILE: &str = "docker/Dockerfile";
    pub const COMPOSE: &str = "docker/docker-compose";
}

macro_rules! builtin_templates {
    ($($name:literal),* $(,)?) => {
        &[$(($name, include_str!(concat!("../../templates/", $name, ".jinja")))),*]
    };
}

static BUILTIN: &[(&str, &str)] = builtin_templates![
    "scaffold/package.json",
    "scaffold/env",
    "scaffold/readme",
    "scaffold/gitignore",
    "scaffold/database",
    "scaffold/auth-middleware",
    "frontend/package.json",
    "frontend/index.html",
    "frontend/vite.config",
    "frontend/main",
    "database/mongoose-model",
    "database/sequelize-model",
    "database/seed-runner",
    "express-api/server",
    "express-api/module-router",
    "express-api/route",
    "express-api/controller",
    "express-api/workflows",
    "react-frontend/App",
    "react-frontend/page",
    "docker/Dockerfile",
    "docker/docker-compose",
];

/// Failure rendering a named template.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template {name} is not registered")]
    NotFound { name: String },
    #[error("template {name} failed to render: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to load template overrides from {path}: {message}")]
    Load { path: String, message: String },
}

/// Registry of named templates plus the helper library.
pub struct TemplateEngine {
    env: Environment<'static>,
    names: BTreeSet<String>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("names", &self.names)
            .finish()
    }
}

impl TemplateEngine {
    /// Engine with helpers registered and no templates.
    ///
    /// Every render returns [`TemplateError::NotFound`].
    pub fn empty() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);
        helpers::register(&mut env);
        Self {
            env,
            names: BTreeSet::new(),
        }
    }

    /// Engine with every compiled-in template.
    ///
    /// A built-in that fails to parse is skipped with a warning; rendering it
    /// later reports `NotFound` and the caller falls back.
    pub fn builtin() -> Self {
        let mut engine = Self::empty();
        for (name, source) in BUILTIN {
            match engine.env.add_template(name, source) {
                Ok(()) => {
                    engine.names.insert((*name).to_string());
                }
                Err(err) => warn!(template = *name, error = %err, "skipping built-in template"),
            }
        }
        engine
    }

    /// Load `*.jinja` files under `dir` on top of the current set.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Load`] when the directory cannot be walked,
    /// a file cannot be read, or a template does not parse.
    pub fn with_overrides(mut self, dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let load_err = |message: String| TemplateError::Load {
            path: dir.display().to_string(),
            message,
        };
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| load_err(e.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || !matches!(path.extension(), Some(ext) if ext == "jinja") {
                continue;
            }
            let rel = path
                .strip_prefix(dir)
                .map_err(|e| load_err(e.to_string()))?
                .with_extension("");
            let name = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let source = std::fs::read_to_string(path)
                .map_err(|e| load_err(format!("{}: {e}", path.display())))?;
            self.env
                .add_template_owned(name.clone(), source)
                .map_err(|e| load_err(format!("{name}: {e}")))?;
            debug!(template = %name, "loaded template override");
            self.names.insert(name);
        }
        Ok(self)
    }

    /// Render `name` against `ctx`.
    ///
    /// # Errors
    ///
    /// [`TemplateError::NotFound`] for an unknown name, otherwise
    /// [`TemplateError::Render`] with the minijinja error.
    pub fn render<S: Serialize>(&self, name: &str, ctx: &S) -> Result<String, TemplateError> {
        let template = self.env.get_template(name).map_err(|err| {
            if err.kind() == ErrorKind::TemplateNotFound {
                TemplateError::NotFound {
                    name: name.to_string(),
                }
            } else {
                TemplateError::Render {
                    name: name.to_string(),
                    source: err,
                }
            }
        })?;
        template.render(ctx).map_err(|source| TemplateError::Render {
            name: name.to_string(),
            source,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::context::{
        DeployContext, EntityContext, ModuleContext, OperationView, ProjectContext, ProjectView,
        WorkflowContext, WorkflowHandler,
    };
    use super::*;
    use crate::ids::ProjectId;
    use crate::spec::{
        normalize, DatabaseKind, EntitySpec, ModuleCatalog, ModuleSpec, ProjectSpec, Settings,
        WorkflowSpec,
    };

    fn sample(database: DatabaseKind, authentication: bool) -> ProjectView {
        let mut module = ModuleSpec::new("inventory").with_entity(EntitySpec::new("Product"));
        module.workflows.push(WorkflowSpec {
            name: "reorder stock".to_string(),
            description: "Raise a purchase order".to_string(),
            automation: Default::default(),
            trigger: None,
        });
        let project = ProjectSpec::new(ProjectId::new("acme").unwrap(), "Acme Supply")
            .with_module(module)
            .with_settings(Settings {
                database,
                authentication,
                ..Settings::default()
            });
        let project = normalize(project, ModuleCatalog::builtin()).unwrap();
        ProjectView::new(&project)
    }

    #[test]
    fn test_builtin_registers_every_name() {
        let engine = TemplateEngine::builtin();
        assert_eq!(engine.names().count(), BUILTIN.len());
        assert!(engine.contains(names::CONTROLLER));
        assert!(engine.contains(names::COMPOSE));
    }

    #[test]
    fn test_empty_engine_reports_not_found() {
        let engine = TemplateEngine::empty();
        let project = sample(DatabaseKind::Mongodb, false);
        let err = engine
            .render(names::SERVER, &ProjectContext { project: &project })
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotFound { ref name } if name == names::SERVER));
    }

    #[test]
    fn test_project_templates_render() {
        let engine = TemplateEngine::builtin();
        let project = sample(DatabaseKind::Mongodb, true);
        let ctx = ProjectContext { project: &project };

        let package = engine.render(names::PACKAGE_JSON, &ctx).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&package).unwrap();
        assert_eq!(manifest["name"], "acme-supply");
        assert!(manifest["dependencies"]["mongoose"].is_string());
        assert!(manifest["dependencies"]["jsonwebtoken"].is_string());

        let server = engine.render(names::SERVER, &ctx).unwrap();
        assert!(server.contains("app.use('/api/inventory', requireAuth, inventoryRoutes);"));
        assert!(server.contains("/api/health"));

        for name in [
            names::ENV,
            names::README,
            names::GITIGNORE,
            names::DATABASE,
            names::AUTH_MIDDLEWARE,
            names::CLIENT_PACKAGE_JSON,
            names::CLIENT_INDEX_HTML,
            names::VITE_CONFIG,
            names::CLIENT_MAIN,
            names::SEED_RUNNER,
            names::APP,
        ] {
            let out = engine.render(name, &ctx).unwrap();
            assert!(!out.trim().is_empty(), "{name} rendered empty");
        }
        let client: serde_json::Value =
            serde_json::from_str(&engine.render(names::CLIENT_PACKAGE_JSON, &ctx).unwrap())
                .unwrap();
        assert_eq!(client["name"], "acme-supply-client");
    }

    #[test]
    fn test_entity_templates_render() {
        let engine = TemplateEngine::builtin();
        let project = sample(DatabaseKind::Mongodb, false);
        let ops = OperationView::canonical_set();
        let ctx = EntityContext {
            project: &project,
            module: &project.modules[0],
            entity: &project.modules[0].entities[0],
            operations: &ops,
        };
        let model = engine.render(names::MONGOOSE_MODEL, &ctx).unwrap();
        assert!(model.contains("sku: {"));
        assert!(model.contains("type: String"));
        assert!(model.contains("mongoose.model('Product', productSchema)"));

        let route = engine.render(names::ROUTE, &ctx).unwrap();
        assert!(route.contains("router.get('/:id', controller.getById);"));

        let controller = engine.render(names::CONTROLLER, &ctx).unwrap();
        assert!(controller.contains("exports.list = async (req, res) => {"));
        assert!(controller.contains("Product.findByIdAndDelete(req.params.id)"));
    }

    #[test]
    fn test_sequelize_model_renders_enum() {
        let engine = TemplateEngine::builtin();
        let project = sample(DatabaseKind::Postgresql, false);
        let ops = OperationView::canonical_set();
        let ctx = EntityContext {
            project: &project,
            module: &project.modules[0],
            entity: &project.modules[0].entities[0],
            operations: &ops,
        };
        let model = engine.render(names::SEQUELIZE_MODEL, &ctx).unwrap();
        assert!(model.contains("sequelize.define('Product'"));
        assert!(model.contains("DataTypes.ENUM("));
        let controller = engine.render(names::CONTROLLER, &ctx).unwrap();
        assert!(controller.contains("Product.findByPk(req.params.id)"));
    }

    #[test]
    fn test_custom_operation_body_is_indented() {
        let engine = TemplateEngine::builtin();
        let project = sample(DatabaseKind::Mongodb, false);
        let mut ops = OperationView::canonical_set();
        ops.push(OperationView {
            name: "lowStock".to_string(),
            method: "get".to_string(),
            path: "/low-stock".to_string(),
            body: Some("const items = [];\nres.json({ data: items });".to_string()),
            custom: true,
        });
        let ctx = EntityContext {
            project: &project,
            module: &project.modules[0],
            entity: &project.modules[0].entities[0],
            operations: &ops,
        };
        let controller = engine.render(names::CONTROLLER, &ctx).unwrap();
        assert!(controller.contains("exports.lowStock = async (req, res) => {"));
        assert!(controller.contains("    const items = [];\n    res.json({ data: items });"));
        let route = engine.render(names::ROUTE, &ctx).unwrap();
        assert!(route.contains("router.get('/low-stock', controller.lowStock);"));
    }

    #[test]
    fn test_module_and_workflow_templates_render() {
        let engine = TemplateEngine::builtin();
        let project = sample(DatabaseKind::Mongodb, false);
        let module = &project.modules[0];
        let router = engine
            .render(
                names::MODULE_ROUTER,
                &ModuleContext {
                    project: &project,
                    module,
                },
            )
            .unwrap();
        assert!(router.contains("router.use('/products', productRoutes);"));
        assert!(router.contains("router.post('/workflows/reorder-stock', workflows.reorderStock);"));

        let handlers = [WorkflowHandler {
            workflow: module.workflows[0].clone(),
            logic: "res.json({ ok: true });".to_string(),
        }];
        let out = engine
            .render(
                names::WORKFLOWS,
                &WorkflowContext {
                    project: &project,
                    module,
                    workflows: &handlers,
                },
            )
            .unwrap();
        assert!(out.contains("exports.reorderStock = async (req, res) => {"));
        assert!(out.contains("    res.json({ ok: true });"));

        let page = engine
            .render(
                names::PAGE,
                &ModuleContext {
                    project: &project,
                    module,
                },
            )
            .unwrap();
        assert!(page.contains("export default function InventoryPage()"));
    }

    #[test]
    fn test_deploy_templates_render() {
        let engine = TemplateEngine::builtin();
        let project = sample(DatabaseKind::Postgresql, false);
        let ctx = DeployContext {
            project: &project,
            port: 3000,
            base_image: "node:20-alpine",
        };
        let dockerfile = engine.render(names::DOCKERFILE, &ctx).unwrap();
        assert!(dockerfile.contains("FROM node:20-alpine"));
        assert!(dockerfile.contains("EXPOSE 3000"));
        let compose = engine.render(names::COMPOSE, &ctx).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&compose).unwrap();
        assert!(doc["services"]["app"].is_mapping());
        assert!(doc["services"]["db"]["image"]
            .as_str()
            .unwrap()
            .starts_with("postgres"));
    }

    #[test]
    fn test_override_replaces_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("scaffold")).unwrap();
        std::fs::write(
            dir.path().join("scaffold/gitignore.jinja"),
            "custom-{{ project.slug }}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("scaffold/notes.txt"), "ignored").unwrap();

        let engine = TemplateEngine::builtin().with_overrides(dir.path()).unwrap();
        let project = sample(DatabaseKind::Mongodb, false);
        let out = engine
            .render(names::GITIGNORE, &ProjectContext { project: &project })
            .unwrap();
        assert_eq!(out, "custom-acme-supply\n");
        assert!(!engine.contains("scaffold/notes"));
    }

    #[test]
    fn test_broken_override_reports_render_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("boom.jinja"), "{{ missing.deep.value }}").unwrap();
        let engine = TemplateEngine::empty().with_overrides(dir.path()).unwrap();
        let project = sample(DatabaseKind::Mongodb, false);
        let err = engine
            .render("boom", &ProjectContext { project: &project })
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }
}
