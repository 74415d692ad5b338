//! Render contexts shared by templates and fallback generators.
//!
//! Views are derived once per run from the normalized [`ProjectSpec`] and
//! carry the precomputed names (camel/pascal/kebab/plural) templates need.

use super::helpers::{camel_case, kebab_case, pascal_case, pluralize};
use crate::spec::{
    AutomationLevel, Cardinality, EntitySpec, FieldKind, FieldSpec, ModuleSpec, ProjectSpec,
    Settings, WorkflowSpec,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct FieldView {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: &'static str,
    pub required: bool,
    pub unique: bool,
    pub target: Option<String>,
    pub values: Vec<String>,
    pub default: Option<Value>,
}

impl From<&FieldSpec> for FieldView {
    fn from(field: &FieldSpec) -> Self {
        let (target, values) = match &field.kind {
            FieldKind::Reference { target } => (Some(target.clone()), Vec::new()),
            FieldKind::Enum { values } => (None, values.clone()),
            _ => (None, Vec::new()),
        };
        Self {
            name: field.name.clone(),
            type_name: field.kind.type_name(),
            required: field.required,
            unique: field.unique,
            target,
            values,
            default: field.default.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub name: String,
    pub camel: String,
    pub pascal: String,
    /// Mount path segment, e.g. `stock-movements`.
    pub plural_path: String,
    pub fields: Vec<FieldView>,
    /// Index specs, each a JSON object of field → direction.
    pub indexes: Vec<Value>,
}

impl EntityView {
    pub fn new(entity: &EntitySpec) -> Self {
        Self {
            name: entity.name.clone(),
            camel: camel_case(&entity.name),
            pascal: pascal_case(&entity.name),
            plural_path: kebab_case(&pluralize(&entity.name)),
            fields: entity.fields.iter().map(FieldView::from).collect(),
            indexes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowView {
    pub name: String,
    pub camel: String,
    pub kebab: String,
    pub description: String,
    pub automation: AutomationLevel,
    pub trigger: Option<String>,
}

impl From<&WorkflowSpec> for WorkflowView {
    fn from(workflow: &WorkflowSpec) -> Self {
        Self {
            name: workflow.name.clone(),
            camel: camel_case(&workflow.name),
            kebab: kebab_case(&workflow.name),
            description: workflow.description.clone(),
            automation: workflow.automation,
            trigger: workflow.trigger.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipView {
    pub from: String,
    pub to: String,
    pub cardinality: Cardinality,
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleView {
    pub id: String,
    pub name: String,
    pub camel: String,
    pub pascal: String,
    pub kebab: String,
    pub entities: Vec<EntityView>,
    pub relationships: Vec<RelationshipView>,
    pub workflows: Vec<WorkflowView>,
}

impl ModuleView {
    pub fn new(module: &ModuleSpec) -> Self {
        Self {
            id: module.id.clone(),
            name: module.display_name().to_string(),
            camel: camel_case(&module.id),
            pascal: pascal_case(&module.id),
            kebab: kebab_case(&module.id),
            entities: module.entities.iter().map(EntityView::new).collect(),
            relationships: module
                .relationships
                .iter()
                .map(|r| RelationshipView {
                    from: r.from.clone(),
                    to: r.to.clone(),
                    cardinality: r.cardinality,
                    foreign_key: r.foreign_key.clone(),
                })
                .collect(),
            workflows: module.workflows.iter().map(WorkflowView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub industry: &'static str,
    pub settings: Settings,
    pub modules: Vec<ModuleView>,
}

impl ProjectView {
    pub fn new(project: &ProjectSpec) -> Self {
        let slug = kebab_case(&project.name)
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        Self {
            id: project.id.to_string(),
            name: project.name.clone(),
            slug: if slug.is_empty() { project.id.slug() } else { slug },
            description: project.description.clone(),
            industry: project.industry.as_str(),
            settings: project.settings.clone(),
            modules: project.modules.iter().map(ModuleView::new).collect(),
        }
    }

    pub fn uses_postgres(&self) -> bool {
        matches!(self.settings.database, crate::spec::DatabaseKind::Postgresql)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&ModuleView, &EntityView)> {
        self.modules
            .iter()
            .flat_map(|m| m.entities.iter().map(move |e| (m, e)))
    }
}

/// One HTTP operation on an entity resource.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OperationView {
    /// Handler export name.
    pub name: String,
    /// Lowercase HTTP method, as used by `router.<method>`.
    pub method: String,
    pub path: String,
    /// Handler body for advisor-supplied operations.
    pub body: Option<String>,
    pub custom: bool,
}

impl OperationView {
    fn canonical(name: &str, method: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            body: None,
            custom: false,
        }
    }

    /// list, get, create, update, remove.
    pub fn canonical_set() -> Vec<Self> {
        vec![
            Self::canonical("list", "get", "/"),
            Self::canonical("getById", "get", "/:id"),
            Self::canonical("create", "post", "/"),
            Self::canonical("update", "put", "/:id"),
            Self::canonical("remove", "delete", "/:id"),
        ]
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectContext<'a> {
    pub project: &'a ProjectView,
}

#[derive(Debug, Serialize)]
pub struct EntityContext<'a> {
    pub project: &'a ProjectView,
    pub module: &'a ModuleView,
    pub entity: &'a EntityView,
    pub operations: &'a [OperationView],
}

#[derive(Debug, Serialize)]
pub struct ModuleContext<'a> {
    pub project: &'a ProjectView,
    pub module: &'a ModuleView,
}

/// A workflow with its resolved handler logic.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowHandler {
    #[serde(flatten)]
    pub workflow: WorkflowView,
    pub logic: String,
}

#[derive(Debug, Serialize)]
pub struct WorkflowContext<'a> {
    pub project: &'a ProjectView,
    pub module: &'a ModuleView,
    pub workflows: &'a [WorkflowHandler],
}

#[derive(Debug, Serialize)]
pub struct DeployContext<'a> {
    pub project: &'a ProjectView,
    pub port: u16,
    pub base_image: &'a str,
}
