use crate::ids::ProjectId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn is_false(b: &bool) -> bool {
    !*b
}

fn default_true() -> bool {
    true
}

/// Industry the project was assembled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Industry {
    Erp,
    Logistics,
    #[serde(alias = "supply-chain")]
    SupplyChain,
    #[default]
    Custom,
}

impl Industry {
    pub fn as_str(&self) -> &'static str {
        match self {
            Industry::Erp => "erp",
            Industry::Logistics => "logistics",
            Industry::SupplyChain => "supply_chain",
            Industry::Custom => "custom",
        }
    }
}

/// Persistence target of the generated application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    #[serde(alias = "mongo")]
    Mongodb,
    #[serde(alias = "postgres")]
    Postgresql,
}

/// Generation switches chosen by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseKind,
    #[serde(default)]
    pub authentication: bool,
    #[serde(default = "default_true")]
    pub frontend: bool,
    #[serde(default = "default_true")]
    pub docker: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseKind::Mongodb,
            authentication: false,
            frontend: true,
            docker: true,
        }
    }
}

/// Type of a field, closed over the set the generators understand.
///
/// Serialized with a `type` tag next to the other field attributes:
///
/// ```yaml
/// - { name: sku, type: string, unique: true }
/// - { name: warehouse, type: ref, target: Warehouse }
/// - { name: status, type: enum, values: [active, draft] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    #[serde(alias = "String")]
    String,
    #[serde(alias = "Number")]
    Number,
    #[serde(alias = "Boolean")]
    Boolean,
    #[serde(alias = "Date")]
    Date,
    #[serde(rename = "ref", alias = "reference", alias = "Reference", alias = "ObjectId")]
    Reference {
        #[serde(alias = "ref")]
        target: String,
    },
    #[serde(alias = "Array")]
    Array,
    #[serde(alias = "Enum")]
    Enum {
        #[serde(alias = "enumValues")]
        values: Vec<String>,
    },
}

impl FieldKind {
    /// Canonical type name as used by templates.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "String",
            FieldKind::Number => "Number",
            FieldKind::Boolean => "Boolean",
            FieldKind::Date => "Date",
            FieldKind::Reference { .. } => "Reference",
            FieldKind::Array => "Array",
            FieldKind::Enum { .. } => "Enum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(
        default,
        rename = "default",
        alias = "defaultValue",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

impl EntitySpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    /// Entity on the owning side.
    pub from: String,
    pub to: String,
    pub cardinality: Cardinality,
    #[serde(default, alias = "foreignKey", skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AutomationLevel {
    #[default]
    Manual,
    SemiAuto,
    FullAuto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "automationLevel")]
    pub automation: AutomationLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

/// Canvas coordinates from the visual builder. Not used for generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    #[serde(alias = "moduleId")]
    pub id: String,
    #[serde(default, alias = "displayName")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
    #[serde(default)]
    pub workflows: Vec<WorkflowSpec>,
}

impl ModuleSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            position: None,
            entities: Vec::new(),
            relationships: Vec::new(),
            workflows: Vec::new(),
        }
    }

    pub fn with_entity(mut self, entity: EntitySpec) -> Self {
        self.entities.push(entity);
        self
    }

    /// Name shown to users; falls back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Read-only snapshot of a project handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub id: ProjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub industry: Industry,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    #[serde(default)]
    pub settings: Settings,
}

impl ProjectSpec {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            industry: Industry::Custom,
            modules: Vec::new(),
            settings: Settings::default(),
        }
    }

    pub fn with_module(mut self, module: ModuleSpec) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn entity_count(&self) -> usize {
        self.modules.iter().map(|m| m.entities.len()).sum()
    }

    pub fn entities(&self) -> impl Iterator<Item = (&ModuleSpec, &EntitySpec)> {
        self.modules
            .iter()
            .flat_map(|m| m.entities.iter().map(move |e| (m, e)))
    }
}
