//! # Project Specification
//!
//! Types describing the application a user assembled (modules, entities,
//! fields, relationships, workflows and settings), plus loading from YAML or
//! JSON and normalization against the compiled-in module catalog.
//!
//! ```rust
//! use forgekit::spec::{normalize, parse_project_yaml, ModuleCatalog};
//!
//! let raw = parse_project_yaml(r#"
//! id: acme
//! name: Acme
//! modules:
//!   - id: inventory
//!     entities: [{ name: Product }]
//! "#).unwrap();
//! let project = normalize(raw, ModuleCatalog::builtin()).unwrap();
//! assert!(project.modules[0].entities[0].field("sku").is_some());
//! ```

mod catalog;
mod load;
mod normalize;
mod types;

pub use catalog::*;
pub use load::*;
pub use normalize::{is_identifier, normalize};
pub use types::*;

use std::path::PathBuf;

/// Failure loading or validating a project specification.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid project specification: {0}")]
    Parse(String),
    #[error("{0} name must not be empty")]
    EmptyName(&'static str),
    #[error("{what} name {name:?} is not a valid identifier")]
    InvalidIdentifier { what: &'static str, name: String },
    #[error("module {0} is declared twice")]
    DuplicateModule(String),
    #[error("{what} names {first:?} and {second:?} both generate {generated}")]
    NameCollision {
        what: &'static str,
        first: String,
        second: String,
        generated: String,
    },
    #[error("entity {entity} in module {module} is already declared")]
    DuplicateEntity { module: String, entity: String },
    #[error("field {field} is declared twice on {entity}")]
    DuplicateField { entity: String, field: String },
    #[error("enum field {entity}.{field} has no values")]
    EmptyEnum { entity: String, field: String },
    #[error("reference field {entity}.{field} has no target")]
    MissingReferenceTarget { entity: String, field: String },
}
