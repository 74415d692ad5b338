//! Compiled-in module catalog.
//!
//! Each catalog module carries default entities and fields. The normalizer
//! uses them to fill in entities the user left empty.

use super::types::{EntitySpec, Industry};
use once_cell::sync::Lazy;
use serde::Deserialize;

const CATALOG_YAML: &str = include_str!("../../catalog/modules.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogModule {
    pub id: String,
    pub name: String,
    pub category: Industry,
    pub description: String,
    pub entities: Vec<EntitySpec>,
}

impl CatalogModule {
    pub fn entity(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogCategory {
    pub id: Industry,
    pub name: String,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleCatalog {
    categories: Vec<CatalogCategory>,
    modules: Vec<CatalogModule>,
}

static BUILTIN: Lazy<ModuleCatalog> = Lazy::new(|| match serde_yaml::from_str(CATALOG_YAML) {
    Ok(catalog) => catalog,
    Err(e) => {
        tracing::error!(error = %e, "built-in module catalog failed to parse");
        ModuleCatalog::default()
    }
});

impl ModuleCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> &'static ModuleCatalog {
        &BUILTIN
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn module(&self, id: &str) -> Option<&CatalogModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn modules(&self) -> &[CatalogModule] {
        &self.modules
    }

    pub fn categories(&self) -> &[CatalogCategory] {
        &self.categories
    }

    pub fn modules_for_industry(&self, industry: Industry) -> Vec<&CatalogModule> {
        self.modules
            .iter()
            .filter(|m| m.category == industry)
            .collect()
    }
}
