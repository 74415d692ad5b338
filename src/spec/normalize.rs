use super::catalog::ModuleCatalog;
use super::types::{FieldKind, ModuleSpec, ProjectSpec};
use super::SpecError;
use crate::templates::helpers::camel_case;
use std::collections::{HashMap, HashSet};

/// Resolve a project against the module catalog.
///
/// Entities matching a catalog entity get every catalog field they do not
/// already declare, appended in catalog order. Modules without entities get
/// the catalog's default entity set. Caller-supplied fields are never
/// removed or changed; modules and entities absent from the catalog pass
/// through untouched.
pub fn normalize(mut project: ProjectSpec, catalog: &ModuleCatalog) -> Result<ProjectSpec, SpecError> {
    for module in &mut project.modules {
        fill_from_catalog(module, catalog);
    }
    validate(&project)?;
    Ok(project)
}

fn fill_from_catalog(module: &mut ModuleSpec, catalog: &ModuleCatalog) {
    let Some(def) = catalog.module(&module.id) else {
        return;
    };
    if module.name.trim().is_empty() {
        module.name = def.name.clone();
    }
    if module.entities.is_empty() {
        module.entities = def.entities.clone();
        return;
    }
    for entity in &mut module.entities {
        let Some(def_entity) = def.entity(&entity.name) else {
            continue;
        };
        let present: HashSet<String> = entity.fields.iter().map(|f| f.name.clone()).collect();
        entity.fields.extend(
            def_entity
                .fields
                .iter()
                .filter(|f| !present.contains(&f.name))
                .cloned(),
        );
    }
}

fn validate(project: &ProjectSpec) -> Result<(), SpecError> {
    if project.name.trim().is_empty() {
        return Err(SpecError::EmptyName("project"));
    }
    // Model files share one directory, so entity names are unique project-wide.
    let mut entity_names = HashSet::new();
    // Generated JS name -> declared name, for names that differ only in case
    // or separators.
    let mut module_files: HashMap<String, &str> = HashMap::new();
    let mut entity_files: HashMap<String, &str> = HashMap::new();
    for module in &project.modules {
        if module.id.trim().is_empty() {
            return Err(SpecError::EmptyName("module"));
        }
        if !is_module_id(&module.id) {
            return Err(SpecError::InvalidIdentifier {
                what: "module",
                name: module.id.clone(),
            });
        }
        if let Some(first) = module_files.insert(camel_case(&module.id), &module.id) {
            if first == module.id {
                return Err(SpecError::DuplicateModule(module.id.clone()));
            }
            return Err(SpecError::NameCollision {
                what: "module",
                first: first.to_string(),
                second: module.id.clone(),
                generated: format!("routes/{}.js", camel_case(&module.id)),
            });
        }
        for entity in &module.entities {
            if !is_identifier(&entity.name) {
                return Err(SpecError::InvalidIdentifier {
                    what: "entity",
                    name: entity.name.clone(),
                });
            }
            if !entity_names.insert(entity.name.as_str()) {
                return Err(SpecError::DuplicateEntity {
                    module: module.id.clone(),
                    entity: entity.name.clone(),
                });
            }
            if let Some(first) = entity_files.insert(camel_case(&entity.name), &entity.name) {
                return Err(SpecError::NameCollision {
                    what: "entity",
                    first: first.to_string(),
                    second: entity.name.clone(),
                    generated: format!("routes/{}Routes.js", camel_case(&entity.name)),
                });
            }
            let mut field_names = HashSet::new();
            for field in &entity.fields {
                if !is_identifier(&field.name) {
                    return Err(SpecError::InvalidIdentifier {
                        what: "field",
                        name: field.name.clone(),
                    });
                }
                if !field_names.insert(field.name.as_str()) {
                    return Err(SpecError::DuplicateField {
                        entity: entity.name.clone(),
                        field: field.name.clone(),
                    });
                }
                match &field.kind {
                    FieldKind::Enum { values } if values.is_empty() => {
                        return Err(SpecError::EmptyEnum {
                            entity: entity.name.clone(),
                            field: field.name.clone(),
                        });
                    }
                    FieldKind::Reference { target } if target.trim().is_empty() => {
                        return Err(SpecError::MissingReferenceTarget {
                            entity: entity.name.clone(),
                            field: field.name.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
        for workflow in &module.workflows {
            if workflow.name.trim().is_empty() {
                return Err(SpecError::EmptyName("workflow"));
            }
        }
    }
    // Module routers and entity routers live side by side in routes/.
    for (entity_camel, entity) in &entity_files {
        let router = format!("{entity_camel}Routes");
        if let Some(module) = module_files.get(&router) {
            return Err(SpecError::NameCollision {
                what: "module and entity",
                first: module.to_string(),
                second: entity.to_string(),
                generated: format!("routes/{router}.js"),
            });
        }
    }
    Ok(())
}

/// Module ids are slugs: they become route prefixes and JS identifiers.
pub fn is_module_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Names end up as JS identifiers and file names.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
