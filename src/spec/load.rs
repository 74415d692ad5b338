use super::types::ProjectSpec;
use super::SpecError;
use std::path::Path;

/// Load a project specification from a YAML or JSON file.
///
/// The format is chosen by extension; anything that is not `.json` is read
/// as YAML, which is a superset of JSON.
pub fn load_project(path: impl AsRef<Path>) -> Result<ProjectSpec, SpecError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        parse_project_json(&content)
    } else {
        parse_project_yaml(&content)
    }
}

pub fn parse_project_yaml(content: &str) -> Result<ProjectSpec, SpecError> {
    serde_yaml::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))
}

pub fn parse_project_json(content: &str) -> Result<ProjectSpec, SpecError> {
    serde_json::from_str(content).map_err(|e| SpecError::Parse(e.to_string()))
}
