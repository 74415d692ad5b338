use crate::ids::{BundleId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Generation phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Scaffold,
    Models,
    Api,
    Frontend,
    DeploymentManifest,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Scaffold,
        Phase::Models,
        Phase::Api,
        Phase::Frontend,
        Phase::DeploymentManifest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Scaffold => "scaffold",
            Phase::Models => "models",
            Phase::Api => "api",
            Phase::Frontend => "frontend",
            Phase::DeploymentManifest => "deployment-manifest",
        }
    }

    /// Progress reported when the phase completes.
    pub fn progress(&self) -> u8 {
        match self {
            Phase::Scaffold => 15,
            Phase::Models => 35,
            Phase::Api => 55,
            Phase::Frontend => 80,
            Phase::DeploymentManifest => 95,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Phase::Scaffold => "Generating project scaffold",
            Phase::Models => "Generating data models",
            Phase::Api => "Generating API routes and handlers",
            Phase::Frontend => "Generating frontend",
            Phase::DeploymentManifest => "Generating deployment manifests",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileOrigin {
    Template,
    AiAssisted,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// Relative path inside the application tree.
    pub path: String,
    pub content: String,
    pub language: String,
    pub origin: FileOrigin,
    /// Owning module id, or `core`, `frontend`, `deployment`.
    pub module: String,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: String, module: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            language: language_for(&path).to_string(),
            path,
            content,
            origin: FileOrigin::Template,
            module: module.into(),
        }
    }

    pub fn with_origin(mut self, origin: FileOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Language tag from the file name.
pub fn language_for(path: &str) -> &'static str {
    let name = path.rsplit('/').next().unwrap_or(path);
    if name == "Dockerfile" {
        return "dockerfile";
    }
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("js") => "javascript",
        Some("jsx") => "jsx",
        Some("json") => "json",
        Some("yml" | "yaml") => "yaml",
        Some("md") => "markdown",
        Some("html") => "html",
        _ => "text",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogStatus {
    Complete,
    Fallback,
    AdvisorFallback,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationLogEntry {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub status: LogStatus,
    pub detail: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Generating,
    Complete,
    Error,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Generating => "generating",
            BundleStatus::Complete => "complete",
            BundleStatus::Error => "error",
        }
    }
}

/// Summary of a finished bundle's layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleStructure {
    pub directories: Vec<String>,
    pub entry_point: String,
    /// Parsed `package.json`, or `null` when it does not parse.
    pub package_json: Value,
}

/// One versioned output of the generation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedBundle {
    pub id: BundleId,
    pub project_id: ProjectId,
    pub version: u32,
    pub status: BundleStatus,
    pub files: Vec<GeneratedFile>,
    pub log: Vec<GenerationLogEntry>,
    pub advisor_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<BundleStructure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl GeneratedBundle {
    /// A fresh `generating` bundle.
    pub fn new(project_id: ProjectId, version: u32) -> Self {
        Self {
            id: BundleId::new(),
            project_id,
            version,
            status: BundleStatus::Generating,
            files: Vec::new(),
            log: Vec::new(),
            advisor_calls: 0,
            structure: None,
            digest: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn file(&self, path: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn is_complete(&self) -> bool {
        self.status == BundleStatus::Complete
    }

    /// Phases that logged a `complete` entry, in order.
    pub fn completed_phases(&self) -> Vec<Phase> {
        self.log
            .iter()
            .filter(|entry| entry.status == LogStatus::Complete)
            .map(|entry| entry.phase)
            .collect()
    }

    /// Hex sha256 over every file's path and content.
    pub fn compute_digest(&self) -> String {
        let mut hasher = Sha256::new();
        for file in &self.files {
            hasher.update(file.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(file.content.as_bytes());
            hasher.update([0u8]);
        }
        hasher.finalize().iter().fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }

    pub fn compute_structure(&self) -> BundleStructure {
        let directories: BTreeSet<String> = self
            .files
            .iter()
            .filter_map(|f| f.path.rsplit_once('/').map(|(dir, _)| dir.to_string()))
            .collect();
        let package_json = self
            .file("package.json")
            .and_then(|f| serde_json::from_str(&f.content).ok())
            .unwrap_or(Value::Null);
        BundleStructure {
            directories: directories.into_iter().collect(),
            entry_point: "src/index.js".to_string(),
            package_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> GeneratedBundle {
        let mut b = GeneratedBundle::new(ProjectId::new("acme").unwrap(), 1);
        b.files.push(GeneratedFile::new(
            "package.json",
            r#"{"name":"acme"}"#.to_string(),
            "core",
        ));
        b.files.push(GeneratedFile::new("src/models/Product.js", "x".to_string(), "inventory"));
        b.files.push(GeneratedFile::new("src/routes/inventory.js", "y".to_string(), "inventory"));
        b
    }

    #[test]
    fn test_language_tags() {
        assert_eq!(language_for("src/index.js"), "javascript");
        assert_eq!(language_for("client/src/App.jsx"), "jsx");
        assert_eq!(language_for("Dockerfile"), "dockerfile");
        assert_eq!(language_for("docker-compose.yml"), "yaml");
        assert_eq!(language_for(".env.example"), "text");
        assert_eq!(language_for(".gitignore"), "text");
        assert_eq!(language_for("README.md"), "markdown");
    }

    #[test]
    fn test_structure_summary() {
        let s = bundle().compute_structure();
        assert_eq!(s.directories, vec!["src/models", "src/routes"]);
        assert_eq!(s.entry_point, "src/index.js");
        assert_eq!(s.package_json["name"], "acme");
    }

    #[test]
    fn test_digest_tracks_content() {
        let a = bundle();
        let mut b = bundle();
        assert_eq!(a.compute_digest(), b.compute_digest());
        assert_eq!(a.compute_digest().len(), 64);
        b.files[1].content.push('!');
        assert_ne!(a.compute_digest(), b.compute_digest());
    }

    #[test]
    fn test_phase_names_and_progress() {
        let names: Vec<_> = Phase::ALL.iter().map(Phase::as_str).collect();
        assert_eq!(names, vec!["scaffold", "models", "api", "frontend", "deployment-manifest"]);
        let progress: Vec<_> = Phase::ALL.iter().map(Phase::progress).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            serde_json::to_value(LogStatus::AdvisorFallback).unwrap(),
            "advisor-fallback"
        );
    }
}
