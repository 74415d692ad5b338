//! # Enrichment Advisor
//!
//! An optional suggestion service consulted during generation. The advisor
//! can propose extra entity fields and indexes, custom endpoints, and
//! workflow handler logic.
//!
//! Generation must not depend on it: [`AdvisorClient`] wraps any
//! [`Advisor`] with a timeout and resolves every failure (null answer,
//! timeout, transport error, malformed shape) to a deterministic default.
//! Each answer comes back as a [`Consulted`] value so the pipeline can record
//! what happened.

mod http;

pub use http::HttpAdvisor;

use crate::config::AdvisorConfig;
use crate::spec::{is_identifier, AutomationLevel, EntitySpec, FieldKind, FieldSpec, ModuleSpec, WorkflowSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What the advisor is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Entity,
    Endpoints,
    Workflow,
}

impl SuggestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionKind::Entity => "entity",
            SuggestionKind::Endpoints => "endpoints",
            SuggestionKind::Workflow => "workflow",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error("advisor request failed: {0}")]
    Transport(String),
    #[error("advisor returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("advisor timed out")]
    Timeout,
    #[error("advisor answer is malformed: {0}")]
    Malformed(String),
    #[error("advisor is misconfigured: {0}")]
    Config(String),
}

/// A suggestion source.
///
/// `Ok(None)` means "no suggestion"; the caller uses its default.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn suggest(
        &self,
        kind: SuggestionKind,
        payload: &Value,
    ) -> Result<Option<Value>, AdvisorError>;
}

/// Advisor that never suggests anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdvisor;

#[async_trait]
impl Advisor for NoopAdvisor {
    async fn suggest(&self, _kind: SuggestionKind, _payload: &Value) -> Result<Option<Value>, AdvisorError> {
        Ok(None)
    }
}

/// Where a consulted value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionOrigin {
    Default,
    Advisor,
}

/// Result of consulting the advisor. Never an error.
#[derive(Debug, Clone)]
pub struct Consulted<T> {
    pub value: T,
    pub origin: SuggestionOrigin,
    /// Why the default was used, when the advisor failed.
    pub failure: Option<String>,
}

impl<T> Consulted<T> {
    fn default_value(value: T) -> Self {
        Self {
            value,
            origin: SuggestionOrigin::Default,
            failure: None,
        }
    }

    fn failed(value: T, failure: String) -> Self {
        Self {
            value,
            origin: SuggestionOrigin::Default,
            failure: Some(failure),
        }
    }

    fn advised(value: T) -> Self {
        Self {
            value,
            origin: SuggestionOrigin::Advisor,
            failure: None,
        }
    }

    pub fn from_advisor(&self) -> bool {
        self.origin == SuggestionOrigin::Advisor
    }
}

/// Extra fields and indexes proposed for an entity.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EntitySuggestion {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Index specs as `{field: direction}` objects.
    #[serde(default)]
    pub indexes: Vec<Value>,
}

impl EntitySuggestion {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.indexes.is_empty()
    }
}

/// An endpoint beyond the canonical CRUD set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomEndpoint {
    pub name: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<String>,
}

const METHODS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// Strip a surrounding Markdown code fence (```js ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Handler logic used when no advisor logic is available.
pub fn default_workflow_logic(workflow: &WorkflowSpec) -> String {
    let automation = match workflow.automation {
        AutomationLevel::Manual => "manual",
        AutomationLevel::SemiAuto => "semi-auto",
        AutomationLevel::FullAuto => "full-auto",
    };
    let name = serde_json::to_string(&workflow.name).unwrap_or_else(|_| "\"workflow\"".to_string());
    format!(
        "const payload = req.body || {{}};\n\
         res.json({{\n  workflow: {name},\n  automation: '{automation}',\n  status: 'accepted',\n  receivedAt: new Date().toISOString(),\n  payload,\n}});"
    )
}

/// String suggestions may carry JSON text; decode it into a value.
fn decode(value: Value) -> Value {
    match value {
        Value::String(text) => serde_json::from_str(strip_code_fences(&text)).unwrap_or(Value::String(text)),
        other => other,
    }
}

fn parse_entity(value: Value) -> Result<EntitySuggestion, String> {
    let mut suggestion: EntitySuggestion = serde_json::from_value(decode(value)).map_err(|e| e.to_string())?;
    suggestion.fields.retain(|field| {
        is_identifier(&field.name)
            && match &field.kind {
                FieldKind::Enum { values } => !values.is_empty(),
                FieldKind::Reference { target } => !target.trim().is_empty(),
                _ => true,
            }
    });
    suggestion.indexes.retain(Value::is_object);
    Ok(suggestion)
}

fn parse_endpoints(value: Value) -> Result<Vec<CustomEndpoint>, String> {
    let value = match decode(value) {
        Value::Object(mut map) if map.contains_key("endpoints") => map.remove("endpoints").unwrap_or(Value::Null),
        other => other,
    };
    let endpoints: Vec<CustomEndpoint> = serde_json::from_value(value).map_err(|e| e.to_string())?;
    Ok(endpoints
        .into_iter()
        .filter_map(|mut endpoint| {
            endpoint.method = endpoint.method.to_ascii_lowercase();
            let valid = is_identifier(&endpoint.name)
                && METHODS.contains(&endpoint.method.as_str())
                && endpoint.path.starts_with('/')
                && !endpoint.path.contains('\'');
            valid.then_some(endpoint)
        })
        .collect())
}

fn parse_logic(value: Value) -> Result<String, String> {
    let text = match value {
        Value::String(text) => text,
        Value::Object(mut map) => match map.remove("logic") {
            Some(Value::String(text)) => text,
            _ => return Err("expected a string or {logic}".to_string()),
        },
        _ => return Err("expected a string or {logic}".to_string()),
    };
    let logic = strip_code_fences(&text);
    if logic.is_empty() {
        return Err("empty logic".to_string());
    }
    Ok(logic.to_string())
}

/// Timeout-bounded, never-failing front for an optional [`Advisor`].
pub struct AdvisorClient {
    inner: Option<Arc<dyn Advisor>>,
    timeout: Duration,
    calls: AtomicU32,
}

impl std::fmt::Debug for AdvisorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvisorClient")
            .field("enabled", &self.inner.is_some())
            .field("timeout", &self.timeout)
            .field("calls", &self.calls())
            .finish()
    }
}

impl AdvisorClient {
    pub fn new(advisor: Arc<dyn Advisor>, timeout: Duration) -> Self {
        Self {
            inner: Some(advisor),
            timeout,
            calls: AtomicU32::new(0),
        }
    }

    /// Client that answers every question with the default.
    pub fn disabled() -> Self {
        Self {
            inner: None,
            timeout: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    /// HTTP advisor when a URL is configured, otherwise disabled.
    pub fn from_config(config: &AdvisorConfig) -> Result<Self, AdvisorError> {
        match &config.url {
            Some(url) => {
                let advisor = HttpAdvisor::new(url.clone(), config.timeout())?;
                Ok(Self::new(Arc::new(advisor), config.timeout()))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Number of advisor calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn consult<T>(
        &self,
        kind: SuggestionKind,
        payload: Value,
        default: T,
        parse: impl FnOnce(Value) -> Result<T, String>,
    ) -> Consulted<T> {
        let Some(advisor) = &self.inner else {
            return Consulted::default_value(default);
        };
        self.calls.fetch_add(1, Ordering::Relaxed);
        let answer = match tokio::time::timeout(self.timeout, advisor.suggest(kind, &payload)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(err)) => return Consulted::failed(default, err.to_string()),
            Err(_) => return Consulted::failed(default, AdvisorError::Timeout.to_string()),
        };
        match answer {
            None | Some(Value::Null) => Consulted::default_value(default),
            Some(value) => match parse(value) {
                Ok(parsed) => Consulted::advised(parsed),
                Err(reason) => {
                    debug!(kind = kind.as_str(), %reason, "discarding malformed suggestion");
                    Consulted::failed(default, AdvisorError::Malformed(reason).to_string())
                }
            },
        }
    }

    pub async fn entity_fields(&self, module: &ModuleSpec, entity: &EntitySpec) -> Consulted<EntitySuggestion> {
        let payload = json!({
            "module": { "id": module.id, "name": module.display_name() },
            "entity": entity,
        });
        self.consult(SuggestionKind::Entity, payload, EntitySuggestion::default(), parse_entity)
            .await
    }

    pub async fn custom_endpoints(&self, module: &ModuleSpec, entity: &EntitySpec) -> Consulted<Vec<CustomEndpoint>> {
        let payload = json!({
            "module": { "id": module.id, "name": module.display_name() },
            "entity": entity,
        });
        self.consult(SuggestionKind::Endpoints, payload, Vec::new(), parse_endpoints)
            .await
    }

    pub async fn workflow_logic(&self, module: &ModuleSpec, workflow: &WorkflowSpec) -> Consulted<String> {
        let payload = json!({
            "module": { "id": module.id, "name": module.display_name() },
            "workflow": workflow,
            "entities": module.entities.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
        });
        self.consult(
            SuggestionKind::Workflow,
            payload,
            default_workflow_logic(workflow),
            parse_logic,
        )
        .await
    }
}

impl Default for AdvisorClient {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted(Value);

    #[async_trait]
    impl Advisor for Scripted {
        async fn suggest(&self, _kind: SuggestionKind, _payload: &Value) -> Result<Option<Value>, AdvisorError> {
            Ok(Some(self.0.clone()))
        }
    }

    struct Failing;

    #[async_trait]
    impl Advisor for Failing {
        async fn suggest(&self, _kind: SuggestionKind, _payload: &Value) -> Result<Option<Value>, AdvisorError> {
            Err(AdvisorError::Transport("connection refused".to_string()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Advisor for Slow {
        async fn suggest(&self, _kind: SuggestionKind, _payload: &Value) -> Result<Option<Value>, AdvisorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(json!("never")))
        }
    }

    fn client(advisor: impl Advisor + 'static) -> AdvisorClient {
        AdvisorClient::new(Arc::new(advisor), Duration::from_millis(200))
    }

    fn module() -> ModuleSpec {
        ModuleSpec::new("inventory").with_entity(EntitySpec::new("Product"))
    }

    fn workflow() -> WorkflowSpec {
        WorkflowSpec {
            name: "Reorder".to_string(),
            description: String::new(),
            automation: AutomationLevel::SemiAuto,
            trigger: None,
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```js\nres.json({});\n```"), "res.json({});");
        assert_eq!(strip_code_fences("```\n[1]\n```\n"), "[1]");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn test_default_workflow_logic_acknowledges() {
        let logic = default_workflow_logic(&workflow());
        assert!(logic.contains("workflow: \"Reorder\""));
        assert!(logic.contains("automation: 'semi-auto'"));
        assert!(logic.contains("status: 'accepted'"));
    }

    #[tokio::test]
    async fn test_disabled_client_uses_defaults_without_calls() {
        let client = AdvisorClient::disabled();
        let m = module();
        let fields = client.entity_fields(&m, &m.entities[0]).await;
        assert!(fields.value.is_empty());
        assert!(fields.failure.is_none());
        let logic = client.workflow_logic(&m, &workflow()).await;
        assert_eq!(logic.value, default_workflow_logic(&workflow()));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_noop_advisor_counts_calls() {
        let client = client(NoopAdvisor);
        let m = module();
        let endpoints = client.custom_endpoints(&m, &m.entities[0]).await;
        assert!(endpoints.value.is_empty());
        assert_eq!(endpoints.origin, SuggestionOrigin::Default);
        assert!(endpoints.failure.is_none());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_resolves_to_default() {
        let client = client(Failing);
        let m = module();
        let logic = client.workflow_logic(&m, &workflow()).await;
        assert_eq!(logic.value, default_workflow_logic(&workflow()));
        assert!(logic.failure.as_deref().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_resolves_to_default() {
        let client = client(Slow);
        let m = module();
        let fields = client.entity_fields(&m, &m.entities[0]).await;
        assert!(fields.value.is_empty());
        assert_eq!(fields.failure.as_deref(), Some("advisor timed out"));
    }

    #[tokio::test]
    async fn test_entity_suggestion_filters_invalid_fields() {
        let client = client(Scripted(json!({
            "fields": [
                { "name": "barcode", "type": "string" },
                { "name": "bad name", "type": "string" },
                { "name": "grade", "type": "enum", "values": [] }
            ],
            "indexes": [{ "barcode": 1 }, "nope"]
        })));
        let m = module();
        let fields = client.entity_fields(&m, &m.entities[0]).await;
        assert!(fields.from_advisor());
        assert_eq!(fields.value.fields.len(), 1);
        assert_eq!(fields.value.fields[0].name, "barcode");
        assert_eq!(fields.value.indexes, vec![json!({ "barcode": 1 })]);
    }

    #[tokio::test]
    async fn test_endpoints_accept_fenced_json_text() {
        let text = "```json\n[{\"name\":\"lowStock\",\"method\":\"GET\",\"path\":\"/low-stock\",\"body\":\"res.json([]);\"},{\"name\":\"x\",\"method\":\"TRACE\",\"path\":\"/x\"}]\n```";
        let client = client(Scripted(json!(text)));
        let m = module();
        let endpoints = client.custom_endpoints(&m, &m.entities[0]).await;
        assert!(endpoints.from_advisor());
        assert_eq!(endpoints.value.len(), 1);
        assert_eq!(endpoints.value[0].method, "get");
        assert_eq!(endpoints.value[0].body.as_deref(), Some("res.json([]);"));
    }

    #[tokio::test]
    async fn test_malformed_shape_is_reported() {
        let client = client(Scripted(json!(42)));
        let m = module();
        let endpoints = client.custom_endpoints(&m, &m.entities[0]).await;
        assert!(endpoints.value.is_empty());
        assert!(endpoints.failure.as_deref().unwrap().starts_with("advisor answer is malformed"));
    }
}
