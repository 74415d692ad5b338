use super::{strip_code_fences, Advisor, AdvisorError, SuggestionKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

/// Advisor reached over HTTP.
///
/// Each suggestion is a `POST {url}` with body `{"kind": ..., "payload": ...}`.
/// The response is either the suggestion itself or an envelope
/// `{"suggestion": ...}`; `204 No Content` and `null` mean no suggestion.
pub struct HttpAdvisor {
    url: String,
    client: reqwest::Client,
}

impl HttpAdvisor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AdvisorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdvisorError::Config(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn suggest(&self, kind: SuggestionKind, payload: &Value) -> Result<Option<Value>, AdvisorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "kind": kind.as_str(), "payload": payload }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdvisorError::Timeout
                } else {
                    AdvisorError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdvisorError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdvisorError::Malformed(e.to_string()))?;
        let suggestion = match body {
            Value::Object(mut map) if map.contains_key("suggestion") => {
                map.remove("suggestion").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(match suggestion {
            Value::Null => None,
            Value::String(text) => Some(Value::String(strip_code_fences(&text).to_string())),
            other => Some(other),
        })
    }
}
