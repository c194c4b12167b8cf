//! Clients for the agent under test.
//!
//! A connector addresses one backend, either a generic HTTP endpoint that
//! accepts the message history as JSON, or a LangGraph-style server driven
//! through `/runs/wait`. Invocation failures are returned as typed errors
//! for the conversation loop to record; they are never fatal here.

use crate::persona::Persona;
use async_trait::async_trait;
use model::{Message, Usage};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    Transport(String),

    #[error("Invalid connector response: {message}")]
    InvalidResponse { message: String },

    #[error("Invalid connector configuration: {message}")]
    InvalidConfig { message: String },
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Type-specific connector settings, keyed by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectorConfig {
    Http {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Langgraph {
        assistant_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        configurable: Option<Value>,
    },
}

/// Addressable backend under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub config: ConnectorConfig,
}

/// One connector invocation's result.
#[derive(Debug, Clone)]
pub struct ConnectorResponse {
    pub messages: Vec<Message>,
    pub latency_ms: u64,
    pub tokens_usage: Option<Usage>,
    pub raw_response: Value,
}

/// Seam between the conversation loop and the network. The reqwest-backed
/// `ConnectorClient` is the production implementation; tests script this
/// trait instead.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn invoke(
        &self,
        connector: &Connector,
        persona: Option<&Persona>,
        messages: &[Message],
    ) -> ConnectorResult<ConnectorResponse>;

    async fn test(&self, connector: &Connector) -> ConnectorResult<()>;
}

pub struct ConnectorClient {
    client: reqwest::Client,
}

impl ConnectorClient {
    pub fn new(timeout: Duration) -> ConnectorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_default_timeout() -> ConnectorResult<Self> {
        Self::new(Duration::from_secs(120))
    }

    /// Header set for an outgoing request: JSON content type, overridden and
    /// extended by connector headers, then persona headers. Persona wins on
    /// conflicts.
    pub fn build_headers(
        connector: &Connector,
        persona: Option<&Persona>,
    ) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> =
            vec![("Content-Type".to_string(), "application/json".to_string())];

        let mut apply = |headers: &HashMap<String, String>| {
            for (name, value) in headers {
                if let Some(existing) = merged
                    .iter_mut()
                    .find(|(existing_name, _)| existing_name.eq_ignore_ascii_case(name))
                {
                    existing.1 = value.clone();
                } else {
                    merged.push((name.clone(), value.clone()));
                }
            }
        };

        apply(&connector.headers);
        if let Some(persona) = persona {
            apply(&persona.headers);
        }

        merged
    }

    fn apply_headers(
        mut builder: reqwest::RequestBuilder,
        headers: &[(String, String)],
    ) -> reqwest::RequestBuilder {
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        builder
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
    ) -> ConnectorResult<(reqwest::StatusCode, String, u64)> {
        let mut builder = Self::apply_headers(self.client.request(method, url), headers);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
        let latency_ms = start.elapsed().as_millis() as u64;

        Ok((status, text, latency_ms))
    }

    fn invoke_http_request(
        connector: &Connector,
        method: &Option<String>,
        path: &Option<String>,
    ) -> ConnectorResult<(reqwest::Method, String)> {
        let method_str = method.as_deref().unwrap_or("POST");
        let method = reqwest::Method::from_bytes(method_str.to_uppercase().as_bytes())
            .map_err(|_| ConnectorError::InvalidConfig {
                message: format!("Unsupported HTTP method: {}", method_str),
            })?;
        let url = format!("{}{}", connector.base_url, path.as_deref().unwrap_or(""));
        Ok((method, url))
    }
}

#[async_trait]
impl AgentBackend for ConnectorClient {
    async fn invoke(
        &self,
        connector: &Connector,
        persona: Option<&Persona>,
        messages: &[Message],
    ) -> ConnectorResult<ConnectorResponse> {
        let headers = Self::build_headers(connector, persona);

        match &connector.config {
            ConnectorConfig::Http { method, path } => {
                let (method, url) = Self::invoke_http_request(connector, method, path)?;
                debug!(connector = %connector.id, %url, "Invoking HTTP connector");

                let body = serde_json::to_value(messages)
                    .map_err(|e| ConnectorError::Transport(e.to_string()))?;
                let (status, text, latency_ms) =
                    self.send(method, &url, &headers, Some(&body)).await?;

                if !status.is_success() {
                    return Err(ConnectorError::Http {
                        status: status.as_u16(),
                        body: text,
                    });
                }

                let (messages, tokens_usage, raw_response) = extract_http_reply(&text);
                Ok(ConnectorResponse {
                    messages,
                    latency_ms,
                    tokens_usage,
                    raw_response,
                })
            }
            ConnectorConfig::Langgraph {
                assistant_id,
                configurable,
            } => {
                let url = format!("{}/runs/wait", connector.base_url);
                debug!(connector = %connector.id, %url, "Invoking LangGraph connector");

                let body = json!({
                    "assistant_id": assistant_id,
                    "input": { "messages": messages },
                    "config": { "configurable": configurable.clone().unwrap_or(json!({})) },
                });
                let (status, text, latency_ms) = self
                    .send(reqwest::Method::POST, &url, &headers, Some(&body))
                    .await?;

                if !status.is_success() {
                    return Err(ConnectorError::Http {
                        status: status.as_u16(),
                        body: text,
                    });
                }

                let raw: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
                let messages = extract_thread_messages(&raw)?;
                Ok(ConnectorResponse {
                    messages,
                    latency_ms,
                    tokens_usage: None,
                    raw_response: raw,
                })
            }
        }
    }

    async fn test(&self, connector: &Connector) -> ConnectorResult<()> {
        let headers = Self::build_headers(connector, None);
        let url = match &connector.config {
            ConnectorConfig::Http { .. } => connector.base_url.clone(),
            ConnectorConfig::Langgraph { .. } => format!("{}/info", connector.base_url),
        };

        let (status, text, _) = self
            .send(reqwest::Method::GET, &url, &headers, None)
            .await?;

        if status.is_success() {
            Ok(())
        } else {
            Err(ConnectorError::Http {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

/// Interpret an HTTP connector reply. JSON bodies may carry a `response`
/// string or a `messages` array; anything else is treated as one assistant
/// message of raw text.
fn extract_http_reply(text: &str) -> (Vec<Message>, Option<Usage>, Value) {
    let raw: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            return (
                vec![Message::assistant(text)],
                None,
                Value::String(text.to_string()),
            )
        }
    };

    let tokens_usage = raw
        .get("usage")
        .and_then(|usage| serde_json::from_value(usage.clone()).ok());

    if let Some(items) = raw.get("messages").and_then(Value::as_array) {
        let messages = items.iter().map(loose_message).collect();
        return (messages, tokens_usage, raw);
    }

    if let Some(response) = raw.get("response").and_then(Value::as_str) {
        return (vec![Message::assistant(response)], tokens_usage, raw);
    }

    (vec![Message::assistant(text)], tokens_usage, raw)
}

/// Pull assistant messages out of a LangGraph thread state: top-level
/// `messages`, or nested under `values`.
fn extract_thread_messages(raw: &Value) -> ConnectorResult<Vec<Message>> {
    let items = raw
        .get("messages")
        .and_then(Value::as_array)
        .or_else(|| {
            raw.get("values")
                .and_then(|values| values.get("messages"))
                .and_then(Value::as_array)
        })
        .ok_or_else(|| ConnectorError::InvalidResponse {
            message: "thread state contains no messages".to_string(),
        })?;

    Ok(items.iter().map(loose_message).collect())
}

/// Parse a single message leniently: well-formed messages deserialize
/// directly, anything else becomes an assistant message from its `content`
/// (or its JSON text as a last resort).
fn loose_message(value: &Value) -> Message {
    if let Ok(message) = serde_json::from_value::<Message>(value.clone()) {
        return message;
    }

    warn!("Connector returned a non-standard message; coercing to assistant text");
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    Message::assistant(content)
}
