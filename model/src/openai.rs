use crate::config::LlmConfig;
use crate::provider::{ChatProvider, ModelError, ModelResult};
use crate::types::{ChatRequest, ChatResponse, Choice, FinishReason, Message, Role, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// OpenAI-compatible chat completion request
#[derive(Debug, Clone, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// OpenAI-compatible message format
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Clone, Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Chat provider speaking the OpenAI-compatible REST surface
/// (`/v1/chat/completions`). Works against vLLM, Ollama, and hosted
/// gateways that expose the same endpoints.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: LlmConfig) -> ModelResult<Self> {
        config
            .validate()
            .map_err(|msg| ModelError::InvalidConfig { message: msg })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ModelError::Unknown {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn with_default_config() -> ModelResult<Self> {
        Self::new(LlmConfig::default())
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn convert_message_role(role: &Role) -> String {
        match role {
            Role::System => "system".to_string(),
            Role::User => "user".to_string(),
            Role::Assistant => "assistant".to_string(),
            Role::Tool => "tool".to_string(),
        }
    }

    fn convert_message(msg: &Message) -> ApiMessage {
        ApiMessage {
            role: Self::convert_message_role(&msg.role),
            content: msg.text(),
        }
    }

    fn convert_finish_reason(reason: Option<String>) -> Option<FinishReason> {
        reason.map(|r| match r.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        })
    }

    fn handle_http_error(err: reqwest::Error) -> ModelError {
        if err.is_timeout() {
            ModelError::ServiceUnavailable {
                message: "Request timeout".to_string(),
            }
        } else if err.is_connect() {
            ModelError::ServiceUnavailable {
                message: "Cannot connect to LLM service".to_string(),
            }
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                401 | 403 => ModelError::Authentication,
                429 => ModelError::RateLimit,
                503 => ModelError::ServiceUnavailable {
                    message: "LLM service unavailable".to_string(),
                },
                _ => ModelError::Network(err),
            }
        } else {
            ModelError::Network(err)
        }
    }

    fn status_error(status: reqwest::StatusCode, body: String) -> ModelError {
        match status.as_u16() {
            401 | 403 => ModelError::Authentication,
            429 => ModelError::RateLimit,
            code if code >= 500 => ModelError::ServiceUnavailable {
                message: format!("LLM API error ({}): {}", status, body),
            },
            code => ModelError::Api {
                status: code,
                message: body,
            },
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        debug!("Starting chat request with model: {}", request.model);

        let api_messages: Vec<ApiMessage> =
            request.messages.iter().map(Self::convert_message).collect();

        let api_request = ApiChatRequest {
            model: request.model.clone(),
            messages: api_messages,
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let response = self
            .apply_auth(self.client.post(&url))
            .json(&api_request)
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Self::status_error(status, error_text));
        }

        let api_response: ApiChatResponse =
            response.json().await.map_err(Self::handle_http_error)?;

        let choices: Vec<Choice> = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                message: Message::assistant(choice.message.content),
                finish_reason: Self::convert_finish_reason(choice.finish_reason),
            })
            .collect();

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        info!("Chat request completed successfully");

        Ok(ChatResponse { choices, usage })
    }

    async fn health_check(&self) -> ModelResult<()> {
        debug!("Performing health check");

        let url = format!("{}/v1/models", self.config.base_url);

        let response = self
            .apply_auth(self.client.get(&url))
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        if response.status().is_success() {
            info!("Health check passed");
            Ok(())
        } else {
            error!("Health check failed with status: {}", response.status());
            Err(ModelError::ServiceUnavailable {
                message: format!("Health check failed: {}", response.status()),
            })
        }
    }

    fn provider_name(&self) -> &'static str {
        "openai-compat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, MessageContent};

    #[test]
    fn test_provider_rejects_invalid_config() {
        let config = LlmConfig::default().with_base_url("not-a-url");
        let result = OpenAiCompatProvider::new(config);
        assert!(matches!(result, Err(ModelError::InvalidConfig { .. })));
    }

    #[test]
    fn test_message_conversion_flattens_blocks() {
        let msg = Message {
            role: Role::Assistant,
            content: MessageContent::Blocks(vec![
                ContentBlock::text("part one"),
                ContentBlock {
                    block_type: "image".to_string(),
                    text: None,
                    extra: serde_json::Map::new(),
                },
            ]),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            id: None,
        };

        let converted = OpenAiCompatProvider::convert_message(&msg);
        assert_eq!(converted.role, "assistant");
        assert_eq!(converted.content, "part one\n[image]");
    }

    #[test]
    fn test_finish_reason_conversion() {
        assert_eq!(
            OpenAiCompatProvider::convert_finish_reason(Some("stop".to_string())),
            Some(FinishReason::Stop)
        );
        assert_eq!(
            OpenAiCompatProvider::convert_finish_reason(Some("length".to_string())),
            Some(FinishReason::Length)
        );
        assert_eq!(
            OpenAiCompatProvider::convert_finish_reason(Some("unexpected".to_string())),
            Some(FinishReason::Stop)
        );
        assert_eq!(OpenAiCompatProvider::convert_finish_reason(None), None);
    }

    #[test]
    fn test_status_error_mapping() {
        let err =
            OpenAiCompatProvider::status_error(reqwest::StatusCode::UNAUTHORIZED, String::new());
        assert!(matches!(err, ModelError::Authentication));

        let err = OpenAiCompatProvider::status_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            String::new(),
        );
        assert!(matches!(err, ModelError::RateLimit));

        let err = OpenAiCompatProvider::status_error(
            reqwest::StatusCode::BAD_REQUEST,
            "bad input".to_string(),
        );
        assert!(matches!(err, ModelError::Api { status: 400, .. }));

        let err = OpenAiCompatProvider::status_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            String::new(),
        );
        assert!(matches!(err, ModelError::ServiceUnavailable { .. }));
    }
}
