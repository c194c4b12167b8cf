use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Authentication failed")]
    Authentication,

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// The chat-completion capability the engine consumes. Persona generation
/// and criteria judging both go through this trait; the engine never talks
/// to a provider API directly.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse>;

    async fn health_check(&self) -> ModelResult<()>;

    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Choice, FinishReason, Message, Role};

    struct MockProvider;

    #[async_trait]
    impl ChatProvider for MockProvider {
        async fn chat(&self, _request: ChatRequest) -> ModelResult<ChatResponse> {
            Ok(ChatResponse {
                choices: vec![Choice {
                    message: Message::assistant("Mock response"),
                    finish_reason: Some(FinishReason::Stop),
                }],
                usage: None,
            })
        }

        async fn health_check(&self) -> ModelResult<()> {
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    #[test]
    fn test_mock_provider() {
        tokio_test::block_on(async {
            let provider = MockProvider;

            let request = ChatRequest::new("mock-model", vec![Message::user("Hello")]);

            let response = provider.chat(request).await.unwrap();
            assert_eq!(response.choices.len(), 1);
            assert_eq!(response.choices[0].message.role, Role::Assistant);

            provider.health_check().await.unwrap();
            assert_eq!(provider.provider_name(), "mock");
        });
    }

    #[test]
    fn test_error_display() {
        let err = ModelError::Api {
            status: 500,
            message: "internal error".to_string(),
        };
        assert_eq!(err.to_string(), "API error (500): internal error");

        let err = ModelError::ServiceUnavailable {
            message: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }
}
