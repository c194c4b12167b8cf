pub mod config;
pub mod judge;
pub mod openai;
pub mod provider;
pub mod types;

pub use config::LlmConfig;
pub use judge::{CriteriaJudge, JudgeVerdict};
pub use openai::OpenAiCompatProvider;
pub use provider::{ChatProvider, ModelError, ModelResult};
pub use types::{
    ChatRequest, ChatResponse, Choice, ContentBlock, FinishReason, FunctionCall, Message,
    MessageContent, Role, ToolCall, Usage,
};

pub mod prelude {
    pub use crate::config::*;
    pub use crate::judge::*;
    pub use crate::openai::*;
    pub use crate::provider::*;
    pub use crate::types::*;
}
