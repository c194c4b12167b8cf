//! LLM-backed criteria judging.
//!
//! The judge looks at a conversation transcript plus the scenario's
//! natural-language success/failure criteria and asks the chat provider
//! whether either criterion is currently met. A criterion that is not
//! configured is never evaluated: its axis stays `None` in the verdict.

use crate::provider::{ChatProvider, ModelError, ModelResult};
use crate::types::{ChatRequest, Message, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Structured verdict returned by one judge call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub success_met: Option<bool>,
    #[serde(default)]
    pub failure_met: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Asks the chat provider for a structured judgment over a transcript.
pub struct CriteriaJudge {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl CriteriaJudge {
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Judge the transcript against the configured criteria. Criteria that
    /// are `None` are omitted from the prompt and never reported as met.
    pub async fn judge(
        &self,
        history: &[Message],
        success_criteria: Option<&str>,
        failure_criteria: Option<&str>,
    ) -> ModelResult<JudgeVerdict> {
        if success_criteria.is_none() && failure_criteria.is_none() {
            return Ok(JudgeVerdict::default());
        }

        let system = build_judge_prompt(success_criteria, failure_criteria);
        let transcript = render_transcript(history);

        debug!(
            messages = history.len(),
            "Judging transcript against criteria"
        );

        let request = ChatRequest::new(
            &self.model,
            vec![Message::system(system), Message::user(transcript)],
        )
        .with_temperature(0.0);

        let response = self.provider.chat(request).await?;
        let reply = response.primary_text();

        let mut verdict = parse_verdict(&reply)?;

        // An axis with no configured criterion must never report as met,
        // whatever the model replied.
        if success_criteria.is_none() {
            verdict.success_met = None;
        }
        if failure_criteria.is_none() {
            verdict.failure_met = None;
        }

        Ok(verdict)
    }
}

fn build_judge_prompt(success_criteria: Option<&str>, failure_criteria: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are evaluating a conversation between a user and an AI agent. \
         Decide whether the criteria below are currently met by the conversation.\n",
    );

    if let Some(criteria) = success_criteria {
        prompt.push_str(&format!("\nSuccess criteria: {}\n", criteria));
    }
    if let Some(criteria) = failure_criteria {
        prompt.push_str(&format!("\nFailure criteria: {}\n", criteria));
    }

    prompt.push_str("\nRespond with ONLY a JSON object of this shape:\n{");
    if success_criteria.is_some() {
        prompt.push_str("\"success_met\": true|false, ");
    }
    if failure_criteria.is_some() {
        prompt.push_str("\"failure_met\": true|false, ");
    }
    prompt.push_str("\"confidence\": 0.0-1.0, \"reasoning\": \"one or two sentences\"}");
    prompt
}

/// Render the transcript for the judge. System messages are omitted; tool
/// calls are summarized by name so the judge sees that the agent acted.
fn render_transcript(history: &[Message]) -> String {
    let mut lines = Vec::with_capacity(history.len());
    for msg in history {
        if msg.role == Role::System {
            continue;
        }
        let mut text = msg.text();
        if let Some(tool_calls) = &msg.tool_calls {
            for call in tool_calls {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!("[tool call: {}]", call.function.name));
            }
        }
        lines.push(format!("{}: {}", msg.role, text));
    }
    lines.join("\n")
}

/// Parse the judge reply, tolerating markdown code fences and prose around
/// the JSON object.
fn parse_verdict(reply: &str) -> ModelResult<JudgeVerdict> {
    let json = extract_json_object(reply).ok_or_else(|| {
        warn!("Judge reply contained no JSON object");
        ModelError::Unknown {
            message: format!("Judge returned unparseable verdict: {}", reply),
        }
    })?;

    serde_json::from_str(json).map_err(ModelError::Serialization)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatResponse, Choice, FinishReason};
    use async_trait::async_trait;

    struct ScriptedJudgeProvider {
        reply: String,
    }

    #[async_trait]
    impl ChatProvider for ScriptedJudgeProvider {
        async fn chat(&self, _request: ChatRequest) -> ModelResult<ChatResponse> {
            Ok(ChatResponse {
                choices: vec![Choice {
                    message: Message::assistant(self.reply.clone()),
                    finish_reason: Some(FinishReason::Stop),
                }],
                usage: None,
            })
        }

        async fn health_check(&self) -> ModelResult<()> {
            Ok(())
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }
    }

    fn make_judge(reply: &str) -> CriteriaJudge {
        CriteriaJudge::new(
            Arc::new(ScriptedJudgeProvider {
                reply: reply.to_string(),
            }),
            "mock-model",
        )
    }

    #[test]
    fn test_parse_plain_json() {
        let verdict = parse_verdict(r#"{"success_met": true, "confidence": 0.9}"#).unwrap();
        assert_eq!(verdict.success_met, Some(true));
        assert_eq!(verdict.confidence, Some(0.9));
        assert_eq!(verdict.failure_met, None);
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = "Here is my verdict:\n```json\n{\"failure_met\": false, \"reasoning\": \"No refusal yet.\"}\n```";
        let verdict = parse_verdict(reply).unwrap();
        assert_eq!(verdict.failure_met, Some(false));
        assert_eq!(verdict.reasoning, Some("No refusal yet.".to_string()));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_verdict("the agent did fine").is_err());
    }

    #[test]
    fn test_prompt_includes_only_configured_criteria() {
        let prompt = build_judge_prompt(Some("agent confirms booking"), None);
        assert!(prompt.contains("agent confirms booking"));
        assert!(prompt.contains("success_met"));
        assert!(!prompt.contains("failure_met"));

        let prompt = build_judge_prompt(None, Some("agent refuses"));
        assert!(!prompt.contains("success_met"));
        assert!(prompt.contains("failure_met"));
    }

    #[test]
    fn test_render_transcript_skips_system_and_marks_tools() {
        use crate::types::{FunctionCall, ToolCall};

        let history = vec![
            Message::system("judge setup"),
            Message::user("Book a table"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall {
                    id: "call_0".to_string(),
                    function: FunctionCall {
                        name: "reserve".to_string(),
                        arguments: serde_json::json!({}),
                    },
                }],
            ),
            Message::assistant("Your booking is confirmed"),
        ];

        let rendered = render_transcript(&history);
        assert!(!rendered.contains("judge setup"));
        assert!(rendered.contains("user: Book a table"));
        assert!(rendered.contains("[tool call: reserve]"));
        assert!(rendered.contains("assistant: Your booking is confirmed"));
    }

    #[tokio::test]
    async fn test_judge_masks_unconfigured_axes() {
        let judge = make_judge(r#"{"success_met": true, "failure_met": true, "confidence": 1.0}"#);

        let verdict = judge
            .judge(&[Message::user("hi")], Some("anything"), None)
            .await
            .unwrap();

        assert_eq!(verdict.success_met, Some(true));
        // failure axis was not configured, so the model's claim is dropped
        assert_eq!(verdict.failure_met, None);
    }

    #[tokio::test]
    async fn test_judge_without_criteria_skips_provider() {
        struct PanickingProvider;

        #[async_trait]
        impl ChatProvider for PanickingProvider {
            async fn chat(&self, _request: ChatRequest) -> ModelResult<ChatResponse> {
                panic!("judge must not call the provider without criteria");
            }

            async fn health_check(&self) -> ModelResult<()> {
                Ok(())
            }

            fn provider_name(&self) -> &'static str {
                "panicking"
            }
        }

        let judge = CriteriaJudge::new(Arc::new(PanickingProvider), "mock-model");
        let verdict = judge.judge(&[Message::user("hi")], None, None).await.unwrap();
        assert_eq!(verdict, JudgeVerdict::default());
    }
}
