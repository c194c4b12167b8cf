//! LLM-driven user impersonation.
//!
//! The simulator produces the next user-turn message for a conversation:
//! it frames the chat provider as the persona (or a generic realistic
//! user), folds in the scenario's goal, and asks for exactly one message.

use crate::scenario::Scenario;
use model::{ChatProvider, ChatRequest, ChatResponse, Message, ModelResult, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Simulated-user definition: character instructions plus optional request
/// headers forwarded to the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// One generated user turn.
#[derive(Debug, Clone)]
pub struct PersonaReply {
    pub content: String,
    pub raw_response: ChatResponse,
}

pub struct PersonaSimulator {
    provider: Arc<dyn ChatProvider>,
    model: String,
}

impl PersonaSimulator {
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Produce the next user-turn message. Provider errors surface
    /// unchanged; no partial state is emitted on failure.
    pub async fn generate(
        &self,
        history: &[Message],
        persona: Option<&Persona>,
        scenario: &Scenario,
    ) -> ModelResult<PersonaReply> {
        let system = build_persona_prompt(persona, scenario);
        let mut chat = vec![Message::system(system)];

        // The persona model sees the agent's messages as the assistant and
        // everything else (prior persona turns, tool output) as user input.
        for msg in history {
            match msg.role {
                Role::System => continue,
                Role::Assistant => chat.push(Message::assistant(msg.text())),
                _ => chat.push(Message::user(msg.text())),
            }
        }

        chat.push(Message::user(
            "Write the next message you, as the user, would send in this conversation. \
             Reply with the message text only.",
        ));

        debug!(
            persona = persona.map(|p| p.name.as_str()).unwrap_or("<generic>"),
            history = history.len(),
            "Generating persona turn"
        );

        let request = ChatRequest::new(&self.model, chat);
        let response = self.provider.chat(request).await?;
        let content = response.primary_text();

        Ok(PersonaReply {
            content,
            raw_response: response,
        })
    }
}

fn build_persona_prompt(persona: Option<&Persona>, scenario: &Scenario) -> String {
    let mut prompt = match persona {
        Some(persona) => {
            let mut text = format!(
                "You are impersonating a user named {} in a conversation with an AI agent.",
                persona.name
            );
            if let Some(description) = &persona.description {
                text.push_str(&format!("\nCharacter description: {}", description));
            }
            if let Some(system_prompt) = &persona.system_prompt {
                text.push_str(&format!("\n{}", system_prompt));
            }
            text
        }
        None => "You are impersonating a realistic human user in a conversation with an AI \
                 agent. Write the way a real person types: brief, informal, occasionally \
                 imprecise."
            .to_string(),
    };

    if !scenario.instructions.is_empty() {
        prompt.push_str(&format!("\n\nYour goal: {}", scenario.instructions));
    }
    if let Some(criteria) = &scenario.success_criteria {
        prompt.push_str(&format!(
            "\nThe conversation succeeds when: {}",
            criteria
        ));
    }
    prompt.push_str("\n\nStay in character. Never mention that you are simulated.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::{ChatResponse, Choice, FinishReason, ModelError};
    use std::sync::Mutex;

    struct CapturingProvider {
        requests: Mutex<Vec<ChatRequest>>,
        reply: String,
    }

    impl CapturingProvider {
        fn new(reply: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reply: reply.to_string(),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for CapturingProvider {
        async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
            self.requests.lock().unwrap().push(request);
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
            "capturing"
        }
    }

    fn booking_scenario() -> Scenario {
        Scenario::new("s-1", "booking")
            .with_instructions("Book a table for two at an Italian restaurant")
            .with_success_criteria("agent confirms booking")
    }

    fn alice() -> Persona {
        Persona {
            id: "p-1".to_string(),
            name: "Alice".to_string(),
            description: Some("An impatient frequent traveler".to_string()),
            system_prompt: Some("You always ask about cancellation policies.".to_string()),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_persona_prompt_contains_character_and_goal() {
        let prompt = build_persona_prompt(Some(&alice()), &booking_scenario());
        assert!(prompt.contains("Alice"));
        assert!(prompt.contains("impatient frequent traveler"));
        assert!(prompt.contains("cancellation policies"));
        assert!(prompt.contains("Book a table for two"));
        assert!(prompt.contains("agent confirms booking"));
    }

    #[test]
    fn test_generic_prompt_without_persona() {
        let prompt = build_persona_prompt(None, &booking_scenario());
        assert!(prompt.contains("realistic human user"));
        assert!(prompt.contains("Book a table for two"));
    }

    #[tokio::test]
    async fn test_generate_maps_history_roles() {
        let provider = Arc::new(CapturingProvider::new("  Do you have any tables?  "));
        let simulator = PersonaSimulator::new(provider.clone(), "mock-model");

        let history = vec![
            Message::system("internal setup"),
            Message::user("Hi"),
            Message::assistant("Hello! How can I help?"),
            Message::tool_response("call_x", "lookup result"),
        ];

        let reply = simulator
            .generate(&history, None, &booking_scenario())
            .await
            .unwrap();

        assert_eq!(reply.content, "Do you have any tables?");

        let requests = provider.requests.lock().unwrap();
        let messages = &requests[0].messages;
        // system prompt + 3 mapped history turns + final instruction
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].role, Role::User); // tool output maps to user
        assert_eq!(messages[4].role, Role::User);
        assert!(messages[4].text().contains("next message"));
    }
}
