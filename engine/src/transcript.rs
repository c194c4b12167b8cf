use model::{Message, Role};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("Tool message references unknown tool call id: {id}")]
    UnknownToolCallId { id: String },

    #[error("Tool message is missing a tool_call_id")]
    MissingToolCallId,
}

/// Conversation transcript with validated appends.
///
/// Invariant: every `tool` message must reference a `tool_calls[].id`
/// emitted by a prior `assistant` message. Violations are rejected at
/// append time rather than discovered downstream.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    known_call_ids: HashSet<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a transcript, validating the seed turns with the same rules as
    /// live appends.
    pub fn from_seed(seed: Vec<Message>) -> Result<Self, TranscriptError> {
        let mut transcript = Self::new();
        for msg in seed {
            transcript.push(msg)?;
        }
        Ok(transcript)
    }

    pub fn push(&mut self, message: Message) -> Result<(), TranscriptError> {
        if message.role == Role::Tool {
            let id = message
                .tool_call_id
                .as_deref()
                .ok_or(TranscriptError::MissingToolCallId)?;
            if !self.known_call_ids.contains(id) {
                return Err(TranscriptError::UnknownToolCallId { id: id.to_string() });
            }
        }

        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                self.known_call_ids.insert(call.id.clone());
            }
        }

        self.messages.push(message);
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn last_role(&self) -> Option<Role> {
        self.messages.last().map(|msg| msg.role)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::{FunctionCall, ToolCall};

    fn tool_call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            function: FunctionCall {
                name: "lookup".to_string(),
                arguments: serde_json::json!({}),
            },
        }
    }

    #[test]
    fn test_push_tracks_roles() {
        let mut transcript = Transcript::new();
        transcript.push(Message::user("hi")).unwrap();
        assert_eq!(transcript.last_role(), Some(Role::User));

        transcript.push(Message::assistant("hello")).unwrap();
        assert_eq!(transcript.last_role(), Some(Role::Assistant));
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_tool_response_requires_known_call_id() {
        let mut transcript = Transcript::new();
        transcript
            .push(Message::assistant_with_tools("", vec![tool_call("call_1")]))
            .unwrap();

        assert!(transcript
            .push(Message::tool_response("call_1", "done"))
            .is_ok());

        let err = transcript
            .push(Message::tool_response("call_999", "done"))
            .unwrap_err();
        assert_eq!(
            err,
            TranscriptError::UnknownToolCallId {
                id: "call_999".to_string()
            }
        );
    }

    #[test]
    fn test_tool_response_without_id_rejected() {
        let mut transcript = Transcript::new();
        let mut msg = Message::tool_response("x", "done");
        msg.tool_call_id = None;

        assert_eq!(
            transcript.push(msg).unwrap_err(),
            TranscriptError::MissingToolCallId
        );
    }

    #[test]
    fn test_seed_validation() {
        let seed = vec![
            Message::user("start"),
            Message::assistant_with_tools("", vec![tool_call("call_a")]),
            Message::tool_response("call_a", "ok"),
        ];
        let transcript = Transcript::from_seed(seed).unwrap();
        assert_eq!(transcript.len(), 3);

        let bad_seed = vec![Message::tool_response("never-issued", "ok")];
        assert!(Transcript::from_seed(bad_seed).is_err());
    }
}
