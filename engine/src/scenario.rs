use model::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// When the failure criteria is evaluated during a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCriteriaMode {
    /// Checked after every turn alongside the success criteria.
    #[default]
    EveryTurn,
    /// Checked only once, when the message cap is reached.
    OnMaxMessages,
}

/// Declaration of an opt-in evaluator on a scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorSpec {
    #[serde(rename = "type")]
    pub evaluator_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

/// Immutable-per-run test context: goal framing for the persona, seed
/// messages, the turn cap, and the judge criteria.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub max_messages: Option<u32>,
    #[serde(default)]
    pub success_criteria: Option<String>,
    #[serde(default)]
    pub failure_criteria: Option<String>,
    #[serde(default)]
    pub failure_criteria_mode: FailureCriteriaMode,
    #[serde(default)]
    pub persona_ids: Vec<String>,
    #[serde(default)]
    pub evaluators: Vec<EvaluatorSpec>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instructions: String::new(),
            messages: Vec::new(),
            max_messages: None,
            success_criteria: None,
            failure_criteria: None,
            failure_criteria_mode: FailureCriteriaMode::default(),
            persona_ids: Vec::new(),
            evaluators: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_max_messages(mut self, max_messages: u32) -> Self {
        self.max_messages = Some(max_messages);
        self
    }

    pub fn with_success_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.success_criteria = Some(criteria.into());
        self
    }

    pub fn with_failure_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.failure_criteria = Some(criteria.into());
        self
    }

    pub fn with_failure_criteria_mode(mut self, mode: FailureCriteriaMode) -> Self {
        self.failure_criteria_mode = mode;
        self
    }

    pub fn with_seed_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn has_criteria(&self) -> bool {
        self.success_criteria.is_some() || self.failure_criteria.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_builder() {
        let scenario = Scenario::new("s-1", "booking")
            .with_instructions("Book a table for two")
            .with_max_messages(5)
            .with_success_criteria("agent confirms booking")
            .with_failure_criteria_mode(FailureCriteriaMode::OnMaxMessages);

        assert_eq!(scenario.id, "s-1");
        assert_eq!(scenario.max_messages, Some(5));
        assert!(scenario.has_criteria());
        assert_eq!(
            scenario.failure_criteria_mode,
            FailureCriteriaMode::OnMaxMessages
        );
    }

    #[test]
    fn test_mode_defaults_to_every_turn() {
        let json = r#"{"id": "s-1", "name": "minimal"}"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();

        assert_eq!(scenario.failure_criteria_mode, FailureCriteriaMode::EveryTurn);
        assert!(scenario.messages.is_empty());
        assert!(scenario.evaluators.is_empty());
        assert!(!scenario.has_criteria());
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&FailureCriteriaMode::OnMaxMessages).unwrap();
        assert_eq!(json, r#""on_max_messages""#);

        let mode: FailureCriteriaMode = serde_json::from_str(r#""every_turn""#).unwrap();
        assert_eq!(mode, FailureCriteriaMode::EveryTurn);
    }

    #[test]
    fn test_evaluator_spec_deserialization() {
        let json = r#"{"type": "token-usage", "config": {"budget": 4000}}"#;
        let spec: EvaluatorSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.evaluator_type, "token-usage");
        assert!(spec.config.is_some());
    }
}
