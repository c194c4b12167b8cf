//! Pluggable assertions and metrics computed over a finished transcript.
//!
//! Evaluators run once per completed run. They never abort a run: an
//! evaluator that returns an error or panics is recorded as a failed
//! assertion entry and the remaining evaluators still execute.

use crate::run::RunOutput;
use crate::scenario::EvaluatorSpec;
use async_trait::async_trait;
use futures::FutureExt;
use model::Message;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("Evaluator failed: {message}")]
    Failed { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EvaluatorResult<T> = Result<T, EvaluatorError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EvaluatorKind {
    Assertion,
    Metric,
}

/// Output of one evaluator for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorResultEntry {
    #[serde(rename = "type")]
    pub evaluator_type: String,
    pub kind: EvaluatorKind,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn evaluator_type(&self) -> &str;

    fn kind(&self) -> EvaluatorKind;

    fn label(&self) -> String {
        self.evaluator_type().to_string()
    }

    /// Always-active ("auto") evaluators run on every completed run without
    /// a scenario declaration.
    fn always_active(&self) -> bool {
        false
    }

    async fn evaluate(
        &self,
        transcript: &[Message],
        output: &RunOutput,
    ) -> EvaluatorResult<EvaluatorResultEntry>;
}

/// Registry of available evaluators. Selection per run = always-active
/// evaluators plus those the scenario declares.
pub struct EvaluatorRegistry {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self {
            evaluators: Vec::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TokenUsageEvaluator));
        registry
    }

    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        self.evaluators.push(evaluator);
    }

    pub fn evaluator_types(&self) -> Vec<&str> {
        self.evaluators
            .iter()
            .map(|evaluator| evaluator.evaluator_type())
            .collect()
    }

    pub async fn run(
        &self,
        specs: &[EvaluatorSpec],
        transcript: &[Message],
        output: &RunOutput,
    ) -> Vec<EvaluatorResultEntry> {
        let mut entries = Vec::new();

        for evaluator in &self.evaluators {
            let declared = specs
                .iter()
                .any(|spec| spec.evaluator_type == evaluator.evaluator_type());
            if !evaluator.always_active() && !declared {
                continue;
            }

            debug!(evaluator = evaluator.evaluator_type(), "Running evaluator");
            let entry = match AssertUnwindSafe(evaluator.evaluate(transcript, output))
                .catch_unwind()
                .await
            {
                Ok(Ok(entry)) => entry,
                Ok(Err(e)) => {
                    warn!(
                        evaluator = evaluator.evaluator_type(),
                        "Evaluator failed: {}", e
                    );
                    failed_entry(evaluator.as_ref(), e.to_string())
                }
                Err(_) => {
                    warn!(evaluator = evaluator.evaluator_type(), "Evaluator panicked");
                    failed_entry(evaluator.as_ref(), "evaluator panicked".to_string())
                }
            };
            entries.push(entry);
        }

        // Declared evaluators that nobody registered still get a visible
        // failed entry instead of silently vanishing.
        for spec in specs {
            let known = self
                .evaluators
                .iter()
                .any(|evaluator| evaluator.evaluator_type() == spec.evaluator_type);
            if !known {
                warn!(evaluator = %spec.evaluator_type, "Unknown evaluator declared on scenario");
                entries.push(EvaluatorResultEntry {
                    evaluator_type: spec.evaluator_type.clone(),
                    kind: EvaluatorKind::Assertion,
                    label: spec.evaluator_type.clone(),
                    success: Some(false),
                    value: None,
                    reason: Some("unknown evaluator".to_string()),
                    metadata: None,
                });
            }
        }

        entries
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn failed_entry(evaluator: &dyn Evaluator, reason: String) -> EvaluatorResultEntry {
    EvaluatorResultEntry {
        evaluator_type: evaluator.evaluator_type().to_string(),
        kind: EvaluatorKind::Assertion,
        label: evaluator.label(),
        success: Some(false),
        value: None,
        reason: Some(reason),
        metadata: None,
    }
}

/// Always-active metric reporting the tokens consumed by connector turns.
pub struct TokenUsageEvaluator;

#[async_trait]
impl Evaluator for TokenUsageEvaluator {
    fn evaluator_type(&self) -> &str {
        "token-usage"
    }

    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Metric
    }

    fn label(&self) -> String {
        "Token usage".to_string()
    }

    fn always_active(&self) -> bool {
        true
    }

    async fn evaluate(
        &self,
        _transcript: &[Message],
        output: &RunOutput,
    ) -> EvaluatorResult<EvaluatorResultEntry> {
        let usage = output.tokens_usage.unwrap_or_default();

        Ok(EvaluatorResultEntry {
            evaluator_type: self.evaluator_type().to_string(),
            kind: self.kind(),
            label: self.label(),
            success: None,
            value: Some(usage.total_tokens as f64),
            reason: None,
            metadata: Some(json!({
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
            })),
        })
    }
}
