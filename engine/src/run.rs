use crate::evaluator::EvaluatorResultEntry;
use chrono::{DateTime, Utc};
use model::{JudgeVerdict, Message, Usage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Pending,
    Running,
    Completed,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "queued"),
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Error => write!(f, "error"),
        }
    }
}

/// Metrics and evaluation artifacts accumulated over one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutput {
    pub message_count: usize,
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub max_messages_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<JudgeVerdict>,
    #[serde(default)]
    pub evaluator_results: Vec<EvaluatorResultEntry>,
}

/// Judged outcome of a completed run. A `success: false` result is a normal
/// terminal state, not a fault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One execution of a scenario (+ optional persona) against a connector.
///
/// Created `queued` by the CRUD layer, claimed to `running` by the
/// processor, finalized `completed` (judged) or `error` (system fault)
/// exactly once by the task that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_id: Option<String>,
    pub scenario_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub output: RunOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(
        scenario_id: impl Into<String>,
        persona_id: Option<String>,
        connector_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            eval_id: None,
            scenario_id: scenario_id.into(),
            persona_id,
            connector_id,
            execution_id: None,
            status: RunStatus::Queued,
            messages: Vec::new(),
            output: RunOutput::default(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_eval_id(mut self, eval_id: impl Into<String>) -> Self {
        self.eval_id = Some(eval_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Error)
    }
}
