//! The conversation loop.
//!
//! Drives turn-taking between the persona simulator and the agent under
//! test, judging the transcript between turns according to the scenario's
//! criteria configuration. One call to [`ScenarioRunner::run`] executes one
//! run to a terminal state: a judged completion (success or failure, the
//! message cap included) or a system fault.

use crate::connector::{AgentBackend, Connector};
use crate::persona::{Persona, PersonaSimulator};
use crate::run::{RunOutput, RunResult};
use crate::scenario::{FailureCriteriaMode, Scenario};
use crate::transcript::Transcript;
use model::{CriteriaJudge, JudgeVerdict, Message, Role, Usage};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a conversation ended.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// The loop reached a judged terminal state. `success: false` here is a
    /// normal outcome, not a fault.
    Completed(RunResult),
    /// A connector or LLM-capability error aborted the loop. Retryable at
    /// the run level.
    Faulted(String),
}

/// Result of one conversation: the transcript as far as it got, accumulated
/// metrics, and the disposition.
#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub messages: Vec<Message>,
    pub output: RunOutput,
    pub disposition: Disposition,
}

#[derive(Default)]
struct TurnStats {
    latencies: Vec<u64>,
    tokens: Option<Usage>,
    last_verdict: Option<JudgeVerdict>,
    max_messages_reached: bool,
}

pub struct ScenarioRunner {
    backend: Arc<dyn AgentBackend>,
    persona_simulator: PersonaSimulator,
    judge: CriteriaJudge,
}

impl ScenarioRunner {
    /// Ceiling on turns regardless of scenario configuration, so a missing
    /// or zero `max_messages` cannot spin the loop forever.
    pub const HARD_TURN_LIMIT: u32 = 50;

    pub fn new(
        backend: Arc<dyn AgentBackend>,
        persona_simulator: PersonaSimulator,
        judge: CriteriaJudge,
    ) -> Self {
        Self {
            backend,
            persona_simulator,
            judge,
        }
    }

    /// Execute one conversation. `existing` carries the preserved transcript
    /// of a retried run; when empty, the scenario's seed messages are used.
    pub async fn run(
        &self,
        scenario: &Scenario,
        persona: Option<&Persona>,
        connector: &Connector,
        existing: Vec<Message>,
    ) -> ConversationOutcome {
        let seed = if existing.is_empty() {
            scenario.messages.clone()
        } else {
            existing
        };

        let mut transcript = match Transcript::from_seed(seed) {
            Ok(transcript) => transcript,
            Err(e) => {
                return ConversationOutcome {
                    messages: Vec::new(),
                    output: RunOutput::default(),
                    disposition: Disposition::Faulted(e.to_string()),
                }
            }
        };

        let mut stats = TurnStats::default();
        let disposition = match self
            .drive(scenario, persona, connector, &mut transcript, &mut stats)
            .await
        {
            Ok(result) => Disposition::Completed(result),
            Err(fault) => {
                warn!(scenario = %scenario.id, "Conversation aborted: {}", fault);
                Disposition::Faulted(fault)
            }
        };

        let avg_latency_ms = if stats.latencies.is_empty() {
            0.0
        } else {
            stats.latencies.iter().sum::<u64>() as f64 / stats.latencies.len() as f64
        };

        let output = RunOutput {
            message_count: transcript.len(),
            avg_latency_ms,
            max_messages_reached: stats.max_messages_reached,
            tokens_usage: stats.tokens,
            evaluation: stats.last_verdict,
            evaluator_results: Vec::new(),
        };

        ConversationOutcome {
            messages: transcript.into_messages(),
            output,
            disposition,
        }
    }

    /// Turn loop. `Ok` is a judged completion; `Err` is a system fault.
    async fn drive(
        &self,
        scenario: &Scenario,
        persona: Option<&Persona>,
        connector: &Connector,
        transcript: &mut Transcript,
        stats: &mut TurnStats,
    ) -> Result<RunResult, String> {
        let cap = Self::turn_cap(scenario);
        let mut turn = 0u32;

        loop {
            turn += 1;
            debug!(scenario = %scenario.id, turn, "Starting turn");

            // Persona turn, skipped when the transcript already ends in an
            // unanswered user message (e.g. seeded or preserved turns).
            if transcript.last_role() != Some(Role::User) {
                let reply = self
                    .persona_simulator
                    .generate(transcript.messages(), persona, scenario)
                    .await
                    .map_err(|e| e.to_string())?;
                transcript
                    .push(Message::user(reply.content))
                    .map_err(|e| e.to_string())?;
            }

            // Connector turn.
            let response = self
                .backend
                .invoke(connector, persona, transcript.messages())
                .await
                .map_err(|e| e.to_string())?;
            stats.latencies.push(response.latency_ms);
            if let Some(usage) = &response.tokens_usage {
                stats
                    .tokens
                    .get_or_insert_with(Usage::default)
                    .accumulate(usage);
            }
            for msg in response.messages {
                transcript.push(msg).map_err(|e| e.to_string())?;
            }

            let at_cap = turn >= cap;

            // Success is checked every turn whenever configured; failure
            // only per the scenario's mode (every turn, or once at the cap).
            let failure_live = scenario.failure_criteria.is_some()
                && (scenario.failure_criteria_mode == FailureCriteriaMode::EveryTurn || at_cap);
            let success_live = scenario.success_criteria.is_some();

            if success_live || failure_live {
                let verdict = self
                    .judge
                    .judge(
                        transcript.messages(),
                        scenario.success_criteria.as_deref(),
                        if failure_live {
                            scenario.failure_criteria.as_deref()
                        } else {
                            None
                        },
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                stats.last_verdict = Some(verdict.clone());

                // Success takes precedence when both criteria match.
                if verdict.success_met == Some(true) {
                    info!(scenario = %scenario.id, turn, "Success criteria met");
                    return Ok(RunResult {
                        success: true,
                        score: verdict.confidence,
                        reason: verdict.reasoning,
                    });
                }
                if verdict.failure_met == Some(true) {
                    info!(scenario = %scenario.id, turn, "Failure criteria met");
                    return Ok(RunResult {
                        success: false,
                        score: verdict.confidence,
                        reason: verdict.reasoning,
                    });
                }
            }

            if at_cap {
                stats.max_messages_reached = true;
                info!(scenario = %scenario.id, turn, "Message cap reached");
                let reason = if !scenario.has_criteria() {
                    "max messages reached with no criteria configured".to_string()
                } else {
                    stats
                        .last_verdict
                        .as_ref()
                        .and_then(|verdict| verdict.reasoning.clone())
                        .unwrap_or_else(|| {
                            "max messages reached without meeting success criteria".to_string()
                        })
                };
                return Ok(RunResult {
                    success: false,
                    score: stats
                        .last_verdict
                        .as_ref()
                        .and_then(|verdict| verdict.confidence),
                    reason: Some(reason),
                });
            }
        }
    }

    fn turn_cap(scenario: &Scenario) -> u32 {
        scenario
            .max_messages
            .filter(|max| *max > 0)
            .map(|max| max.min(Self::HARD_TURN_LIMIT))
            .unwrap_or(Self::HARD_TURN_LIMIT)
    }
}
