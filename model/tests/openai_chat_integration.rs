//! Integration tests against a live OpenAI-compatible endpoint.
//!
//! Run with `cargo test -- --ignored` against a local server (e.g. Ollama
//! with its OpenAI-compatible surface on :11434).

use model::{ChatProvider, ChatRequest, CriteriaJudge, LlmConfig, Message, OpenAiCompatProvider};
use std::sync::Arc;
use std::time::Duration;

const MODEL: &str = "qwen3:0.6b";
const TIMEOUT: Duration = Duration::from_secs(120);

fn make_provider() -> OpenAiCompatProvider {
    OpenAiCompatProvider::new(LlmConfig::default().with_timeout(TIMEOUT))
        .expect("provider creation")
}

#[tokio::test]
#[ignore]
async fn test_health_check() {
    let provider = make_provider();

    let result = tokio::time::timeout(TIMEOUT, provider.health_check()).await;
    let health = result.expect("health_check timed out");
    health.expect("health_check failed");
}

#[tokio::test]
#[ignore]
async fn test_basic_chat() {
    let provider = make_provider();
    let request = ChatRequest::new(MODEL, vec![Message::user("What is 2+2?")]);

    let response = tokio::time::timeout(TIMEOUT, provider.chat(request))
        .await
        .expect("chat timed out")
        .expect("chat failed");

    assert!(!response.choices.is_empty(), "choices must not be empty");
    assert!(
        !response.primary_text().is_empty(),
        "content must not be empty"
    );

    let usage = response.usage.as_ref().expect("usage must exist");
    assert_eq!(
        usage.total_tokens,
        usage.prompt_tokens + usage.completion_tokens,
        "total_tokens must equal prompt_tokens + completion_tokens"
    );
}

#[tokio::test]
#[ignore]
async fn test_judge_returns_structured_verdict() {
    let provider = Arc::new(make_provider());
    let judge = CriteriaJudge::new(provider, MODEL);

    let history = vec![
        Message::user("I need a table for two tonight at 7pm."),
        Message::assistant("Done - your booking is confirmed for 7pm tonight."),
    ];

    let verdict = tokio::time::timeout(
        TIMEOUT,
        judge.judge(&history, Some("the agent confirms a booking"), None),
    )
    .await
    .expect("judge timed out")
    .expect("judge failed");

    assert!(
        verdict.success_met.is_some(),
        "configured success axis must be evaluated"
    );
    assert!(verdict.failure_met.is_none());
}
