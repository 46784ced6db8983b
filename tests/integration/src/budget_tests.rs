//! Token budget enforcement scenarios
//!
//! Runs complete request bodies through [`TokenBudgetEnforcer`] backed by the
//! shared test registry.

use crate::fixtures::*;
use crate::helpers::*;
use gateway_budget::{
    BudgetRequest, Remediation, RemediationStrategy, TokenBudgetEnforcer, TokenEstimator,
};
use gateway_core::RequestPayload;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

fn enforcer() -> TokenBudgetEnforcer {
    TokenBudgetEnforcer::new(Arc::new(test_registry()))
}

fn rewritten(remediation: Remediation) -> Value {
    let body = remediation.into_body().expect("Body should be rewritten");
    serde_json::from_str(&body).expect("Rewritten body is not JSON")
}

const ALL_STRATEGIES: [RemediationStrategy; 3] = [
    RemediationStrategy::Truncate,
    RemediationStrategy::MiddleOut,
    RemediationStrategy::ModelFallback,
];

/// An over-budget request moves to the designated fallback model
#[test]
fn test_fallback_chain_on_overflow() {
    let body = json!({
        "model": "llama-prompt-guard-2-22m,gpt-4",
        "messages": [{"role": "user", "content": "x".repeat(4000)}]
    })
    .to_string();

    let value = rewritten(enforcer().enforce(&BudgetRequest::new(&body, RemediationStrategy::ModelFallback)));
    assert_eq!(value["model"], "gpt-4");
    assert_eq!(value["messages"][0]["content"], "x".repeat(4000));
}

/// Provider-qualified ids resolve directly or through prefix stripping
#[test]
fn test_provider_qualified_models() {
    let body = json!({
        "model": "meta-llama/llama-prompt-guard-2-22m,gpt-4",
        "messages": [{"role": "user", "content": "x".repeat(4000)}]
    })
    .to_string();
    let payload = RequestPayload::parse(&body).unwrap();
    let enforcer = enforcer();

    let with_provider = BudgetRequest::new(&body, RemediationStrategy::ModelFallback).with_provider("groq");
    let assessment = enforcer.assess(&payload, &with_provider).unwrap();
    assert_eq!(assessment.primary_model, "meta-llama/llama-prompt-guard-2-22m");
    assert_eq!(assessment.context_length, Some(512));

    let without_provider = BudgetRequest::new(&body, RemediationStrategy::ModelFallback);
    assert_eq!(
        enforcer.assess(&payload, &without_provider).unwrap().context_length,
        Some(512)
    );

    let value = rewritten(enforcer.enforce(&with_provider));
    assert_eq!(value["model"], "gpt-4");
}

/// Nothing changes while the estimate fits
#[test]
fn test_within_budget_is_untouched() {
    let body = chat_body("gpt-4", "Hello    world  ,  how are you?").to_string();
    for strategy in ALL_STRATEGIES {
        assert_eq!(
            enforcer().enforce(&BudgetRequest::new(&body, strategy)),
            Remediation::Unchanged
        );
    }
}

/// Unknown models and unparseable bodies skip remediation
#[test]
fn test_unknown_budget_skips_remediation() {
    let unknown = chat_body("mystery-model-9000", &"y".repeat(100_000)).to_string();
    for body in [unknown.as_str(), "", "not json at all", "42", r#"{"model": 7}"#] {
        for strategy in ALL_STRATEGIES {
            assert_eq!(
                enforcer().enforce(&BudgetRequest::new(body, strategy)),
                Remediation::Unchanged
            );
        }
    }
}

/// Truncation only normalizes text
#[test]
fn test_truncate_normalizes_over_budget_body() {
    let content = format!(
        "Look  at  this <!-- hidden note --> ref id:12345678-1234-1234-1234-123456789abc {}",
        "item ,  ".repeat(40)
    );
    let body = chat_body("tiny-model", &content).to_string();

    let value = rewritten(enforcer().enforce(&BudgetRequest::new(&body, RemediationStrategy::Truncate)));
    let normalized = value["messages"][1]["content"].as_str().unwrap();
    assert!(normalized.starts_with("Look at this ref item,item,"));
    assert!(!normalized.contains("hidden"));
    assert!(!normalized.contains("  "));
    assert_eq!(value["messages"][0]["content"], "You are a helpful assistant.");
    assert_eq!(value["temperature"], 0.7);
}

/// Middle-out drops the middle of a long conversation and keeps its edges
#[test]
fn test_middle_out_long_conversation() {
    let original = long_conversation("gpt-4", 40);
    let body = original.to_string();

    let value = rewritten(enforcer().enforce(&BudgetRequest::new(&body, RemediationStrategy::MiddleOut)));
    let messages = value["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0], original["messages"][0]);
    assert_eq!(messages[3], original["messages"][3]);

    let filler = messages[1]["content"].as_str().unwrap();
    let original_filler = original["messages"][1]["content"].as_str().unwrap();
    assert!(filler.len() < original_filler.len());
    assert!(filler.starts_with(&"a".repeat(900)));
    assert!(filler.ends_with(&"n".repeat(900)));

    let payload = RequestPayload::from_value(value).unwrap();
    assert!(TokenEstimator::for_model(Some("gpt-4")).estimate(&payload).unwrap() <= 8_192);
}

/// Responses input is trimmed while instructions survive
#[test]
fn test_middle_out_responses_input() {
    let input = "word ".repeat(500);
    let body = responses_body("tiny-model", &input, "Be helpful").to_string();

    let value = rewritten(enforcer().enforce(&BudgetRequest::new(&body, RemediationStrategy::MiddleOut)));
    assert_eq!(value["instructions"], "Be helpful");
    assert_eq!(value["model"], "tiny-model");
    assert!(value["input"].as_str().unwrap().len() < input.len());
}

/// Tool definitions count toward the estimate
#[test]
fn test_tools_count_toward_budget() {
    let messages = json!([{"role": "user", "content": "x".repeat(200)}]);
    let without_tools = json!({"model": "tiny-model,gpt-4", "messages": messages}).to_string();
    let with_tools = json!({
        "model": "tiny-model,gpt-4",
        "messages": messages,
        "tools": [{"type": "function", "function": {"name": "lookup", "description": "d".repeat(60)}}]
    })
    .to_string();

    assert_eq!(
        enforcer().enforce(&BudgetRequest::new(&without_tools, RemediationStrategy::ModelFallback)),
        Remediation::Unchanged
    );
    let value = rewritten(enforcer().enforce(&BudgetRequest::new(&with_tools, RemediationStrategy::ModelFallback)));
    assert_eq!(value["model"], "gpt-4");
    assert_eq!(value["tools"][0]["function"]["name"], "lookup");
}

/// A header override supplies the model when the body names none
#[test]
fn test_header_override_applies_without_body_model() {
    let body = json!({"messages": [{"role": "user", "content": "z  ".repeat(200)}]}).to_string();
    let request = BudgetRequest::new(&body, RemediationStrategy::Truncate).with_model_override("tiny-model");

    let value = rewritten(enforcer().enforce(&request));
    assert!(value.get("model").is_none());
    assert_eq!(value["messages"][0]["content"], vec!["z"; 200].join(" "));
}
