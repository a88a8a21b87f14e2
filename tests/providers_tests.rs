//! External tests for the chat-completions wire types and the completion
//! seam built on them.

use intelichat::agents::AgentId;
use intelichat::completion::{Completer, ScriptedCompleter};
use intelichat::providers::*;

// -- Request ----------------------------------------------------------------

#[test]
fn test_agent_request_maps_onto_wire_format() {
    let agent = AgentId::Laconchita.agent();
    let req = agent.completion_request("gpt-4o", "hola".into(), 80);
    let wire = OpenAIChatRequest {
        model: req.model.clone(),
        messages: vec![OpenAIChatMessage::system(req.system.clone()), OpenAIChatMessage::user(req.user.clone())],
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        presence_penalty: req.presence_penalty,
        frequency_penalty: req.frequency_penalty,
    };
    let v = serde_json::to_value(&wire).unwrap();
    assert_eq!(v["model"], "gpt-4o");
    assert_eq!(v["max_tokens"], 80);
    assert_eq!(v["messages"].as_array().unwrap().len(), 2);
    assert!(v["messages"][0]["content"].as_str().unwrap().contains("LaConchita"));
    assert_eq!(v["messages"][1]["content"], "hola");
}

#[test]
fn test_chat_message_roundtrip() {
    let m = OpenAIChatMessage::user("¿qué tal?");
    let json = serde_json::to_string(&m).unwrap();
    let back: OpenAIChatMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, m);
}

// -- Response ---------------------------------------------------------------

#[test]
fn test_response_takes_first_choice() {
    let json = r#"{
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": "¡VAMOS, CAMPEÓN!"}, "finish_reason": "stop"},
            {"index": 1, "message": {"role": "assistant", "content": "otra"}, "finish_reason": "stop"}
        ]
    }"#;
    let resp: OpenAIChatResponse = serde_json::from_str(json).unwrap();
    assert_eq!(resp.first_text().as_deref(), Some("¡VAMOS, CAMPEÓN!"));
}

#[test]
fn test_response_ignores_unknown_fields() {
    let json = r#"{"choices":[{"message":{"content":"ok","refusal":null},"finish_reason":"stop","logprobs":null}],"system_fingerprint":"fp"}"#;
    let resp: OpenAIChatResponse = serde_json::from_str(json).unwrap();
    assert_eq!(resp.first_text().as_deref(), Some("ok"));
}

#[test]
fn test_usage_defaults_missing_counts() {
    let json = r#"{"choices":[],"usage":{"total_tokens":7}}"#;
    let resp: OpenAIChatResponse = serde_json::from_str(json).unwrap();
    let usage = resp.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 0);
    assert_eq!(usage.total_tokens, 7);
}

// -- Scripted completer ------------------------------------------------------

#[tokio::test]
async fn test_scripted_completer_records_agent_requests() {
    let completer = ScriptedCompleter::always("Based.");
    let agent = AgentId::Marktukemberg.agent();
    let req = agent.completion_request("m", "sup".into(), 60);
    assert_eq!(completer.complete(req).await.unwrap(), "Based.");
    let seen = completer.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].temperature, 0.9);
    assert_eq!(seen[0].max_tokens, 60);
}
