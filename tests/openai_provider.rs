//! Integration tests: `OpenAIProvider` request/response handling against a
//! wiremock chat-completions endpoint.

use std::time::Duration;

use herald::models::{ChatMessage, ImagePayload, ModelProvider, OpenAIProvider, ProviderResponse};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OpenAIProvider {
    OpenAIProvider::with_config(
        "sk-test".into(),
        format!("{}/v1/chat/completions", server.uri()),
        "gpt-4o-mini".into(),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn tool_def() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": "search_announcements",
            "description": "Search",
            "parameters": { "type": "object", "properties": {} }
        }
    })
}

async fn last_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    serde_json::from_slice(&requests.last().unwrap().body).unwrap()
}

#[tokio::test]
async fn tool_calls_are_parsed_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        { "id": "call_a", "type": "function",
                          "function": { "name": "search_announcements", "arguments": "{\"query\":\"budget\"}" } },
                        { "id": "call_b", "type": "function",
                          "function": { "name": "fetch_all_announcements", "arguments": "{}" } }
                    ]
                }
            }],
            "usage": { "prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49 }
        })))
        .mount(&server)
        .await;

    let messages = vec![
        ChatMessage::new("system", "be helpful"),
        ChatMessage::new("user", "budget?"),
    ];
    let (response, usage) = provider(&server)
        .send_chat_with_functions(&messages, &[tool_def()])
        .await
        .unwrap();

    let ProviderResponse::ToolCalls(items) = response else {
        panic!("expected tool calls");
    };
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "call_a");
    assert_eq!(items[0].arguments, "{\"query\":\"budget\"}");
    assert_eq!(items[1].name, "fetch_all_announcements");
    assert_eq!(usage.unwrap().total_tokens, 49);

    let body = last_body(&server).await;
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["tool_choice"], "auto");
    assert_eq!(body["tools"][0]["function"]["name"], "search_announcements");
    assert_eq!(body["messages"][1]["content"], "budget?");
}

#[tokio::test]
async fn plain_reply_is_final() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Hello there" } }]
        })))
        .mount(&server)
        .await;

    let (response, usage) = provider(&server)
        .send_chat_with_functions(&[ChatMessage::new("user", "hi")], &[tool_def()])
        .await
        .unwrap();

    match response {
        ProviderResponse::Final(text) => assert_eq!(text, "Hello there"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(usage.is_none());
}

#[tokio::test]
async fn images_are_sent_as_data_urls_with_max_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Two pages about budgets." } }]
        })))
        .mount(&server)
        .await;

    let image = |data: &str| ImagePayload {
        media_type: "image/png".into(),
        data: data.into(),
        detail: "low".into(),
    };
    let message = ChatMessage::with_images("Summarize", vec![image("AAAA"), image("BBBB")]);
    let text = provider(&server)
        .with_max_tokens(1000)
        .send_chat(&[message])
        .await
        .unwrap();
    assert_eq!(text, "Two pages about budgets.");

    let body = last_body(&server).await;
    assert_eq!(body["max_tokens"], 1000);
    assert!(body.get("tools").is_none());
    let parts = body["messages"][0]["content"].as_array().unwrap();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], json!({ "type": "text", "text": "Summarize" }));
    assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    assert_eq!(parts[2]["image_url"]["detail"], "low");
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .send_chat(&[ChatMessage::new("user", "hi")])
        .await
        .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("429"), "{msg}");
    assert!(msg.contains("rate limited"), "{msg}");
}
