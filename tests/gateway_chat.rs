//! Integration tests for the HTTP gateway.

mod common;

use std::sync::Arc;

use common::*;
use herald::gateway::{start_gateway, Gateway, SESSION_HEADER};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    _dir: TempDir,
    gw: Gateway,
    cancel: CancellationToken,
    client: reqwest::Client,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.gw.addr, path)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn harness(chat: ScriptedProvider) -> Harness {
    let dir = TempDir::new().unwrap();
    let cfg = test_config(dir.path());
    let source = MemorySource::new(vec![announcement(
        "rec1",
        "Q2 Budget",
        "Spending plan",
        Some("2024-01-10"),
    )]);
    let rt = runtime(
        &cfg,
        Arc::new(source),
        Arc::new(chat),
        Arc::new(ScriptedProvider::default()),
        Arc::new(FakeRenderer::new(1)),
    );
    let cancel = CancellationToken::new();
    let gw = start_gateway("127.0.0.1:0".parse().unwrap(), Arc::new(rt), cancel.clone())
        .await
        .unwrap();
    Harness {
        _dir: dir,
        gw,
        cancel,
        client: reqwest::Client::new(),
    }
}

#[tokio::test]
async fn status_endpoint_returns_ok() {
    let h = harness(ScriptedProvider::default()).await;

    let resp = h.client.get(h.url("/api/status")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn health_lists_tools() {
    let h = harness(ScriptedProvider::default()).await;

    let body: Value = h
        .client
        .get(h.url("/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 0);
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 5);
    assert!(tools.contains(&json!("analyze_document")));
}

#[tokio::test]
async fn chat_turn_returns_reply_and_session() {
    let h = harness(ScriptedProvider::new(vec![
        calls(vec![call("c1", "search_announcements", r#"{"query":"budget"}"#)]),
        reply("There is a Q2 Budget announcement."),
        reply("You asked about the budget."),
    ]))
    .await;

    let resp = h
        .client
        .post(h.url("/api/chat"))
        .json(&json!({ "message": "any budget news?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "There is a Q2 Budget announcement.");
    assert_eq!(body["additional_data"]["model_calls"], 2);
    assert_eq!(body["additional_data"]["tool_calls"][0]["tool"], "search_announcements");
    let session_id = body["session_id"].as_str().unwrap().to_string();

    // Follow-up on the same session.
    let resp = h
        .client
        .post(h.url("/api/chat"))
        .header(SESSION_HEADER, &session_id)
        .json(&json!({ "message": "what did I ask?" }))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["session_id"], session_id.as_str());
    assert_eq!(body["response"], "You asked about the budget.");

    let history: Value = h
        .client
        .get(h.url(&format!("/api/chat/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = history["history"].as_array().unwrap();
    assert_eq!(turns.len(), 6);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[2]["role"], "tool");
}

#[tokio::test]
async fn empty_message_is_bad_request() {
    let h = harness(ScriptedProvider::default()).await;

    let resp = h
        .client
        .post(h.url("/api/chat"))
        .json(&json!({ "message": "   " }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "validation");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn model_outage_is_bad_gateway() {
    let h = harness(ScriptedProvider::new(vec![Step::Fail("down".into())])).await;

    let resp = h
        .client
        .post(h.url("/api/chat"))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "transport");
    assert!(body["session_id"].is_string());
}

#[tokio::test]
async fn delete_clears_session() {
    let h = harness(ScriptedProvider::new(vec![reply("hi")])).await;

    let body: Value = h
        .client
        .post(h.url("/api/chat"))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = body["session_id"].as_str().unwrap().to_string();

    let cleared: Value = h
        .client
        .delete(h.url(&format!("/api/chat/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["existed"], true);
    assert_eq!(cleared["status"], "cleared");

    let again: Value = h
        .client
        .delete(h.url(&format!("/api/chat/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["existed"], false);

    let resp = h
        .client
        .get(h.url(&format!("/api/chat/{session_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
