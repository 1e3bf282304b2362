//! Integration tests: session isolation, per-session serialisation and
//! idle eviction.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use herald::config::ConflictPolicy;
use herald::session::{SessionManager, Turn};
use tempfile::TempDir;

fn runtime_with(policy: ConflictPolicy, chat: ScriptedProvider) -> (TempDir, Arc<herald::runtime::Runtime>) {
    let dir = TempDir::new().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.sessions.on_conflict = policy;
    let rt = runtime(
        &cfg,
        Arc::new(MemorySource::default()),
        Arc::new(chat),
        Arc::new(ScriptedProvider::default()),
        Arc::new(FakeRenderer::new(1)),
    );
    (dir, Arc::new(rt))
}

#[tokio::test]
async fn sessions_do_not_share_history() {
    let (_dir, rt) = runtime_with(
        ConflictPolicy::Wait,
        ScriptedProvider::new(vec![reply("a1"), reply("b1"), reply("a2")]),
    );

    let a = rt.turn(None, "hello from a").await.unwrap();
    let b = rt.turn(None, "hello from b").await.unwrap();
    assert_ne!(a.session_id, b.session_id);

    rt.turn(Some(&a.session_id), "again from a").await.unwrap();

    let history_a = rt.sessions().history(&a.session_id).await.unwrap();
    let history_b = rt.sessions().history(&b.session_id).await.unwrap();
    assert_eq!(history_a.len(), 4);
    assert_eq!(history_b, vec![Turn::user("hello from b"), Turn::assistant("b1")]);
}

#[tokio::test]
async fn unknown_session_id_starts_fresh() {
    let (_dir, rt) = runtime_with(ConflictPolicy::Wait, ScriptedProvider::new(vec![reply("hi")]));

    let report = rt.turn(Some("never-issued"), "hi").await.unwrap();

    assert_ne!(report.session_id, "never-issued");
    assert!(rt.sessions().history("never-issued").await.is_none());
}

#[tokio::test]
async fn wait_policy_serialises_turns_on_one_session() {
    let (_dir, rt) = runtime_with(
        ConflictPolicy::Wait,
        ScriptedProvider::new(vec![
            reply("first"),
            Step::Slow(Duration::from_millis(200), "second".into()),
            reply("third"),
        ]),
    );
    let id = rt.turn(None, "start").await.unwrap().session_id;

    let slow = {
        let rt = rt.clone();
        let id = id.clone();
        tokio::spawn(async move { rt.turn(Some(&id), "slow").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = rt.turn(Some(&id), "queued").await.unwrap();
    slow.await.unwrap().unwrap();

    assert_eq!(queued.reply, "third");
    let history = rt.sessions().history(&id).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["start", "first", "slow", "second", "queued", "third"]
    );
}

#[tokio::test]
async fn reject_policy_reports_busy_session() {
    let (_dir, rt) = runtime_with(
        ConflictPolicy::Reject,
        ScriptedProvider::new(vec![
            reply("first"),
            Step::Slow(Duration::from_millis(300), "second".into()),
        ]),
    );
    let id = rt.turn(None, "start").await.unwrap().session_id;

    let slow = {
        let rt = rt.clone();
        let id = id.clone();
        tokio::spawn(async move { rt.turn(Some(&id), "slow").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let failure = rt.turn(Some(&id), "rejected").await.unwrap_err();
    assert_eq!(failure.error.kind(), "session_conflict");
    assert_eq!(failure.session_id.as_deref(), Some(id.as_str()));

    slow.await.unwrap().unwrap();
    let history = rt.sessions().history(&id).await.unwrap();
    assert!(history.iter().all(|t| t.content != "rejected"));
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn clear_forgets_the_session() {
    let (_dir, rt) = runtime_with(
        ConflictPolicy::Wait,
        ScriptedProvider::new(vec![reply("one"), reply("two")]),
    );
    let id = rt.turn(None, "hi").await.unwrap().session_id;

    assert!(rt.clear(&id));
    assert!(!rt.clear(&id));
    assert!(rt.sessions().history(&id).await.is_none());

    let next = rt.turn(Some(&id), "hi again").await.unwrap();
    assert_ne!(next.session_id, id);
}

#[tokio::test]
async fn eviction_skips_sessions_in_use() {
    let manager = SessionManager::new(ConflictPolicy::Wait, Some(Duration::from_secs(60)));

    let idle = manager.acquire(None).await.unwrap().id().to_string();
    let busy = manager.acquire(None).await.unwrap();
    let busy_id = busy.id().to_string();
    assert_eq!(manager.len(), 2);

    let later = Utc::now() + chrono::Duration::seconds(120);
    assert_eq!(manager.evict_idle(later), 1);

    assert!(manager.history(&idle).await.is_none());
    drop(busy);
    assert!(manager.history(&busy_id).await.is_some());
}

#[tokio::test]
async fn eviction_keeps_recent_sessions() {
    let manager = SessionManager::new(ConflictPolicy::Wait, Some(Duration::from_secs(60)));
    manager.acquire(None).await.unwrap();

    assert_eq!(manager.evict_idle(Utc::now()), 0);
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn eviction_disabled_without_timeout() {
    let manager = SessionManager::new(ConflictPolicy::Wait, None);
    manager.acquire(None).await.unwrap();

    let far = Utc::now() + chrono::Duration::days(30);
    assert_eq!(manager.evict_idle(far), 0);
}
