//! Resume, bootstrap, and the one-shot recovery from a rejected resume.

use chrono::{TimeZone, Utc};

use agent_relay::agent::{Continuation, OutputMode};
use agent_relay::models::session::ContinuityState;
use agent_relay::models::turn::Role;
use agent_relay::AppError;

use super::test_helpers::{manager, store_in, test_key, Script, ScriptedInvoker};

fn seed_memory_and_history(root: &std::path::Path) {
    let store = store_in(root);
    std::fs::write(root.join("MEMORY.md"), "The team deploys on Fridays.").unwrap();
    std::fs::create_dir_all(store.assistant_dir("helper")).unwrap();
    std::fs::write(
        store.assistant_dir("helper").join("MEMORY.md"),
        "Prefer short answers.",
    )
    .unwrap();
    let at = Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap();
    store
        .append_turn_at(&test_key(), Role::User, "earlier question", at)
        .unwrap();
    store
        .append_turn_at(&test_key(), Role::Assistant, "earlier answer", at)
        .unwrap();
}

#[tokio::test]
async fn new_session_bootstraps_and_persists_token() {
    let tmp = tempfile::tempdir().unwrap();
    seed_memory_and_history(tmp.path());
    let invoker = ScriptedInvoker::new(vec![Script::ok("hello")]);
    let continuity = manager(store_in(tmp.path()), invoker.clone());

    let text = continuity.run_turn(&test_key(), "new question", None).await.unwrap();
    assert_eq!(text, "hello");

    let calls = invoker.invocations();
    assert_eq!(calls.len(), 1);
    let Continuation::Start(token) = &calls[0].continuation else {
        panic!("first turn must start a conversation");
    };
    assert_eq!(calls[0].mode, OutputMode::Batch);
    assert_eq!(
        calls[0].working_dir,
        continuity.store().workspace_dir(&test_key())
    );
    assert!(calls[0].message.contains("The team deploys on Fridays."));
    assert!(calls[0].message.contains("Prefer short answers."));
    assert!(calls[0].message.contains("earlier answer"));
    assert!(calls[0].message.ends_with("new question"));

    assert_eq!(
        continuity.state(&test_key()).unwrap(),
        ContinuityState::Resuming {
            token: token.clone()
        }
    );
}

#[tokio::test]
async fn active_token_is_resumed_with_the_raw_message() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());
    store.write_token(&test_key(), "tok-1").unwrap();
    let invoker = ScriptedInvoker::new(vec![Script::ok("resumed")]);
    let continuity = manager(store, invoker.clone());

    let text = continuity.run_turn(&test_key(), "follow up", None).await.unwrap();
    assert_eq!(text, "resumed");

    let calls = invoker.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].continuation, Continuation::Resume("tok-1".into()));
    assert_eq!(calls[0].message, "follow up");
    assert_eq!(
        continuity.store().read_token(&test_key()).unwrap().as_deref(),
        Some("tok-1")
    );
}

#[tokio::test]
async fn rejected_resume_bootstraps_once_with_a_new_token() {
    let tmp = tempfile::tempdir().unwrap();
    seed_memory_and_history(tmp.path());
    let store = store_in(tmp.path());
    store.write_token(&test_key(), "stale").unwrap();
    let invoker = ScriptedInvoker::new(vec![
        Script::err(AppError::ResumeFailed("No conversation found".into())),
        Script::ok("recovered"),
    ]);
    let continuity = manager(store, invoker.clone());

    let text = continuity.run_turn(&test_key(), "still there?", None).await.unwrap();
    assert_eq!(text, "recovered");

    let calls = invoker.invocations();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].continuation, Continuation::Resume("stale".into()));
    assert_eq!(calls[0].message, "still there?");

    let Continuation::Start(fresh) = &calls[1].continuation else {
        panic!("retry must start a new conversation");
    };
    assert_ne!(fresh, "stale");
    assert!(calls[1].message.contains("earlier question"));
    assert!(calls[1].message.ends_with("still there?"));
    assert_eq!(
        continuity.store().read_token(&test_key()).unwrap().as_deref(),
        Some(fresh.as_str())
    );
}

#[tokio::test]
async fn failed_retry_is_surfaced_without_a_second_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());
    store.write_token(&test_key(), "stale").unwrap();
    let invoker = ScriptedInvoker::new(vec![
        Script::err(AppError::ResumeFailed("No conversation found".into())),
        Script::err(AppError::ExternalAgent {
            exit_code: Some(1),
            diagnostics: "overloaded".into(),
        }),
    ]);
    let continuity = manager(store, invoker.clone());

    let err = continuity.run_turn(&test_key(), "hi", None).await.unwrap_err();
    assert!(matches!(err, AppError::ExternalAgent { exit_code: Some(1), .. }));
    assert_eq!(invoker.invocations().len(), 2);
    assert_eq!(
        continuity.state(&test_key()).unwrap(),
        ContinuityState::Bootstrapping
    );
}

#[tokio::test]
async fn other_resume_errors_keep_the_token() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());
    store.write_token(&test_key(), "tok-1").unwrap();
    let invoker = ScriptedInvoker::new(vec![Script::err(AppError::Timeout { seconds: 30 })]);
    let continuity = manager(store, invoker.clone());

    let err = continuity.run_turn(&test_key(), "slow", None).await.unwrap_err();
    assert!(matches!(err, AppError::Timeout { seconds: 30 }));
    assert_eq!(invoker.invocations().len(), 1);
    assert_eq!(
        continuity.store().read_token(&test_key()).unwrap().as_deref(),
        Some("tok-1")
    );
}

#[tokio::test]
async fn failed_bootstrap_leaves_no_token() {
    let tmp = tempfile::tempdir().unwrap();
    let invoker = ScriptedInvoker::new(vec![Script::err(AppError::Cancelled)]);
    let continuity = manager(store_in(tmp.path()), invoker.clone());

    let err = continuity.run_turn(&test_key(), "hi", None).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
    assert_eq!(
        continuity.state(&test_key()).unwrap(),
        ContinuityState::Bootstrapping
    );
}

#[tokio::test]
async fn reset_forces_the_next_turn_to_bootstrap() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store_in(tmp.path());
    store.write_token(&test_key(), "tok-1").unwrap();
    let invoker = ScriptedInvoker::new(Vec::new());
    let continuity = manager(store, invoker.clone());

    continuity.reset(&test_key()).unwrap();
    continuity.run_turn(&test_key(), "fresh start", None).await.unwrap();

    let calls = invoker.invocations();
    assert!(matches!(&calls[0].continuation, Continuation::Start(token) if token != "tok-1"));
}

#[tokio::test]
async fn streaming_turn_forwards_events_and_uses_streaming_mode() {
    use agent_relay::agent::StreamEvent;
    use std::time::Duration;

    let tmp = tempfile::tempdir().unwrap();
    let invoker = ScriptedInvoker::new(vec![Script::ok("done").with_events(
        vec![StreamEvent::TextDelta("do".into()), StreamEvent::TextDelta("ne".into())],
        Duration::ZERO,
    )]);
    let continuity = manager(store_in(tmp.path()), invoker.clone());

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let text = continuity.run_turn(&test_key(), "go", Some(&tx)).await.unwrap();
    drop(tx);

    assert_eq!(text, "done");
    assert_eq!(invoker.invocations()[0].mode, OutputMode::Streaming);
    let mut received = Vec::new();
    while let Some(event) = rx.recv().await {
        received.push(event);
    }
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn bootstrap_prompt_is_stable_between_calls() {
    let tmp = tempfile::tempdir().unwrap();
    seed_memory_and_history(tmp.path());
    let continuity = manager(store_in(tmp.path()), ScriptedInvoker::new(Vec::new()));

    let first = continuity.bootstrap_prompt(&test_key(), "q").unwrap();
    let second = continuity.bootstrap_prompt(&test_key(), "q").unwrap();
    assert_eq!(first, second);
}
