use chrono::{TimeZone, Utc};

use agent_relay::models::session::SessionKey;
use agent_relay::models::turn::Role;
use agent_relay::persistence::session_store::{SessionStore, TOKEN_FILE};

fn key() -> SessionKey {
    SessionKey::new("helper", "C1")
}

fn store(root: &std::path::Path) -> SessionStore {
    SessionStore::new(root, "CLAUDE.md")
}

#[test]
fn ensure_session_creates_layout_and_copies_instructions() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    std::fs::create_dir_all(store.assistant_dir("helper")).unwrap();
    std::fs::write(store.assistant_dir("helper").join("CLAUDE.md"), "be brief").unwrap();

    let dir = store.ensure_session(&key()).unwrap();
    assert_eq!(dir, tmp.path().join("assistants/helper/sessions/conv_C1"));
    assert!(store.workspace_dir(&key()).is_dir());
    assert!(dir.join("history").is_dir());
    assert_eq!(std::fs::read_to_string(dir.join("CLAUDE.md")).unwrap(), "be brief");

    // Per-session edits survive later calls.
    std::fs::write(dir.join("CLAUDE.md"), "edited").unwrap();
    store.ensure_session(&key()).unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("CLAUDE.md")).unwrap(), "edited");
}

#[test]
fn token_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());

    assert_eq!(store.read_token(&key()).unwrap(), None);
    store.write_token(&key(), "tok-1").unwrap();
    assert_eq!(store.read_token(&key()).unwrap().as_deref(), Some("tok-1"));
    store.write_token(&key(), "tok-2").unwrap();
    assert_eq!(store.read_token(&key()).unwrap().as_deref(), Some("tok-2"));

    store.clear_token(&key()).unwrap();
    assert_eq!(store.read_token(&key()).unwrap(), None);
    store.clear_token(&key()).unwrap();
}

#[test]
fn blank_token_file_reads_as_absent() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    let dir = store.ensure_session(&key()).unwrap();
    std::fs::write(dir.join(TOKEN_FILE), " \n").unwrap();
    assert_eq!(store.read_token(&key()).unwrap(), None);
}

#[test]
fn history_is_capped_to_the_most_recent_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    for day in 1..=3 {
        let at = Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap();
        store
            .append_turn_at(&key(), Role::User, &format!("question {day}"), at)
            .unwrap();
        store
            .append_turn_at(&key(), Role::Assistant, &format!("answer {day}"), at)
            .unwrap();
    }

    let turns = store.read_last_turns(&key(), 3).unwrap();
    let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["answer 2", "question 3", "answer 3"]);
    assert_eq!(turns[0].role, Role::Assistant);
    assert_eq!(turns[1].timestamp, "2026-01-03 12:00:00 UTC");

    assert_eq!(store.read_last_turns(&key(), 100).unwrap().len(), 6);
    assert!(store.read_last_turns(&key(), 0).unwrap().is_empty());
}

#[test]
fn history_of_unknown_session_is_empty() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(store(tmp.path()).read_last_turns(&key(), 10).unwrap().is_empty());
}

#[test]
fn history_entries_use_markdown_chunks() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    let at = Utc.with_ymd_and_hms(2026, 2, 14, 8, 0, 5).unwrap();
    store.append_turn_at(&key(), Role::User, "hello", at).unwrap();

    let chunk = store.session_dir(&key()).join("history/2026-02-14.md");
    assert_eq!(
        std::fs::read_to_string(chunk).unwrap(),
        "\n## user (2026-02-14 08:00:05 UTC)\n\nhello\n"
    );
}

#[test]
fn memory_files_are_optional() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    assert_eq!(store.read_global_memory().unwrap(), None);
    assert_eq!(store.read_assistant_memory("helper").unwrap(), None);

    std::fs::write(tmp.path().join("MEMORY.md"), "shared").unwrap();
    std::fs::create_dir_all(store.assistant_dir("helper")).unwrap();
    std::fs::write(store.assistant_dir("helper").join("MEMORY.md"), "   ").unwrap();

    assert_eq!(store.read_global_memory().unwrap().as_deref(), Some("shared"));
    assert_eq!(store.read_assistant_memory("helper").unwrap(), None);
}

#[test]
fn snapshot_and_delete() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    store.ensure_session(&key()).unwrap();
    store.write_token(&key(), "tok").unwrap();
    store.append_turn(&key(), Role::User, "hi").unwrap();
    std::fs::write(store.workspace_dir(&key()).join("notes.txt"), "x").unwrap();

    let snapshot = store.snapshot(&key()).unwrap();
    assert!(snapshot.has_token);
    assert_eq!(snapshot.history_chunks, 1);
    assert!(snapshot.history_bytes > 0);
    assert_eq!(snapshot.workspace_files, 1);

    store.delete_session(&key()).unwrap();
    assert!(!store.session_dir(&key()).exists());
    store.delete_session(&key()).unwrap();

    let empty = store.snapshot(&key()).unwrap();
    assert!(!empty.has_token);
    assert_eq!(empty.history_chunks, 0);
    assert_eq!(empty.workspace_files, 0);
}

#[test]
fn clear_history_keeps_token_and_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let store = store(tmp.path());
    store.ensure_session(&key()).unwrap();
    store.write_token(&key(), "tok").unwrap();
    store.append_turn(&key(), Role::User, "hi").unwrap();
    std::fs::write(store.workspace_dir(&key()).join("notes.txt"), "x").unwrap();

    store.clear_history(&key()).unwrap();
    assert!(store.read_last_turns(&key(), 10).unwrap().is_empty());
    assert_eq!(store.read_token(&key()).unwrap().as_deref(), Some("tok"));
    assert_eq!(store.snapshot(&key()).unwrap().workspace_files, 1);

    // Missing history is fine, and appends start a fresh chunk.
    store.clear_history(&key()).unwrap();
    store.append_turn(&key(), Role::User, "again").unwrap();
    assert_eq!(store.read_last_turns(&key(), 10).unwrap().len(), 1);
}
