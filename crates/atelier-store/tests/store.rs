//! Store behaviour tests: idempotent append, near-duplicate merge, sharding,
//! index discipline and ownership checks.

use atelier_store::store::{MessagePatch, MessageSelector, NewMessage};
use atelier_store::{ConversationStore, MessageStatus, Role, StoreError};

fn open_store(tmp: &std::path::Path) -> ConversationStore {
    ConversationStore::open(tmp.join("data/conversations"), tmp.join("outputs")).unwrap()
}

#[test]
fn create_materializes_file_index_and_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());

    let meta = store.create("gpt-5", Some("alice")).unwrap();
    assert_eq!(meta.id.as_str().len(), 8);
    assert!(meta.output_dir.ends_with(meta.id.as_str()));

    // Workspace directory exists eagerly.
    assert!(tmp.path().join("outputs").join(&meta.output_dir).is_dir());

    // Conversation file is sharded under user/year-month.
    let year_month: String = meta.created_at.chars().take(7).collect();
    let expected_dir = tmp.path().join("data/conversations/alice").join(year_month);
    assert!(expected_dir.is_dir());

    // Index holds the entry.
    assert!(tmp.path().join("data/index.json").is_file());
    let listed = store.list(Some("alice"), None);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, meta.id);
}

#[test]
fn output_dir_is_stable_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let meta = {
        let store = open_store(tmp.path());
        store.create("gpt-5", None).unwrap()
    };

    let reopened = open_store(tmp.path());
    assert_eq!(
        reopened.output_dir_name(meta.id.as_str()).unwrap(),
        meta.output_dir
    );
}

#[test]
fn append_is_idempotent_under_client_msg_id() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();

    let first = store
        .append_message(
            meta.id.as_str(),
            NewMessage::user("hello").with_client_msg_id("cm-1"),
            None,
        )
        .unwrap();
    let second = store
        .append_message(
            meta.id.as_str(),
            NewMessage::user("hello").with_client_msg_id("cm-1"),
            None,
        )
        .unwrap();

    assert_eq!(first, second);
    let conv = store.get(meta.id.as_str(), None).unwrap();
    assert_eq!(conv.messages.len(), 1);
}

#[test]
fn near_duplicate_merge_is_monotone() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();

    store
        .append_message(
            meta.id.as_str(),
            NewMessage::assistant("done!  see chart")
                .with_generated_files(vec!["a.png".to_string()]),
            None,
        )
        .unwrap();
    // Same normalized content (CRLF, NBSP, collapsed whitespace) with a new
    // file: merges onto the tail, files union.
    store
        .append_message(
            meta.id.as_str(),
            NewMessage::assistant("done!\u{00a0} see\tchart")
                .with_generated_files(vec!["a.png".to_string(), "b.png".to_string()]),
            None,
        )
        .unwrap();

    let conv = store.get(meta.id.as_str(), None).unwrap();
    assert_eq!(conv.messages.len(), 1);
    assert_eq!(
        conv.messages[0].generated_files,
        vec!["a.png".to_string(), "b.png".to_string()]
    );
}

#[test]
fn first_user_message_derives_title() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();

    store
        .append_message(
            meta.id.as_str(),
            NewMessage::user("Please analyse the quarterly sales data and build charts"),
            None,
        )
        .unwrap();

    let listed = store.list(None, None);
    assert_eq!(listed[0].title, "Please analyse the q…");
    assert_eq!(listed[0].title.chars().count(), 21);
}

#[test]
fn short_first_message_is_title_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();

    store
        .append_message(meta.id.as_str(), NewMessage::user("hi"), None)
        .unwrap();
    assert_eq!(store.meta(meta.id.as_str()).unwrap().title, "hi");
}

#[test]
fn list_never_reads_conversation_bodies() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", Some("bob")).unwrap();

    // Corrupt the conversation file; listing must still work because it only
    // consults the index.
    let year_month: String = meta.created_at.chars().take(7).collect();
    let dir = tmp.path().join("data/conversations/bob").join(&year_month);
    let file = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap();
    std::fs::write(file.path(), "NOT JSON").unwrap();

    let listed = store.list(Some("bob"), None);
    assert_eq!(listed.len(), 1);

    // But a body read fails loudly.
    assert!(store.get(meta.id.as_str(), None).is_err());
}

#[test]
fn ownership_rules() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let anon = store.create("gpt-5", None).unwrap();
    let owned = store.create("gpt-5", Some("alice")).unwrap();

    // Anonymous conversations are readable by any caller.
    assert!(store.get(anon.id.as_str(), Some("bob")).is_ok());

    // Owned conversations only by their owner.
    assert!(store.get(owned.id.as_str(), Some("alice")).is_ok());
    assert!(matches!(
        store.get(owned.id.as_str(), Some("bob")),
        Err(StoreError::Forbidden { .. })
    ));

    // Listing: bob sees the anonymous one only.
    let bob_view = store.list(Some("bob"), None);
    assert_eq!(bob_view.len(), 1);
    assert_eq!(bob_view[0].id, anon.id);
}

#[test]
fn delete_removes_file_and_index_but_keeps_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();
    let workspace = tmp.path().join("outputs").join(&meta.output_dir);

    store.delete(meta.id.as_str(), None).unwrap();
    assert!(matches!(
        store.get(meta.id.as_str(), None),
        Err(StoreError::NotFound { .. })
    ));
    assert!(store.list(None, None).is_empty());
    // Retention policy: the workspace stays.
    assert!(workspace.is_dir());
}

#[test]
fn set_model_rebinds_and_bumps_updated_at() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();

    store
        .set_model(meta.id.as_str(), "claude-sonnet-4", None)
        .unwrap();
    let conv = store.get(meta.id.as_str(), None).unwrap();
    assert_eq!(conv.model, "claude-sonnet-4");
    assert_eq!(store.meta(meta.id.as_str()).unwrap().model, "claude-sonnet-4");
}

#[test]
fn update_message_selectors_and_patches() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();

    let mut in_progress = NewMessage::assistant("partial answer");
    in_progress.status = MessageStatus::InProgress;
    store
        .append_message(meta.id.as_str(), in_progress, None)
        .unwrap();

    // "last in-progress assistant" selector with append + status patch.
    let patched = store
        .update_message(
            meta.id.as_str(),
            MessageSelector::LastInProgress(Role::Assistant),
            MessagePatch {
                append_content: Some(" …and the rest".to_string()),
                status: Some(MessageStatus::Completed),
                generated_files_delta: vec!["out.md".to_string()],
                ..Default::default()
            },
            None,
        )
        .unwrap();

    let conv = store.get(meta.id.as_str(), None).unwrap();
    let msg = conv.messages.iter().find(|m| m.id == patched).unwrap();
    assert_eq!(msg.content.as_text(), "partial answer …and the rest");
    assert_eq!(msg.status, MessageStatus::Completed);
    assert_eq!(msg.generated_files, vec!["out.md".to_string()]);

    // No in-progress message left: the selector now misses.
    assert!(store
        .update_message(
            meta.id.as_str(),
            MessageSelector::LastInProgress(Role::Assistant),
            MessagePatch::default(),
            None,
        )
        .is_err());
}

#[test]
fn persist_load_persist_is_stable() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();
    store
        .append_message(meta.id.as_str(), NewMessage::user("round trip"), None)
        .unwrap();

    let year_month: String = meta.created_at.chars().take(7).collect();
    let dir = tmp
        .path()
        .join("data/conversations/anonymous")
        .join(&year_month);
    let file = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap();
    let before = std::fs::read_to_string(file.path()).unwrap();

    // A load-and-rewrite cycle (replace with identical content) is
    // byte-stable apart from the updated_at bump, so compare parsed values
    // with timestamps normalised.
    let conv = store.get(meta.id.as_str(), None).unwrap();
    store
        .replace_messages(meta.id.as_str(), conv.messages.clone(), None)
        .unwrap();
    let after = std::fs::read_to_string(file.path()).unwrap();

    let mut a: serde_json::Value = serde_json::from_str(&before).unwrap();
    let mut b: serde_json::Value = serde_json::from_str(&after).unwrap();
    a["updated_at"] = serde_json::json!("");
    b["updated_at"] = serde_json::json!("");
    assert_eq!(a, b);
}

#[test]
fn pending_image_queue_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open_store(tmp.path());
    let meta = store.create("gpt-5", None).unwrap();
    let id = meta.id.as_str();

    store
        .add_pending_images(
            id,
            &["a.png".to_string(), "b.png".to_string()],
            atelier_store::ImageDetail::High,
            2,
        )
        .unwrap();
    // Re-adding an existing path is a no-op.
    store
        .add_pending_images(
            id,
            &["a.png".to_string()],
            atelier_store::ImageDetail::Low,
            1,
        )
        .unwrap();

    let pending = store.pending_images(id).unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].remaining_views, 2);
    assert_eq!(pending[0].detail, atelier_store::ImageDetail::High);

    // First materialisation: counters drop to 1, nothing evicted.
    assert_eq!(store.decrement_views_and_cleanup(id).unwrap(), 0);
    // Second: both evicted.
    assert_eq!(store.decrement_views_and_cleanup(id).unwrap(), 2);
    assert!(store.pending_images(id).unwrap().is_empty());
}

#[test]
fn missing_index_starts_empty() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = open_store(tmp.path());
        store.create("gpt-5", None).unwrap();
    }
    std::fs::remove_file(tmp.path().join("data/index.json")).unwrap();

    // Conversation files survive, but without the index the store starts
    // empty (rebuild-by-scan is not implemented).
    let reopened = open_store(tmp.path());
    assert!(reopened.list(None, None).is_empty());
}
