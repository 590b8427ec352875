//! Reconciler tests - finalize, interruption and history surgery keep
//! messages and artifacts consistent

use std::sync::Arc;

use artigen_core::artifacts::ArtifactStore;
use artigen_core::conversation::ConversationStore;
use artigen_core::models::{ArtifactPayload, ChatRole, MessageRole};
use artigen_core::reconciler::{AppliedOutcome, ConversationReconciler};
use artigen_core::session::{RenderError, SessionOutcome, StreamScratch};
use artigen_core::stream_parser::RenderSnapshot;
use artigen_core::{Error, ModuleDescriptor, ModuleRegistry, PreviewSurface, Storage, StreamSession};

/// Surface whose renderer turns any source into SVG markup.
struct Renderer;

impl PreviewSurface for Renderer {
    fn render(&mut self, snapshot: &RenderSnapshot) -> Result<Option<String>, RenderError> {
        Ok(Some(format!("<svg>{}</svg>", snapshot.source.trim())))
    }
}

fn module(id: &str) -> Arc<ModuleDescriptor> {
    ModuleRegistry::builtin()
        .expect("builtin")
        .require(id)
        .expect("module")
}

fn reconciler(storage: &Storage) -> ConversationReconciler {
    ConversationReconciler::new(
        ConversationStore::new(storage.clone()),
        ArtifactStore::new(storage.clone()),
    )
}

/// Submit `question` and finalize `answer` under a fresh message id.
fn exchange(
    reconciler: &mut ConversationReconciler,
    module: &ModuleDescriptor,
    question: &str,
    answer: &str,
) -> (String, Option<String>) {
    reconciler.submit(module, question).expect("submit");
    let message_id = artigen_core::models::generate_id("msg");
    let outcome = reconciler
        .finalize(module, &message_id, answer, &StreamScratch::default())
        .expect("finalize");
    let AppliedOutcome::Finalized { artifact, .. } = outcome else {
        panic!("expected finalized outcome");
    };
    (message_id, artifact.map(|a| a.id))
}

fn svg_answer(label: &str) -> String {
    format!("Version {label}\n```svg\n<svg><text>{label}</text></svg>\n```")
}

#[test]
fn basic_svg_round_trip() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse my bakery").expect("submit");

    let outcome = reconciler
        .finalize(
            &swot,
            "msg_round_trip",
            "Here is your canvas\n```svg\n<svg><rect/></svg>\n```\nDone",
            &StreamScratch::default(),
        )
        .expect("finalize");

    let AppliedOutcome::Finalized { message, artifact } = outcome else {
        panic!("expected finalized outcome");
    };
    let artifact = artifact.expect("artifact");
    assert_eq!(
        artifact.payload,
        ArtifactPayload::Svg {
            content: "<svg><rect/></svg>".to_string()
        }
    );
    assert_eq!(artifact.message_id, "msg_round_trip");
    assert_eq!(message.content, "Here is your canvas\n\nDone");
    assert_eq!(message.artifact_id.as_deref(), Some(artifact.id.as_str()));
    assert_eq!(
        message.raw_content.as_deref(),
        Some("Here is your canvas\n```svg\n<svg><rect/></svg>\n```\nDone")
    );
    assert_eq!(reconciler.artifacts().active_id(&swot), Some(artifact.id));
}

#[test]
fn finalize_is_idempotent() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse").expect("submit");

    let text = svg_answer("one");
    let first = reconciler
        .finalize(&swot, "msg_twice", &text, &StreamScratch::default())
        .expect("first");
    let second = reconciler
        .finalize(&swot, "msg_twice", &text, &StreamScratch::default())
        .expect("second");

    assert_eq!(first, second);
    assert_eq!(reconciler.artifacts().list(&swot).len(), 1);
    assert_eq!(reconciler.conversations().history(&swot).len(), 2);
}

#[test]
fn artifact_only_reply_gets_placeholder_text() {
    let storage = Storage::in_memory();
    let mermaid = module("mermaid");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&mermaid, "Login flow").expect("submit");

    let outcome = reconciler
        .finalize(
            &mermaid,
            "msg_placeholder",
            "```mermaid\ngraph TD\nA-->B\n```",
            &StreamScratch::default(),
        )
        .expect("finalize");
    let AppliedOutcome::Finalized { message, .. } = outcome else {
        panic!("expected finalized outcome");
    };
    assert_eq!(message.content, "Diagram generated, click to view.");
}

#[test]
fn reply_without_payload_is_plain_text() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse").expect("submit");

    let outcome = reconciler
        .finalize(
            &swot,
            "msg_plain",
            "  Could you tell me more about the market?\n```svg\n<svg><rect/>  ",
            &StreamScratch::default(),
        )
        .expect("finalize");
    let AppliedOutcome::Finalized { message, artifact } = outcome else {
        panic!("expected finalized outcome");
    };
    assert!(artifact.is_none());
    assert!(message.artifact_id.is_none());
    assert_eq!(
        message.content,
        "Could you tell me more about the market?\n```svg\n<svg><rect/>"
    );
    assert!(reconciler.artifacts().list(&swot).is_empty());
}

#[test]
fn cancelled_stream_keeps_text_without_artifact() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse").expect("submit");

    let buffer = "Here...\n```svg\n<svg><rect/>";
    let applied = reconciler
        .apply(
            &swot,
            SessionOutcome::Interrupted {
                message_id: "msg_stopped".to_string(),
                partial_text: buffer.to_string(),
            },
        )
        .expect("apply");

    let AppliedOutcome::Interrupted(Some(message)) = applied else {
        panic!("expected interrupted message");
    };
    assert!(message.interrupted);
    assert_eq!(message.role, MessageRole::Assistant);
    assert_eq!(message.content, buffer.trim());
    assert!(message.artifact_id.is_none());
    assert!(reconciler.artifacts().list(&swot).is_empty());
}

#[test]
fn completed_artifact_is_not_kept_when_cancelled() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse").expect("submit");

    reconciler
        .record_interrupted(&swot, "msg_late_cancel", &svg_answer("done"))
        .expect("record");
    assert!(reconciler.artifacts().list(&swot).is_empty());
}

#[test]
fn empty_interruption_stores_nothing() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse").expect("submit");

    let stored = reconciler
        .record_interrupted(&swot, "msg_empty", "  \n")
        .expect("record");
    assert!(stored.is_none());
    assert_eq!(reconciler.conversations().history(&swot).len(), 1);
}

#[test]
fn transport_failure_appends_error_message() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "Analyse").expect("submit");

    let applied = reconciler
        .apply(
            &swot,
            SessionOutcome::Failed {
                message_id: "msg_failed".to_string(),
                description: "HTTP 401: invalid key".to_string(),
            },
        )
        .expect("apply");
    let AppliedOutcome::Failed(message) = applied else {
        panic!("expected error message");
    };
    assert_eq!(message.role, MessageRole::Error);
    assert_eq!(message.content, "HTTP 401: invalid key");
    assert!(reconciler.conversations().find(&swot, "msg_failed").is_none());
}

#[test]
fn mermaid_render_from_stream_is_reused() {
    let storage = Storage::in_memory();
    let mermaid = module("mermaid");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&mermaid, "Flow").expect("submit");

    let mut session = StreamSession::new(
        Arc::clone(&mermaid),
        std::time::Duration::from_millis(0),
    );
    session.on_delta(
        &artigen_core::client::ChatChunk::text("```mermaid\ngraph TD\nA-->B\n```"),
        &mut Renderer,
    );
    let outcome = session.on_complete(false, &mut Renderer).expect("outcome");

    let applied = reconciler.apply(&mermaid, outcome).expect("apply");
    let AppliedOutcome::Finalized {
        artifact: Some(artifact),
        ..
    } = applied
    else {
        panic!("expected artifact");
    };
    assert_eq!(artifact.svg_markup(), Some("<svg>graph TD\nA-->B</svg>"));
}

#[test]
fn rollback_cascade_removes_later_artifacts() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (b, x) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));
    let (d, y) = exchange(&mut reconciler, &swot, "C", &svg_answer("Y"));
    let (x, y) = (x.expect("X"), y.expect("Y"));
    assert_eq!(reconciler.artifacts().active_id(&swot), Some(y.clone()));

    let edit = reconciler.rollback(&swot, &b).expect("rollback");

    assert_eq!(edit.removed_messages.len(), 2);
    assert!(edit.removed_messages.contains(&d));
    assert_eq!(edit.removed_artifacts, vec![y.clone()]);
    assert_eq!(edit.active_artifact, Some(x.clone()));

    let history = reconciler.conversations().history(&swot);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].id, b);
    assert!(reconciler.artifacts().get(&swot, &y).is_none());
    assert_eq!(reconciler.artifacts().active_id(&swot), Some(x));
}

#[test]
fn rollback_preconditions() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (b, _) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));
    let user_id = reconciler.conversations().history(&swot)[0].id.clone();

    assert!(matches!(
        reconciler.rollback(&swot, &b),
        Err(Error::Refused(_))
    ));
    assert!(matches!(
        reconciler.rollback(&swot, &user_id),
        Err(Error::Refused(_))
    ));
    assert!(matches!(
        reconciler.rollback(&swot, "missing"),
        Err(Error::MessageNotFound(_))
    ));
    assert_eq!(reconciler.conversations().history(&swot).len(), 2);
}

#[test]
fn regenerate_refuses_older_message_without_changes() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (b, x) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));
    exchange(&mut reconciler, &swot, "C", &svg_answer("Y"));

    let history_before = reconciler.conversations().history(&swot);
    let artifacts_before = reconciler.artifacts().list(&swot);

    assert!(matches!(
        reconciler.prepare_regenerate(&swot, &b),
        Err(Error::Refused(_))
    ));
    assert_eq!(reconciler.conversations().history(&swot), history_before);
    assert_eq!(reconciler.artifacts().list(&swot), artifacts_before);
    assert!(reconciler.artifacts().contains(&swot, &x.expect("X")));
}

#[test]
fn regenerate_newest_answer() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (_, x) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));
    let (d, y) = exchange(&mut reconciler, &swot, "C", &svg_answer("Y"));

    let regeneration = reconciler.prepare_regenerate(&swot, &d).expect("regenerate");

    assert_eq!(regeneration.user_message.content, "C");
    assert_eq!(regeneration.context.len(), 2);
    assert_eq!(regeneration.context[0].role, ChatRole::User);
    assert_eq!(regeneration.context[1].content, svg_answer("X"));
    assert_eq!(regeneration.edit.removed_messages, vec![d]);
    assert_eq!(regeneration.edit.removed_artifacts, vec![y.expect("Y")]);
    assert_eq!(regeneration.edit.active_artifact, x);

    let history = reconciler.conversations().history(&swot);
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].content, "C");
}

#[test]
fn regenerate_error_message() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    reconciler.submit(&swot, "A").expect("submit");
    let error = reconciler.record_error(&swot, "timeout").expect("error");

    let regeneration = reconciler
        .prepare_regenerate(&swot, &error.id)
        .expect("regenerate");
    assert_eq!(regeneration.user_message.content, "A");
    assert!(regeneration.context.is_empty());
}

#[test]
fn regenerate_without_user_message_fails() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let error = reconciler.record_error(&swot, "timeout").expect("error");

    assert!(matches!(
        reconciler.prepare_regenerate(&swot, &error.id),
        Err(Error::Refused(_))
    ));
    assert_eq!(reconciler.conversations().history(&swot).len(), 1);
}

#[test]
fn delete_requires_confirmation() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (b, x) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));

    let declined = reconciler.delete(&swot, &b, |_| false).expect("declined");
    assert!(declined.is_none());
    assert_eq!(reconciler.conversations().history(&swot).len(), 2);

    let edit = reconciler
        .delete(&swot, &b, |message| message.role == MessageRole::Assistant)
        .expect("delete")
        .expect("confirmed");
    assert_eq!(edit.removed_messages, vec![b]);
    assert_eq!(edit.removed_artifacts, vec![x.expect("X")]);
    assert_eq!(edit.active_artifact, None);
    assert!(reconciler.artifacts().list(&swot).is_empty());
}

#[test]
fn deleting_active_owner_falls_back_to_previous_artifact() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (_, x) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));
    let (d, _) = exchange(&mut reconciler, &swot, "C", &svg_answer("Y"));

    let edit = reconciler
        .delete(&swot, &d, |_| true)
        .expect("delete")
        .expect("confirmed");
    assert_eq!(edit.active_artifact, x);
}

#[test]
fn deleting_inactive_owner_keeps_active_pointer() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    let (b, _) = exchange(&mut reconciler, &swot, "A", &svg_answer("X"));
    let (_, y) = exchange(&mut reconciler, &swot, "C", &svg_answer("Y"));

    let edit = reconciler
        .delete(&swot, &b, |_| true)
        .expect("delete")
        .expect("confirmed");
    assert_eq!(edit.active_artifact, y);
}

#[test]
fn clear_removes_history_and_artifacts() {
    let storage = Storage::in_memory();
    let swot = module("swot");
    let mut reconciler = reconciler(&storage);
    exchange(&mut reconciler, &swot, "A", &svg_answer("X"));

    reconciler.clear(&swot).expect("clear");
    assert!(reconciler.conversations().history(&swot).is_empty());
    assert!(reconciler.artifacts().list(&swot).is_empty());
    assert_eq!(reconciler.artifacts().active_id(&swot), None);
}

#[test]
fn state_survives_reopen_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.json");
    let swot = module("swot");

    let (b, x) = {
        let storage = Storage::open(&path).expect("open");
        let mut reconciler = reconciler(&storage);
        exchange(&mut reconciler, &swot, "A", &svg_answer("X"))
    };

    let storage = Storage::open(&path).expect("reopen");
    let mut reconciler = reconciler(&storage);
    let history = reconciler.conversations().history(&swot);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].id, b);
    assert_eq!(reconciler.artifacts().active_id(&swot), x);
}
