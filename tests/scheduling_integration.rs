//! Scheduler and document-state integration: causal ordering between
//! document updates and queries, and cancellation isolation between
//! workspaces.

use std::sync::Arc;
use std::time::Duration;

use lsp_types::{Position, Range, TextDocumentContentChangeEvent, Uri};
use tokio::sync::mpsc;

use async_trait::async_trait;
use pantograph::document::{DocumentManager, Language};
use pantograph::protocol::{RequestId, ResponseMessage};
use pantograph::scheduler::{
    CancellationLane, DependencyTag, MessageScheduler, ReplyHandle,
};
use pantograph::workspace::{
    BuildSettings, BuildSystem, FileHandlingCapability, Workspace, WorkspaceRegistry,
};

fn uri(s: &str) -> Uri {
    s.parse().unwrap()
}

/// Handles files under its own root URI prefix, nothing else.
struct PrefixBuildSystem(String);

#[async_trait]
impl BuildSystem for PrefixBuildSystem {
    async fn build_settings(&self, _uri: &Uri, _language: Language) -> Option<BuildSettings> {
        None
    }

    async fn file_handling_capability(&self, uri: &Uri) -> FileHandlingCapability {
        if uri.as_str().starts_with(&self.0) {
            FileHandlingCapability::Handled
        } else {
            FileHandlingCapability::Unhandled
        }
    }
}

fn full_change(text: &str) -> TextDocumentContentChangeEvent {
    TextDocumentContentChangeEvent {
        range: None,
        range_length: None,
        text: text.to_string(),
    }
}

async fn recv_reply(rx: &mut mpsc::UnboundedReceiver<ResponseMessage>) -> ResponseMessage {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for reply")
        .expect("reply channel closed")
}

#[tokio::test]
async fn test_query_after_update_sees_new_snapshot() {
    // A did-change scheduled immediately before a hover: the hover must
    // observe the post-change snapshot even though the update suspends.
    let documents = Arc::new(DocumentManager::new());
    let scheduler = MessageScheduler::new(CancellationLane::new());
    let target = uri("file:///w/a.swift");
    documents.open(target.clone(), Language::Swift, 1, "let foo = 1\n");

    let update_documents = documents.clone();
    let update_target = target.clone();
    scheduler.submit_notification(
        DependencyTag::DocumentUpdate(target.clone()),
        async move {
            // Suspend mid-update, as a real handler would while notifying
            // its adapter.
            tokio::time::sleep(Duration::from_millis(50)).await;
            update_documents
                .edit(&update_target, 2, &[full_change("let bar = 1\n")])
                .expect("edit applies");
        },
    );

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let query_documents = documents.clone();
    let query_target = target.clone();
    scheduler.submit_request(
        DependencyTag::DocumentRequest(target),
        ReplyHandle::new(RequestId::Number(1), reply_tx),
        async move {
            let snapshot = query_documents.latest(&query_target)?;
            Ok(serde_json::json!({
                "version": snapshot.version,
                "text": &*snapshot.text,
            }))
        },
    );

    let reply = recv_reply(&mut reply_rx).await;
    let result = reply.result.expect("query succeeds");
    assert_eq!(result["version"], 2);
    assert_eq!(result["text"], "let bar = 1\n");
}

#[tokio::test]
async fn test_update_sequence_applies_in_wire_order() {
    let documents = Arc::new(DocumentManager::new());
    let scheduler = MessageScheduler::new(CancellationLane::new());
    let target = uri("file:///w/seq.swift");
    documents.open(target.clone(), Language::Swift, 0, "");

    for version in 1..=8 {
        let documents = documents.clone();
        let target_clone = target.clone();
        scheduler.submit_notification(
            DependencyTag::DocumentUpdate(target.clone()),
            async move {
                let before = documents.latest(&target_clone).expect("open");
                let appended = format!("{}{version};", before.text);
                documents
                    .edit(&target_clone, version, &[full_change(&appended)])
                    .expect("versions arrive in order");
            },
        );
    }
    scheduler.drain().await;

    let snapshot = documents.latest(&target).expect("open");
    assert_eq!(&*snapshot.text, "1;2;3;4;5;6;7;8;");
    assert_eq!(snapshot.version, 8);
}

#[tokio::test]
async fn test_cancellation_is_isolated_per_request() {
    // Two workspaces, one long-running request in each; cancelling the one
    // in w1 leaves w2's untouched.
    let registry = WorkspaceRegistry::new();
    let w1 = Arc::new(Workspace::new(
        uri("file:///w1"),
        Arc::new(PrefixBuildSystem("file:///w1".to_string())),
        None,
    ));
    let w2 = Arc::new(Workspace::new(
        uri("file:///w2"),
        Arc::new(PrefixBuildSystem("file:///w2".to_string())),
        None,
    ));
    registry.add(w1);
    registry.add(w2);

    // Each file routes to the workspace whose build system handles it.
    let in_w1 = registry
        .workspace_for(&uri("file:///w1/a.swift"))
        .await
        .expect("routes");
    let in_w2 = registry
        .workspace_for(&uri("file:///w2/a.swift"))
        .await
        .expect("routes");
    assert_eq!(in_w1.root.as_str(), "file:///w1");
    assert_eq!(in_w2.root.as_str(), "file:///w2");

    let lane = CancellationLane::new();
    let scheduler = MessageScheduler::new(lane.clone());

    let (reply1_tx, mut reply1_rx) = mpsc::unbounded_channel();
    scheduler.submit_request(
        DependencyTag::DocumentRequest(uri("file:///w1/a.swift")),
        ReplyHandle::new(RequestId::Number(1), reply1_tx),
        async move {
            std::future::pending::<()>().await;
            Ok(serde_json::Value::Null)
        },
    );

    let (reply2_tx, mut reply2_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    scheduler.submit_request(
        DependencyTag::DocumentRequest(uri("file:///w2/a.swift")),
        ReplyHandle::new(RequestId::Number(2), reply2_tx),
        async move {
            release_rx.await.expect("released");
            Ok(serde_json::json!("w2 done"))
        },
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    lane.cancel(RequestId::Number(1));

    let cancelled = recv_reply(&mut reply1_rx).await;
    assert_eq!(
        cancelled.error.expect("w1 request cancelled").code,
        -32800
    );

    // w2's request is still alive and completes normally.
    release_tx.send(()).expect("receiver alive");
    let done = recv_reply(&mut reply2_rx).await;
    assert_eq!(done.result, Some(serde_json::json!("w2 done")));
}

#[tokio::test]
async fn test_routing_is_stable_until_invalidation() {
    let registry = WorkspaceRegistry::new();
    registry.add(Arc::new(Workspace::new(
        uri("file:///w1"),
        Arc::new(pantograph::workspace::NullBuildSystem),
        None,
    )));
    registry.add(Arc::new(Workspace::new(
        uri("file:///w2"),
        Arc::new(pantograph::workspace::NullBuildSystem),
        None,
    )));

    let target = uri("file:///w1/a.swift");
    let first = registry.workspace_for(&target).await.expect("routes");
    for _ in 0..5 {
        let again = registry.workspace_for(&target).await.expect("routes");
        assert_eq!(again.root, first.root);
    }
}

#[tokio::test]
async fn test_edit_rejects_bad_range_but_keeps_buffer() {
    let documents = DocumentManager::new();
    let target = uri("file:///w/bad.swift");
    documents.open(target.clone(), Language::Swift, 1, "fn\n");

    let reversed = TextDocumentContentChangeEvent {
        range: Some(Range::new(Position::new(1, 0), Position::new(0, 0))),
        range_length: None,
        text: "x".to_string(),
    };
    assert!(documents.edit(&target, 2, &[reversed]).is_err());
    // The buffer and version are unchanged after the failed edit.
    let snapshot = documents.latest(&target).expect("open");
    assert_eq!(snapshot.version, 1);
    assert_eq!(&*snapshot.text, "fn\n");
}
