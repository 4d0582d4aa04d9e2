//! Integration tests for the backend channel against the mock backend.
//!
//! `mockbackend` is built alongside the test binaries; these tests spawn
//! it as a real child process and exercise the framed payload transport,
//! cancellation, and crash reporting end to end.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use pantograph::backend::{BackendChannel, CrashEvent};
use pantograph::error::Error;
use pantograph::payload::{DictBuilder, Payload};
use pantograph::service::SemaService;
use pantograph::workspace::NullBuildSystem;

/// Locate the mockbackend binary in the same directory as the test
/// executable. During `cargo test`, all binaries are built into the same
/// `target/debug` parent directory.
fn mockbackend_bin() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .map(|p| p.join("mockbackend"))
        .unwrap_or_else(|| PathBuf::from("mockbackend"))
}

fn crash_event() -> CrashEvent {
    CrashEvent {
        workspace_root: "file:///w".to_string(),
        backend: "sema".to_string(),
    }
}

async fn spawn_channel(
    args: &[String],
) -> Result<(BackendChannel, mpsc::UnboundedReceiver<CrashEvent>)> {
    let (crash_tx, crash_rx) = mpsc::unbounded_channel();
    let channel = BackendChannel::spawn(
        &mockbackend_bin().to_string_lossy(),
        args,
        crash_event(),
        crash_tx,
    )
    .await?;
    Ok((channel, crash_rx))
}

#[tokio::test]
async fn test_initialize_handshake_and_request() -> Result<()> {
    let (channel, _crash_rx) = spawn_channel(&[]).await?;
    assert!(channel.is_alive());

    let keys = channel.keys();
    let request = DictBuilder::new()
        .set(keys.request, Payload::Uid(keys.request_cursor_info))
        .set(keys.offset, Payload::Int(4))
        .build();
    let response = channel.send(channel.fresh_handle(), request, None).await?;
    assert_eq!(
        response.get(keys.name).and_then(Payload::as_str),
        Some("mockSymbol")
    );
    assert_eq!(
        response.get(keys.usr).and_then(Payload::as_str),
        Some("s:mock:mockSymbol")
    );
    Ok(())
}

#[tokio::test]
async fn test_concurrent_requests_demultiplex() -> Result<()> {
    let (channel, _crash_rx) = spawn_channel(&[]).await?;
    let channel = Arc::new(channel);
    let keys = channel.keys();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let channel = channel.clone();
        handles.push(tokio::spawn(async move {
            let request = DictBuilder::new()
                .set(keys.request, Payload::Uid(keys.request_related_idents))
                .build();
            channel.send(channel.fresh_handle(), request, None).await
        }));
    }
    for handle in handles {
        let response = handle.await??;
        assert!(response.get(keys.results).is_some());
    }
    Ok(())
}

#[tokio::test]
async fn test_unknown_request_is_version_not_supported() -> Result<()> {
    let (channel, _crash_rx) = spawn_channel(&[]).await?;
    let keys = channel.keys();
    let bogus = channel.table().intern("mock.unknown-request");
    let request = DictBuilder::new()
        .set(keys.request, Payload::Uid(bogus))
        .build();
    let err = channel
        .send(channel.fresh_handle(), request, None)
        .await
        .expect_err("unknown request must fail");
    let typed: Error = err.into();
    assert!(matches!(typed, Error::VersionNotSupported(_)), "{typed:?}");
    Ok(())
}

#[tokio::test]
async fn test_cancel_overtakes_blocked_request() -> Result<()> {
    let (channel, _crash_rx) = spawn_channel(&[]).await?;
    let channel = Arc::new(channel);
    let keys = channel.keys();
    let block = channel.table().intern("mock.block");

    let handle = channel.fresh_handle();
    let sender = channel.clone();
    let in_flight = tokio::spawn(async move {
        let request = DictBuilder::new()
            .set(keys.request, Payload::Uid(block))
            .build();
        sender.send(handle, request, None).await
    });

    // Let the request reach the backend, then overtake it.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    channel.cancel(handle).await;

    let err = in_flight.await?.expect_err("blocked request must fail");
    let typed: Error = err.into();
    assert!(matches!(typed, Error::Cancelled), "{typed:?}");
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_reply_is_harmless() -> Result<()> {
    let (channel, _crash_rx) = spawn_channel(&[]).await?;
    let keys = channel.keys();
    let handle = channel.fresh_handle();
    let request = DictBuilder::new()
        .set(keys.request, Payload::Uid(keys.request_related_idents))
        .build();
    channel.send(handle, request, None).await?;
    channel.cancel(handle).await;
    assert!(channel.is_alive());
    Ok(())
}

#[tokio::test]
async fn test_crash_fails_pending_and_reports_event() -> Result<()> {
    let (channel, mut crash_rx) =
        spawn_channel(&["--crash-on".to_string(), "mock.explode".to_string()]).await?;
    let keys = channel.keys();
    let explode = channel.table().intern("mock.explode");

    let request = DictBuilder::new()
        .set(keys.request, Payload::Uid(explode))
        .build();
    let result = channel.send(channel.fresh_handle(), request, None).await;
    assert!(result.is_err(), "request must fail when the backend dies");

    let event = tokio::time::timeout(std::time::Duration::from_secs(5), crash_rx.recv())
        .await?
        .expect("crash event must be reported");
    assert_eq!(event.backend, "sema");
    assert_eq!(event.workspace_root, "file:///w");
    assert!(!channel.is_alive());
    Ok(())
}

#[tokio::test]
async fn test_sema_adapter_handshake() -> Result<()> {
    let (crash_tx, _crash_rx) = mpsc::unbounded_channel();
    let adapter = SemaService::launch(
        &mockbackend_bin().to_string_lossy(),
        &[],
        "file:///w".parse().unwrap(),
        Arc::new(NullBuildSystem),
        crash_tx,
    )
    .await?;
    use pantograph::service::LanguageService;
    let capabilities = adapter.capabilities();
    assert!(capabilities.incremental_sync);
    assert!(capabilities.rename_ranges);
    assert_eq!(capabilities.completion_triggers, vec![".".to_string()]);
    adapter.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_non_incremental_backend_is_fatal() {
    let (crash_tx, _crash_rx) = mpsc::unbounded_channel();
    let result = SemaService::launch(
        &mockbackend_bin().to_string_lossy(),
        &["--no-incremental".to_string()],
        "file:///w".parse().unwrap(),
        Arc::new(NullBuildSystem),
        crash_tx,
    )
    .await;
    let err = result.expect_err("non-incremental sync must be fatal");
    assert!(err.to_string().contains("incremental"), "{err:#}");
}
