//! Disconnection: approvals withdrawn, pending calls failed, exactly once.

use std::collections::HashSet;

use agent_bridge::adapter::{AdapterOutput, AdapterState};
use agent_bridge::browser::{BrowserCommand, BrowserEvent};
use agent_bridge::AppError;
use serde_json::json;

use super::test_helpers::{expect_ready, next_browser, next_output, options, start};

#[tokio::test]
async fn pending_approvals_are_cancelled_on_stream_close() {
    let (mut adapter, mut backend) = start(options());
    backend.complete_handshake("t1").await;
    expect_ready(&mut adapter.output).await;

    let mut issued = HashSet::new();
    for id in 1..=3 {
        backend
            .send(json!({
                "id": 100 + id,
                "method": "item/commandExecution/requestApproval",
                "params": { "itemId": format!("c{id}"), "command": "rm -rf /" }
            }))
            .await;
        match next_browser(&mut adapter.output).await {
            BrowserEvent::PermissionRequest { request } => {
                issued.insert(request.request_id);
            }
            other => panic!("expected permission_request, got {other:?}"),
        }
    }

    drop(backend);

    let mut cancelled = HashSet::new();
    for _ in 0..3 {
        match next_browser(&mut adapter.output).await {
            BrowserEvent::PermissionCancelled { request_id } => {
                cancelled.insert(request_id);
            }
            other => panic!("expected permission_cancelled, got {other:?}"),
        }
    }
    assert_eq!(cancelled, issued);
    assert_eq!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::CliDisconnected
    );
    assert!(matches!(
        next_output(&mut adapter.output).await,
        AdapterOutput::Disconnected { .. }
    ));
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let (mut adapter, mut backend) = start(options());
    backend.complete_handshake("t1").await;
    expect_ready(&mut adapter.output).await;

    adapter.handle.shutdown("user closed tab").await;
    adapter.handle.shutdown("user closed tab").await;

    assert_eq!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::CliDisconnected
    );
    match next_output(&mut adapter.output).await {
        AdapterOutput::Disconnected { reason } => assert_eq!(reason, "user closed tab"),
        other => panic!("expected disconnected, got {other:?}"),
    }

    adapter.task.await.expect("actor finished");
    assert!(adapter.output.recv().await.is_none(), "nothing after disconnect");
    assert_eq!(adapter.handle.state(), AdapterState::Disconnected);

    // Further commands fail fast and shutdown stays harmless.
    let err = adapter
        .handle
        .send_browser_message(BrowserCommand::Interrupt)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Disconnected(_)));
    adapter.handle.shutdown("again").await;
}

#[tokio::test]
async fn in_flight_turn_start_is_failed_on_disconnect() {
    let (mut adapter, mut backend) = start(options());
    backend.complete_handshake("t1").await;
    expect_ready(&mut adapter.output).await;

    adapter
        .handle
        .send_browser_message(BrowserCommand::UserMessage {
            content: "hi".into(),
            images: Vec::new(),
        })
        .await
        .expect("sent");
    backend.expect_request("turn/start").await;
    drop(backend);

    // The unanswered call is cancelled silently; only the disconnect shows.
    assert_eq!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::CliDisconnected
    );
    assert!(matches!(
        next_output(&mut adapter.output).await,
        AdapterOutput::Disconnected { .. }
    ));
    adapter.task.await.expect("actor finished");
}
