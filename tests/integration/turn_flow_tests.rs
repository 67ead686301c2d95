//! Turn traffic once the thread is open: streaming text, tool items,
//! results, usage, interrupts, and unsupported commands.

use std::time::Duration;

use agent_bridge::adapter::Adapter;
use agent_bridge::browser::{
    BrowserCommand, BrowserEvent, ContentBlock, Delta, ImageAttachment, StreamEvent,
};
use agent_bridge::AppError;
use serde_json::json;

use super::test_helpers::{expect_ready, next_browser, options, start, FakeBackend};

async fn ready_session() -> (Adapter, FakeBackend) {
    let (mut adapter, mut backend) = start(options());
    backend.complete_handshake("t1").await;
    expect_ready(&mut adapter.output).await;
    (adapter, backend)
}

fn tool_block(event: &BrowserEvent) -> &ContentBlock {
    match event {
        BrowserEvent::Assistant { message, .. } => &message.content[0],
        other => panic!("expected assistant message, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_command_without_start_is_backfilled_then_reported() {
    let (mut adapter, mut backend) = ready_session().await;

    backend
        .notify(
            "item/completed",
            json!({
                "threadId": "t1",
                "turnId": "u1",
                "item": {
                    "type": "commandExecution",
                    "id": "X",
                    "command": "make test",
                    "status": "failed",
                    "exitCode": 1,
                    "stderr": "boom"
                }
            }),
        )
        .await;

    let announce = next_browser(&mut adapter.output).await;
    match tool_block(&announce) {
        ContentBlock::ToolUse { id, name, input } => {
            assert_eq!(id, "X");
            assert_eq!(name, "Bash");
            assert_eq!(input["command"], "make test");
        }
        other => panic!("expected tool_use, got {other:?}"),
    }

    let result = next_browser(&mut adapter.output).await;
    match tool_block(&result) {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_use_id, "X");
            assert!(*is_error);
            assert!(content.contains("boom"), "{content}");
            assert!(content.contains("Exit code: 1"), "{content}");
        }
        other => panic!("expected tool_result, got {other:?}"),
    }
}

#[tokio::test]
async fn announced_tool_is_not_announced_twice() {
    let (mut adapter, mut backend) = ready_session().await;
    let item = json!({
        "type": "commandExecution",
        "id": "c1",
        "command": ["ls"],
        "status": "inProgress"
    });
    backend
        .notify("item/started", json!({ "item": item }))
        .await;
    assert!(matches!(
        tool_block(&next_browser(&mut adapter.output).await),
        ContentBlock::ToolUse { .. }
    ));

    backend
        .notify(
            "item/completed",
            json!({ "item": {
                "type": "commandExecution",
                "id": "c1",
                "command": ["ls"],
                "status": "completed",
                "exitCode": 0,
                "aggregatedOutput": "a.txt"
            }}),
        )
        .await;
    match tool_block(&next_browser(&mut adapter.output).await) {
        ContentBlock::ToolResult {
            content, is_error, ..
        } => {
            assert_eq!(content, "a.txt");
            assert!(!*is_error);
        }
        other => panic!("expected tool_result right after start, got {other:?}"),
    }
}

#[tokio::test]
async fn streamed_agent_message_renders_incrementally_then_whole() {
    let (mut adapter, mut backend) = ready_session().await;

    backend
        .notify(
            "item/started",
            json!({ "item": { "type": "agentMessage", "id": "a1" } }),
        )
        .await;
    for delta in ["Hel", "lo"] {
        backend
            .notify(
                "item/agentMessage/delta",
                json!({ "itemId": "a1", "delta": delta }),
            )
            .await;
    }
    backend
        .notify(
            "item/completed",
            json!({ "item": { "type": "agentMessage", "id": "a1", "text": "Hello" } }),
        )
        .await;

    assert!(matches!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::StreamEvent {
            event: StreamEvent::MessageStart { .. },
            ..
        }
    ));
    assert!(matches!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::StreamEvent {
            event: StreamEvent::ContentBlockStart { .. },
            ..
        }
    ));
    for expected in ["Hel", "lo"] {
        assert_eq!(
            next_browser(&mut adapter.output).await,
            BrowserEvent::stream(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::TextDelta {
                    text: expected.into()
                },
            })
        );
    }
    assert_eq!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::stream(StreamEvent::ContentBlockStop { index: 0 })
    );
    assert_eq!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::stream(StreamEvent::MessageStop)
    );
    assert_eq!(
        tool_block(&next_browser(&mut adapter.output).await),
        &ContentBlock::Text {
            text: "Hello".into()
        }
    );
}

#[tokio::test]
async fn turn_completion_reports_result_and_usage() {
    let (mut adapter, mut backend) = ready_session().await;

    adapter
        .handle
        .send_browser_message(BrowserCommand::UserMessage {
            content: "look".into(),
            images: vec![ImageAttachment {
                media_type: "image/png".into(),
                data: "AAAA".into(),
            }],
        })
        .await
        .expect("sent");
    let turn = backend.expect_request("turn/start").await;
    assert_eq!(turn["params"]["input"][1]["type"], "image");
    assert_eq!(
        turn["params"]["input"][1]["url"],
        "data:image/png;base64,AAAA"
    );
    backend
        .respond(&turn, json!({ "turn": { "id": "u1" } }))
        .await;

    backend
        .notify(
            "thread/tokenUsage/updated",
            json!({
                "threadId": "t1",
                "tokenUsage": {
                    "total": { "inputTokens": 900, "outputTokens": 100 },
                    "last": { "inputTokens": 200, "cachedInputTokens": 50, "outputTokens": 50 },
                    "modelContextWindow": 1000
                }
            }),
        )
        .await;
    match next_browser(&mut adapter.output).await {
        BrowserEvent::SessionUpdate { session } => {
            assert_eq!(session.context_used_percent, Some(25));
            assert!(session.model.is_none());
        }
        other => panic!("expected session_update, got {other:?}"),
    }

    backend
        .notify(
            "turn/completed",
            json!({ "threadId": "t1", "turn": { "id": "u1", "status": "completed" } }),
        )
        .await;
    match next_browser(&mut adapter.output).await {
        BrowserEvent::Result { data } => {
            assert!(!data.is_error);
            assert_eq!(data.subtype, "success");
            assert_eq!(data.num_turns, 1);
            assert_eq!(data.usage.input_tokens, 200);
            assert_eq!(data.usage.cache_read_input_tokens, 50);
            assert_eq!(data.session_id, "s1");
        }
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_turn_carries_backend_error() {
    let (mut adapter, mut backend) = ready_session().await;
    backend
        .notify(
            "turn/completed",
            json!({ "turn": { "id": "u1", "status": "failed", "error": { "message": "quota" } } }),
        )
        .await;
    match next_browser(&mut adapter.output).await {
        BrowserEvent::Result { data } => {
            assert!(data.is_error);
            assert_eq!(data.result.as_deref(), Some("quota"));
        }
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn interrupt_targets_the_active_turn() {
    let (mut adapter, mut backend) = ready_session().await;
    adapter
        .handle
        .send_browser_message(BrowserCommand::UserMessage {
            content: "go".into(),
            images: Vec::new(),
        })
        .await
        .expect("sent");
    let turn = backend.expect_request("turn/start").await;
    backend
        .respond(&turn, json!({ "turn": { "id": "u7" } }))
        .await;
    backend
        .notify("turn/started", json!({ "turn": { "id": "u7" } }))
        .await;
    // Once this message is out, the turn is known to the adapter.
    backend
        .notify(
            "item/completed",
            json!({ "item": { "type": "agentMessage", "id": "a1", "text": "working" } }),
        )
        .await;
    next_browser(&mut adapter.output).await;

    adapter
        .handle
        .send_browser_message(BrowserCommand::Interrupt)
        .await
        .expect("sent");
    let interrupt = backend.expect_request("turn/interrupt").await;
    assert_eq!(interrupt["params"]["threadId"], "t1");
    assert_eq!(interrupt["params"]["turnId"], "u7");
}

#[tokio::test]
async fn runtime_switches_are_declined() {
    let (adapter, _backend) = ready_session().await;
    let err = adapter
        .handle
        .send_browser_message(BrowserCommand::SetModel {
            model: "other".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unsupported(_)));

    let err = adapter
        .handle
        .send_browser_message(BrowserCommand::SetPermissionMode {
            mode: "plan".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unsupported(_)));
}

#[tokio::test]
async fn malformed_backend_lines_do_not_end_the_session() {
    let (mut adapter, mut backend) = ready_session().await;
    backend.send_raw("{not json").await;
    backend.send_raw("[1,2,3]").await;
    backend
        .send(json!({ "id": 4242, "result": {} }))
        .await;
    backend
        .notify(
            "item/completed",
            json!({ "item": { "type": "agentMessage", "id": "a9", "text": "still here" } }),
        )
        .await;

    assert_eq!(
        tool_block(&next_browser(&mut adapter.output).await),
        &ContentBlock::Text {
            text: "still here".into()
        }
    );
}

#[tokio::test]
async fn turn_completed_right_after_start_response_clears_active_turn() {
    let (mut adapter, mut backend) = ready_session().await;
    adapter
        .handle
        .send_browser_message(BrowserCommand::UserMessage {
            content: "quick".into(),
            images: Vec::new(),
        })
        .await
        .expect("sent");
    let turn = backend.expect_request("turn/start").await;

    // Both frames in one write, as a fast backend would send them.
    let burst = format!(
        "{}\n{}",
        json!({ "id": turn["id"], "result": { "turn": { "id": "u1" } } }),
        json!({ "method": "turn/completed", "params": { "turn": { "id": "u1", "status": "completed" } } }),
    );
    backend.send_raw(&burst).await;
    assert!(matches!(
        next_browser(&mut adapter.output).await,
        BrowserEvent::Result { .. }
    ));

    adapter
        .handle
        .send_browser_message(BrowserCommand::Interrupt)
        .await
        .expect("sent");
    adapter
        .handle
        .send_browser_message(BrowserCommand::UserMessage {
            content: "next".into(),
            images: Vec::new(),
        })
        .await
        .expect("sent");

    let frame = backend.recv().await;
    assert_eq!(frame["method"], "turn/start", "interrupt reached the backend: {frame}");
    assert_eq!(frame["params"]["input"][0]["text"], "next");
}

#[tokio::test]
async fn second_message_mid_turn_keeps_first_turn_clock() {
    let (mut adapter, mut backend) = ready_session().await;
    let say = |text: &str| BrowserCommand::UserMessage {
        content: text.into(),
        images: Vec::new(),
    };

    adapter.handle.send_browser_message(say("first")).await.expect("sent");
    let turn = backend.expect_request("turn/start").await;
    backend
        .respond(&turn, json!({ "turn": { "id": "u1" } }))
        .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    adapter.handle.send_browser_message(say("second")).await.expect("sent");
    backend.expect_request("turn/start").await;

    backend
        .notify(
            "turn/completed",
            json!({ "turn": { "id": "u1", "status": "completed" } }),
        )
        .await;
    match next_browser(&mut adapter.output).await {
        BrowserEvent::Result { data } => {
            assert!(data.duration_ms >= 150, "duration {}", data.duration_ms);
        }
        other => panic!("expected result, got {other:?}"),
    }
}

#[tokio::test]
async fn tool_item_with_malformed_field_still_gets_a_result() {
    let (mut adapter, mut backend) = ready_session().await;
    backend
        .notify(
            "item/completed",
            json!({ "item": {
                "type": "commandExecution",
                "id": "c5",
                "command": "ls",
                "exitCode": "zero"
            }}),
        )
        .await;

    match tool_block(&next_browser(&mut adapter.output).await) {
        ContentBlock::ToolUse { id, name, .. } => {
            assert_eq!(id, "c5");
            assert_eq!(name, "Bash");
        }
        other => panic!("expected backfilled tool_use, got {other:?}"),
    }
    match tool_block(&next_browser(&mut adapter.output).await) {
        ContentBlock::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "c5"),
        other => panic!("expected tool_result, got {other:?}"),
    }
}
