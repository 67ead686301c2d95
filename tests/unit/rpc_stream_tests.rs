//! Unit tests for NDJSON framing, message classification, and the reader task.

use bytes::BytesMut;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

use agent_bridge::rpc::codec::{Frame, RpcCodec};
use agent_bridge::rpc::message::{RequestId, RpcMessage};
use agent_bridge::rpc::reader::{parse_inbound_line, run_reader, Inbound};
use agent_bridge::rpc::writer::run_writer;
use agent_bridge::AppError;

// ── Codec ────────────────────────────────────────────────────────────────────

#[test]
fn batched_lines_decode_one_at_a_time() {
    let mut codec = RpcCodec::new();
    let mut buf = BytesMut::from("{\"method\":\"a\"}\n{\"method\":\"b\"}\n");

    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Line("{\"method\":\"a\"}".into()))
    );
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some(Frame::Line("{\"method\":\"b\"}".into()))
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn over_long_line_is_skipped_and_next_line_survives() {
    let mut codec = RpcCodec::with_max_length(16);
    let mut buf = BytesMut::from(format!("{}\n{{\"id\":1}}\n", "x".repeat(64)).as_str());

    let mut frames = Vec::new();
    for _ in 0..8 {
        if let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
    }
    assert!(matches!(frames.first(), Some(Frame::Skipped(_))));
    assert_eq!(frames.last(), Some(&Frame::Line("{\"id\":1}".into())));
}

// ── Classification ───────────────────────────────────────────────────────────

#[test]
fn blank_line_is_ignored() {
    assert_eq!(parse_inbound_line("   ").unwrap(), None);
}

#[test]
fn shapes_classify_by_present_fields() {
    let request = parse_inbound_line(r#"{"id":"r1","method":"item/fileChange/requestApproval","params":{}}"#)
        .unwrap()
        .unwrap();
    assert!(matches!(
        request,
        RpcMessage::Request { id: RequestId::Text(ref s), .. } if s == "r1"
    ));

    let note = parse_inbound_line(r#"{"method":"turn/started"}"#)
        .unwrap()
        .unwrap();
    assert_eq!(
        note,
        RpcMessage::Notification {
            method: "turn/started".into(),
            params: serde_json::Value::Null,
        }
    );

    let response = parse_inbound_line(r#"{"id":3,"result":{"ok":true}}"#)
        .unwrap()
        .unwrap();
    assert_eq!(
        response,
        RpcMessage::Response {
            id: RequestId::Number(3),
            outcome: Ok(json!({"ok": true})),
        }
    );
}

#[test]
fn malformed_json_is_an_rpc_error() {
    match parse_inbound_line("{oops") {
        Err(AppError::Rpc(msg)) => assert!(msg.starts_with("malformed json")),
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[test]
fn frame_without_id_or_method_is_rejected() {
    assert!(matches!(
        parse_inbound_line(r#"{"result":1}"#),
        Err(AppError::Rpc(_))
    ));
}

// ── Reader task ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn reader_forwards_in_order_skips_garbage_and_reports_eof() {
    let (mut backend, adapter_side) = tokio::io::duplex(4096);
    let (tx, mut rx) = mpsc::channel(16);
    let task = tokio::spawn(run_reader(
        "s1".into(),
        adapter_side,
        tx,
        CancellationToken::new(),
    ));

    backend
        .write_all(b"{\"method\":\"one\"}\nnot json\n\n{\"method\":\"two\"}\n")
        .await
        .unwrap();
    drop(backend);

    let mut methods = Vec::new();
    loop {
        match rx.recv().await.expect("reader closes with an item") {
            Inbound::Message(msg) => methods.push(msg.method().unwrap_or_default().to_owned()),
            Inbound::Closed { reason } => {
                assert_eq!(reason, "stream closed");
                break;
            }
        }
    }
    assert_eq!(methods, ["one", "two"]);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancelled_reader_exits_without_close_item() {
    let (_backend, adapter_side) = tokio::io::duplex(64);
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run_reader("s1".into(), adapter_side, tx, cancel.clone()));

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert!(rx.recv().await.is_none());
}

// ── Writer task ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn writer_emits_one_line_per_message_in_order() {
    let (adapter_side, backend) = tokio::io::duplex(4096);
    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run_writer(
        "s1".into(),
        adapter_side,
        rx,
        CancellationToken::new(),
    ));

    tx.send(json!({"id": 1, "method": "initialize", "params": {}}))
        .await
        .unwrap();
    tx.send(json!({"method": "initialized", "params": {}}))
        .await
        .unwrap();
    drop(tx);
    task.await.unwrap().unwrap();

    let mut lines = BufReader::new(backend).lines();
    let first: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    let second: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(first["method"], "initialize");
    assert_eq!(second["method"], "initialized");
}
