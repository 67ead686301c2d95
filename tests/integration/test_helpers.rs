//! Shared helpers for adapter integration tests.
//!
//! [`FakeBackend`] plays the backend side of an adapter over in-memory
//! duplex pipes so tests can script the exact frames the adapter sees and
//! assert on every frame it writes.

use std::time::Duration;

use agent_bridge::adapter::{spawn_adapter, Adapter, AdapterOptions, AdapterOutput};
use agent_bridge::browser::BrowserEvent;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::mpsc;

/// Upper bound on any single wait in these tests.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend side of the adapter's stdio.
pub struct FakeBackend {
    lines: Lines<BufReader<DuplexStream>>,
    writer: DuplexStream,
}

impl FakeBackend {
    /// Next frame written by the adapter.
    pub async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(STEP_TIMEOUT, self.lines.next_line())
            .await
            .expect("adapter wrote nothing in time")
            .expect("read from adapter")
            .expect("adapter closed its stdin");
        serde_json::from_str(&line).expect("adapter frame is json")
    }

    /// Next frame, which must be a request for `method`; returns it whole.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["method"], method, "unexpected frame {frame}");
        assert!(frame.get("id").is_some(), "{method} must carry an id");
        frame
    }

    /// Next frame, which must be a notification for `method`.
    pub async fn expect_notification(&mut self, method: &str) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["method"], method, "unexpected frame {frame}");
        assert!(frame.get("id").is_none(), "{method} must not carry an id");
        frame
    }

    /// Write one raw line to the adapter.
    pub async fn send_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write to adapter");
    }

    /// Write one JSON frame to the adapter.
    pub async fn send(&mut self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    /// Answer the request `request` with `result`.
    pub async fn respond(&mut self, request: &Value, result: Value) {
        self.send(json!({ "id": request["id"], "result": result }))
            .await;
    }

    /// Send a notification.
    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "method": method, "params": params })).await;
    }

    /// Run the handshake through to an open thread `thread_id`; returns the
    /// thread request the adapter sent.
    pub async fn complete_handshake(&mut self, thread_id: &str) -> Value {
        let init = self.expect_request("initialize").await;
        self.respond(&init, json!({ "userAgent": "fake/0.0.0" })).await;
        self.expect_notification("initialized").await;
        let open = self.recv().await;
        assert!(
            open["method"] == "thread/start" || open["method"] == "thread/resume",
            "unexpected frame {open}"
        );
        self.respond(&open, json!({ "thread": { "id": thread_id } }))
            .await;
        open
    }
}

/// Spawn an adapter wired to a fresh [`FakeBackend`].
pub fn start(options: AdapterOptions) -> (Adapter, FakeBackend) {
    let (backend_out, adapter_in) = tokio::io::duplex(64 * 1024);
    let (adapter_out, backend_in) = tokio::io::duplex(64 * 1024);
    let adapter = spawn_adapter(options, adapter_in, adapter_out);
    let backend = FakeBackend {
        lines: BufReader::new(backend_in).lines(),
        writer: backend_out,
    };
    (adapter, backend)
}

/// Default options for session `s1` rooted at `/tmp`.
pub fn options() -> AdapterOptions {
    AdapterOptions::new("s1", "/tmp")
}

/// Next adapter output of any kind.
pub async fn next_output(output: &mut mpsc::Receiver<AdapterOutput>) -> AdapterOutput {
    tokio::time::timeout(STEP_TIMEOUT, output.recv())
        .await
        .expect("adapter emitted nothing in time")
        .expect("adapter output closed")
}

/// Next browser event, skipping session metadata notices.
pub async fn next_browser(output: &mut mpsc::Receiver<AdapterOutput>) -> BrowserEvent {
    loop {
        match next_output(output).await {
            AdapterOutput::Browser(event) => return event,
            AdapterOutput::SessionMeta(_) => {}
            other => panic!("expected a browser event, got {other:?}"),
        }
    }
}

/// Consume `session_init`, the metadata notice, and `cli_connected`.
pub async fn expect_ready(output: &mut mpsc::Receiver<AdapterOutput>) -> BrowserEvent {
    let init = next_output(output).await;
    let AdapterOutput::Browser(init @ BrowserEvent::SessionInit { .. }) = init else {
        panic!("expected session_init, got {init:?}");
    };
    assert!(matches!(
        next_output(output).await,
        AdapterOutput::SessionMeta(_)
    ));
    assert_eq!(
        next_output(output).await,
        AdapterOutput::Browser(BrowserEvent::CliConnected)
    );
    init
}
