//! Backend reader task.
//!
//! Reads newline-delimited JSON messages from the backend's stdout, classifies
//! each line into an [`RpcMessage`], and forwards the results through a tokio
//! [`mpsc`] channel in arrival order.
//!
//! The reader is driven by [`FramedRead`] backed by [`RpcCodec`], which
//! enforces the per-line limit before any heap allocation for JSON parsing.
//! Malformed lines are logged and skipped; only end-of-stream or an I/O
//! failure ends the task, and both are reported as [`Inbound::Closed`].

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::rpc::codec::{Frame, RpcCodec};
use crate::rpc::message::RpcMessage;
use crate::{AppError, Result};

/// Item delivered by the reader to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A classified message from the backend.
    Message(RpcMessage),
    /// The stream ended or failed; no further items follow.
    Closed {
        /// Human-readable reason.
        reason: String,
    },
}

/// Parse a single NDJSON line from the backend stream.
///
/// # Return value
///
/// - `Ok(Some(msg))` — the line is a well-formed RPC message.
/// - `Ok(None)` — the line is empty or whitespace.
/// - `Err(AppError::Rpc(...))` — the line is not valid JSON or matches no
///   message shape.
///
/// # Errors
///
/// - [`AppError::Rpc`]`("malformed json: …")` — not valid JSON.
/// - [`AppError::Rpc`] from [`RpcMessage::classify`] — unclassifiable shape.
pub fn parse_inbound_line(line: &str) -> Result<Option<RpcMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| AppError::Rpc(format!("malformed json: {e}")))?;

    RpcMessage::classify(value).map(Some)
}

/// Backend reader task — reads NDJSON lines from `stdout` and emits
/// [`Inbound`] items.
///
/// On clean EOF, sends [`Inbound::Closed`] with `reason: "stream closed"`
/// before returning.  On an unrecoverable I/O error, sends
/// [`Inbound::Closed`] with `reason: "stream error: …"`.
///
/// # Cancellation
///
/// Respects `cancel`: when the token fires the reader exits without emitting
/// a close item; the owner is tearing down already.
///
/// # Errors
///
/// Always returns `Ok(())`; failures are reported through the channel.
pub async fn run_reader<R>(
    session_id: String,
    stdout: R,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, RpcCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "rpc reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(session_id, "rpc reader: EOF detected");
                        send_closed(&inbound_tx, &session_id, "stream closed").await;
                        break;
                    }

                    Some(Err(e)) => {
                        warn!(session_id, error = %e, "rpc reader: IO error, stopping");
                        send_closed(&inbound_tx, &session_id, &format!("stream error: {e}")).await;
                        break;
                    }

                    Some(Ok(Frame::Skipped(reason))) => {
                        warn!(session_id, reason, "rpc reader: framing error, skipping line");
                    }

                    Some(Ok(Frame::Line(line))) => {
                        match parse_inbound_line(&line) {
                            Ok(Some(msg)) => {
                                trace!(session_id, method = ?msg.method(), "rpc reader: message");
                                if inbound_tx.send(Inbound::Message(msg)).await.is_err() {
                                    debug!(session_id, "rpc reader: inbound_tx closed, stopping");
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(
                                    session_id,
                                    error = %e,
                                    raw_line = %line,
                                    "rpc reader: parse error, skipping line"
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Send [`Inbound::Closed`] through `inbound_tx`, logging on failure.
async fn send_closed(inbound_tx: &mpsc::Sender<Inbound>, session_id: &str, reason: &str) {
    let item = Inbound::Closed {
        reason: reason.to_owned(),
    };

    if inbound_tx.send(item).await.is_err() {
        debug!(
            session_id,
            "rpc reader: inbound_tx closed before close could be delivered"
        );
    }
}
