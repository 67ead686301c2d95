//! Backend writer task.
//!
//! Receives outbound JSON values from a tokio [`mpsc`] channel, serialises
//! each to a single-line JSON string, and writes the NDJSON frame to the
//! backend's stdin through a [`FramedWrite`] over [`RpcCodec`].
//!
//! This task is the only writer on the stream, so every frame is written
//! whole and in the order it was queued, regardless of how many producers
//! hold a sender.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::codec::RpcCodec;
use crate::{AppError, Result};

/// Backend writer task — serialises outbound messages and writes to `stdin`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (graceful shutdown), or
/// - `msg_rx` is closed (all senders dropped).
///
/// # Errors
///
/// - [`AppError::Rpc`]`("failed to serialise outbound message: …")` if
///   serialisation fails (should not occur for `Value`).
/// - [`AppError::Io`] / [`AppError::Rpc`] if the write to `stdin` fails
///   (e.g. the backend process has exited).
pub async fn run_writer<W>(
    session_id: String,
    stdin: W,
    mut msg_rx: mpsc::Receiver<serde_json::Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, RpcCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session_id, "rpc writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(value) = msg else {
                    debug!(session_id, "rpc writer: message channel closed, stopping");
                    break;
                };

                let line = serde_json::to_string(&value).map_err(|e| {
                    AppError::Rpc(format!("failed to serialise outbound message: {e}"))
                })?;

                // `send` flushes, so the frame is on the pipe before the next one is taken.
                framed.send(line).await.map_err(|e| {
                    warn!(session_id, error = %e, "rpc writer: write to stdin failed");
                    e
                })?;
            }
        }
    }

    Ok(())
}
