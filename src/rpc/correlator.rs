//! Request/response correlation on top of the line transport.
//!
//! The [`Correlator`] owns the outbound id counter and the arena of pending
//! calls.  It is owned by exactly one session actor and is never shared, so
//! no locking is involved: the actor hands every inbound [`RpcMessage`] to
//! [`Correlator::dispatch`], which resolves responses in place and returns
//! requests and notifications for the actor to handle.
//!
//! # Pending-call lifecycle
//!
//! 1. [`Correlator::call`] allocates the next id, inserts a slot, and writes
//!    the request.
//! 2. The slot is removed exactly once: by the matching response in
//!    [`Correlator::dispatch`], by [`Correlator::abandon`], or by
//!    [`Correlator::cancel_all`] when the owner tears the session down.
//! 3. Responses whose id has no slot are discarded without side effects.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::rpc::message::{RequestId, RpcMessage};
use crate::{AppError, Result};

/// Outcome delivered to a pending call.
pub type CallOutcome = Result<Value>;

/// Handle to an outstanding outbound call.
#[derive(Debug)]
pub struct PendingCall {
    id: i64,
    method: String,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingCall {
    /// Id allocated for this call.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Method this call was issued for.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait for the peer's answer.
    ///
    /// # Errors
    ///
    /// - [`AppError::Rpc`] with the peer's message when the peer answered
    ///   with an error.
    /// - [`AppError::Disconnected`] when the slot was dropped without an
    ///   answer (bulk cancel or correlator dropped).
    pub async fn wait(self) -> CallOutcome {
        let id = self.id;
        let method = self.method;
        self.rx.await.unwrap_or_else(|_| {
            Err(AppError::Disconnected(format!(
                "call {id} ({method}) cancelled before a response arrived"
            )))
        })
    }

    /// Take the answer without waiting, once [`Dispatch::Resolved`] has
    /// been reported for this call's id.
    ///
    /// # Errors
    ///
    /// As for [`PendingCall::wait`]; also [`AppError::Disconnected`] when no
    /// answer has been delivered yet.
    pub fn take_resolved(mut self) -> CallOutcome {
        let id = self.id;
        let method = std::mem::take(&mut self.method);
        self.rx.try_recv().unwrap_or_else(|_| {
            Err(AppError::Disconnected(format!(
                "call {id} ({method}) has no answer"
            )))
        })
    }
}

/// What [`Correlator::dispatch`] did with an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// A response was routed to its pending call.
    Resolved {
        /// Id of the call that was resolved.
        id: i64,
    },
    /// A response had no pending call and was dropped.
    Discarded {
        /// Id carried by the orphan response.
        id: RequestId,
    },
    /// A peer-initiated request that needs [`Correlator::respond`].
    Request {
        /// Peer's correlation id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Parameters.
        params: Value,
    },
    /// A peer notification.
    Notification {
        /// Method name.
        method: String,
        /// Parameters.
        params: Value,
    },
}

/// Outbound id allocation and pending-call routing for one backend stream.
#[derive(Debug)]
pub struct Correlator {
    session_id: String,
    outbound: mpsc::Sender<Value>,
    next_id: i64,
    pending: HashMap<i64, PendingSlot>,
    connected: bool,
}

#[derive(Debug)]
struct PendingSlot {
    method: String,
    tx: oneshot::Sender<CallOutcome>,
}

impl Correlator {
    /// Create a correlator writing frames into `outbound`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, outbound: mpsc::Sender<Value>) -> Self {
        Self {
            session_id: session_id.into(),
            outbound,
            next_id: 1,
            pending: HashMap::new(),
            connected: true,
        }
    }

    /// Issue a request and register its pending slot.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disconnected`] if the correlator is disconnected
    /// or the writer has gone away; no slot is left behind in either case.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<PendingCall> {
        if !self.connected {
            return Err(AppError::Disconnected(format!(
                "cannot call {method}: backend not connected"
            )));
        }

        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        debug_assert!(!self.pending.contains_key(&id), "rpc id {id} reused");
        self.pending.insert(
            id,
            PendingSlot {
                method: method.to_owned(),
                tx,
            },
        );

        let frame = RpcMessage::Request {
            id: RequestId::Number(id),
            method: method.to_owned(),
            params,
        };
        if let Err(e) = self.write(frame).await {
            self.pending.remove(&id);
            return Err(e);
        }

        debug!(session_id = %self.session_id, id, method, "rpc: call sent");
        Ok(PendingCall {
            id,
            method: method.to_owned(),
            rx,
        })
    }

    /// Send a notification; nothing is registered.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disconnected`] if the writer has gone away.
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.write(RpcMessage::Notification {
            method: method.to_owned(),
            params,
        })
        .await
    }

    /// Answer a request previously received from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Disconnected`] if the writer has gone away.
    pub async fn respond(&mut self, id: &RequestId, result: Value) -> Result<()> {
        self.write(RpcMessage::Response {
            id: id.clone(),
            outcome: Ok(result),
        })
        .await
    }

    /// Classify an inbound message, resolving responses in place.
    pub fn dispatch(&mut self, msg: RpcMessage) -> Dispatch {
        match msg {
            RpcMessage::Response { id, outcome } => {
                let Some(slot) = id.as_number().and_then(|n| self.pending.remove_entry(&n)) else {
                    debug!(session_id = %self.session_id, %id, "rpc: discarding response with no pending call");
                    return Dispatch::Discarded { id };
                };
                let (num, slot) = slot;
                let outcome = outcome.map_err(|body| {
                    AppError::Rpc(format!("{} failed: {}", slot.method, body.message))
                });
                if slot.tx.send(outcome).is_err() {
                    debug!(session_id = %self.session_id, id = num, "rpc: caller no longer waiting");
                }
                Dispatch::Resolved { id: num }
            }
            RpcMessage::Request { id, method, params } => Dispatch::Request { id, method, params },
            RpcMessage::Notification { method, params } => {
                Dispatch::Notification { method, params }
            }
        }
    }

    /// Drop the slot for `id` without answering it (e.g. after a local timeout).
    ///
    /// Returns `true` if a slot was removed.
    pub fn abandon(&mut self, id: i64) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Fail every pending call with [`AppError::Disconnected`].
    ///
    /// Returns the number of calls failed.  The arena is empty afterwards.
    pub fn cancel_all(&mut self, reason: &str) -> usize {
        let count = self.pending.len();
        for (id, slot) in self.pending.drain() {
            let _ = slot.tx.send(Err(AppError::Disconnected(format!(
                "call {id} ({}) cancelled: {reason}",
                slot.method
            ))));
        }
        if count > 0 {
            warn!(session_id = %self.session_id, count, reason, "rpc: cancelled pending calls");
        }
        count
    }

    /// Stop accepting new calls.
    ///
    /// Pending calls are left for the owner to cancel; see
    /// [`Correlator::cancel_all`].
    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Whether new calls are accepted.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of calls awaiting a response.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    async fn write(&self, frame: RpcMessage) -> Result<()> {
        self.outbound.send(frame.to_value()).await.map_err(|_| {
            AppError::Disconnected(format!(
                "writer closed for session '{}'",
                self.session_id
            ))
        })
    }
}
