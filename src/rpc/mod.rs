//! Line-delimited JSON-RPC plumbing for the backend process.
//!
//! Each adapter session owns one reader task, one writer task, and one
//! [`Correlator`](correlator::Correlator) bound to a single child process.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `message`: shape-based classification of requests, notifications and responses.
//! - `reader`: async read task delivering classified messages in arrival order.
//! - `writer`: async write task; the single writer on the stream.
//! - `correlator`: id allocation, pending-call arena, response routing.

pub mod codec;
pub mod correlator;
pub mod message;
pub mod reader;
pub mod writer;
