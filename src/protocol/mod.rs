/// Generic request/response envelopes exchanged with cluster members
///
/// Encoding these onto a wire is the transport's business; the driver only
/// relies on their shape. A transaction stream carries batches of `Request`s
/// out and individual `Response` frames back, correlated by `RequestId`.
use crate::core::{Options, TransactionType};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one logical request on a transaction stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u128);

impl RequestId {
    pub fn from_parts(high: u64, low: u64) -> Self {
        RequestId(((high as u128) << 64) | low as u128)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Issues request ids that never repeat for the lifetime of the generator.
///
/// The high half is a random per-stream nonce, the low half a counter, so ids
/// stay unique under concurrent dispatch without any locking.
#[derive(Debug)]
pub struct RequestIdGenerator {
    nonce: u64,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            nonce: rand::random(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> RequestId {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        RequestId::from_parts(self.nonce, sequence)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque session token issued by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Bytes);

impl SessionId {
    pub fn new(token: impl Into<Bytes>) -> Self {
        SessionId(token.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Server answer to a session open handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpened {
    pub session_id: SessionId,
    /// Time the server spent handling the open, as reported by the server
    pub server_duration_millis: u64,
}

/// Operation carried by a transaction stream request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestKind {
    Open {
        session_id: SessionId,
        transaction_type: TransactionType,
        options: Options,
        network_latency_millis: u32,
    },
    Commit,
    Rollback,
    /// Asks for the next chunk of an in-flight streamed answer
    StreamContinue,
    /// Operation-specific payload produced by the data-model layer
    Operation(Bytes),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub kind: RequestKind,
}

impl Request {
    pub fn new(request_id: RequestId, kind: RequestKind) -> Self {
        Self { request_id, kind }
    }

    pub fn stream_continue(request_id: RequestId) -> Self {
        Self::new(request_id, RequestKind::StreamContinue)
    }

    pub fn is_stream_continue(&self) -> bool {
        matches!(self.kind, RequestKind::StreamContinue)
    }
}

/// One frame of the answer to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePart {
    /// A payload: the whole answer for single requests, one element for streams
    Answer(Bytes),
    /// Stream marker; `done = false` means more is available on request
    StreamPart { done: bool },
    /// Malformed frame with no case set
    NotSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub part: ResponsePart,
}

impl Response {
    pub fn new(request_id: RequestId, part: ResponsePart) -> Self {
        Self { request_id, part }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_request_id_display() {
        let id = RequestId::from_parts(1, 255);
        assert_eq!(id.to_string(), "000000000000000100000000000000ff");
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.to_string(), "deadbeef");
    }

    #[test]
    fn test_request_ids_unique_across_threads() {
        let generator = Arc::new(RequestIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..1000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate request id {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_stream_continue_keeps_request_id() {
        let id = RequestId::from_parts(7, 9);
        let request = Request::stream_continue(id);
        assert_eq!(request.request_id, id);
        assert!(request.is_stream_continue());
    }
}
