/// Incoming half of a transaction stream: per-request mailboxes
///
/// Every dispatched request owns one queue, keyed by its request id. The
/// stream's reader pushes frames into the matching queue in arrival order.
/// When the stream ends, every waiting queue receives the terminal error.
use crate::error::{DriverError, DriverResult};
use crate::protocol::{RequestId, Response, ResponsePart};
use fnv::FnvHashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Mailbox = mpsc::UnboundedSender<DriverResult<ResponsePart>>;

#[derive(Debug, Default)]
struct CollectorState {
    queues: FnvHashMap<RequestId, Mailbox>,
    closed: Option<DriverError>,
}

#[derive(Debug, Default)]
pub struct ResponseCollector {
    state: Mutex<CollectorState>,
}

impl ResponseCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the queue for a request about to be dispatched.
    ///
    /// On a closed collector the queue yields the closing error straight away.
    pub fn register(&self, request_id: RequestId) -> ResponseQueue {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state();
        match &state.closed {
            Some(error) => {
                let _ = sender.send(Err(error.clone()));
            }
            None => {
                state.queues.insert(request_id, sender);
            }
        }
        ResponseQueue { request_id, receiver }
    }

    /// Route one frame to its request's queue.
    ///
    /// A frame for an id with no queue is a protocol violation.
    pub fn put(&self, response: Response) -> DriverResult<()> {
        let state = self.state();
        match state.queues.get(&response.request_id) {
            Some(mailbox) => {
                // The waiter may have given up; its frames are discarded.
                let _ = mailbox.send(Ok(response.part));
                Ok(())
            }
            None => Err(DriverError::illegal_state(format!(
                "received a response for unknown request '{}'",
                response.request_id
            ))),
        }
    }

    /// Discard a request's queue once its terminal frame is consumed
    pub fn remove(&self, request_id: &RequestId) {
        self.state().queues.remove(request_id);
    }

    /// Fail every waiting queue with `error` and refuse further registrations.
    ///
    /// Only the first close decides the error reported to later callers.
    pub fn close(&self, error: DriverError) {
        let mut state = self.state();
        if state.closed.is_none() {
            state.closed = Some(error.clone());
        }
        for (_, mailbox) in state.queues.drain() {
            let _ = mailbox.send(Err(error.clone()));
        }
    }

    pub fn closed_error(&self) -> Option<DriverError> {
        self.state().closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.state().queues.len()
    }
}

/// Receiving end of one request's mailbox
#[derive(Debug)]
pub struct ResponseQueue {
    request_id: RequestId,
    receiver: mpsc::UnboundedReceiver<DriverResult<ResponsePart>>,
}

impl ResponseQueue {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the next frame for this request, or the error that ended the stream
    pub async fn take(&mut self) -> DriverResult<ResponsePart> {
        match self.receiver.recv().await {
            Some(frame) => frame,
            None => Err(DriverError::TransactionClosed),
        }
    }
}
