/// One duplex transaction stream shared by every request of a transaction
use super::collector::{ResponseCollector, ResponseQueue};
use super::dispatcher::{DispatchConfig, RequestDispatcher};
use super::iterator::ResponseIterator;
use crate::core::DuplexChannel;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{Request, RequestIdGenerator, RequestKind, Response, ResponsePart};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct BidirectionalStream {
    dispatcher: RequestDispatcher,
    collector: Arc<ResponseCollector>,
    request_ids: RequestIdGenerator,
    is_open: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BidirectionalStream {
    /// Take over both halves of `channel`, spawning its dispatcher and reader tasks
    pub fn new(channel: DuplexChannel, config: DispatchConfig) -> Self {
        let DuplexChannel { requests, responses } = channel;
        let collector = Arc::new(ResponseCollector::new());
        let is_open = Arc::new(AtomicBool::new(true));
        let dispatcher = RequestDispatcher::spawn(requests, config);
        let reader = tokio::spawn(listen(responses, Arc::clone(&collector), Arc::clone(&is_open)));

        Self {
            dispatcher,
            collector,
            request_ids: RequestIdGenerator::new(),
            is_open,
            reader: Mutex::new(Some(reader)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// Dispatch a request expecting exactly one answer frame
    pub fn single(&self, kind: RequestKind, batch: bool) -> DriverResult<SingleResponse> {
        let queue = self.register_and_dispatch(kind, batch)?;
        Ok(SingleResponse {
            queue,
            collector: Arc::clone(&self.collector),
        })
    }

    /// Dispatch a request whose answer arrives as a stream of parts
    pub fn stream(&self, kind: RequestKind) -> DriverResult<ResponseIterator> {
        let queue = self.register_and_dispatch(kind, true)?;
        Ok(ResponseIterator::new(
            queue,
            self.dispatcher.clone(),
            Arc::clone(&self.collector),
        ))
    }

    fn register_and_dispatch(&self, kind: RequestKind, batch: bool) -> DriverResult<ResponseQueue> {
        if let Some(error) = self.collector.closed_error() {
            return Err(error);
        }

        let request_id = self.request_ids.next_id();
        let queue = self.collector.register(request_id);
        let request = Request::new(request_id, kind);
        let dispatched = if batch {
            self.dispatcher.dispatch_batched(request)
        } else {
            self.dispatcher.dispatch(request)
        };

        if let Err(e) = dispatched {
            self.collector.remove(&request_id);
            return Err(e);
        }
        Ok(queue)
    }

    /// Close the stream; every pending waiter fails with `TransactionClosed`
    pub fn close(&self) {
        if self.is_open.swap(false, Ordering::AcqRel) {
            debug!("Closing transaction stream");
        }
        self.collector.close(DriverError::TransactionClosed);
        self.dispatcher.close();
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl Drop for BidirectionalStream {
    fn drop(&mut self) {
        self.close();
    }
}

async fn listen(
    mut responses: BoxStream<'static, DriverResult<Response>>,
    collector: Arc<ResponseCollector>,
    is_open: Arc<AtomicBool>,
) {
    while let Some(frame) = responses.next().await {
        let routed = frame.and_then(|response| collector.put(response));
        if let Err(e) = routed {
            if e.is_unable_to_connect() || e.is_replica_not_primary() {
                debug!("Transaction stream terminated: {}", e);
            } else {
                warn!("Transaction stream failed ({}): {}", e.severity(), e);
            }
            is_open.store(false, Ordering::Release);
            collector.close(e);
            return;
        }
    }
    debug!("Transaction stream ended by the server");
    is_open.store(false, Ordering::Release);
    collector.close(DriverError::TransactionClosed);
}

/// Pending answer to a single request
#[derive(Debug)]
pub struct SingleResponse {
    queue: ResponseQueue,
    collector: Arc<ResponseCollector>,
}

impl SingleResponse {
    pub async fn get(mut self) -> DriverResult<Bytes> {
        let request_id = self.queue.request_id();
        let frame = self.queue.take().await;
        self.collector.remove(&request_id);

        match frame? {
            ResponsePart::Answer(payload) => Ok(payload),
            ResponsePart::NotSet => Err(DriverError::MissingResponse { request_id }),
            ResponsePart::StreamPart { .. } => Err(DriverError::illegal_state(format!(
                "received a stream part in answer to single request '{}'",
                request_id
            ))),
        }
    }
}
