/// Pull-based consumer of a streamed answer
///
/// The server sends one chunk of answer parts at a time and marks the end of a
/// chunk with `StreamPart { done: false }`. Nothing more is sent for the
/// request until the client asks for it with a `StreamContinue`, which keeps
/// the server from buffering unbounded data for a slow consumer.
use super::collector::{ResponseCollector, ResponseQueue};
use super::dispatcher::RequestDispatcher;
use crate::error::{DriverError, DriverResult};
use crate::protocol::{Request, RequestId, ResponsePart};
use bytes::Bytes;
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Nothing cached; the next query must pull from the stream
    Empty,
    /// An element is cached and ready
    Fetched,
    /// Terminal; no more elements
    Done,
}

pub struct ResponseIterator {
    request_id: RequestId,
    queue: ResponseQueue,
    dispatcher: RequestDispatcher,
    collector: Arc<ResponseCollector>,
    state: IteratorState,
    next: Option<Bytes>,
}

impl ResponseIterator {
    pub fn new(queue: ResponseQueue, dispatcher: RequestDispatcher, collector: Arc<ResponseCollector>) -> Self {
        Self {
            request_id: queue.request_id(),
            queue,
            dispatcher,
            collector,
            state: IteratorState::Empty,
            next: None,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// Whether another element is available. Only pulls from the stream when nothing is cached.
    pub async fn has_next(&mut self) -> DriverResult<bool> {
        match self.state {
            IteratorState::Done => Ok(false),
            IteratorState::Fetched => Ok(true),
            IteratorState::Empty => self.fetch_and_check().await,
        }
    }

    /// Return the next element; fails with `NoSuchElement` once the answer is exhausted
    pub async fn next(&mut self) -> DriverResult<Bytes> {
        if !self.has_next().await? {
            return Err(DriverError::NoSuchElement);
        }
        self.state = IteratorState::Empty;
        self.next.take().ok_or_else(|| {
            DriverError::illegal_state(format!(
                "iterator for request '{}' was fetched without an element",
                self.request_id
            ))
        })
    }

    async fn fetch_and_check(&mut self) -> DriverResult<bool> {
        loop {
            let part = match self.queue.take().await {
                Ok(part) => part,
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            };

            match part {
                ResponsePart::NotSet => {
                    self.finish();
                    return Err(DriverError::MissingResponse {
                        request_id: self.request_id,
                    });
                }
                ResponsePart::StreamPart { done: true } => {
                    self.finish();
                    return Ok(false);
                }
                ResponsePart::StreamPart { done: false } => {
                    trace!("Requesting next chunk of request {}", self.request_id);
                    if let Err(e) = self.dispatcher.dispatch(Request::stream_continue(self.request_id)) {
                        self.finish();
                        return Err(e);
                    }
                }
                ResponsePart::Answer(payload) => {
                    self.next = Some(payload);
                    self.state = IteratorState::Fetched;
                    return Ok(true);
                }
            }
        }
    }

    fn finish(&mut self) {
        self.state = IteratorState::Done;
        self.next = None;
        self.collector.remove(&self.request_id);
    }

    /// Adapt into a `Stream`. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = DriverResult<Bytes>> + Send {
        stream::unfold(Some(self), |iterator| async move {
            let mut iterator = match iterator {
                Some(iterator) => iterator,
                None => return None,
            };
            match iterator.next().await {
                Ok(item) => Some((Ok(item), Some(iterator))),
                Err(DriverError::NoSuchElement) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
