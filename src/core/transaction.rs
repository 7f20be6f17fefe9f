/// Transactions multiplexed over a single duplex stream
use super::session::Session;
use super::{Options, TransactionType};
use crate::error::{DriverError, DriverResult};
use crate::protocol::{RequestKind, SessionId};
use crate::stream::{BidirectionalStream, ResponseIterator, SingleResponse};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Answer to a query that has already been sent
pub type QueryFuture = BoxFuture<'static, DriverResult<Bytes>>;

/// An open transaction. Clones share the same stream.
#[derive(Clone)]
pub struct Transaction {
    session_id: SessionId,
    transaction_type: TransactionType,
    options: Options,
    stream: Arc<BidirectionalStream>,
}

impl Transaction {
    /// Open the transaction stream and send the open request.
    ///
    /// The returned answer must be awaited with `opened` before the
    /// transaction is used.
    pub(crate) async fn start(
        session: &Session,
        transaction_type: TransactionType,
        options: Options,
    ) -> DriverResult<(Self, SingleResponse)> {
        let channel = session
            .connection()
            .call(|rpc| async move { rpc.transaction_stream().await })
            .await?;
        let stream = Arc::new(BidirectionalStream::new(channel, session.dispatch_config()));

        let open = RequestKind::Open {
            session_id: session.id().clone(),
            transaction_type,
            options: options.clone(),
            network_latency_millis: session.network_latency_millis(),
        };
        let response = match stream.single(open, false) {
            Ok(response) => response,
            Err(e) => {
                stream.close();
                return Err(e);
            }
        };

        let transaction = Self {
            session_id: session.id().clone(),
            transaction_type,
            options,
            stream,
        };
        Ok((transaction, response))
    }

    /// Wait for the server to accept the open; the stream is closed if it does not
    pub(crate) async fn opened(&self, response: SingleResponse) -> DriverResult<()> {
        if let Err(e) = response.get().await {
            self.close();
            return Err(e);
        }
        debug!("Opened {} transaction in session {}", self.transaction_type, self.session_id);
        Ok(())
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::TransactionClosed)
        }
    }

    /// Send an operation and wait for its answer
    pub async fn execute(&self, request: Bytes) -> DriverResult<Bytes> {
        self.query(request)?.await
    }

    /// Send an operation now and return a future for its answer.
    ///
    /// The request is batched with other queries sent in quick succession.
    pub fn query(&self, request: Bytes) -> DriverResult<QueryFuture> {
        self.ensure_open()?;
        let response = self.stream.single(RequestKind::Operation(request), true)?;
        Ok(response.get().boxed())
    }

    /// Send an operation whose answer is streamed back in parts
    pub fn stream(&self, request: Bytes) -> DriverResult<ResponseIterator> {
        self.ensure_open()?;
        self.stream.stream(RequestKind::Operation(request))
    }

    /// Commit and close the transaction. The transaction is closed even if the commit fails.
    pub async fn commit(&self) -> DriverResult<()> {
        let committed = self.finish(RequestKind::Commit).await;
        self.close();
        committed
    }

    pub async fn rollback(&self) -> DriverResult<()> {
        self.finish(RequestKind::Rollback).await
    }

    async fn finish(&self, kind: RequestKind) -> DriverResult<()> {
        self.ensure_open()?;
        self.stream.single(kind, true)?.get().await.map(|_| ())
    }

    /// Close the stream; pending answers fail with `TransactionClosed`
    pub fn close(&self) {
        self.stream.close();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("session_id", &self.session_id)
            .field("transaction_type", &self.transaction_type)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}
