/// Physical connections to individual cluster members
///
/// A `Connection` is bound to exactly one server address for its whole life.
/// The underlying channel is established lazily and dropped whenever a call
/// reports the server unreachable, so the next call reconnects.
use super::registry::SessionRegistry;
use super::{DatabaseTopology, Options, ServerAddress, SessionType};
use crate::error::{DriverError, DriverResult};
use crate::protocol::{Request, Response, SessionId, SessionOpened};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info};

/// Both halves of one duplex transaction stream.
///
/// Requests go out in batches; responses come back one frame at a time.
/// The response half ends (or yields an error) when the server side closes.
pub struct DuplexChannel {
    pub requests: mpsc::UnboundedSender<Vec<Request>>,
    pub responses: BoxStream<'static, DriverResult<Response>>,
}

impl fmt::Debug for DuplexChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexChannel")
            .field("requests_closed", &self.requests.is_closed())
            .finish_non_exhaustive()
    }
}

/// RPC surface of one server.
///
/// Implementations report an unreachable server as
/// `DriverError::UnableToConnect` and a demoted replica as
/// `DriverError::ReplicaNotPrimary`; the failover layer depends on it.
#[async_trait]
pub trait ServerRpc: Send + Sync {
    async fn cluster_members(&self) -> DriverResult<HashSet<ServerAddress>>;

    async fn database_topology(&self, database: &str) -> DriverResult<DatabaseTopology>;

    async fn session_open(
        &self,
        database: &str,
        session_type: SessionType,
        options: &Options,
    ) -> DriverResult<SessionOpened>;

    /// Returns whether the server still considers the session alive
    async fn session_pulse(&self, session_id: &SessionId) -> DriverResult<bool>;

    async fn session_close(&self, session_id: &SessionId) -> DriverResult<()>;

    async fn transaction_stream(&self) -> DriverResult<DuplexChannel>;
}

/// Establishes channels to servers
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> DriverResult<Arc<dyn ServerRpc>>;
}

pub struct Connection {
    address: ServerAddress,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    channel: Mutex<Option<Arc<dyn ServerRpc>>>,
    sessions: SessionRegistry,
}

impl Connection {
    /// Create a connection; nothing is dialled until first use
    pub fn new(address: impl Into<ServerAddress>, connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connector,
            connect_timeout,
            channel: Mutex::new(None),
            sessions: SessionRegistry::new(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Return the live channel, dialling the server if there is none
    pub async fn rpc(&self) -> DriverResult<Arc<dyn ServerRpc>> {
        let mut channel = self.channel.lock().await;
        if let Some(rpc) = channel.as_ref() {
            return Ok(Arc::clone(rpc));
        }

        debug!("Connecting to server {}", self.address);
        let rpc = match timeout(self.connect_timeout, self.connector.connect(&self.address)).await {
            Ok(Ok(rpc)) => {
                debug!("Successfully connected to server {}", self.address);
                rpc
            }
            Ok(Err(e)) => {
                debug!("Failed to connect to server {}: {}", self.address, e);
                return Err(e);
            }
            Err(_) => {
                debug!("Timeout connecting to server {}", self.address);
                return Err(DriverError::unable_to_connect(
                    self.address.clone(),
                    format!("connect timed out after {}ms", self.connect_timeout.as_millis()),
                ));
            }
        };

        *channel = Some(Arc::clone(&rpc));
        Ok(rpc)
    }

    /// Drop the current channel so the next call dials again
    pub async fn invalidate(&self) {
        if self.channel.lock().await.take().is_some() {
            debug!("Dropped channel to server {}", self.address);
        }
    }

    /// Run one call against this server, invalidating the channel if the server proves unreachable
    pub async fn call<T, F, Fut>(&self, f: F) -> DriverResult<T>
    where
        F: FnOnce(Arc<dyn ServerRpc>) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let rpc = self.rpc().await?;
        let result = f(rpc).await;
        if let Err(e) = &result {
            if e.is_unable_to_connect() {
                self.invalidate().await;
            }
        }
        result
    }

    /// Close every session opened over this connection, then drop the channel
    pub async fn close(&self) {
        let sessions = self.sessions.open_sessions().await;
        for session in sessions {
            session.close().await;
        }
        self.invalidate().await;
        info!("Connection to {} closed", self.address);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
