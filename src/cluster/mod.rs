/// Cluster-aware entry point of the driver
///
/// `ClusterClient` discovers the cluster members from a list of bootstrap
/// addresses, keeps one lazy connection per member and opens sessions on the
/// replica the failover layer selects.
pub mod failover;
pub mod session;
pub mod topology;

pub use failover::{FailoverOperation, FailoverPolicy, FailoverTask};
pub use session::ClusterSession;
pub use topology::TopologyCache;

use crate::config::DriverConfig;
use crate::core::{Connection, Connector, DatabaseTopology, Options, Replica, ServerAddress, Session, SessionSettings, SessionType};
use crate::error::{DriverError, DriverResult};
use crate::utils::ShutdownSignal;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

struct ClientInner {
    connections: BTreeMap<ServerAddress, Arc<Connection>>,
    topology: Arc<TopologyCache>,
    policy: FailoverPolicy,
    settings: SessionSettings,
    shutdown_sender: watch::Sender<bool>,
    shutdown: ShutdownSignal,
    is_open: AtomicBool,
}

/// Client of a database cluster. Cheap to clone; clones share connections and topology.
#[derive(Clone)]
pub struct ClusterClient {
    inner: Arc<ClientInner>,
}

impl ClusterClient {
    /// Discover the cluster members and set up one connection per member
    pub async fn connect(config: &DriverConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        config.validate()?;
        let connect_timeout = config.connect_timeout();
        let members = fetch_cluster_members(&config.cluster.addresses, &connector, connect_timeout).await?;

        let connections: BTreeMap<ServerAddress, Arc<Connection>> = members
            .into_iter()
            .map(|address| {
                let connection = Arc::new(Connection::new(address.clone(), Arc::clone(&connector), connect_timeout));
                (address, connection)
            })
            .collect();
        let topology = Arc::new(TopologyCache::new(connections.values().cloned().collect()));
        let (shutdown_sender, shutdown) = ShutdownSignal::channel();

        info!(
            "Connected to cluster with members [{}]",
            connections.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                connections,
                topology,
                policy: config.failover_policy(),
                settings: config.session_settings(),
                shutdown_sender,
                shutdown,
                is_open: AtomicBool::new(true),
            }),
        })
    }

    /// Addresses of every cluster member, sorted
    pub fn cluster_members(&self) -> Vec<ServerAddress> {
        self.inner.connections.keys().cloned().collect()
    }

    /// Connection to one member. An address outside the cluster is unreachable by definition.
    pub fn connection(&self, address: &str) -> DriverResult<Arc<Connection>> {
        self.inner
            .connections
            .get(address)
            .cloned()
            .ok_or_else(|| DriverError::unable_to_connect(address, "not a member of the cluster"))
    }

    pub fn topology(&self) -> &Arc<TopologyCache> {
        &self.inner.topology
    }

    /// Topology of `database`, fetched from the cluster if not cached
    pub async fn database_topology(&self, database: &str) -> DriverResult<Arc<DatabaseTopology>> {
        self.inner.topology.get_or_refresh(database).await
    }

    pub fn failover_policy(&self) -> FailoverPolicy {
        self.inner.policy
    }

    pub fn session_settings(&self) -> SessionSettings {
        self.inner.settings
    }

    pub fn failover_task(&self, database: &str) -> FailoverTask {
        FailoverTask::new(
            database,
            Arc::clone(&self.inner.topology),
            self.inner.policy,
            self.inner.shutdown.clone(),
        )
    }

    /// Open a session on the primary replica, or on any replica if `options` allow it
    pub async fn session(
        &self,
        database: &str,
        session_type: SessionType,
        options: Options,
    ) -> DriverResult<ClusterSession> {
        if !self.is_open() {
            return Err(DriverError::ClientClosed);
        }

        let task = self.failover_task(database);
        let operation = OpenSession {
            client: self,
            database,
            session_type,
            options: &options,
        };
        let session = if options.reads_any_replica() {
            task.run_any_replica(operation).await?
        } else {
            task.run_primary_replica(operation).await?
        };
        Ok(ClusterSession::new(self.clone(), session))
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open.load(Ordering::Acquire)
    }

    /// Interrupt pending failover waits and close every member connection
    pub async fn close(&self) {
        if !self.inner.is_open.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.shutdown_sender.send(true);
        for connection in self.inner.connections.values() {
            connection.close().await;
        }
        info!("Cluster client closed");
    }
}

impl fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterClient")
            .field("members", &self.cluster_members())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Ask each bootstrap address in turn for the member list
async fn fetch_cluster_members(
    addresses: &[String],
    connector: &Arc<dyn Connector>,
    connect_timeout: Duration,
) -> DriverResult<HashSet<ServerAddress>> {
    for address in addresses {
        debug!("Fetching list of cluster members from {}", address);
        let bootstrap = Connection::new(address.clone(), Arc::clone(connector), connect_timeout);
        match bootstrap.call(|rpc| async move { rpc.cluster_members().await }).await {
            Ok(members) if !members.is_empty() => {
                debug!("The cluster members are {:?}", members);
                return Ok(members);
            }
            Ok(_) => error!("Fetching cluster members from {} returned no members", address),
            Err(e) => error!("Fetching cluster members from {} failed: {}", address, e),
        }
    }
    Err(DriverError::cluster_unavailable(addresses))
}

struct OpenSession<'a> {
    client: &'a ClusterClient,
    database: &'a str,
    session_type: SessionType,
    options: &'a Options,
}

#[async_trait]
impl<'a> FailoverOperation for OpenSession<'a> {
    type Output = Arc<Session>;

    async fn attempt(&mut self, replica: &Replica) -> DriverResult<Arc<Session>> {
        debug!("Opening a session of '{}' on {}", self.database, replica.address);
        let connection = self.client.connection(&replica.address)?;
        Session::open(
            connection,
            self.database,
            self.session_type,
            self.options.clone(),
            self.client.session_settings(),
        )
        .await
    }
}
