/// Per-database replica sets as last observed by the client
use crate::core::{Connection, DatabaseTopology, ServerAddress};
use crate::error::{DriverError, DriverResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Cache of database topologies.
///
/// Entries are only ever replaced whole by `refresh`, so a reader never sees a
/// mix of two snapshots.
pub struct TopologyCache {
    /// Cluster members queried on refresh, in order
    members: Vec<Arc<Connection>>,
    topologies: RwLock<HashMap<String, Arc<DatabaseTopology>>>,
    refreshes: AtomicU64,
}

impl TopologyCache {
    pub fn new(members: Vec<Arc<Connection>>) -> Self {
        Self {
            members,
            topologies: RwLock::new(HashMap::new()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn member_addresses(&self) -> Vec<ServerAddress> {
        self.members
            .iter()
            .map(|connection| connection.address().to_string())
            .collect()
    }

    /// Cached topology of `database`, without any I/O
    pub fn get(&self, database: &str) -> Option<Arc<DatabaseTopology>> {
        match self.topologies.read() {
            Ok(topologies) => topologies.get(database).cloned(),
            Err(poisoned) => poisoned.into_inner().get(database).cloned(),
        }
    }

    /// Number of successful refreshes so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Fetch the topology of `database` from the first member that answers and cache it
    pub async fn refresh(&self, database: &str) -> DriverResult<Arc<DatabaseTopology>> {
        for member in &self.members {
            debug!("Fetching replica info of '{}' from {}", database, member.address());
            let fetched = member
                .call(|rpc| async move { rpc.database_topology(database).await })
                .await;
            match fetched {
                Ok(topology) => {
                    let topology = Arc::new(topology);
                    self.replace(database, Arc::clone(&topology));
                    info!(
                        "Refreshed topology of '{}': {}",
                        database,
                        topology
                            .replicas
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    return Ok(topology);
                }
                Err(e) => {
                    debug!("Failed to fetch replica info of '{}' from {}: {}", database, member.address(), e);
                }
            }
        }
        Err(DriverError::cluster_unavailable(self.member_addresses()))
    }

    /// Cached topology, refreshing it if there is none yet
    pub async fn get_or_refresh(&self, database: &str) -> DriverResult<Arc<DatabaseTopology>> {
        match self.get(database) {
            Some(topology) => Ok(topology),
            None => self.refresh(database).await,
        }
    }

    fn replace(&self, database: &str, topology: Arc<DatabaseTopology>) {
        let mut topologies = match self.topologies.write() {
            Ok(topologies) => topologies,
            Err(poisoned) => poisoned.into_inner(),
        };
        topologies.insert(database.to_string(), topology);
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }
}
