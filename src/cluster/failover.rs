/// Replica selection and retry for cluster operations
///
/// A `FailoverTask` runs a caller-supplied `FailoverOperation` against a
/// replica of one database. The primary-replica strategy follows the primary
/// through elections; the any-replica strategy sweeps the replicas once,
/// preferred replica first.
use super::topology::TopologyCache;
use crate::core::Replica;
use crate::error::{DriverError, DriverResult};
use crate::utils::{format_duration, ShutdownSignal};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry budgets of the failover layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailoverPolicy {
    /// Attempts of a primary-routed operation before giving up
    pub primary_max_retries: usize,
    /// Topology refreshes while waiting for a primary to be elected
    pub fetch_replicas_max_retries: usize,
    pub primary_selection_wait: Duration,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            primary_max_retries: 10,
            fetch_replicas_max_retries: 10,
            primary_selection_wait: Duration::from_millis(2000),
        }
    }
}

/// Work to run against a selected replica.
///
/// `attempt` is used for the first try and may reuse existing resources.
/// `reattempt` is used for every later try and must rebuild anything bound to
/// the previously tried replica.
#[async_trait]
pub trait FailoverOperation: Send {
    type Output: Send;

    async fn attempt(&mut self, replica: &Replica) -> DriverResult<Self::Output>;

    async fn reattempt(&mut self, replica: &Replica) -> DriverResult<Self::Output> {
        self.attempt(replica).await
    }
}

#[async_trait]
impl<'a, O: FailoverOperation> FailoverOperation for &'a mut O {
    type Output = O::Output;

    async fn attempt(&mut self, replica: &Replica) -> DriverResult<Self::Output> {
        (**self).attempt(replica).await
    }

    async fn reattempt(&mut self, replica: &Replica) -> DriverResult<Self::Output> {
        (**self).reattempt(replica).await
    }
}

pub struct FailoverTask {
    database: String,
    topology: Arc<TopologyCache>,
    policy: FailoverPolicy,
    shutdown: ShutdownSignal,
}

impl FailoverTask {
    pub fn new(
        database: impl Into<String>,
        topology: Arc<TopologyCache>,
        policy: FailoverPolicy,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            database: database.into(),
            topology,
            policy,
            shutdown,
        }
    }

    /// Run `operation` on the primary replica, following it through elections.
    ///
    /// Gives up with `ClusterUnavailable` after `primary_max_retries` failed attempts.
    pub async fn run_primary_replica<O: FailoverOperation>(&self, mut operation: O) -> DriverResult<O::Output> {
        let cached = self
            .topology
            .get(&self.database)
            .and_then(|topology| topology.primary_replica().cloned());
        let mut replica = match cached {
            Some(replica) => replica,
            None => self.seek_primary_replica().await?,
        };

        let mut retries = 0;
        loop {
            let result = if retries == 0 {
                operation.attempt(&replica).await
            } else {
                operation.reattempt(&replica).await
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable_on_primary() => {
                    retries += 1;
                    if retries >= self.policy.primary_max_retries {
                        debug!(
                            "Giving up on the primary replica of '{}' after {} attempts: {}",
                            self.database, retries, e
                        );
                        return Err(self.cluster_unavailable());
                    }
                    debug!(
                        "Primary replica {} of '{}' failed ({}), retrying in {}",
                        replica,
                        self.database,
                        e,
                        format_duration(self.policy.primary_selection_wait)
                    );
                    self.wait_for_primary_replica_selection().await?;
                    replica = self.seek_primary_replica().await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `operation` on each replica in turn, preferred replica first, until one succeeds.
    ///
    /// Only an unreachable replica moves the sweep on; any other failure ends it.
    pub async fn run_any_replica<O: FailoverOperation>(&self, mut operation: O) -> DriverResult<O::Output> {
        let topology = self.topology.get_or_refresh(&self.database).await?;

        for (index, replica) in topology.any_replica_order().iter().enumerate() {
            let result = if index == 0 {
                operation.attempt(replica).await
            } else {
                operation.reattempt(replica).await
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if e.is_unable_to_connect() => {
                    debug!("Replica {} of '{}' is unreachable, trying the next one", replica, self.database);
                }
                Err(e) => return Err(e),
            }
        }
        Err(self.cluster_unavailable())
    }

    /// Refresh the topology until it names a primary
    pub async fn seek_primary_replica(&self) -> DriverResult<Replica> {
        let mut retries = 0;
        while retries < self.policy.fetch_replicas_max_retries {
            let topology = self.topology.refresh(&self.database).await?;
            if let Some(primary) = topology.primary_replica() {
                return Ok(primary.clone());
            }
            debug!("No primary replica for '{}' yet, waiting for an election", self.database);
            self.wait_for_primary_replica_selection().await?;
            retries += 1;
        }
        Err(self.cluster_unavailable())
    }

    async fn wait_for_primary_replica_selection(&self) -> DriverResult<()> {
        if self.shutdown.is_triggered() {
            return Err(DriverError::UnexpectedInterruption);
        }
        tokio::select! {
            _ = sleep(self.policy.primary_selection_wait) => Ok(()),
            _ = self.shutdown.triggered() => Err(DriverError::UnexpectedInterruption),
        }
    }

    fn cluster_unavailable(&self) -> DriverError {
        DriverError::cluster_unavailable(self.topology.member_addresses())
    }
}
