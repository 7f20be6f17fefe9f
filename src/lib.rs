/// Enlace - cluster-aware client driver core for distributed graph databases
///
/// Enlace covers two tightly coupled parts of a database driver:
/// 1. Cluster failover: tracks which replica of each database is the primary
///    and retries session and transaction acquisition across replicas
/// 2. Multiplexed transport: carries many concurrent requests of one
///    transaction over a single duplex stream, with pull-based streaming answers
///
/// Wire encoding is left to implementations of `core::Connector` and
/// `core::ServerRpc`.
pub mod cluster;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod stream;
pub mod utils;

#[cfg(test)]
mod testing;

pub use cluster::{ClusterClient, ClusterSession, FailoverOperation, FailoverPolicy, FailoverTask, TopologyCache};
pub use config::DriverConfig;
pub use crate::core::{
    Connection, Connector, DatabaseTopology, DuplexChannel, Options, Replica, ServerAddress, ServerRpc, Session,
    SessionType, Transaction, TransactionType,
};
pub use error::{ConfigError, DriverError, DriverResult, ErrorSeverity};
pub use stream::{IteratorState, ResponseIterator};
