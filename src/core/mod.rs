/// Core abstractions shared by single-server and cluster-aware code paths
pub mod connection;
pub mod registry;
pub mod session;
pub mod transaction;

pub use connection::{Connection, Connector, DuplexChannel, ServerRpc};
pub use registry::SessionRegistry;
pub use session::{Session, SessionSettings};
pub use transaction::{QueryFuture, Transaction};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a cluster member, as advertised by the cluster
pub type ServerAddress = String;

/// Role of one replica of a database, as observed at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub address: ServerAddress,
    pub is_primary: bool,
    pub is_preferred: bool,
    /// Election term reported by the server
    pub term: u64,
}

impl Replica {
    pub fn new(address: impl Into<ServerAddress>, is_primary: bool, is_preferred: bool, term: u64) -> Self {
        Self {
            address: address.into(),
            is_primary,
            is_preferred,
            term,
        }
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = if self.is_primary { "primary" } else { "secondary" };
        write!(f, "{} ({}, term {})", self.address, role, self.term)
    }
}

/// Snapshot of a database's replica set.
///
/// Snapshots are only ever replaced whole, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTopology {
    pub name: String,
    pub replicas: Vec<Replica>,
}

impl DatabaseTopology {
    pub fn new(name: impl Into<String>, replicas: Vec<Replica>) -> Self {
        Self {
            name: name.into(),
            replicas,
        }
    }

    /// The primary replica, if any. Highest term wins should a snapshot flag more than one.
    pub fn primary_replica(&self) -> Option<&Replica> {
        self.replicas
            .iter()
            .filter(|replica| replica.is_primary)
            .max_by_key(|replica| replica.term)
    }

    pub fn preferred_replica(&self) -> Option<&Replica> {
        self.replicas.iter().find(|replica| replica.is_preferred)
    }

    /// Try order for read-any routing: the preferred replica, then the rest in listed order
    pub fn any_replica_order(&self) -> Vec<Replica> {
        let mut order = Vec::with_capacity(self.replicas.len());
        if let Some(preferred) = self.preferred_replica() {
            order.push(preferred.clone());
        }
        order.extend(
            self.replicas
                .iter()
                .filter(|replica| !replica.is_preferred)
                .cloned(),
        );
        order
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Data,
    Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Read,
    Write,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Data => write!(f, "data"),
            SessionType::Schema => write!(f, "schema"),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Read => write!(f, "read"),
            TransactionType::Write => write!(f, "write"),
        }
    }
}

/// Session and transaction options. Unset fields defer to server defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    pub infer: Option<bool>,
    pub trace_inference: Option<bool>,
    pub explain: Option<bool>,
    pub parallel: Option<bool>,
    pub prefetch_size: Option<u32>,
    pub prefetch: Option<bool>,
    pub session_idle_timeout_millis: Option<u32>,
    pub transaction_timeout_millis: Option<u32>,
    pub schema_lock_acquire_timeout_millis: Option<u32>,
    /// Route to any replica instead of the primary
    pub read_any_replica: Option<bool>,
}

impl Options {
    pub fn read_any_replica() -> Self {
        Self {
            read_any_replica: Some(true),
            ..Default::default()
        }
    }

    pub fn reads_any_replica(&self) -> bool {
        self.read_any_replica.unwrap_or(false)
    }
}
