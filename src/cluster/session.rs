/// Sessions that follow their database across replicas
use super::failover::FailoverOperation;
use super::ClusterClient;
use crate::core::{Options, Replica, ServerAddress, Session, SessionType, Transaction, TransactionType};
use crate::error::DriverResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// A session of a cluster database.
///
/// Wraps a session on one replica. When opening a transaction fails over to
/// another replica, the wrapped session is closed and a new one is opened on
/// the new replica in its place.
pub struct ClusterSession {
    client: ClusterClient,
    database: String,
    session_type: SessionType,
    options: Options,
    session: Mutex<Arc<Session>>,
}

impl ClusterSession {
    pub(crate) fn new(client: ClusterClient, session: Arc<Session>) -> Self {
        Self {
            client,
            database: session.database().to_string(),
            session_type: session.session_type(),
            options: session.options().clone(),
            session: Mutex::new(session),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The session currently wrapped
    pub async fn current(&self) -> Arc<Session> {
        Arc::clone(&*self.session.lock().await)
    }

    /// Address of the replica the wrapped session lives on
    pub async fn address(&self) -> ServerAddress {
        self.session.lock().await.connection().address().to_string()
    }

    pub async fn is_open(&self) -> bool {
        self.session.lock().await.is_open()
    }

    /// Open a transaction, on any replica if `options` allow it, else on the primary
    pub async fn transaction(&self, transaction_type: TransactionType, options: Options) -> DriverResult<Transaction> {
        let task = self.client.failover_task(&self.database);
        let operation = OpenTransaction {
            cluster_session: self,
            transaction_type,
            options: &options,
        };
        if options.reads_any_replica() {
            task.run_any_replica(operation).await
        } else {
            task.run_primary_replica(operation).await
        }
    }

    pub async fn close(&self) {
        self.session.lock().await.close().await;
    }
}

impl fmt::Debug for ClusterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterSession")
            .field("database", &self.database)
            .field("session_type", &self.session_type)
            .finish_non_exhaustive()
    }
}

struct OpenTransaction<'a> {
    cluster_session: &'a ClusterSession,
    transaction_type: TransactionType,
    options: &'a Options,
}

#[async_trait]
impl<'a> FailoverOperation for OpenTransaction<'a> {
    type Output = Transaction;

    async fn attempt(&mut self, replica: &Replica) -> DriverResult<Transaction> {
        let session = self.cluster_session.current().await;
        if !session.is_open() {
            // Killed by its pulse or left closed by an earlier failed reopen
            return self.reattempt(replica).await;
        }
        session.transaction(self.transaction_type, self.options.clone()).await
    }

    async fn reattempt(&mut self, replica: &Replica) -> DriverResult<Transaction> {
        let cluster_session = self.cluster_session;
        let mut current = cluster_session.session.lock().await;
        current.close().await;

        debug!("Reopening session of '{}' on {}", cluster_session.database, replica.address);
        let connection = cluster_session.client.connection(&replica.address)?;
        let session = Session::open(
            connection,
            &cluster_session.database,
            cluster_session.session_type,
            cluster_session.options.clone(),
            cluster_session.client.session_settings(),
        )
        .await?;
        *current = Arc::clone(&session);
        drop(current);

        session.transaction(self.transaction_type, self.options.clone()).await
    }
}
