/// Server-side sessions and their liveness pulse
use super::connection::Connection;
use super::transaction::Transaction;
use super::{Options, SessionType, TransactionType};
use crate::error::{DriverError, DriverResult};
use crate::protocol::SessionId;
use crate::stream::DispatchConfig;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Runtime knobs for sessions opened by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Period of the liveness pulse
    pub pulse_interval: Duration,
    /// Batching of requests on the session's transaction streams
    pub dispatch: DispatchConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pulse_interval: Duration::from_millis(5000),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// A session opened on one server.
///
/// The session stays bound to the connection it was opened over. Opening
/// transactions takes the access lock shared; closing takes it exclusively, so
/// the set of transactions seen by `close` is final.
pub struct Session {
    id: SessionId,
    database: String,
    session_type: SessionType,
    options: Options,
    connection: Arc<Connection>,
    dispatch: DispatchConfig,
    network_latency_millis: u32,
    access: RwLock<()>,
    transactions: Mutex<Vec<Transaction>>,
    /// Cleared by `close` or by a failed pulse
    is_open: Arc<AtomicBool>,
    /// Set once teardown has run
    closed: AtomicBool,
    pulse: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Open a session over `connection` and start its pulse
    pub async fn open(
        connection: Arc<Connection>,
        database: &str,
        session_type: SessionType,
        options: Options,
        settings: SessionSettings,
    ) -> DriverResult<Arc<Session>> {
        let started = Instant::now();
        let request_options = &options;
        let opened = connection
            .call(|rpc| async move { rpc.session_open(database, session_type, request_options).await })
            .await?;
        let elapsed_millis = started.elapsed().as_millis() as u64;
        let network_latency_millis = u32::try_from(elapsed_millis.saturating_sub(opened.server_duration_millis))
            .unwrap_or(u32::MAX);

        let is_open = Arc::new(AtomicBool::new(true));
        let session = Arc::new(Session {
            id: opened.session_id,
            database: database.to_string(),
            session_type,
            options,
            connection: Arc::clone(&connection),
            dispatch: settings.dispatch,
            network_latency_millis,
            access: RwLock::new(()),
            transactions: Mutex::new(Vec::new()),
            is_open: Arc::clone(&is_open),
            closed: AtomicBool::new(false),
            pulse: Mutex::new(None),
        });

        connection.sessions().register(&session).await;
        let handle = tokio::spawn(run_pulse(
            connection,
            session.id.clone(),
            is_open,
            settings.pulse_interval,
        ));
        *session.pulse_handle() = Some(handle);

        info!(
            "Opened {} session {} on database '{}' at {} (latency {}ms)",
            session_type,
            session.id,
            database,
            session.connection.address(),
            network_latency_millis
        );
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
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

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        self.dispatch
    }

    /// Estimated one-way network latency measured at open time
    pub fn network_latency_millis(&self) -> u32 {
        self.network_latency_millis
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// Number of transactions opened and not yet pruned
    pub fn transaction_count(&self) -> usize {
        self.transactions().len()
    }

    fn transactions(&self) -> MutexGuard<'_, Vec<Transaction>> {
        self.transactions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pulse_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pulse.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a transaction in this session
    pub async fn transaction(&self, transaction_type: TransactionType, options: Options) -> DriverResult<Transaction> {
        let (transaction, response) = {
            let _access = self.access.read().await;
            if !self.is_open() {
                return Err(DriverError::SessionClosed);
            }

            let (transaction, response) = Transaction::start(self, transaction_type, options).await?;
            let mut transactions = self.transactions();
            transactions.retain(Transaction::is_open);
            transactions.push(transaction.clone());
            (transaction, response)
        };

        // Awaited outside the access lock so that `close` can fail a stalled open
        if let Err(e) = transaction.opened(response).await {
            self.transactions().retain(Transaction::is_open);
            return Err(e);
        }
        Ok(transaction)
    }

    /// Close the session and every transaction opened in it.
    ///
    /// Safe to call any number of times, from any number of tasks; teardown runs once.
    pub async fn close(&self) {
        let _access = self.access.write().await;
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.is_open.store(false, Ordering::Release);

        let transactions = mem::take(&mut *self.transactions());
        for transaction in &transactions {
            transaction.close();
        }
        self.connection.sessions().unregister(&self.id).await;
        if let Some(pulse) = self.pulse_handle().take() {
            pulse.abort();
        }

        let session_id = &self.id;
        let closed = self
            .connection
            .call(|rpc| async move { rpc.session_close(session_id).await })
            .await;
        if let Err(e) = closed {
            // The server may have dropped the session already
            debug!("Failed to notify {} of session {} close: {}", self.connection.address(), self.id, e);
        }
        info!("Closed session {} ({} transactions)", self.id, transactions.len());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pulse) = self.pulse_handle().take() {
            pulse.abort();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("session_type", &self.session_type)
            .field("address", &self.connection.address())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

async fn run_pulse(connection: Arc<Connection>, session_id: SessionId, is_open: Arc<AtomicBool>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !is_open.load(Ordering::Acquire) {
            return;
        }

        let id = &session_id;
        let alive = connection
            .call(|rpc| async move { rpc.session_pulse(id).await })
            .await;
        match alive {
            Ok(true) => trace!("Session {} is alive", session_id),
            Ok(false) => {
                warn!("Session {} was reported dead by {}", session_id, connection.address());
                is_open.store(false, Ordering::Release);
                return;
            }
            Err(e) => {
                warn!("Pulse for session {} failed: {}", session_id, e);
                is_open.store(false, Ordering::Release);
                return;
            }
        }
    }
}
