/// Registry of the sessions opened over one connection
use super::session::Session;
use crate::protocol::SessionId;
use fnv::FnvHashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// Tracks sessions weakly so that the registry never keeps a session alive
pub struct SessionRegistry {
    sessions: Arc<RwLock<FnvHashMap<SessionId, Weak<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(FnvHashMap::default())),
        }
    }

    /// Add a session, dropping entries of sessions no longer alive in memory
    pub async fn register(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.strong_count() > 0);
        sessions.insert(session.id().clone(), Arc::downgrade(session));
    }

    pub async fn unregister(&self, session_id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id).is_some()
    }

    pub async fn get(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).and_then(Weak::upgrade)
    }

    /// Sessions still registered and still alive in memory
    pub async fn open_sessions(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().await;
        sessions.values().filter_map(Weak::upgrade).collect()
    }

    pub async fn session_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{Connection, Options, Session, SessionSettings, SessionType};
    use crate::testing::MockCluster;
    use std::sync::Arc;
    use std::time::Duration;

    async fn open_session(connection: &Arc<Connection>) -> Arc<Session> {
        Session::open(
            Arc::clone(connection),
            "social",
            SessionType::Data,
            Options::default(),
            SessionSettings::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_dropped_sessions_are_pruned() {
        let cluster = MockCluster::with_servers(&["a:1729"]);
        let connection = Arc::new(Connection::new("a:1729", cluster.connector(), Duration::from_secs(1)));

        let dropped = open_session(&connection).await;
        let dropped_id = dropped.id().clone();
        drop(dropped);
        assert_eq!(connection.sessions().session_count().await, 1);

        let kept = open_session(&connection).await;
        let sessions = connection.sessions();
        assert_eq!(sessions.session_count().await, 1);
        assert!(sessions.get(&dropped_id).await.is_none());
        assert!(sessions.get(kept.id()).await.is_some());
    }
}
