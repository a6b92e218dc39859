//! Builder session registry.
//!
//! Every operator tab gets its own session: an isolated `BuilderState`
//! guarded by an async mutex. The mutex serializes a session's mutations so
//! they hit the gateway in dispatch order, and a repeated submission of an
//! in-flight action queues behind the first instead of double-firing.
//! Sessions idle past the TTL are swept.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::{MenuData, MenuError, OperatorId};

use super::state::BuilderState;

pub struct BuilderSession {
    pub id: Uuid,
    pub operator: OperatorId,
    pub state: BuilderState,
    created_at: Instant,
    last_activity: Instant,
}

impl BuilderSession {
    fn new(id: Uuid, operator: OperatorId, data: MenuData) -> Self {
        let now = Instant::now();
        Self {
            id,
            operator,
            state: BuilderState::new(data),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

pub struct BuilderSessions {
    sessions: DashMap<Uuid, Arc<Mutex<BuilderSession>>>,
    ttl: Duration,
}

impl BuilderSessions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn create(&self, operator: OperatorId, data: MenuData) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .insert(id, Arc::new(Mutex::new(BuilderSession::new(id, operator, data))));
        info!("Builder session {} created for operator {}", id, operator);
        id
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Mutex<BuilderSession>>, MenuError> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MenuError::not_found("builder session", id))
    }

    pub fn remove(&self, id: Uuid) {
        if self.sessions.remove(&id).is_some() {
            debug!("Builder session {} closed", id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle past the TTL. Sessions currently held by a
    /// handler are busy, hence not idle, and are left alone.
    pub fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.sessions.retain(|id, session| {
            let keep = match session.try_lock() {
                Ok(session) => session.idle_for() < ttl,
                Err(_) => true, // in use right now
            };
            if !keep {
                debug!("Builder session {} expired", id);
            }
            keep
        });
    }

    /// Periodic sweeper; spawned once at startup.
    pub fn start_sweeper(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep_expired();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MenuSettings;

    fn empty_data() -> MenuData {
        MenuData {
            labels: Vec::new(),
            categories: Vec::new(),
            products: Vec::new(),
            settings: MenuSettings::default(),
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated_per_operator_tab() {
        let sessions = BuilderSessions::new(Duration::from_secs(60));
        let first = sessions.create(1, empty_data());
        let second = sessions.create(1, empty_data());
        assert_ne!(first, second);

        {
            let handle = sessions.get(first).unwrap();
            let mut session = handle.lock().await;
            session.state.toggle_selection(Uuid::new_v4());
        }

        let handle = sessions.get(second).unwrap();
        let session = handle.lock().await;
        assert!(session.state.selection().is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let sessions = BuilderSessions::new(Duration::from_secs(60));
        assert!(matches!(
            sessions.get(Uuid::new_v4()),
            Err(MenuError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn expired_sessions_are_swept() {
        let sessions = BuilderSessions::new(Duration::from_millis(0));
        let id = sessions.create(1, empty_data());
        sessions.sweep_expired();
        assert!(sessions.get(id).is_err());
        assert!(sessions.is_empty());
    }
}
