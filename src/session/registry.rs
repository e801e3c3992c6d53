//! Registry of live sessions

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use super::actor::SessionHandle;
use super::SessionState;

/// Point-in-time view of a session, published by its task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub state: SessionState,
    pub game_type: Option<String>,
    pub round: u32,
    pub turn: u32,
    pub participants: usize,
}

pub struct SessionRegistry {
    sessions: DashMap<Uuid, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn insert(&self, handle: SessionHandle) {
        self.sessions.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.remove(id).map(|(_, h)| h)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions currently playing, running or paused
    pub fn games_in_progress(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| matches!(s.value().state(), SessionState::Running | SessionState::Paused))
            .count()
    }

    /// Statuses of every session, in no particular order
    pub fn statuses(&self) -> Vec<SessionStatus> {
        self.sessions.iter().map(|s| s.value().status()).collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::GameSession;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn registry_tracks_handles() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        let (_session, handle) = GameSession::new(Uuid::new_v4(), 1, tx);
        let id = handle.id;

        registry.insert(handle);
        assert_eq!(registry.active_sessions(), 1);
        assert_eq!(registry.games_in_progress(), 0);

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].id, id);
        assert_eq!(statuses[0].state, SessionState::AwaitingParticipants);
        assert_eq!(statuses[0].game_type, None);

        assert!(registry.get(&id).is_some());
        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.active_sessions(), 0);
    }
}
