//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::lobby::Lobby;
use crate::session::SessionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub lobby: Arc<Lobby>,
}

impl AppState {
    /// Build the state and open the first session. Needs a tokio runtime.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let sessions = Arc::new(SessionRegistry::new());
        let lobby = Lobby::start(config.clone(), sessions.clone());

        Self {
            config,
            sessions,
            lobby,
        }
    }
}
