//! Lobby: admits connections and routes them to the current session

pub mod service;

pub use service::{Admission, Lobby};

use uuid::Uuid;

use crate::session::SessionError;

/// What a connection is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Bot,
    Observer,
    /// Observer that may start and steer games
    Controller,
}

impl Role {
    /// Observers and controllers receive the observer stream
    pub fn observes(self) -> bool {
        matches!(self, Role::Observer | Role::Controller)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Bot => "bot",
            Role::Observer => "observer",
            Role::Controller => "controller",
        };
        f.write_str(name)
    }
}

/// Lobby errors
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("Expected a handshake")]
    NotAHandshake,

    #[error("Handshake rejected for {0}")]
    Rejected(Role),

    #[error("Unknown client: {0}")]
    UnknownClient(Uuid),

    #[error("A {role} may not send {message}")]
    WrongRole { role: Role, message: &'static str },

    #[error("Not a connected bot: {0}")]
    UnknownBot(Uuid),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl LobbyError {
    /// Whether the offending connection should be dropped
    pub fn disconnects(&self) -> bool {
        matches!(
            self,
            LobbyError::NotAHandshake
                | LobbyError::Rejected(_)
                | LobbyError::UnknownClient(_)
                | LobbyError::WrongRole { .. }
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            LobbyError::NotAHandshake => "handshake_expected",
            LobbyError::Rejected(_) => "rejected",
            LobbyError::UnknownClient(_) => "unknown_client",
            LobbyError::WrongRole { .. } => "wrong_role",
            LobbyError::UnknownBot(_) => "unknown_bot",
            LobbyError::Session(e) => e.code(),
        }
    }
}
