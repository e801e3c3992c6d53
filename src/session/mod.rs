//! Game sessions: the phase state machine, the battle it drives and the
//! tokio task that runs it against wall-clock deadlines

pub mod actor;
pub mod battle;
pub mod machine;
pub mod registry;

pub use actor::{GameSession, SessionCommand, SessionHandle};
pub use machine::{SessionMachine, Timer, TimerKind};
pub use registry::{SessionRegistry, SessionStatus};

use serde::Serialize;
use uuid::Uuid;

use crate::config::SetupError;
use crate::ws::protocol::ServerMsg;

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingParticipants,
    AwaitingReady,
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::AwaitingParticipants => "awaiting_participants",
            SessionState::AwaitingReady => "awaiting_ready",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A bot connection proposed for a game
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub client_id: Uuid,
    pub name: String,
    pub version: String,
}

/// Who an outbound message is for
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    /// One connection
    Client(Uuid),
    /// Every observer and controller
    Observers,
}

/// A message produced by a session, to be routed by the lobby
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Audience,
    pub msg: ServerMsg,
}

impl Outbound {
    pub fn client(client_id: Uuid, msg: ServerMsg) -> Self {
        Self {
            to: Audience::Client(client_id),
            msg,
        }
    }

    pub fn observers(msg: ServerMsg) -> Self {
        Self {
            to: Audience::Observers,
            msg,
        }
    }
}

/// Session request errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("Cannot {request} while {state}")]
    InvalidState {
        request: &'static str,
        state: SessionState,
    },

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("Client {0} is not a candidate of this game")]
    NotACandidate(Uuid),

    #[error("Client {0} is not a participant of this game")]
    NotAParticipant(Uuid),

    #[error("Duplicate candidate: {0}")]
    DuplicateCandidate(Uuid),

    #[error("Invalid turns per second: {0}")]
    InvalidTps(i32),

    #[error("Session is closed")]
    Closed,
}

impl SessionError {
    /// Short machine readable code for error messages
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::InvalidState { .. } => "invalid_state",
            SessionError::Setup(_) => "invalid_setup",
            SessionError::NotACandidate(_) => "not_a_candidate",
            SessionError::NotAParticipant(_) => "not_a_participant",
            SessionError::DuplicateCandidate(_) => "duplicate_candidate",
            SessionError::InvalidTps(_) => "invalid_tps",
            SessionError::Closed => "session_closed",
        }
    }
}
