//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GameSetup;
use crate::events::{ConditionSpec, GameEvent};
use crate::game::model::{BotColors, BotId, BotIntent, BotState, BulletId, BulletState};
use crate::scoring::BotResults;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// First message of a bot connection
    BotHandshake {
        name: String,
        version: String,
        #[serde(default)]
        authors: Vec<String>,
        #[serde(default)]
        secret: Option<String>,
    },

    /// First message of an observer connection
    ObserverHandshake {
        name: String,
        #[serde(default)]
        secret: Option<String>,
    },

    /// First message of a controller connection (observer that may steer games)
    ControllerHandshake {
        name: String,
        #[serde(default)]
        secret: Option<String>,
    },

    /// Bot acknowledges the game start
    BotReady,

    /// Bot control values for the current turn
    BotIntent { intent: BotIntent },

    /// Bot asks to be told each turn its condition holds, for the rest of the game
    AddCondition { condition: ConditionSpec },

    RemoveCondition { name: String },

    /// Controller asks for a new game with the listed bot connections
    StartGame {
        #[serde(default)]
        game_type: Option<String>,
        #[serde(default)]
        game_setup: Option<GameSetup>,
        bot_ids: Vec<Uuid>,
    },

    StopGame,
    PauseGame,
    ResumeGame,

    /// Run exactly one turn while paused
    NextTurn,

    ChangeTps { tps: i32 },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after an admitted handshake
    ServerHandshake {
        client_id: Uuid,
        session_id: Uuid,
        server_time: u64,
        game_types: Vec<String>,
    },

    /// Bots currently connected (sent to observers and controllers)
    BotListUpdate { bots: Vec<BotInfo> },

    /// Game start notice for a candidate bot
    GameStartedForBot { my_id: BotId, game_setup: GameSetup },

    /// Game start notice for observers
    GameStartedForObserver {
        game_setup: GameSetup,
        participants: Vec<Participant>,
    },

    GameAborted { reason: String },

    GameEnded {
        number_of_rounds: u32,
        results: Vec<BotResults>,
    },

    GamePaused,
    GameResumed,

    TpsChanged { tps: i32 },

    RoundStarted { round: u32 },

    RoundEnded {
        round: u32,
        turn: u32,
        results: Vec<BotResults>,
    },

    /// Per-turn view for one participant
    TickForBot {
        round: u32,
        turn: u32,
        bot_state: BotSnapshot,
        bullet_states: Vec<BulletSnapshot>,
        events: Vec<GameEvent>,
    },

    /// Per-turn view for observers and controllers
    TickForObserver {
        round: u32,
        turn: u32,
        bot_states: Vec<BotSnapshot>,
        bullet_states: Vec<BulletSnapshot>,
        events: Vec<GameEvent>,
    },

    Error { code: String, message: String },
}

/// A connected bot, as listed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotInfo {
    pub client_id: Uuid,
    pub name: String,
    pub version: String,
    pub authors: Vec<String>,
}

/// A bot taking part in a game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: BotId,
    pub client_id: Uuid,
    pub name: String,
    pub version: String,
}

/// Bot state in a tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub id: BotId,
    pub energy: f64,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    pub gun_direction: f64,
    pub radar_direction: f64,
    /// Radar heading at the start of this turn's sweep
    pub radar_sweep: f64,
    pub speed: f64,
    pub turn_rate: f64,
    pub gun_turn_rate: f64,
    pub radar_turn_rate: f64,
    pub gun_heat: f64,
    #[serde(default, skip_serializing_if = "is_default_colors")]
    pub colors: BotColors,
}

fn is_default_colors(colors: &BotColors) -> bool {
    *colors == BotColors::default()
}

impl From<&BotState> for BotSnapshot {
    fn from(bot: &BotState) -> Self {
        Self {
            id: bot.id,
            energy: bot.energy,
            x: bot.x,
            y: bot.y,
            direction: bot.direction,
            gun_direction: bot.gun_direction,
            radar_direction: bot.radar_direction,
            radar_sweep: bot.radar_sweep_start,
            speed: bot.speed,
            turn_rate: bot.turn_rate,
            gun_turn_rate: bot.gun_turn_rate,
            radar_turn_rate: bot.radar_turn_rate,
            gun_heat: bot.gun_heat,
            colors: bot.colors.clone(),
        }
    }
}

/// Bullet state in a tick or event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletSnapshot {
    pub bullet_id: BulletId,
    pub owner_id: BotId,
    pub power: f64,
    pub x: f64,
    pub y: f64,
    pub direction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl From<&BulletState> for BulletSnapshot {
    fn from(bullet: &BulletState) -> Self {
        Self {
            bullet_id: bullet.id,
            owner_id: bullet.owner,
            power: bullet.power,
            x: bullet.x,
            y: bullet.y,
            direction: bullet.direction,
            color: bullet.color.clone(),
        }
    }
}

impl ClientMsg {
    /// Wire tag, for logs and role errors
    pub fn name(&self) -> &'static str {
        match self {
            ClientMsg::BotHandshake { .. } => "bot_handshake",
            ClientMsg::ObserverHandshake { .. } => "observer_handshake",
            ClientMsg::ControllerHandshake { .. } => "controller_handshake",
            ClientMsg::BotReady => "bot_ready",
            ClientMsg::BotIntent { .. } => "bot_intent",
            ClientMsg::AddCondition { .. } => "add_condition",
            ClientMsg::RemoveCondition { .. } => "remove_condition",
            ClientMsg::StartGame { .. } => "start_game",
            ClientMsg::StopGame => "stop_game",
            ClientMsg::PauseGame => "pause_game",
            ClientMsg::ResumeGame => "resume_game",
            ClientMsg::NextTurn => "next_turn",
            ClientMsg::ChangeTps { .. } => "change_tps",
        }
    }
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
