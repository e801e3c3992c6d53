//! Per-game-type parameters, immutable once a game has started

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::game::arena::Arena;
use crate::game::rules::BOT_RADIUS;
use crate::game::step::StepParams;

/// Game types the server knows presets for
pub const GAME_TYPES: [&str; 3] = ["classic", "melee", "1v1"];

/// Parameters of one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSetup {
    pub game_type: String,
    pub arena_width: u32,
    pub arena_height: u32,
    pub min_participants: u32,
    /// None means no upper bound
    #[serde(default)]
    pub max_participants: Option<u32>,
    pub number_of_rounds: u32,
    pub gun_cooling_rate: f64,
    pub max_inactivity_turns: u32,
    /// Milliseconds a turn waits for intents
    pub turn_timeout_ms: u64,
    /// Milliseconds candidates get to report ready
    pub ready_timeout_ms: u64,
    /// Turns per second; -1 runs as fast as possible, 0 holds the battle
    pub default_tps: i32,
}

impl GameSetup {
    /// Preset for a known game type
    pub fn for_type(game_type: &str) -> Option<Self> {
        let base = Self {
            game_type: game_type.to_string(),
            arena_width: 800,
            arena_height: 600,
            min_participants: 2,
            max_participants: None,
            number_of_rounds: 10,
            gun_cooling_rate: 0.1,
            max_inactivity_turns: 450,
            turn_timeout_ms: 30,
            ready_timeout_ms: 1_000,
            default_tps: 30,
        };

        match game_type {
            "classic" => Some(base),
            "melee" => Some(Self {
                arena_width: 1000,
                arena_height: 1000,
                min_participants: 10,
                ..base
            }),
            "1v1" => Some(Self {
                max_participants: Some(2),
                ..base
            }),
            _ => None,
        }
    }

    /// Check the setup can produce a playable game
    pub fn validate(&self) -> Result<(), SetupError> {
        // A bot body has to fit between the walls on both axes
        let min_side = (2.0 * BOT_RADIUS) as u32;
        if self.arena_width < min_side || self.arena_height < min_side {
            return Err(SetupError::ArenaTooSmall {
                width: self.arena_width,
                height: self.arena_height,
                min_side,
            });
        }
        if self.min_participants == 0 {
            return Err(SetupError::NoParticipants);
        }
        if let Some(max) = self.max_participants {
            if max < self.min_participants {
                return Err(SetupError::ParticipantBounds {
                    min: self.min_participants,
                    max,
                });
            }
        }
        if self.number_of_rounds == 0 {
            return Err(SetupError::NoRounds);
        }
        if !(self.gun_cooling_rate.is_finite() && self.gun_cooling_rate > 0.0) {
            return Err(SetupError::InvalidCoolingRate);
        }
        if self.turn_timeout_ms == 0 || self.ready_timeout_ms == 0 {
            return Err(SetupError::InvalidTimeout);
        }
        if self.default_tps < -1 {
            return Err(SetupError::InvalidTps(self.default_tps));
        }
        Ok(())
    }

    /// Check that a given number of candidates can play this setup
    pub fn check_candidates(&self, count: usize) -> Result<(), SetupError> {
        let count = count as u32;
        if count < self.min_participants {
            return Err(SetupError::TooFewCandidates {
                required: self.min_participants,
                available: count,
            });
        }
        if let Some(max) = self.max_participants {
            if count > max {
                return Err(SetupError::TooManyCandidates { max, requested: count });
            }
        }
        Ok(())
    }

    pub fn arena(&self) -> Arena {
        Arena::new(self.arena_width as f64, self.arena_height as f64)
    }

    pub fn step_params(&self) -> StepParams {
        StepParams {
            arena: self.arena(),
            gun_cooling_rate: self.gun_cooling_rate,
            max_inactivity_turns: self.max_inactivity_turns,
        }
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Invalid game setup
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SetupError {
    #[error("Unknown game type: {0}")]
    UnknownGameType(String),

    #[error("Arena {width}x{height} is too small, each side must be at least {min_side}")]
    ArenaTooSmall { width: u32, height: u32, min_side: u32 },

    #[error("At least one participant is required")]
    NoParticipants,

    #[error("Max participants ({max}) is below min participants ({min})")]
    ParticipantBounds { min: u32, max: u32 },

    #[error("At least one round is required")]
    NoRounds,

    #[error("Gun cooling rate must be positive")]
    InvalidCoolingRate,

    #[error("Timeouts must be non-zero")]
    InvalidTimeout,

    #[error("Invalid turns per second: {0}")]
    InvalidTps(i32),

    #[error("Not enough candidates: {available} of {required} required")]
    TooFewCandidates { required: u32, available: u32 },

    #[error("Too many candidates: {requested} exceeds {max}")]
    TooManyCandidates { max: u32, requested: u32 },
}
