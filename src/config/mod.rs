//! Configuration module - environment variable parsing

pub mod game_setup;

pub use game_setup::{GameSetup, SetupError, GAME_TYPES};

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma separated, empty = any)
    pub client_origin: String,

    /// Secrets bots may present in their handshake (empty = admit all)
    pub bot_secrets: Vec<String>,
    /// Secrets observers and controllers may present (empty = admit all)
    pub controller_secrets: Vec<String>,

    /// Game type used when a start request names none
    pub default_game_type: String,
    /// Overrides applied on top of every game type preset
    pub turn_timeout_ms: Option<u64>,
    pub ready_timeout_ms: Option<u64>,
    pub default_tps: Option<i32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:7654".to_string())
        };

        let default_game_type = env::var("DEFAULT_GAME_TYPE").unwrap_or_else(|_| "classic".to_string());
        if GameSetup::for_type(&default_game_type).is_none() {
            return Err(ConfigError::UnknownGameType(default_game_type));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_default(),

            bot_secrets: parse_list(env::var("BOT_SECRETS").ok()),
            controller_secrets: parse_list(env::var("CONTROLLER_SECRETS").ok()),

            default_game_type,
            turn_timeout_ms: parse_optional("TURN_TIMEOUT_MS")?,
            ready_timeout_ms: parse_optional("READY_TIMEOUT_MS")?,
            default_tps: parse_optional("DEFAULT_TPS")?,
        })
    }

    /// Preset for `game_type` with the server-wide overrides applied
    pub fn game_setup(&self, game_type: Option<&str>) -> Result<GameSetup, SetupError> {
        let game_type = game_type.unwrap_or(&self.default_game_type);
        let mut setup = GameSetup::for_type(game_type)
            .ok_or_else(|| SetupError::UnknownGameType(game_type.to_string()))?;

        if let Some(ms) = self.turn_timeout_ms {
            setup.turn_timeout_ms = ms;
        }
        if let Some(ms) = self.ready_timeout_ms {
            setup.ready_timeout_ms = ms;
        }
        if let Some(tps) = self.default_tps {
            setup.default_tps = tps;
        }
        Ok(setup)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 7654)),
            log_level: "info".to_string(),
            client_origin: String::new(),
            bot_secrets: Vec::new(),
            controller_secrets: Vec::new(),
            default_game_type: "classic".to_string(),
            turn_timeout_ms: None,
            ready_timeout_ms: None,
            default_tps: None,
        }
    }
}

fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_optional<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Unknown default game type: {0}")]
    UnknownGameType(String),
}
