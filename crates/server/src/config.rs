use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Signs the session and stats cookies.
    pub secret_key: String,
    pub session_max_age_days: i64,
    /// Stockfish-compatible binary. Without it, bot moves come from the client.
    pub stockfish_path: Option<String>,
    pub bot_depth: u8,
    pub engine_timeout: Duration,
    /// Ask for a second click before committing a move.
    pub confirm_moves: bool,
    /// JSON catalog of daily challenges. A built-in challenge is used when unset.
    pub challenges_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            secret_key: "dev-secret-key-change-in-production".to_string(),
            session_max_age_days: 30,
            stockfish_path: None,
            bot_depth: 1,
            engine_timeout: Duration::from_millis(5000),
            confirm_moves: false,
            challenges_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            secret_key: env::var("SECRET_KEY").unwrap_or(defaults.secret_key),
            session_max_age_days: env::var("SESSION_MAX_AGE_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.session_max_age_days),
            stockfish_path: env::var("STOCKFISH_PATH").ok().filter(|v| !v.is_empty()),
            bot_depth: env::var("BOT_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bot_depth),
            engine_timeout: env::var("ENGINE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.engine_timeout),
            confirm_moves: env::var("CONFIRM_MOVES")
                .ok()
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.confirm_moves),
            challenges_path: env::var("CHALLENGES_PATH").ok().filter(|v| !v.is_empty()),
        }
    }
}
