//! Runtime configuration for the arena matchmaking server.

use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

#[derive(Debug)]
pub struct Settings {
    /// Base URL of the Game service (`POST /games`, `GET /health`).
    pub game_service_url: String,
    /// Base URL of the Users service (`GET /users/{id}/elo`).
    pub user_service_url: String,
}

impl Settings {
    fn from_env() -> Self {
        let game_service_url =
            env::var("GAME_SERVICE_URL").unwrap_or_else(|_| "http://game:3000".into());

        let user_service_url =
            env::var("USER_SERVICE_URL").unwrap_or_else(|_| "http://localhost:3001".into());

        Settings {
            game_service_url,
            user_service_url,
        }
    }
}

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

pub fn settings() -> &'static Settings {
    &SETTINGS
}

/// Pairing and ready-check tuning. Tests build their own values; the
/// bootstrap loads overrides from the environment.
#[derive(Debug, Clone)]
pub struct MatchTuning {
    /// Period of the pairing sweep.
    pub tick_rate: Duration,
    /// Base Elo tolerance before any widening.
    pub base_tolerance: f64,
    /// A player's window widens once their wait exceeds
    /// `expansion_interval * range_factor`.
    pub expansion_interval: Duration,
    /// Added to `range_factor` on each widening.
    pub expansion_step: f64,
    /// How long both sides have to confirm a proposed match.
    pub accept_timeout: Duration,
    /// Queue ban handed to decliners and no-shows.
    pub penalty_duration: Duration,
}

impl Default for MatchTuning {
    fn default() -> Self {
        MatchTuning {
            tick_rate: Duration::from_millis(1000),
            base_tolerance: 50.0,
            expansion_interval: Duration::from_millis(10_000),
            expansion_step: 1.0,
            accept_timeout: Duration::from_millis(15_000),
            penalty_duration: Duration::from_secs(300),
        }
    }
}

impl MatchTuning {
    pub fn from_env() -> Self {
        let mut t = MatchTuning::default();

        if let Some(ms) = env_u64("TICK_RATE_MS") {
            t.tick_rate = Duration::from_millis(ms);
        }
        if let Some(tol) = env_f64("BASE_TOLERANCE") {
            t.base_tolerance = tol;
        }
        if let Some(ms) = env_u64("EXPANSION_INTERVAL_MS") {
            t.expansion_interval = Duration::from_millis(ms);
        }
        if let Some(step) = env_f64("EXPANSION_STEP") {
            t.expansion_step = step;
        }
        if let Some(ms) = env_u64("MATCH_ACCEPT_TIMEOUT_MS") {
            t.accept_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("PENALTY_DURATION_SECONDS") {
            t.penalty_duration = Duration::from_secs(secs);
        }

        t
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse::<u64>().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.parse::<f64>().ok())
}
