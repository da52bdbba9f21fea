//! Game service client. Transport and validation failures never surface to
//! callers: every path returns a typed outcome, with a synthesized fallback
//! result (marker substring "fallback") when the real call could not
//! complete within contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const CREATE_GAME_TIMEOUT: Duration = Duration::from_millis(3000);
const HEALTH_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    pub game_id: String,
    pub player1_id: String,
    pub player2_id: String,
}

/// Business error codes of `POST /games`. The fallback path reuses
/// `GameAlreadyExists`, which downstream treats the same as a retryable
/// creation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameErrorCode {
    GameAlreadyExists,
    PlayerAlreadyInGame,
    InvalidPlayers,
}

impl GameErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameErrorCode::GameAlreadyExists => "GAME_ALREADY_EXISTS",
            GameErrorCode::PlayerAlreadyInGame => "PLAYER_ALREADY_IN_GAME",
            GameErrorCode::InvalidPlayers => "INVALID_PLAYERS",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateGameOutcome {
    Created {
        game_id: String,
        message: String,
    },
    Rejected {
        error: GameErrorCode,
        message: String,
    },
}

/// Wire shape of the create-game response; intentionally loose so that a
/// half-formed body downgrades to the fallback outcome instead of an error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGameResponse {
    success: bool,
    game_id: Option<String>,
    error: Option<GameErrorCode>,
    message: Option<String>,
}

#[async_trait]
pub trait GameService: Send + Sync {
    async fn create_game(&self, req: &CreateGameRequest) -> CreateGameOutcome;
    async fn health(&self) -> bool;
}

#[derive(Clone)]
pub struct HttpGameClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGameClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        HttpGameClient {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl GameService for HttpGameClient {
    async fn create_game(&self, req: &CreateGameRequest) -> CreateGameOutcome {
        let url = format!("{}/games", self.base_url);
        let resp = self
            .http
            .post(&url)
            .timeout(CREATE_GAME_TIMEOUT)
            .json(req)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                log::warn!("game service unreachable for {}: {e}", req.game_id);
                return fallback("game service unreachable");
            }
        };

        if !resp.status().is_success() {
            log::warn!(
                "game service returned {} for {}",
                resp.status(),
                req.game_id
            );
            return fallback("game service returned a non-success status");
        }

        match resp.json::<CreateGameResponse>().await {
            Ok(body) => map_response(body),
            Err(e) => {
                log::warn!("malformed game service body for {}: {e}", req.game_id);
                fallback("malformed game service response")
            }
        }
    }

    async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

fn map_response(body: CreateGameResponse) -> CreateGameOutcome {
    match body {
        CreateGameResponse {
            success: true,
            game_id: Some(game_id),
            message,
            ..
        } => CreateGameOutcome::Created {
            game_id,
            message: message.unwrap_or_default(),
        },
        CreateGameResponse {
            success: false,
            error: Some(error),
            message,
            ..
        } => CreateGameOutcome::Rejected {
            error,
            message: message.unwrap_or_default(),
        },
        _ => fallback("schema-invalid game service response"),
    }
}

fn fallback(detail: &str) -> CreateGameOutcome {
    CreateGameOutcome::Rejected {
        error: GameErrorCode::GameAlreadyExists,
        message: format!("fallback: {detail}"),
    }
}
