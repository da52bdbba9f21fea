//! Wire protocol between clients and the matchmaking gateway.
//!
//! Event names are snake_case in the `type` tag, payload keys camelCase —
//! the contract the game clients already speak.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------- client → server ----------
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMsg {
    /// Enter the waiting pool. `elo` overrides the snapshot taken at
    /// connection time (used by test harnesses and admin tooling).
    JoinQueue { elo: Option<u32> },
    LeaveQueue,
    AcceptMatch { match_id: Uuid },
    DeclineMatch { match_id: Uuid },
}

// ---------- server → client ----------
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMsg {
    QueueJoined {
        user_id: String,
        elo: u32,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        priority: Option<bool>,
    },
    QueueLeft {
        user_id: String,
        timestamp: i64,
    },
    /// Broadcast after every queue mutation.
    QueueStats {
        size: usize,
        pending: usize,
    },
    MatchProposal {
        match_id: Uuid,
        /// Epoch milliseconds; the client renders a countdown from it.
        expires_at: i64,
        opponent_elo: u32,
    },
    MatchConfirmed {
        game_id: String,
        player1_id: String,
        player2_id: String,
    },
    MatchFailed {
        match_id: Uuid,
        reason: String,
        error_code: String,
        message: String,
    },
    MatchCancelled {
        match_id: Uuid,
        reason: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

/// `match_cancelled` reason seen by the side that caused the cancellation.
pub const CANCEL_PENALTY_APPLIED: &str = "penalty_applied";
/// `match_cancelled` reason seen by the innocent side.
pub const CANCEL_OPPONENT_DECLINED: &str = "opponent_declined";
/// `match_failed` reason when the Game service could not create the game.
pub const FAIL_GAME_CREATION: &str = "game_creation_failed";
