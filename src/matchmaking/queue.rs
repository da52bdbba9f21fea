//! In-memory queue indices: waiting players and pending ready-checks.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// One waiting participant. The elo is a frozen snapshot taken when the
/// player connected; it does not move while they wait.
#[derive(Debug)]
pub struct QueuedPlayer {
    pub user_id: String,
    pub socket_id: String,
    pub elo: u32,
    pub joined_at: Instant,
    /// Multiplier on the base tolerance; grows with wait time and never
    /// shrinks while the player stays queued.
    pub range_factor: f64,
    /// Set only on the re-queue path after an innocent cancellation.
    pub priority: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptState {
    Pending,
    Accepted,
    Declined,
}

/// Frozen per-player tuple inside a pending match.
#[derive(Debug)]
pub struct Participant {
    pub user_id: String,
    pub socket_id: String,
    pub elo: u32,
    pub state: AcceptState,
}

impl Participant {
    pub fn new(p: &QueuedPlayer) -> Self {
        Participant {
            user_id: p.user_id.clone(),
            socket_id: p.socket_id.clone(),
            elo: p.elo,
            state: AcceptState::Pending,
        }
    }
}

/// An accept/decline session between two players. Exactly one expiration
/// timer is alive per entry; whoever removes the entry aborts it.
#[derive(Debug)]
pub struct PendingMatch {
    pub match_id: Uuid,
    /// Epoch milliseconds, as sent to clients in the proposal.
    pub expires_at_ms: i64,
    pub players: [Participant; 2],
    pub timer: JoinHandle<()>,
}

impl PendingMatch {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.players.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant_mut(&mut self, user_id: &str) -> Option<&mut Participant> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn both_accepted(&self) -> bool {
        self.players.iter().all(|p| p.state == AcceptState::Accepted)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub pending: usize,
}

/// The four indices of §queue state. A user id appears at most once across
/// `waiting_by_user` and the participants of `pending`; a socket id at most
/// once in `waiting_by_socket`.
#[derive(Default)]
pub struct QueueState {
    pub waiting_by_user: HashMap<String, QueuedPlayer>,
    pub waiting_by_socket: HashSet<String>,
    pub pending: HashMap<Uuid, PendingMatch>,
}

impl QueueState {
    /// Insert into both waiting indices. Callers have already checked for
    /// duplicates under the same lock.
    pub fn insert_waiting(&mut self, player: QueuedPlayer) {
        self.waiting_by_socket.insert(player.socket_id.clone());
        self.waiting_by_user.insert(player.user_id.clone(), player);
    }

    /// Remove a waiting player by user id or socket id, keeping the two
    /// indices paired. Pending matches are not touched.
    pub fn remove_waiting(&mut self, ident: &str) -> Option<QueuedPlayer> {
        let user_id = if self.waiting_by_user.contains_key(ident) {
            ident.to_string()
        } else {
            self.waiting_by_user
                .values()
                .find(|p| p.socket_id == ident)?
                .user_id
                .clone()
        };
        let player = self.waiting_by_user.remove(&user_id)?;
        self.waiting_by_socket.remove(&player.socket_id);
        Some(player)
    }

    /// Scan of the pending index; its cardinality is bounded by half the
    /// queue size, so a linear pass is fine.
    pub fn is_user_pending(&self, user_id: &str) -> bool {
        self.pending.values().any(|m| m.is_participant(user_id))
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            size: self.waiting_by_user.len(),
            pending: self.pending.len(),
        }
    }
}
