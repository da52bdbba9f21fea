//! Tick-driven pairing engine with a two-phase ready check.
//
//  Lifecycle of a player:
//    join_queue -> waiting -> proposed (pending match) -> accept/decline
//      -> game created, or cancelled with a penalty for the faulty side
//      -> innocents re-queued with priority

pub mod error;
pub mod queue;

pub use error::MatchmakingError;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use futures::FutureExt;
use tokio::time::{sleep, sleep_until, Instant};
use uuid::Uuid;

use crate::config::MatchTuning;
use crate::db::penalty_repo::PenaltyStore;
use crate::db::session_repo::SessionLog;
use crate::notify::Notifier;
use crate::protocol::{
    ServerMsg, CANCEL_OPPONENT_DECLINED, CANCEL_PENALTY_APPLIED, FAIL_GAME_CREATION,
};
use crate::remote::game::{CreateGameOutcome, CreateGameRequest, GameService};
use queue::{AcceptState, Participant, PendingMatch, QueueState, QueueStats, QueuedPlayer};

/// Tolerance multiplier granted to the active side of a pairing attempt
/// when that player holds the priority flag. The passive side is judged on
/// its plain widened window.
const PRIORITY_TOLERANCE_BONUS: f64 = 2.0;

pub struct Matchmaker {
    /// Self-handle for the expiration timers spawned per pending match.
    me: Weak<Matchmaker>,
    state: Mutex<QueueState>,
    penalties: Arc<dyn PenaltyStore>,
    sessions: Arc<dyn SessionLog>,
    game: Arc<dyn GameService>,
    notifier: Arc<dyn Notifier>,
    tuning: MatchTuning,
}

impl Matchmaker {
    pub fn new(
        penalties: Arc<dyn PenaltyStore>,
        sessions: Arc<dyn SessionLog>,
        game: Arc<dyn GameService>,
        notifier: Arc<dyn Notifier>,
        tuning: MatchTuning,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Matchmaker {
            me: me.clone(),
            state: Mutex::new(QueueState::default()),
            penalties,
            sessions,
            game,
            notifier,
            tuning,
        })
    }

    /// Spawn the periodic pairing sweep as a background task. A panicking
    /// sweep is logged and the next one proceeds from current state.
    pub fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            log::info!(
                "matchmaking loop started, tick every {:?}",
                self.tuning.tick_rate
            );
            loop {
                if let Err(panic) = AssertUnwindSafe(self.tick()).catch_unwind().await {
                    log::error!("matchmaking tick panicked: {panic:?}");
                }
                sleep(self.tuning.tick_rate).await;
            }
        });
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot for the admin endpoint and the `queue_stats` broadcast.
    pub fn queue_stats(&self) -> QueueStats {
        self.state().stats()
    }

    fn broadcast_stats(&self) {
        let stats = self.queue_stats();
        self.notifier.broadcast(ServerMsg::QueueStats {
            size: stats.size,
            pending: stats.pending,
        });
    }

    /// Enter the waiting pool. Emits `queue_joined` to the new socket and a
    /// `queue_stats` broadcast on success.
    pub async fn add_player(
        &self,
        user_id: &str,
        socket_id: &str,
        elo: u32,
        priority: bool,
    ) -> Result<(), MatchmakingError> {
        match self.penalties.get_active(user_id).await {
            Ok(Some(p)) => return Err(MatchmakingError::Banned { until: p.expires_at }),
            Ok(None) => {}
            // Fail open: a store outage should not freeze the whole queue.
            Err(e) => log::warn!("penalty lookup failed for {user_id}: {e:?}"),
        }

        {
            let mut st = self.state();
            if st.waiting_by_user.contains_key(user_id) || st.is_user_pending(user_id) {
                return Err(MatchmakingError::AlreadyQueued);
            }
            if st.waiting_by_socket.contains(socket_id) {
                return Err(MatchmakingError::SocketBusy);
            }
            st.insert_waiting(QueuedPlayer {
                user_id: user_id.to_string(),
                socket_id: socket_id.to_string(),
                elo,
                joined_at: Instant::now(),
                range_factor: 1.0,
                priority,
            });
        }

        log::info!("{user_id} joined the queue (elo {elo}, priority {priority})");
        self.notifier.send_to(
            socket_id,
            ServerMsg::QueueJoined {
                user_id: user_id.to_string(),
                elo,
                timestamp: Utc::now().timestamp_millis(),
                priority: priority.then_some(true),
            },
        );
        self.broadcast_stats();
        Ok(())
    }

    /// Leave the waiting pool. Accepts either a user id or a socket id and
    /// is idempotent; a player already promoted into a pending match is no
    /// longer "waiting" and is not touched here.
    pub fn remove_player(&self, ident: &str) {
        let removed = self.state().remove_waiting(ident);
        if let Some(p) = removed {
            log::info!("{} left the queue", p.user_id);
            self.notifier.send_to(
                &p.socket_id,
                ServerMsg::QueueLeft {
                    user_id: p.user_id.clone(),
                    timestamp: Utc::now().timestamp_millis(),
                },
            );
            self.broadcast_stats();
        }
    }

    /// One pairing sweep over the waiting pool.
    pub async fn tick(&self) {
        let mut proposals: Vec<(String, ServerMsg)> = Vec::new();

        {
            let mut st = self.state();
            if st.waiting_by_user.len() < 2 {
                return;
            }
            let now = Instant::now();

            // Priority players first, then ascending elo; user id keeps the
            // order reproducible.
            let mut order: Vec<String> = st.waiting_by_user.keys().cloned().collect();
            order.sort_by(|a, b| {
                let pa = &st.waiting_by_user[a];
                let pb = &st.waiting_by_user[b];
                pb.priority
                    .cmp(&pa.priority)
                    .then(pa.elo.cmp(&pb.elo))
                    .then(a.cmp(b))
            });

            let mut matched = vec![false; order.len()];
            let mut pairs: Vec<(String, String)> = Vec::new();

            for i in 0..order.len() {
                if matched[i] {
                    continue;
                }

                let (elo_a, tol_a) = {
                    let Some(p) = st.waiting_by_user.get_mut(&order[i]) else {
                        continue;
                    };
                    // Widen the window once the wait outgrows the current
                    // factor; the widening sticks while the player stays
                    // queued.
                    let waited_ms = now.duration_since(p.joined_at).as_millis() as f64;
                    if waited_ms
                        > self.tuning.expansion_interval.as_millis() as f64 * p.range_factor
                    {
                        p.range_factor += self.tuning.expansion_step;
                    }
                    let bonus = if p.priority {
                        PRIORITY_TOLERANCE_BONUS
                    } else {
                        1.0
                    };
                    (p.elo, self.tuning.base_tolerance * p.range_factor * bonus)
                };

                for j in (i + 1)..order.len() {
                    if matched[j] {
                        continue;
                    }
                    let Some(b) = st.waiting_by_user.get(&order[j]) else {
                        continue;
                    };
                    let tol_b = self.tuning.base_tolerance * b.range_factor;
                    if (elo_a.abs_diff(b.elo) as f64) <= tol_a.min(tol_b) {
                        matched[i] = true;
                        matched[j] = true;
                        pairs.push((order[i].clone(), order[j].clone()));
                        break;
                    }
                }
            }

            for (ua, ub) in pairs {
                let (Some(a), Some(b)) = (st.remove_waiting(&ua), st.remove_waiting(&ub)) else {
                    continue;
                };
                let match_id = self.open_ready_check(&mut st, &a, &b, now, &mut proposals);
                log::info!(
                    "proposed match {match_id}: {ua} ({}) vs {ub} ({})",
                    a.elo,
                    b.elo
                );
            }
        }

        if !proposals.is_empty() {
            for (socket_id, msg) in proposals {
                self.notifier.send_to(&socket_id, msg);
            }
            self.broadcast_stats();
        }
    }

    /// Move a fresh pair into the pending index and arm its expiration
    /// timer. Called with the queue lock held; emissions are handed back to
    /// the caller.
    fn open_ready_check(
        &self,
        st: &mut QueueState,
        a: &QueuedPlayer,
        b: &QueuedPlayer,
        now: Instant,
        proposals: &mut Vec<(String, ServerMsg)>,
    ) -> Uuid {
        let match_id = Uuid::new_v4();
        let expires_at_ms =
            Utc::now().timestamp_millis() + self.tuning.accept_timeout.as_millis() as i64;
        let deadline = now + self.tuning.accept_timeout;

        let timer = {
            let me = self.me.clone();
            tokio::spawn(async move {
                sleep_until(deadline).await;
                if let Some(mm) = me.upgrade() {
                    mm.expire(match_id).await;
                }
            })
        };

        st.pending.insert(
            match_id,
            PendingMatch {
                match_id,
                expires_at_ms,
                players: [Participant::new(a), Participant::new(b)],
                timer,
            },
        );

        proposals.push((
            a.socket_id.clone(),
            ServerMsg::MatchProposal {
                match_id,
                expires_at: expires_at_ms,
                opponent_elo: b.elo,
            },
        ));
        proposals.push((
            b.socket_id.clone(),
            ServerMsg::MatchProposal {
                match_id,
                expires_at: expires_at_ms,
                opponent_elo: a.elo,
            },
        ));

        match_id
    }

    /// A participant confirms the ready check. Duplicate replies are
    /// no-ops; the second confirmation drives finalization.
    pub async fn accept(&self, user_id: &str, match_id: Uuid) -> Result<(), MatchmakingError> {
        let ready = {
            let mut st = self.state();
            let pm = st
                .pending
                .get_mut(&match_id)
                .ok_or(MatchmakingError::MatchNotFound)?;
            let part = pm
                .participant_mut(user_id)
                .ok_or(MatchmakingError::NotParticipant)?;
            match part.state {
                AcceptState::Accepted | AcceptState::Declined => {
                    log::debug!("duplicate ready-check reply from {user_id} for {match_id}");
                    return Ok(());
                }
                AcceptState::Pending => part.state = AcceptState::Accepted,
            }
            if pm.both_accepted() {
                // Removing the entry before any suspension point makes a
                // late decline or duplicate accept observe MatchNotFound /
                // no-op instead of a second finalization.
                let pm = st.pending.remove(&match_id);
                if let Some(pm) = &pm {
                    pm.timer.abort();
                }
                pm
            } else {
                None
            }
        };

        if let Some(pm) = ready {
            self.finalize(pm).await;
        }
        Ok(())
    }

    /// A participant rejects the ready check. The decliner is the faulty
    /// side; the opponent is re-queued with priority.
    pub async fn decline(&self, user_id: &str, match_id: Uuid) -> Result<(), MatchmakingError> {
        let pm = {
            let mut st = self.state();
            {
                let pm = st
                    .pending
                    .get_mut(&match_id)
                    .ok_or(MatchmakingError::MatchNotFound)?;
                let part = pm
                    .participant_mut(user_id)
                    .ok_or(MatchmakingError::NotParticipant)?;
                part.state = AcceptState::Declined;
            }
            let pm = st.pending.remove(&match_id);
            if let Some(pm) = &pm {
                pm.timer.abort();
            }
            pm
        };

        if let Some(pm) = pm {
            self.cancel(pm, vec![user_id.to_string()], "declined").await;
        }
        Ok(())
    }

    /// Expiration timer body. Whoever is still undecided at the deadline is
    /// the faulty side. A match already finalized or declined has left the
    /// index by now and the wake-up is a no-op.
    async fn expire(&self, match_id: Uuid) {
        let pm = {
            let mut st = self.state();
            match st.pending.remove(&match_id) {
                Some(pm) => pm,
                None => return,
            }
        };

        let faulty: Vec<String> = pm
            .players
            .iter()
            .filter(|p| p.state == AcceptState::Pending)
            .map(|p| p.user_id.clone())
            .collect();
        self.cancel(pm, faulty, "timeout").await;
    }

    /// Tear down a pending match: penalties for the faulty side, priority
    /// re-queue for everyone else. A store failure on one participant never
    /// blocks processing of the other.
    async fn cancel(&self, pm: PendingMatch, faulty: Vec<String>, reason: &str) {
        log::info!("match {} cancelled ({reason})", pm.match_id);

        for p in &pm.players {
            if faulty.iter().any(|f| f == &p.user_id) {
                let why = format!("Matchmaking abuse: {reason}");
                if let Err(e) = self
                    .penalties
                    .add(&p.user_id, self.tuning.penalty_duration, &why)
                    .await
                {
                    log::warn!("failed to record penalty for {}: {e:?}", p.user_id);
                }
                self.notifier.send_to(
                    &p.socket_id,
                    ServerMsg::MatchCancelled {
                        match_id: pm.match_id,
                        reason: CANCEL_PENALTY_APPLIED.into(),
                    },
                );
            } else {
                self.notifier.send_to(
                    &p.socket_id,
                    ServerMsg::MatchCancelled {
                        match_id: pm.match_id,
                        reason: CANCEL_OPPONENT_DECLINED.into(),
                    },
                );
                if let Err(e) = self.add_player(&p.user_id, &p.socket_id, p.elo, true).await {
                    log::warn!("re-queue after cancel failed for {}: {e}", p.user_id);
                }
            }
        }

        self.broadcast_stats();
    }

    /// Both sides accepted: log the session, ask the Game service for the
    /// real game and tell the players how it went. The pending entry was
    /// already removed by the caller.
    async fn finalize(&self, pm: PendingMatch) {
        let [p1, p2] = &pm.players;

        if let Err(e) = self
            .sessions
            .record_started(pm.match_id, &p1.user_id, &p2.user_id)
            .await
        {
            log::warn!("session log write failed for {}: {e:?}", pm.match_id);
        }

        let req = CreateGameRequest {
            game_id: pm.match_id.to_string(),
            player1_id: p1.user_id.clone(),
            player2_id: p2.user_id.clone(),
        };

        match self.game.create_game(&req).await {
            CreateGameOutcome::Created { game_id, .. } => {
                log::info!("match {} confirmed as game {game_id}", pm.match_id);
                let msg = ServerMsg::MatchConfirmed {
                    game_id,
                    player1_id: p1.user_id.clone(),
                    player2_id: p2.user_id.clone(),
                };
                self.notifier.send_to(&p1.socket_id, msg.clone());
                self.notifier.send_to(&p2.socket_id, msg);
            }
            CreateGameOutcome::Rejected { error, message } => {
                log::warn!(
                    "game creation failed for {}: {} ({message})",
                    pm.match_id,
                    error.as_str()
                );
                let msg = ServerMsg::MatchFailed {
                    match_id: pm.match_id,
                    reason: FAIL_GAME_CREATION.into(),
                    error_code: error.as_str().to_string(),
                    message,
                };
                self.notifier.send_to(&p1.socket_id, msg.clone());
                self.notifier.send_to(&p2.socket_id, msg);

                for p in &pm.players {
                    if let Err(e) = self.add_player(&p.user_id, &p.socket_id, p.elo, true).await {
                        log::warn!("re-queue after failed creation for {}: {e}", p.user_id);
                    }
                }
            }
        }

        self.broadcast_stats();
    }
}
