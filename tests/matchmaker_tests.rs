//! End-to-end matchmaking scenarios against mocked collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use arena_server::config::MatchTuning;
use arena_server::db::penalty_repo::{Penalty, PenaltyStore};
use arena_server::db::session_repo::SessionLog;
use arena_server::matchmaking::{Matchmaker, MatchmakingError};
use arena_server::notify::Notifier;
use arena_server::protocol::ServerMsg;
use arena_server::remote::game::{
    CreateGameOutcome, CreateGameRequest, GameErrorCode, GameService,
};

// ─── Mock collaborators ───────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
enum Sent {
    To(String, ServerMsg),
    All(ServerMsg),
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    fn sent_to(&self, socket: &str) -> Vec<ServerMsg> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Sent::To(s, m) if s == socket => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn proposal_for(&self, socket: &str) -> Option<(Uuid, i64, u32)> {
        self.sent_to(socket).into_iter().find_map(|m| match m {
            ServerMsg::MatchProposal {
                match_id,
                expires_at,
                opponent_elo,
            } => Some((match_id, expires_at, opponent_elo)),
            _ => None,
        })
    }

    fn count_for(&self, socket: &str, pred: impl Fn(&ServerMsg) -> bool) -> usize {
        self.sent_to(socket).iter().filter(|m| pred(m)).count()
    }
}

impl Notifier for RecordingNotifier {
    fn send_to(&self, socket_id: &str, msg: ServerMsg) {
        self.events
            .lock()
            .unwrap()
            .push(Sent::To(socket_id.to_string(), msg));
    }

    fn broadcast(&self, msg: ServerMsg) {
        self.events.lock().unwrap().push(Sent::All(msg));
    }
}

#[derive(Default)]
struct MemoryPenaltyStore {
    rows: Mutex<Vec<Penalty>>,
}

impl MemoryPenaltyStore {
    fn recorded(&self) -> Vec<Penalty> {
        self.rows.lock().unwrap().clone()
    }

    /// Seed an active ban, as if a previous cancellation had written one.
    fn ban(&self, user_id: &str, secs: i64) {
        self.rows.lock().unwrap().push(Penalty {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            reason: "seeded".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(secs),
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl PenaltyStore for MemoryPenaltyStore {
    async fn get_active(&self, user_id: &str) -> Result<Option<Penalty>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user_id == user_id && p.expires_at > Utc::now())
            .max_by_key(|p| p.expires_at)
            .cloned())
    }

    async fn add(&self, user_id: &str, duration: Duration, reason: &str) -> Result<()> {
        let now = Utc::now();
        self.rows.lock().unwrap().push(Penalty {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            reason: reason.to_string(),
            expires_at: now + chrono::Duration::from_std(duration)?,
            created_at: now,
        });
        Ok(())
    }
}

#[derive(Default)]
struct MemorySessionLog {
    rows: Mutex<Vec<(Uuid, String, String)>>,
}

#[async_trait]
impl SessionLog for MemorySessionLog {
    async fn record_started(&self, id: Uuid, player_1_id: &str, player_2_id: &str) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .push((id, player_1_id.to_string(), player_2_id.to_string()));
        Ok(())
    }
}

/// Succeeds by echoing the requested game id unless primed with a failure.
#[derive(Default)]
struct ScriptedGameService {
    reject_with: Mutex<Option<(GameErrorCode, String)>>,
    calls: AtomicUsize,
}

impl ScriptedGameService {
    fn reject(&self, code: GameErrorCode, message: &str) {
        *self.reject_with.lock().unwrap() = Some((code, message.to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GameService for ScriptedGameService {
    async fn create_game(&self, req: &CreateGameRequest) -> CreateGameOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.reject_with.lock().unwrap() {
            None => CreateGameOutcome::Created {
                game_id: req.game_id.clone(),
                message: "created".into(),
            },
            Some((code, message)) => CreateGameOutcome::Rejected {
                error: *code,
                message: message.clone(),
            },
        }
    }

    async fn health(&self) -> bool {
        true
    }
}

// ─── Harness ──────────────────────────────────────────────────────

struct Harness {
    mm: Arc<Matchmaker>,
    notifier: Arc<RecordingNotifier>,
    penalties: Arc<MemoryPenaltyStore>,
    sessions: Arc<MemorySessionLog>,
    game: Arc<ScriptedGameService>,
    tuning: MatchTuning,
}

fn harness() -> Harness {
    harness_with(MatchTuning::default())
}

fn harness_with(tuning: MatchTuning) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let penalties = Arc::new(MemoryPenaltyStore::default());
    let sessions = Arc::new(MemorySessionLog::default());
    let game = Arc::new(ScriptedGameService::default());
    let mm = Matchmaker::new(
        penalties.clone(),
        sessions.clone(),
        game.clone(),
        notifier.clone(),
        tuning.clone(),
    );
    Harness {
        mm,
        notifier,
        penalties,
        sessions,
        game,
        tuning,
    }
}

impl Harness {
    /// Queue two players close enough to pair on the first sweep and run
    /// one tick; returns the proposed match id.
    async fn propose_pair(&self) -> Uuid {
        self.mm.add_player("A", "sA", 1500, false).await.unwrap();
        self.mm.add_player("B", "sB", 1520, false).await.unwrap();
        self.mm.tick().await;
        let (m, _, _) = self.notifier.proposal_for("sA").expect("no proposal for A");
        m
    }
}

fn is_cancelled_with(reason: &str) -> impl Fn(&ServerMsg) -> bool + '_ {
    move |m| matches!(m, ServerMsg::MatchCancelled { reason: r, .. } if r == reason)
}

// ─── S1: happy path ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn happy_path_confirms_match_for_both_players() {
    let h = harness();
    let m = h.propose_pair().await;

    // each side sees the other's rating
    let (mb, _, opp_b) = h.notifier.proposal_for("sB").unwrap();
    let (_, _, opp_a) = h.notifier.proposal_for("sA").unwrap();
    assert_eq!(m, mb);
    assert_eq!(opp_a, 1520);
    assert_eq!(opp_b, 1500);

    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("B", m).await.unwrap();

    assert_eq!(
        h.sessions.rows.lock().unwrap().clone(),
        vec![(m, "A".to_string(), "B".to_string())]
    );
    assert_eq!(h.game.calls(), 1);

    let confirmed = ServerMsg::MatchConfirmed {
        game_id: m.to_string(),
        player1_id: "A".into(),
        player2_id: "B".into(),
    };
    assert!(h.notifier.sent_to("sA").contains(&confirmed));
    assert!(h.notifier.sent_to("sB").contains(&confirmed));

    let stats = h.mm.queue_stats();
    assert_eq!((stats.size, stats.pending), (0, 0));
}

// ─── S2: decline penalizes the decliner ───────────────────────────

#[tokio::test(start_paused = true)]
async fn decline_penalizes_decliner_and_requeues_opponent() {
    let h = harness();
    let m = h.propose_pair().await;

    h.mm.decline("B", m).await.unwrap();

    assert_eq!(h.game.calls(), 0);

    // B: penalty recorded and announced
    let penalties = h.penalties.recorded();
    assert_eq!(penalties.len(), 1);
    assert_eq!(penalties[0].user_id, "B");
    assert_eq!(penalties[0].reason, "Matchmaking abuse: declined");
    let banned_for = penalties[0].expires_at - penalties[0].created_at;
    assert_eq!(banned_for.num_seconds(), h.tuning.penalty_duration.as_secs() as i64);
    assert_eq!(h.notifier.count_for("sB", is_cancelled_with("penalty_applied")), 1);

    // A: innocent, re-queued with priority
    assert_eq!(h.notifier.count_for("sA", is_cancelled_with("opponent_declined")), 1);
    assert!(h.notifier.sent_to("sA").iter().any(|msg| matches!(
        msg,
        ServerMsg::QueueJoined {
            user_id,
            priority: Some(true),
            ..
        } if user_id == "A"
    )));
    let stats = h.mm.queue_stats();
    assert_eq!((stats.size, stats.pending), (1, 0));
}

// ─── S3: ready-check timeout ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn timeout_penalizes_every_silent_participant() {
    let h = harness();
    h.propose_pair().await;

    sleep(h.tuning.accept_timeout + Duration::from_millis(100)).await;

    let penalized: Vec<String> = h
        .penalties
        .recorded()
        .iter()
        .map(|p| p.user_id.clone())
        .collect();
    assert_eq!(penalized.len(), 2);
    assert!(penalized.contains(&"A".to_string()));
    assert!(penalized.contains(&"B".to_string()));
    assert!(h
        .penalties
        .recorded()
        .iter()
        .all(|p| p.reason == "Matchmaking abuse: timeout"));

    assert_eq!(h.notifier.count_for("sA", is_cancelled_with("penalty_applied")), 1);
    assert_eq!(h.notifier.count_for("sB", is_cancelled_with("penalty_applied")), 1);

    let stats = h.mm.queue_stats();
    assert_eq!((stats.size, stats.pending), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn timeout_spares_the_side_that_accepted() {
    let h = harness();
    let m = h.propose_pair().await;

    h.mm.accept("A", m).await.unwrap();
    sleep(h.tuning.accept_timeout + Duration::from_millis(100)).await;

    let penalties = h.penalties.recorded();
    assert_eq!(penalties.len(), 1);
    assert_eq!(penalties[0].user_id, "B");

    // A comes back to the pool with priority
    assert!(h.notifier.sent_to("sA").iter().any(|msg| matches!(
        msg,
        ServerMsg::QueueJoined {
            priority: Some(true),
            ..
        }
    )));
    assert_eq!(h.mm.queue_stats().size, 1);
    assert_eq!(h.game.calls(), 0);
}

// ─── S4: rating-window expansion ──────────────────────────────────

#[tokio::test(start_paused = true)]
async fn window_expansion_eventually_pairs_distant_ratings() {
    let h = harness();
    h.mm.add_player("A", "sA", 1000, false).await.unwrap();
    h.mm.add_player("B", "sB", 1200, false).await.unwrap();

    h.mm.tick().await;
    assert!(h.notifier.proposal_for("sA").is_none(), "200 > 50, no pair yet");

    // Sweep once per tick period; the windows widen every
    // expansion_interval until 200 fits inside both.
    for _ in 0..40 {
        sleep(h.tuning.tick_rate).await;
        h.mm.tick().await;
        if h.notifier.proposal_for("sA").is_some() {
            break;
        }
    }

    let (_, _, opponent_elo) = h.notifier.proposal_for("sA").expect("windows never met");
    assert_eq!(opponent_elo, 1200);
    assert_eq!(h.mm.queue_stats().pending, 1);
}

// ─── S5: game-service failure re-queues both ──────────────────────

#[tokio::test(start_paused = true)]
async fn game_creation_failure_requeues_both_with_priority() {
    let h = harness();
    h.game
        .reject(GameErrorCode::GameAlreadyExists, "fallback: game service unreachable");
    let m = h.propose_pair().await;

    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("B", m).await.unwrap();

    for socket in ["sA", "sB"] {
        assert!(h.notifier.sent_to(socket).iter().any(|msg| matches!(
            msg,
            ServerMsg::MatchFailed {
                match_id,
                reason,
                error_code,
                ..
            } if *match_id == m
                && reason == "game_creation_failed"
                && error_code == "GAME_ALREADY_EXISTS"
        )));
        assert!(h.notifier.sent_to(socket).iter().any(|msg| matches!(
            msg,
            ServerMsg::QueueJoined {
                priority: Some(true),
                ..
            }
        )));
    }

    let stats = h.mm.queue_stats();
    assert_eq!((stats.size, stats.pending), (2, 0));
    assert!(h.penalties.recorded().is_empty());
}

// ─── S6: duplicate accepts collapse to one finalization ───────────

#[tokio::test(start_paused = true)]
async fn duplicate_accepts_finalize_exactly_once() {
    let h = harness();
    let m = h.propose_pair().await;

    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("B", m).await.unwrap();

    assert_eq!(h.sessions.rows.lock().unwrap().len(), 1);
    assert_eq!(h.game.calls(), 1);
    for socket in ["sA", "sB"] {
        let confirms = h
            .notifier
            .count_for(socket, |m| matches!(m, ServerMsg::MatchConfirmed { .. }));
        assert_eq!(confirms, 1, "{socket} should see exactly one confirmation");
    }
}

// ─── Error surface ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn add_player_rejects_bans_and_duplicates() {
    let h = harness();

    h.penalties.ban("Z", 600);
    let err = h.mm.add_player("Z", "sZ", 1500, false).await.unwrap_err();
    assert!(matches!(err, MatchmakingError::Banned { .. }));

    h.mm.add_player("A", "sA", 1500, false).await.unwrap();
    assert_eq!(
        h.mm.add_player("A", "sA2", 1500, false).await.unwrap_err(),
        MatchmakingError::AlreadyQueued
    );
    assert_eq!(
        h.mm.add_player("B", "sA", 1500, false).await.unwrap_err(),
        MatchmakingError::SocketBusy
    );
}

#[tokio::test(start_paused = true)]
async fn replies_on_unknown_matches_and_strangers_are_rejected() {
    let h = harness();
    let m = h.propose_pair().await;

    assert_eq!(
        h.mm.accept("A", Uuid::new_v4()).await.unwrap_err(),
        MatchmakingError::MatchNotFound
    );
    assert_eq!(
        h.mm.decline("C", m).await.unwrap_err(),
        MatchmakingError::NotParticipant
    );
}

#[tokio::test(start_paused = true)]
async fn decline_after_mutual_accept_is_rejected_without_penalty() {
    let h = harness();
    let m = h.propose_pair().await;

    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("B", m).await.unwrap();

    assert_eq!(
        h.mm.decline("B", m).await.unwrap_err(),
        MatchmakingError::MatchNotFound
    );
    assert!(h.penalties.recorded().is_empty());
}

// ─── Invariants ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn paired_players_cannot_be_waiting_at_the_same_time() {
    let h = harness();
    let _ = h.propose_pair().await;

    let stats = h.mm.queue_stats();
    assert_eq!((stats.size, stats.pending), (0, 1));

    // still inside the pending match, so a rejoin is refused
    assert_eq!(
        h.mm.add_player("A", "sA3", 1500, false).await.unwrap_err(),
        MatchmakingError::AlreadyQueued
    );
}

#[tokio::test(start_paused = true)]
async fn join_leave_join_round_trips() {
    let h = harness();
    h.mm.add_player("A", "sA", 1500, false).await.unwrap();
    h.mm.remove_player("A");
    assert_eq!(h.mm.queue_stats().size, 0);
    h.mm.add_player("A", "sA", 1500, false).await.unwrap();
    assert_eq!(h.mm.queue_stats().size, 1);

    // removal by socket id resolves to the same player
    h.mm.remove_player("sA");
    assert_eq!(h.mm.queue_stats().size, 0);

    // idempotent: removing an absent player is a no-op
    h.mm.remove_player("A");
}

#[tokio::test(start_paused = true)]
async fn removed_pending_match_fires_no_late_timer() {
    let h = harness();
    let m = h.propose_pair().await;

    h.mm.decline("B", m).await.unwrap();
    let penalties_before = h.penalties.recorded().len();
    let cancels_before = h.notifier.count_for("sA", |msg| {
        matches!(msg, ServerMsg::MatchCancelled { .. })
    });

    sleep(h.tuning.accept_timeout + Duration::from_millis(100)).await;

    assert_eq!(h.penalties.recorded().len(), penalties_before);
    let cancels_after = h.notifier.count_for("sA", |msg| {
        matches!(msg, ServerMsg::MatchCancelled { .. })
    });
    assert_eq!(cancels_after, cancels_before);
}

#[tokio::test(start_paused = true)]
async fn priority_player_is_paired_no_later_than_equal_peer() {
    let h = harness();
    // N enters first, then P with the priority flag; O is the only
    // opponent both are eligible for.
    h.mm.add_player("N", "sN", 1500, false).await.unwrap();
    h.mm.add_player("P", "sP", 1500, true).await.unwrap();
    h.mm.add_player("O", "sO", 1500, false).await.unwrap();

    h.mm.tick().await;

    assert!(
        h.notifier.proposal_for("sP").is_some(),
        "priority player must be in the first pair"
    );
    assert_eq!(h.mm.queue_stats().size, 1);
    assert_eq!(h.mm.queue_stats().pending, 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_style_removal_leaves_pending_matches_alone() {
    let h = harness();
    let m = h.propose_pair().await;

    // the gateway calls this on socket close; the pending match survives
    h.mm.remove_player("A");
    assert_eq!(h.mm.queue_stats().pending, 1);

    h.mm.accept("A", m).await.unwrap();
    h.mm.accept("B", m).await.unwrap();
    assert_eq!(h.game.calls(), 1);
}
