use chrono::{DateTime, Utc};

/// Failures surfaced to the gateway and turned into `error` events.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchmakingError {
    /// An active penalty blocks this user from queueing.
    Banned { until: DateTime<Utc> },
    /// The user is already waiting or sitting in a pending match.
    AlreadyQueued,
    /// Another waiting player already owns this socket.
    SocketBusy,
    /// No pending match with that id.
    MatchNotFound,
    /// The caller is not one of the two participants.
    NotParticipant,
}

impl std::fmt::Display for MatchmakingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchmakingError::Banned { until } => {
                write!(f, "Banned from matchmaking until {}", until.to_rfc3339())
            }
            MatchmakingError::AlreadyQueued => write!(f, "Already in queue or in a pending match"),
            MatchmakingError::SocketBusy => write!(f, "Socket already registered in the queue"),
            MatchmakingError::MatchNotFound => write!(f, "Match not found"),
            MatchmakingError::NotParticipant => write!(f, "Not a participant of this match"),
        }
    }
}

impl std::error::Error for MatchmakingError {}
