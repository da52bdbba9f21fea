//! Append-only record of matches that reached the Game service.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

#[async_trait]
pub trait SessionLog: Send + Sync {
    /// Insert a `STARTED` row for a finalized match. Callers treat failures
    /// as non-fatal.
    async fn record_started(&self, id: Uuid, player_1_id: &str, player_2_id: &str) -> Result<()>;
}

pub struct PgSessionLog {
    pool: PgPool,
}

impl PgSessionLog {
    pub fn new(pool: PgPool) -> Self {
        PgSessionLog { pool }
    }
}

#[async_trait]
impl SessionLog for PgSessionLog {
    async fn record_started(&self, id: Uuid, player_1_id: &str, player_2_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO matchmaking_sessions (id, player_1_id, player_2_id, status, started_at)
             VALUES ($1, $2, $3, 'STARTED', $4)",
        )
        .bind(id)
        .bind(player_1_id)
        .bind(player_2_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
