//! Time-bounded queue bans.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// One row of the `penalties` table. A penalty is active while
/// `expires_at > now()`.
#[derive(Debug, Clone, FromRow)]
pub struct Penalty {
    pub id: Uuid,
    pub user_id: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PenaltyStore: Send + Sync {
    /// Most recent penalty still in force for this user, if any.
    async fn get_active(&self, user_id: &str) -> Result<Option<Penalty>>;

    /// Record a new ban lasting `duration` from now.
    async fn add(&self, user_id: &str, duration: Duration, reason: &str) -> Result<()>;
}

pub struct PgPenaltyStore {
    pool: PgPool,
}

impl PgPenaltyStore {
    pub fn new(pool: PgPool) -> Self {
        PgPenaltyStore { pool }
    }
}

#[async_trait]
impl PenaltyStore for PgPenaltyStore {
    async fn get_active(&self, user_id: &str) -> Result<Option<Penalty>> {
        let row = sqlx::query_as::<_, Penalty>(
            "SELECT id, user_id, reason, expires_at, created_at
               FROM penalties
              WHERE user_id = $1 AND expires_at > now()
              ORDER BY expires_at DESC
              LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn add(&self, user_id: &str, duration: Duration, reason: &str) -> Result<()> {
        let expires_at = Utc::now() + chrono::Duration::from_std(duration)?;
        sqlx::query(
            "INSERT INTO penalties (id, user_id, reason, expires_at, created_at)
             VALUES ($1, $2, $3, $4, now())",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(reason)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
