//! Fixed-window rate limiting for mutating operations.
//!
//! Counters live in SQLite keyed by (operation, actor). The whole
//! check-and-increment is a single upsert, so two parallel requests cannot
//! both pass a limit check that only one should. Bursts straddling a window
//! boundary are accepted; this is a fixed window, not a sliding one.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Operations the limiter guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Upload,
    ForceSync,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::ForceSync => "force_sync",
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    db: Arc<SqlitePool>,
}

impl RateLimiter {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Allow or deny one operation for `actor_id`.
    ///
    /// The first call inside a window sets the counter to 1 and schedules the
    /// window deadline; later calls increment until `limit` is reached, after
    /// which they are denied without incrementing. An elapsed window resets
    /// to a fresh count of 1. A denial is a normal outcome, not an error.
    pub async fn check_and_increment(
        &self,
        actor_id: &str,
        operation: Operation,
        limit: u32,
        window_seconds: u64,
    ) -> Result<bool, RateLimitError> {
        // The upsert admits the first call of a window unconditionally, so a
        // zero limit has to be rejected before it.
        if limit == 0 {
            return Ok(false);
        }

        let now = Utc::now();
        let deadline = now + Duration::seconds(window_seconds as i64);

        // One statement so the fetch-and-increment is atomic under SQLite's
        // serialized writes. The conflict WHERE clause turns an over-limit
        // call into a no-op, which RETURNING reports as an empty result.
        let row: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limits (operation, actor_id, count, window_expires_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(operation, actor_id) DO UPDATE SET
                count = CASE
                    WHEN rate_limits.window_expires_at <= ?4 THEN 1
                    ELSE rate_limits.count + 1
                END,
                window_expires_at = CASE
                    WHEN rate_limits.window_expires_at <= ?4 THEN ?3
                    ELSE rate_limits.window_expires_at
                END
            WHERE rate_limits.window_expires_at <= ?4 OR rate_limits.count < ?5
            RETURNING count
            "#,
        )
        .bind(operation.as_str())
        .bind(actor_id)
        .bind(deadline)
        .bind(now)
        .bind(limit as i64)
        .fetch_optional(&*self.db)
        .await?;

        let allowed = row.is_some();
        if !allowed {
            tracing::warn!(
                actor = actor_id,
                operation = operation.as_str(),
                limit,
                "rate limit reached"
            );
        }
        Ok(allowed)
    }

    #[cfg(test)]
    async fn force_expire(&self, actor_id: &str, operation: Operation) -> Result<(), RateLimitError> {
        let past = Utc::now() - Duration::seconds(1);
        sqlx::query(
            "UPDATE rate_limits SET window_expires_at = ? WHERE operation = ? AND actor_id = ?",
        )
        .bind(past)
        .bind(operation.as_str())
        .bind(actor_id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}
