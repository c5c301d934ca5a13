//! Usage ledger
//!
//! Per-user metered counters. A consume is a single conditional UPDATE so two
//! concurrent requests can never both take the last unit:
//!
//! ```text
//! UPDATE users SET <kind>_count = <kind>_count - 1
//!  WHERE id = ? AND <kind>_count > 0        -- rows_affected == 1 -> billed
//! ```
//!
//! A refund is the unconditional inverse. A refund that touches no row means a
//! billed attempt can no longer be compensated; it is reported as `RefundFailed`
//! and must never be swallowed by the caller.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{InitialQuota, QuotaKind, User};

/// Atomic per-user quota counters
#[derive(Clone)]
pub struct UsageLedger {
    pool: SqlitePool,
}

impl UsageLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account with the given starting balances
    pub async fn create_account(
        &self,
        user_id: &str,
        display_name: &str,
        quota: &InitialQuota,
    ) -> Result<User> {
        if user_id.trim().is_empty() {
            return Err(Error::validation("user id must not be empty"));
        }
        if quota.resume_quiz < 0 || quota.special_interview < 0 || quota.behavior_interview < 0 {
            return Err(Error::validation("initial quota must not be negative"));
        }

        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, display_name, resume_quiz_count, special_interview_count,
                               behavior_interview_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(display_name)
        .bind(quota.resume_quiz)
        .bind(quota.special_interview)
        .bind(quota.behavior_interview)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if Error::is_unique_violation(&e) => {
                return Err(Error::Conflict(format!("user {} already exists", user_id)));
            }
            Err(e) => return Err(e.into()),
        }

        log::info!(
            "[ledger] Created account {} (quiz={}, special={}, behavior={})",
            user_id,
            quota.resume_quiz,
            quota.special_interview,
            quota.behavior_interview
        );

        self.get_user(user_id).await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT id, display_name, resume_quiz_count, special_interview_count,
                   behavior_interview_count, created_at, updated_at
            FROM users WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("user {}", user_id)))
    }

    /// Remaining balance for one kind
    pub async fn balance(&self, user_id: &str, kind: QuotaKind) -> Result<i64> {
        Ok(self.get_user(user_id).await?.balance(kind))
    }

    /// Take one unit if the balance is positive.
    ///
    /// Returns `false` without touching anything when the balance is zero or the
    /// user does not exist.
    pub async fn try_consume(&self, user_id: &str, kind: QuotaKind) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::try_consume_on(&mut conn, user_id, kind).await
    }

    /// Same as [`try_consume`](Self::try_consume) on a caller-provided connection,
    /// so billing can share a transaction with other writes
    pub(crate) async fn try_consume_on(
        conn: &mut SqliteConnection,
        user_id: &str,
        kind: QuotaKind,
    ) -> Result<bool> {
        let column = kind.column();
        let sql = format!(
            "UPDATE users SET {col} = {col} - 1, updated_at = ? WHERE id = ? AND {col} > 0",
            col = column
        );

        let result = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&mut *conn)
            .await?;

        let consumed = result.rows_affected() == 1;
        if consumed {
            log::info!("[ledger] Consumed 1 {} for user {}", kind, user_id);
        } else {
            log::info!("[ledger] Insufficient {} balance for user {}", kind, user_id);
        }
        Ok(consumed)
    }

    /// Give one unit back. Unconditional increment.
    pub async fn refund(&self, user_id: &str, kind: QuotaKind) -> Result<()> {
        let column = kind.column();
        let sql = format!(
            "UPDATE users SET {col} = {col} + 1, updated_at = ? WHERE id = ?",
            col = column
        );

        let result = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                log::error!(
                    "[ledger] REFUND FAILED - manual intervention required: user={} kind={} error={}",
                    user_id,
                    kind,
                    e
                );
                Error::RefundFailed(format!("user {} ({}): {}", user_id, kind, e))
            })?;

        if result.rows_affected() == 0 {
            log::error!(
                "[ledger] REFUND FAILED - manual intervention required: user={} kind={} (user not found)",
                user_id,
                kind
            );
            return Err(Error::RefundFailed(format!(
                "user {} not found while refunding {}",
                user_id, kind
            )));
        }

        log::info!("[ledger] Refunded 1 {} to user {}", kind, user_id);
        Ok(())
    }
}
