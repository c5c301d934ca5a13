//! Consumption record storage
//!
//! One row per billable attempt. A partial unique index on
//! `(user_id, idempotency_key) WHERE status != 'failed'` makes the insert itself
//! the idempotency synchronisation point: of two concurrent attempts with the
//! same key only one row is ever created.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    ConsumptionHistory, ConsumptionRecord, ConsumptionStats, ConsumptionStatus,
    NewConsumptionRecord, QuotaKind,
};

/// Default page size for history listings
pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

/// Upper bound for a single history page
pub const MAX_HISTORY_LIMIT: i64 = 100;

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, Clone, FromRow)]
struct StoredConsumptionRecord {
    id: String,
    user_id: String,
    kind: String,
    status: String,
    idempotency_key: String,
    result_id: Option<String>,
    input_snapshot: String,
    output_snapshot: Option<String>,
    error_message: Option<String>,
    ai_model: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    duration_ms: Option<i64>,
    is_refunded: bool,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
}

impl StoredConsumptionRecord {
    fn to_record(&self) -> Result<ConsumptionRecord> {
        let kind = QuotaKind::from_str(&self.kind).ok_or_else(|| {
            Error::internal(format!("record {} has unknown kind {}", self.id, self.kind))
        })?;

        Ok(ConsumptionRecord {
            record_id: self.id.clone(),
            user_id: self.user_id.clone(),
            kind,
            status: ConsumptionStatus::from_str(&self.status),
            idempotency_key: self.idempotency_key.clone(),
            result_id: self.result_id.clone(),
            input_snapshot: serde_json::from_str(&self.input_snapshot)
                .unwrap_or(serde_json::Value::Null),
            output_snapshot: self
                .output_snapshot
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            error_message: self.error_message.clone(),
            ai_model: self.ai_model.clone(),
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            duration_ms: self.duration_ms,
            refunded: self.is_refunded,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            refunded_at: self.refunded_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, kind, status, idempotency_key, result_id, input_snapshot,
           output_snapshot, error_message, ai_model, prompt_tokens, completion_tokens,
           duration_ms, is_refunded, started_at, completed_at, failed_at, refunded_at
    FROM consumption_records
"#;

/// AI usage attached to a successful record
#[derive(Debug, Clone, Default)]
pub struct RecordUsage {
    pub ai_model: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub duration_ms: Option<i64>,
}

// ============================================================================
// ConsumptionStore
// ============================================================================

#[derive(Clone)]
pub struct ConsumptionStore {
    pool: SqlitePool,
}

impl ConsumptionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// PENDING or SUCCESS record for this key, if any. Keys are scoped per kind.
    pub async fn find_active(
        &self,
        user_id: &str,
        kind: QuotaKind,
        idempotency_key: &str,
    ) -> Result<Option<ConsumptionRecord>> {
        let sql = format!(
            "{} WHERE user_id = ? AND kind = ? AND idempotency_key = ? \
             AND status IN ('pending', 'success') ORDER BY started_at DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, StoredConsumptionRecord>(&sql)
            .bind(user_id)
            .bind(kind.as_str())
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.to_record()).transpose()
    }

    pub async fn get(&self, record_id: &str) -> Result<ConsumptionRecord> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        sqlx::query_as::<_, StoredConsumptionRecord>(&sql)
            .bind(record_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("consumption record {}", record_id)))?
            .to_record()
    }

    /// Insert a PENDING record. `Conflict` if an active record already holds the key.
    pub async fn create(&self, new: &NewConsumptionRecord) -> Result<ConsumptionRecord> {
        let mut conn = self.pool.acquire().await?;
        Self::create_on(&mut conn, new).await
    }

    pub(crate) async fn create_on(
        conn: &mut SqliteConnection,
        new: &NewConsumptionRecord,
    ) -> Result<ConsumptionRecord> {
        let record = ConsumptionRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id.clone(),
            kind: new.kind,
            status: ConsumptionStatus::Pending,
            idempotency_key: new.idempotency_key.clone(),
            result_id: new.result_id.clone(),
            input_snapshot: new.input_snapshot.clone(),
            output_snapshot: None,
            error_message: None,
            ai_model: None,
            prompt_tokens: None,
            completion_tokens: None,
            duration_ms: None,
            refunded: false,
            started_at: Utc::now(),
            completed_at: None,
            failed_at: None,
            refunded_at: None,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO consumption_records
            (id, user_id, kind, status, idempotency_key, result_id, input_snapshot, started_at)
            VALUES (?, ?, ?, 'pending', ?, ?, ?, ?)
            "#,
        )
        .bind(&record.record_id)
        .bind(&record.user_id)
        .bind(record.kind.as_str())
        .bind(&record.idempotency_key)
        .bind(&record.result_id)
        .bind(record.input_snapshot.to_string())
        .bind(record.started_at)
        .execute(&mut *conn)
        .await;

        match inserted {
            Ok(_) => {
                log::info!(
                    "[consumption] Created PENDING record {} ({}) for user {} key={}",
                    record.record_id,
                    record.kind,
                    record.user_id,
                    record.idempotency_key
                );
                Ok(record)
            }
            Err(e) if Error::is_unique_violation(&e) => Err(Error::Conflict(format!(
                "active record already exists for key {}",
                new.idempotency_key
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// PENDING -> SUCCESS. Fails if the record is not pending.
    pub async fn mark_success(
        &self,
        record_id: &str,
        result_id: &str,
        output: &serde_json::Value,
        usage: &RecordUsage,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE consumption_records
            SET status = 'success', result_id = ?, output_snapshot = ?, ai_model = ?,
                prompt_tokens = ?, completion_tokens = ?, duration_ms = ?, completed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(result_id)
        .bind(output.to_string())
        .bind(&usage.ai_model)
        .bind(usage.prompt_tokens)
        .bind(usage.completion_tokens)
        .bind(usage.duration_ms)
        .bind(Utc::now())
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "consumption record {} is not pending",
                record_id
            )));
        }

        log::info!("[consumption] Record {} -> SUCCESS (result {})", record_id, result_id);
        Ok(())
    }

    /// PENDING -> FAILED, recording whether the quota was given back
    pub async fn mark_failed(&self, record_id: &str, error: &str, refunded: bool) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE consumption_records
            SET status = 'failed', error_message = ?, failed_at = ?, is_refunded = ?, refunded_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(error)
        .bind(now)
        .bind(refunded)
        .bind(if refunded { Some(now) } else { None })
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "consumption record {} is not pending",
                record_id
            )));
        }

        log::info!(
            "[consumption] Record {} -> FAILED (refunded={}): {}",
            record_id,
            refunded,
            error
        );
        Ok(())
    }

    /// Newest-first page of a user's records and the total count
    pub async fn list_for_user(
        &self,
        user_id: &str,
        skip: i64,
        limit: i64,
    ) -> Result<(Vec<ConsumptionRecord>, i64)> {
        let skip = skip.max(0);
        let limit = if limit <= 0 {
            DEFAULT_HISTORY_LIMIT
        } else {
            limit.min(MAX_HISTORY_LIMIT)
        };

        let sql = format!(
            "{} WHERE user_id = ? ORDER BY started_at DESC, id DESC LIMIT ? OFFSET ?",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, StoredConsumptionRecord>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;

        let (total,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM consumption_records WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        let records = rows
            .iter()
            .map(|r| r.to_record())
            .collect::<Result<Vec<_>>>()?;
        Ok((records, total))
    }

    /// Per-kind counts; every kind is present even without records
    pub async fn stats_for_user(&self, user_id: &str) -> Result<BTreeMap<QuotaKind, ConsumptionStats>> {
        let rows: Vec<(String, String, bool, i64)> = sqlx::query_as(
            r#"
            SELECT kind, status, is_refunded, COUNT(*)
            FROM consumption_records
            WHERE user_id = ?
            GROUP BY kind, status, is_refunded
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats: BTreeMap<QuotaKind, ConsumptionStats> = QuotaKind::ALL
            .iter()
            .map(|k| (*k, ConsumptionStats::default()))
            .collect();

        for (kind, status, refunded, count) in rows {
            let Some(kind) = QuotaKind::from_str(&kind) else {
                log::warn!("[consumption] Skipping unknown kind in stats: {}", kind);
                continue;
            };
            let entry = stats.entry(kind).or_default();
            entry.total += count;
            match ConsumptionStatus::from_str(&status) {
                ConsumptionStatus::Success => entry.success += count,
                ConsumptionStatus::Failed => entry.failed += count,
                ConsumptionStatus::Pending => entry.pending += count,
            }
            if refunded {
                entry.refunded += count;
            }
        }

        Ok(stats)
    }

    /// Page plus statistics in one value
    pub async fn history(&self, user_id: &str, skip: i64, limit: i64) -> Result<ConsumptionHistory> {
        let (records, total) = self.list_for_user(user_id, skip, limit).await?;
        let stats = self.stats_for_user(user_id).await?;
        Ok(ConsumptionHistory {
            records,
            total,
            skip: skip.max(0),
            limit: if limit <= 0 {
                DEFAULT_HISTORY_LIMIT
            } else {
                limit.min(MAX_HISTORY_LIMIT)
            },
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_database;
    use crate::models::InitialQuota;
    use crate::services::ledger::UsageLedger;

    async fn setup() -> (tempfile::TempDir, ConsumptionStore) {
        let (dir, db) = test_database().await;
        UsageLedger::new(db.pool.clone())
            .create_account("u1", "Alice", &InitialQuota::default())
            .await
            .unwrap();
        (dir, ConsumptionStore::new(db.pool.clone()))
    }

    fn new_record(key: &str) -> NewConsumptionRecord {
        NewConsumptionRecord {
            user_id: "u1".to_string(),
            kind: QuotaKind::ResumeQuiz,
            idempotency_key: key.to_string(),
            result_id: None,
            input_snapshot: serde_json::json!({ "position": "Dev" }),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_active() {
        let (_dir, store) = setup().await;
        assert!(store.find_active("u1", QuotaKind::ResumeQuiz, "abc").await.unwrap().is_none());

        let created = store.create(&new_record("abc")).await.unwrap();
        let found = store.find_active("u1", QuotaKind::ResumeQuiz, "abc").await.unwrap().unwrap();
        assert_eq!(found.record_id, created.record_id);
        assert_eq!(found.status, ConsumptionStatus::Pending);
        assert_eq!(found.input_snapshot["position"], "Dev");
    }

    #[tokio::test]
    async fn test_duplicate_active_key_conflicts() {
        let (_dir, store) = setup().await;
        store.create(&new_record("abc")).await.unwrap();
        let err = store.create(&new_record("abc")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_same_key_for_another_kind_is_independent() {
        let (_dir, store) = setup().await;
        store.create(&new_record("abc")).await.unwrap();

        let interview = NewConsumptionRecord {
            kind: QuotaKind::SpecialInterview,
            ..new_record("abc")
        };
        assert!(store.find_active("u1", QuotaKind::SpecialInterview, "abc").await.unwrap().is_none());
        let created = store.create(&interview).await.unwrap();
        assert_eq!(created.kind, QuotaKind::SpecialInterview);
        assert!(store.find_active("u1", QuotaKind::ResumeQuiz, "abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_record_frees_the_key() {
        let (_dir, store) = setup().await;
        let first = store.create(&new_record("abc")).await.unwrap();
        store.mark_failed(&first.record_id, "boom", true).await.unwrap();

        assert!(store.find_active("u1", QuotaKind::ResumeQuiz, "abc").await.unwrap().is_none());
        store.create(&new_record("abc")).await.unwrap();

        let failed = store.get(&first.record_id).await.unwrap();
        assert_eq!(failed.status, ConsumptionStatus::Failed);
        assert!(failed.refunded);
        assert!(failed.refunded_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_one_shot() {
        let (_dir, store) = setup().await;
        let record = store.create(&new_record("abc")).await.unwrap();
        store
            .mark_success(&record.record_id, "res-1", &serde_json::json!({"n": 10}), &RecordUsage::default())
            .await
            .unwrap();

        let err = store.mark_failed(&record.record_id, "late", true).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = store.get(&record.record_id).await.unwrap();
        assert_eq!(stored.status, ConsumptionStatus::Success);
        assert_eq!(stored.result_id.as_deref(), Some("res-1"));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let (_dir, store) = setup().await;
        let a = store.create(&new_record("a")).await.unwrap();
        let b = store.create(&new_record("b")).await.unwrap();
        store.create(&new_record("c")).await.unwrap();
        store
            .mark_success(&a.record_id, "r", &serde_json::json!({}), &RecordUsage::default())
            .await
            .unwrap();
        store.mark_failed(&b.record_id, "x", true).await.unwrap();

        let (page, total) = store.list_for_user("u1", 0, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);

        let stats = store.stats_for_user("u1").await.unwrap();
        let quiz = &stats[&QuotaKind::ResumeQuiz];
        assert_eq!(quiz.total, 3);
        assert_eq!(quiz.success, 1);
        assert_eq!(quiz.failed, 1);
        assert_eq!(quiz.pending, 1);
        assert_eq!(quiz.refunded, 1);
        assert_eq!(stats[&QuotaKind::SpecialInterview], ConsumptionStats::default());
    }
}
