//! Durable interview storage
//!
//! Two tables back a mock interview:
//!
//! - `interview_results`: one row per interview, holding the status and a full
//!   JSON snapshot of the [`InterviewSession`] so a paused or crashed session
//!   can be rebuilt from the database alone.
//! - `interview_qa`: one row per question slot. Every answer turn goes through
//!   four separate writes:
//!
//! ```text
//! 1. write_answer      answer -> slot N          (the question just answered)
//! 2. append_slot       slot N+1 = ''             (before generation starts)
//! 3. set_question      slot N+1.question         (once the question is frozen)
//! 4. set_reference     slot N+1.reference_answer (once the stream finished)
//! ```
//!
//! Snapshots are only taken once a question is frozen, so a crash mid-turn
//! can leave the table ahead of the snapshot: an answer on the last asked
//! slot and a trailing slot with a partial or empty question.
//! [`InterviewStore::reconcile_slots`] trims both back on resume.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    EndReason, InterviewKind, InterviewResult, InterviewSession, InterviewStatus, QaEntry,
};

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(Debug, Clone, FromRow)]
struct StoredInterviewResult {
    id: String,
    user_id: String,
    session_id: String,
    interview_kind: String,
    interviewer_name: Option<String>,
    company: Option<String>,
    position_name: Option<String>,
    status: String,
    session_state: String,
    consumption_record_id: Option<String>,
    end_reason: Option<String>,
    question_count: i64,
    duration_minutes: Option<i64>,
    view_count: i64,
    started_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    resumed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl StoredInterviewResult {
    fn to_result(&self, qa: Vec<QaEntry>) -> Result<InterviewResult> {
        let interview_kind = InterviewKind::from_str(&self.interview_kind).ok_or_else(|| {
            Error::internal(format!(
                "interview {} has unknown kind {}",
                self.id, self.interview_kind
            ))
        })?;
        let session_state: InterviewSession = serde_json::from_str(&self.session_state)?;

        Ok(InterviewResult {
            result_id: self.id.clone(),
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            interview_kind,
            interviewer_name: self.interviewer_name.clone(),
            company: self.company.clone(),
            position_name: self.position_name.clone(),
            status: InterviewStatus::from_str(&self.status),
            session_state,
            consumption_record_id: self.consumption_record_id.clone(),
            end_reason: self.end_reason.as_deref().and_then(EndReason::from_str),
            question_count: self.question_count,
            duration_minutes: self.duration_minutes,
            view_count: self.view_count,
            started_at: self.started_at,
            paused_at: self.paused_at,
            resumed_at: self.resumed_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            qa,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct StoredQaEntry {
    slot: i64,
    question: String,
    answer: Option<String>,
    reference_answer: Option<String>,
    asked_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
}

impl From<StoredQaEntry> for QaEntry {
    fn from(row: StoredQaEntry) -> Self {
        QaEntry {
            slot: row.slot,
            question: row.question,
            answer: row.answer,
            reference_answer: row.reference_answer,
            asked_at: row.asked_at,
            answered_at: row.answered_at,
        }
    }
}

fn result_id_of(session: &InterviewSession) -> Result<&str> {
    session
        .result_id
        .as_deref()
        .ok_or_else(|| Error::internal(format!("session {} has no result id", session.session_id)))
}

// ============================================================================
// InterviewStore
// ============================================================================

#[derive(Clone)]
pub struct InterviewStore {
    pool: SqlitePool,
}

impl InterviewStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the durable record for a new session (status `in_progress`)
    pub(crate) async fn create_on(
        conn: &mut SqliteConnection,
        session: &InterviewSession,
    ) -> Result<()> {
        let result_id = result_id_of(session)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO interview_results
            (id, user_id, session_id, interview_kind, interviewer_name, company, position_name,
             status, session_state, consumption_record_id, question_count, started_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'in_progress', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result_id)
        .bind(&session.user_id)
        .bind(&session.session_id)
        .bind(session.interview_kind.as_str())
        .bind(&session.interviewer_name)
        .bind(&session.context.company)
        .bind(&session.context.position_name)
        .bind(serde_json::to_string(session)?)
        .bind(&session.consumption_record_id)
        .bind(i64::from(session.question_count))
        .bind(session.start_time)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        log::info!(
            "[interview] Created durable record {} for session {}",
            result_id,
            session.session_id
        );
        Ok(())
    }

    /// Persist the full session state
    pub async fn snapshot(&self, session: &InterviewSession) -> Result<()> {
        let result_id = result_id_of(session)?;
        let result = sqlx::query(
            r#"
            UPDATE interview_results
            SET session_state = ?, question_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(serde_json::to_string(session)?)
        .bind(i64::from(session.question_count))
        .bind(Utc::now())
        .bind(result_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("interview result {}", result_id)));
        }
        log::debug!(
            "[interview] Snapshot {} ({} turns)",
            result_id,
            session.conversation_history.len()
        );
        Ok(())
    }

    /// Rebuild a session from its durable snapshot
    pub async fn restore(&self, result_id: &str) -> Result<InterviewSession> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT session_state FROM interview_results WHERE id = ?")
                .bind(result_id)
                .fetch_optional(&self.pool)
                .await?;

        let (state,) = row.ok_or_else(|| Error::SessionNotFound(result_id.to_string()))?;
        Ok(serde_json::from_str(&state)?)
    }

    /// Full record including QA slots
    pub async fn get(&self, result_id: &str) -> Result<Option<InterviewResult>> {
        let row = sqlx::query_as::<_, StoredInterviewResult>(
            r#"
            SELECT id, user_id, session_id, interview_kind, interviewer_name, company,
                   position_name, status, session_state, consumption_record_id, end_reason,
                   question_count, duration_minutes, view_count, started_at, paused_at,
                   resumed_at, completed_at, updated_at
            FROM interview_results WHERE id = ?
            "#,
        )
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let qa = self.qa_entries(result_id).await?;
                Ok(Some(row.to_result(qa)?))
            }
            None => Ok(None),
        }
    }

    pub async fn status(&self, result_id: &str) -> Result<Option<InterviewStatus>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM interview_results WHERE id = ?")
                .bind(result_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(s,)| InterviewStatus::from_str(&s)))
    }

    /// Result id for a session id
    pub async fn find_by_session(&self, session_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM interview_results WHERE session_id = ? LIMIT 1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Newest-first interviews of a user, without QA slots
    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<InterviewResult>> {
        let rows = sqlx::query_as::<_, StoredInterviewResult>(
            r#"
            SELECT id, user_id, session_id, interview_kind, interviewer_name, company,
                   position_name, status, session_state, consumption_record_id, end_reason,
                   question_count, duration_minutes, view_count, started_at, paused_at,
                   resumed_at, completed_at, updated_at
            FROM interview_results WHERE user_id = ?
            ORDER BY started_at DESC LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|r| r.to_result(Vec::new())).collect()
    }

    /// Owner-checked read that counts as a view
    pub async fn view(&self, result_id: &str, user_id: &str) -> Result<InterviewResult> {
        let owner: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM interview_results WHERE id = ?")
                .bind(result_id)
                .fetch_optional(&self.pool)
                .await?;

        match owner {
            None => return Err(Error::not_found(format!("interview report {}", result_id))),
            Some((owner,)) if owner != user_id => {
                return Err(Error::Unauthorized(format!(
                    "interview report {} belongs to another user",
                    result_id
                )));
            }
            Some(_) => {}
        }

        sqlx::query("UPDATE interview_results SET view_count = view_count + 1 WHERE id = ?")
            .bind(result_id)
            .execute(&self.pool)
            .await?;

        self.get(result_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("interview report {}", result_id)))
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    /// in_progress -> paused; returns false if the record was not in progress
    pub async fn mark_paused(&self, session: &InterviewSession) -> Result<bool> {
        let result_id = result_id_of(session)?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE interview_results
            SET status = 'paused', session_state = ?, question_count = ?, paused_at = ?, updated_at = ?
            WHERE id = ? AND status = 'in_progress'
            "#,
        )
        .bind(serde_json::to_string(session)?)
        .bind(i64::from(session.question_count))
        .bind(now)
        .bind(now)
        .bind(result_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// paused / in_progress -> in_progress
    pub async fn mark_resumed(&self, session: &InterviewSession) -> Result<bool> {
        let result_id = result_id_of(session)?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE interview_results
            SET status = 'in_progress', session_state = ?, resumed_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('paused', 'in_progress')
            "#,
        )
        .bind(serde_json::to_string(session)?)
        .bind(now)
        .bind(now)
        .bind(result_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// paused / in_progress -> completed
    pub async fn mark_completed(&self, session: &InterviewSession, reason: EndReason) -> Result<bool> {
        let result_id = result_id_of(session)?;
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE interview_results
            SET status = 'completed', session_state = ?, question_count = ?, end_reason = ?,
                duration_minutes = ?, completed_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('paused', 'in_progress')
            "#,
        )
        .bind(serde_json::to_string(session)?)
        .bind(i64::from(session.question_count))
        .bind(reason.as_str())
        .bind(session.elapsed_minutes(now))
        .bind(now)
        .bind(now)
        .bind(result_id)
        .execute(&self.pool)
        .await?;

        let completed = result.rows_affected() == 1;
        if completed {
            log::info!("[interview] Interview {} completed ({})", result_id, reason.as_str());
        }
        Ok(completed)
    }

    /// Any non-terminal status -> failed
    pub async fn mark_failed(&self, result_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE interview_results
            SET status = 'failed', updated_at = ?
            WHERE id = ? AND status IN ('paused', 'in_progress')
            "#,
        )
        .bind(Utc::now())
        .bind(result_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // QA slots
    // ========================================================================

    async fn qa_entries(&self, result_id: &str) -> Result<Vec<QaEntry>> {
        let rows = sqlx::query_as::<_, StoredQaEntry>(
            r#"
            SELECT slot, question, answer, reference_answer, asked_at, answered_at
            FROM interview_qa WHERE result_id = ? ORDER BY slot ASC
            "#,
        )
        .bind(result_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(QaEntry::from).collect())
    }

    /// Step 1: store the candidate's answer in the latest asked slot.
    /// Returns the slot written, `None` when there is no slot yet.
    pub async fn write_answer(&self, result_id: &str, answer: &str) -> Result<Option<i64>> {
        let (slot,): (Option<i64>,) = sqlx::query_as(
            "SELECT MAX(slot) FROM interview_qa WHERE result_id = ? AND question != ''",
        )
        .bind(result_id)
        .fetch_one(&self.pool)
        .await?;

        let Some(slot) = slot else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE interview_qa SET answer = ?, answered_at = ? WHERE result_id = ? AND slot = ?",
        )
        .bind(answer)
        .bind(Utc::now())
        .bind(result_id)
        .bind(slot)
        .execute(&self.pool)
        .await?;

        Ok(Some(slot))
    }

    /// Undo step 1 for `slot`
    pub async fn clear_answer(&self, result_id: &str, slot: i64) -> Result<()> {
        sqlx::query(
            "UPDATE interview_qa SET answer = NULL, answered_at = NULL WHERE result_id = ? AND slot = ?",
        )
        .bind(result_id)
        .bind(slot)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Step 2: append a slot for the next question; returns its number
    pub async fn append_slot(&self, result_id: &str, question: &str) -> Result<i64> {
        let (slot,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO interview_qa (result_id, slot, question, asked_at)
            SELECT ?, COALESCE(MAX(slot), 0) + 1, ?, ?
            FROM interview_qa WHERE result_id = ?
            RETURNING slot
            "#,
        )
        .bind(result_id)
        .bind(question)
        .bind(Utc::now())
        .bind(result_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(slot)
    }

    /// Step 3: final question text for `slot`
    pub async fn set_question(&self, result_id: &str, slot: i64, question: &str) -> Result<()> {
        sqlx::query("UPDATE interview_qa SET question = ? WHERE result_id = ? AND slot = ?")
            .bind(question)
            .bind(result_id)
            .bind(slot)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Step 4: reference answer for `slot`
    pub async fn set_reference_answer(&self, result_id: &str, slot: i64, reference: &str) -> Result<()> {
        sqlx::query("UPDATE interview_qa SET reference_answer = ? WHERE result_id = ? AND slot = ?")
            .bind(reference)
            .bind(result_id)
            .bind(slot)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bring the slots back in line with a restored session that has asked
    /// `asked` questions: later slots go, the last asked slot is unanswered.
    pub async fn reconcile_slots(&self, result_id: &str, asked: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let dropped = sqlx::query("DELETE FROM interview_qa WHERE result_id = ? AND slot > ?")
            .bind(result_id)
            .bind(asked)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let cleared = sqlx::query(
            r#"
            UPDATE interview_qa SET answer = NULL, answered_at = NULL
            WHERE result_id = ? AND slot = ? AND answer IS NOT NULL
            "#,
        )
        .bind(result_id)
        .bind(asked)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        if dropped > 0 || cleared > 0 {
            log::warn!(
                "[interview] Reconciled {}: dropped {} slot(s), cleared {} answer(s)",
                result_id,
                dropped,
                cleared
            );
        }
        Ok(())
    }

    /// Remove a slot whose question was never written
    pub async fn discard_slot(&self, result_id: &str, slot: i64) -> Result<()> {
        sqlx::query("DELETE FROM interview_qa WHERE result_id = ? AND slot = ? AND question = ''")
            .bind(result_id)
            .bind(slot)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
