//! Resume quiz artifact storage

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::error::{Error, Result};
use crate::models::ResumeQuizResult;

#[derive(Debug, Clone, FromRow)]
struct StoredQuizResult {
    id: String,
    user_id: String,
    consumption_record_id: String,
    company: Option<String>,
    position_name: String,
    resume_source: String,
    questions: String,
    analysis: String,
    ai_model: Option<String>,
    view_count: i64,
    created_at: DateTime<Utc>,
    last_viewed_at: Option<DateTime<Utc>>,
}

impl StoredQuizResult {
    fn to_result(&self) -> Result<ResumeQuizResult> {
        Ok(ResumeQuizResult {
            result_id: self.id.clone(),
            user_id: self.user_id.clone(),
            consumption_record_id: self.consumption_record_id.clone(),
            company: self.company.clone(),
            position_name: self.position_name.clone(),
            resume_source: self.resume_source.clone(),
            questions: serde_json::from_str(&self.questions)?,
            analysis: serde_json::from_str(&self.analysis)?,
            ai_model: self.ai_model.clone(),
            view_count: self.view_count,
            created_at: self.created_at,
            last_viewed_at: self.last_viewed_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, consumption_record_id, company, position_name, resume_source,
           questions, analysis, ai_model, view_count, created_at, last_viewed_at
    FROM resume_quiz_results
"#;

#[derive(Clone)]
pub struct QuizStore {
    pool: SqlitePool,
}

impl QuizStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, result: &ResumeQuizResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resume_quiz_results
            (id, user_id, consumption_record_id, company, position_name, resume_source,
             questions, analysis, ai_model, view_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&result.result_id)
        .bind(&result.user_id)
        .bind(&result.consumption_record_id)
        .bind(&result.company)
        .bind(&result.position_name)
        .bind(&result.resume_source)
        .bind(serde_json::to_string(&result.questions)?)
        .bind(serde_json::to_string(&result.analysis)?)
        .bind(&result.ai_model)
        .bind(result.created_at)
        .execute(&self.pool)
        .await?;

        log::info!(
            "[quiz] Saved result {} ({} questions) for user {}",
            result.result_id,
            result.questions.len(),
            result.user_id
        );
        Ok(())
    }

    pub async fn get(&self, result_id: &str) -> Result<Option<ResumeQuizResult>> {
        let sql = format!("{} WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query_as::<_, StoredQuizResult>(&sql)
            .bind(result_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.to_result()).transpose()
    }

    /// Newest first
    pub async fn list_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<ResumeQuizResult>> {
        let sql = format!("{} WHERE user_id = ? ORDER BY created_at DESC LIMIT ?", SELECT_COLUMNS);
        let rows = sqlx::query_as::<_, StoredQuizResult>(&sql)
            .bind(user_id)
            .bind(limit.max(1))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| r.to_result()).collect()
    }

    /// Owner-checked read that counts as a view
    pub async fn view(&self, result_id: &str, user_id: &str) -> Result<ResumeQuizResult> {
        let existing = self
            .get(result_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("quiz report {}", result_id)))?;

        if existing.user_id != user_id {
            return Err(Error::Unauthorized(format!(
                "quiz report {} belongs to another user",
                result_id
            )));
        }

        sqlx::query(
            "UPDATE resume_quiz_results SET view_count = view_count + 1, last_viewed_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(result_id)
        .execute(&self.pool)
        .await?;

        self.get(result_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("quiz report {}", result_id)))
    }
}
