//! Session orchestration
//!
//! Drives the two billable workflows, the resume quiz and the mock interview,
//! on top of the ledger, the record stores and the AI port.
//!
//! ```text
//!                  ┌────────────────────────────┐
//!  request ──────▶ │    SessionOrchestrator     │ ──▶ EventStream (to client)
//!                  └──┬──────┬──────┬──────┬────┘
//!                     │      │      │      │
//!             UsageLedger    │   SessionCache    AiGenerationPort
//!                  ConsumptionStore     InterviewStore / QuizStore
//! ```
//!
//! Every billed attempt follows the same shape: consume one unit, create a
//! PENDING record, do the work, then either mark SUCCESS or refund and mark
//! FAILED. A refund that itself fails goes to the [`AlertSink`].

pub mod mock_interview;
pub mod question_stream;
pub mod resume_quiz;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::config::CoachConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{ConsumptionHistory, InterviewResult, QuotaKind, ResumeQuizResult};
use crate::services::ai::{AiGenerationPort, PromptContext, StructuredResult, TextStream};
use crate::services::alert::{AlertSink, LogAlertSink, RefundAlert};
use crate::services::consumption::ConsumptionStore;
use crate::services::document::{clean_text, DocumentTextExtractor};
use crate::services::interview_store::InterviewStore;
use crate::services::ledger::UsageLedger;
use crate::services::quiz_store::QuizStore;
use crate::services::session_store::{InMemorySessionCache, SessionCache, SessionLocks};

/// Where the resume text of a request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeSource {
    Inline,
    Url,
    None,
}

impl ResumeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResumeSource::Inline => "inline",
            ResumeSource::Url => "url",
            ResumeSource::None => "none",
        }
    }
}

#[derive(Clone)]
pub struct SessionOrchestrator {
    pool: SqlitePool,
    ledger: UsageLedger,
    records: ConsumptionStore,
    quiz_results: QuizStore,
    interviews: InterviewStore,
    sessions: Arc<dyn SessionCache>,
    locks: SessionLocks,
    ai: Arc<dyn AiGenerationPort>,
    documents: Arc<dyn DocumentTextExtractor>,
    alerts: Arc<dyn AlertSink>,
    config: Arc<CoachConfig>,
}

impl SessionOrchestrator {
    pub fn new(
        db: &Database,
        ai: Arc<dyn AiGenerationPort>,
        documents: Arc<dyn DocumentTextExtractor>,
        config: CoachConfig,
    ) -> Self {
        let pool = db.pool.clone();
        Self {
            ledger: UsageLedger::new(pool.clone()),
            records: ConsumptionStore::new(pool.clone()),
            quiz_results: QuizStore::new(pool.clone()),
            interviews: InterviewStore::new(pool.clone()),
            pool,
            sessions: Arc::new(InMemorySessionCache::new()),
            locks: SessionLocks::new(),
            ai,
            documents,
            alerts: Arc::new(LogAlertSink),
            config: Arc::new(config.validate()),
        }
    }

    pub fn with_alert_sink(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_session_cache(mut self, sessions: Arc<dyn SessionCache>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn records(&self) -> &ConsumptionStore {
        &self.records
    }

    pub fn quiz_results(&self) -> &QuizStore {
        &self.quiz_results
    }

    pub fn interviews(&self) -> &InterviewStore {
        &self.interviews
    }

    pub fn sessions(&self) -> &Arc<dyn SessionCache> {
        &self.sessions
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    // ========================================================================
    // Reports and history
    // ========================================================================

    pub async fn view_quiz_report(&self, user_id: &str, result_id: &str) -> Result<ResumeQuizResult> {
        self.quiz_results.view(result_id, user_id).await
    }

    pub async fn view_interview_report(&self, user_id: &str, result_id: &str) -> Result<InterviewResult> {
        self.interviews.view(result_id, user_id).await
    }

    pub async fn consumption_history(
        &self,
        user_id: &str,
        skip: i64,
        limit: i64,
    ) -> Result<ConsumptionHistory> {
        self.records.history(user_id, skip, limit).await
    }

    /// Drop live sessions idle for longer than `max_idle`. Durable records are
    /// untouched, so a purged interview can still be resumed.
    pub async fn purge_idle_sessions(&self, max_idle: Duration) -> Result<Vec<String>> {
        self.sessions.purge_inactive(max_idle).await
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    /// Give back one unit after a billed failure. Returns whether the refund
    /// went through; a failed refund is raised to the alert sink.
    pub(crate) async fn refund_or_alert(
        &self,
        user_id: &str,
        kind: QuotaKind,
        record_id: Option<&str>,
        original: &Error,
    ) -> bool {
        match self.ledger.refund(user_id, kind).await {
            Ok(()) => {
                log::info!("[ledger] Refunded 1 {} to user {} after: {}", kind, user_id, original);
                true
            }
            Err(refund_error) => {
                self.alerts.critical(RefundAlert {
                    user_id: user_id.to_string(),
                    kind,
                    consumption_record_id: record_id.map(str::to_string),
                    original_error: original.to_string(),
                    refund_error: refund_error.to_string(),
                    occurred_at: Utc::now(),
                });
                false
            }
        }
    }

    /// Refund, then move the record to FAILED
    pub(crate) async fn compensate(&self, user_id: &str, kind: QuotaKind, record_id: &str, error: &Error) {
        let refunded = self.refund_or_alert(user_id, kind, Some(record_id), error).await;
        if let Err(e) = self
            .records
            .mark_failed(record_id, &error.to_string(), refunded)
            .await
        {
            log::error!("[consumption] Failed to mark record {} as failed: {}", record_id, e);
        }
    }

    /// Inline text wins over a URL. Inline text is cleaned the same way
    /// downloaded text is.
    pub(crate) async fn resolve_resume(
        &self,
        inline: Option<&str>,
        url: Option<&str>,
    ) -> Result<(Option<String>, ResumeSource)> {
        if let Some(text) = inline.map(clean_text).filter(|t| !t.is_empty()) {
            return Ok((Some(text), ResumeSource::Inline));
        }
        if let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) {
            log::info!("[document] Fetching resume from {}", url);
            let text = self.documents.fetch_and_extract(url).await?;
            return Ok((Some(text), ResumeSource::Url));
        }
        Ok((None, ResumeSource::None))
    }

    pub(crate) async fn generate_structured(&self, ctx: &PromptContext) -> Result<StructuredResult> {
        let timeout = self.config.ai.timeout();
        match tokio::time::timeout(timeout, self.ai.generate_structured(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::generation(format!(
                "{} timed out after {}s",
                ctx.kind.as_str(),
                timeout.as_secs()
            ))),
        }
    }

    pub(crate) async fn open_stream(&self, ctx: &PromptContext) -> Result<TextStream> {
        let timeout = self.config.ai.timeout();
        match tokio::time::timeout(timeout, self.ai.generate_stream(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::generation(format!(
                "{} did not start within {}s",
                ctx.kind.as_str(),
                timeout.as_secs()
            ))),
        }
    }

    /// Next chunk, failing if the producer goes quiet for longer than the AI timeout
    pub(crate) async fn next_chunk(&self, stream: &mut TextStream) -> Result<Option<String>> {
        let timeout = self.config.ai.timeout();
        tokio::time::timeout(timeout, stream.next_chunk())
            .await
            .map_err(|_| Error::generation(format!("stream stalled for {}s", timeout.as_secs())))
    }

    pub(crate) fn model_name(&self) -> String {
        self.ai.model_name()
    }
}

pub(crate) fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scripted AI port and document extractor for orchestrator unit tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::services::ai::{LlmUsage, PromptKind};
    use crate::services::document::DocumentError;

    pub enum Scripted {
        Json(serde_json::Value),
        Chunks(Vec<&'static str>),
        Fail(&'static str),
    }

    #[derive(Default)]
    pub struct ScriptedAi {
        replies: Mutex<VecDeque<Scripted>>,
        pub prompts: Mutex<Vec<PromptKind>>,
    }

    impl ScriptedAi {
        pub fn new(replies: Vec<Scripted>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn next(&self, kind: PromptKind) -> Scripted {
            self.prompts.lock().unwrap().push(kind);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Scripted::Fail("no scripted reply"))
        }
    }

    fn usage() -> LlmUsage {
        LlmUsage {
            model: "scripted".to_string(),
            prompt_tokens: Some(10),
            completion_tokens: Some(20),
            duration_ms: 1,
        }
    }

    #[async_trait]
    impl AiGenerationPort for ScriptedAi {
        async fn generate_structured(&self, ctx: &PromptContext) -> Result<StructuredResult> {
            match self.next(ctx.kind) {
                Scripted::Json(value) => Ok(StructuredResult { value, usage: usage() }),
                Scripted::Chunks(_) => Err(Error::generation("expected structured reply")),
                Scripted::Fail(msg) => Err(Error::generation(msg)),
            }
        }

        async fn generate_stream(&self, ctx: &PromptContext) -> Result<TextStream> {
            match self.next(ctx.kind) {
                Scripted::Chunks(chunks) => Ok(TextStream::from_chunks(chunks, usage())),
                Scripted::Json(_) => Err(Error::generation("expected stream reply")),
                Scripted::Fail(msg) => Err(Error::generation(msg)),
            }
        }

        fn model_name(&self) -> String {
            "scripted".to_string()
        }
    }

    pub struct NoDocuments;

    #[async_trait]
    impl DocumentTextExtractor for NoDocuments {
        async fn fetch_and_extract(&self, _url: &str) -> std::result::Result<String, DocumentError> {
            Err(DocumentError::DownloadFailed("offline".to_string()))
        }
    }

    pub fn orchestrator(db: &Database, replies: Vec<Scripted>) -> SessionOrchestrator {
        SessionOrchestrator::new(
            db,
            Arc::new(ScriptedAi::new(replies)),
            Arc::new(NoDocuments),
            CoachConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::test_database;
    use crate::models::InitialQuota;
    use crate::services::alert::RecordingAlertSink;

    #[tokio::test]
    async fn test_inline_resume_wins_over_url() {
        let (_dir, db) = test_database().await;
        let orchestrator = orchestrator(&db, vec![]);

        let (text, source) = orchestrator
            .resolve_resume(Some("  Rust   engineer  "), Some("https://example.com/cv.txt"))
            .await
            .unwrap();
        assert_eq!(source, ResumeSource::Inline);
        assert_eq!(text.as_deref(), Some("Rust engineer"));

        let (text, source) = orchestrator.resolve_resume(Some("   "), None).await.unwrap();
        assert_eq!(source, ResumeSource::None);
        assert!(text.is_none());
    }

    #[tokio::test]
    async fn test_url_failure_is_external_fetch_error() {
        let (_dir, db) = test_database().await;
        let orchestrator = orchestrator(&db, vec![]);

        let err = orchestrator
            .resolve_resume(None, Some("https://example.com/cv.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalFetchFailed(_)));
    }

    #[tokio::test]
    async fn test_failed_refund_raises_alert() {
        let (_dir, db) = test_database().await;
        let sink = Arc::new(RecordingAlertSink::new());
        let orchestrator = orchestrator(&db, vec![]).with_alert_sink(sink.clone());

        // No such user: the refund cannot land anywhere
        let refunded = orchestrator
            .refund_or_alert("ghost", QuotaKind::ResumeQuiz, Some("rec-1"), &Error::generation("boom"))
            .await;
        assert!(!refunded);

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id, "ghost");
        assert_eq!(alerts[0].consumption_record_id.as_deref(), Some("rec-1"));
    }

    #[tokio::test]
    async fn test_refund_restores_balance() {
        let (_dir, db) = test_database().await;
        let orchestrator = orchestrator(&db, vec![]);
        orchestrator
            .ledger()
            .create_account("u1", "U", &InitialQuota::default())
            .await
            .unwrap();
        let before = orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap();

        assert!(
            orchestrator
                .refund_or_alert("u1", QuotaKind::ResumeQuiz, None, &Error::generation("x"))
                .await
        );
        let after = orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_require() {
        assert!(require("x", "field").is_ok());
        assert!(matches!(require("  ", "field"), Err(Error::Validation(_))));
    }
}
