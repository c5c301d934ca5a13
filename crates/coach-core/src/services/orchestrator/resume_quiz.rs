//! Resume quiz workflow
//!
//! ```text
//! request ─▶ idempotency lookup ──(SUCCESS)──▶ replay cached artifact
//!                 │        └──(PENDING)──▶ AlreadyInProgress
//!                 ▼
//!           try_consume ──(0 left)──▶ QuotaExceeded
//!                 ▼
//!           PENDING record
//!                 ▼
//!      ┌── ticker (questions) ────────┐  ┌── ticker (analysis) ──┐
//!      │ resolve resume ▶ question set │▶│ match / gap analysis   │
//!      └───────────────────────────────┘  └────────────────────────┘
//!                 ▼
//!      save artifact ▶ SUCCESS ▶ complete event
//!
//!      any failure after billing ▶ refund ▶ FAILED ▶ error event
//! ```

use chrono::Utc;
use serde_json::json;

use super::{require, SessionOrchestrator};
use crate::error::{Error, Result};
use crate::models::{
    ConsumptionRecord, ConsumptionStatus, NewConsumptionRecord, QuestionSet, QuizAnalysis, QuizOutcome,
    QuizQuestion, QuotaKind, ResumeQuizRequest, ResumeQuizResult,
};
use crate::services::ai::{LlmUsage, PromptContext, PromptKind};
use crate::services::consumption::RecordUsage;
use crate::services::document::{truncate_to_budget, validate_resume_content};
use crate::services::events::{EventStream, ProgressEmitter, QuizStage, StreamEvent};
use crate::services::ticker::SyntheticProgressTicker;

const KIND: QuotaKind = QuotaKind::ResumeQuiz;

/// Synthetic progress range while the analysis call runs
const ANALYSIS_PROGRESS: u8 = 60;
const ANALYSIS_PROGRESS_CAP: u8 = 85;

/// Output of the questions phase, carried into the analysis call
struct DraftedQuestions {
    resume: String,
    resume_source: &'static str,
    questions: Vec<QuizQuestion>,
    usage: LlmUsage,
}

impl SessionOrchestrator {
    /// Run a resume quiz on a background task and stream its events
    pub fn resume_quiz(&self, request: ResumeQuizRequest) -> EventStream {
        let (emitter, stream) = ProgressEmitter::channel();
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.run_resume_quiz(request, &emitter).await;
        });
        stream
    }

    /// Run a resume quiz to completion. Failures are both returned and sent as
    /// an `error` event; the emitter is closed on return.
    pub async fn run_resume_quiz(
        &self,
        request: ResumeQuizRequest,
        emitter: &ProgressEmitter,
    ) -> Result<QuizOutcome> {
        let result = self.resume_quiz_inner(&request, emitter).await;
        if let Err(e) = &result {
            log::warn!(
                "[quiz] Request {} for user {} failed: {}",
                request.idempotency_key,
                request.user_id,
                e
            );
            emitter.send(StreamEvent::error(e.to_string()));
        }
        emitter.close();
        result
    }

    async fn resume_quiz_inner(
        &self,
        request: &ResumeQuizRequest,
        emitter: &ProgressEmitter,
    ) -> Result<QuizOutcome> {
        require(&request.user_id, "user id")?;
        require(&request.idempotency_key, "request id")?;
        require(&request.position_name, "position name")?;
        let has_inline = request.resume_text.as_deref().is_some_and(|t| !t.trim().is_empty());
        let has_url = request.resume_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        if !has_inline && !has_url {
            return Err(Error::validation("either resume text or a resume URL is required"));
        }

        if let Some(existing) = self
            .records
            .find_active(&request.user_id, KIND, &request.idempotency_key)
            .await?
        {
            return match existing.status {
                ConsumptionStatus::Success => self.replay_quiz(&existing, emitter).await,
                _ => Err(Error::AlreadyInProgress(format!(
                    "request {} is still being processed",
                    request.idempotency_key
                ))),
            };
        }

        emitter.send(StreamEvent::progress(0, "Checking your balance", Some(QuizStage::Prepare)));
        if !self.ledger.try_consume(&request.user_id, KIND).await? {
            return Err(Error::QuotaExceeded(
                "no resume quiz uses left, please top up".to_string(),
            ));
        }

        let result_id = uuid::Uuid::new_v4().to_string();
        let new_record = NewConsumptionRecord {
            user_id: request.user_id.clone(),
            kind: KIND,
            idempotency_key: request.idempotency_key.clone(),
            result_id: Some(result_id.clone()),
            input_snapshot: json!({
                "company": request.company,
                "positionName": request.position_name,
                "jobDescription": request.job_description,
                "minSalary": request.min_salary,
                "maxSalary": request.max_salary,
                "resumeSource": if has_inline { "inline" } else { "url" },
                "resumeUrl": request.resume_url,
            }),
        };

        let record = match self.records.create(&new_record).await {
            Ok(record) => record,
            Err(Error::Conflict(msg)) => {
                // Lost the race against a concurrent request with the same key
                let err = Error::AlreadyInProgress(msg);
                self.refund_or_alert(&request.user_id, KIND, None, &err).await;
                return Err(err);
            }
            Err(e) => {
                self.refund_or_alert(&request.user_id, KIND, None, &e).await;
                return Err(e);
            }
        };

        match self.generate_quiz(request, &record, &result_id, emitter).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.compensate(&request.user_id, KIND, &record.record_id, &e).await;
                Err(e)
            }
        }
    }

    async fn replay_quiz(&self, record: &ConsumptionRecord, emitter: &ProgressEmitter) -> Result<QuizOutcome> {
        let missing = || {
            log::error!(
                "[quiz] Record {} is SUCCESS but its artifact is missing",
                record.record_id
            );
            Error::DataInconsistency(format!(
                "result of request {} is missing",
                record.idempotency_key
            ))
        };

        let result_id = record.result_id.as_deref().ok_or_else(missing)?;
        let result = self.quiz_results.get(result_id).await?.ok_or_else(missing)?;

        log::info!(
            "[quiz] Replaying result {} for request {}",
            result_id,
            record.idempotency_key
        );
        let outcome = QuizOutcome {
            result,
            consumption_record_id: record.record_id.clone(),
            from_cache: true,
            remaining_count: self.ledger.balance(&record.user_id, KIND).await.ok(),
        };
        emitter.send(StreamEvent::Complete {
            data: Box::new(outcome.clone()),
        });
        Ok(outcome)
    }

    async fn generate_quiz(
        &self,
        request: &ResumeQuizRequest,
        record: &ConsumptionRecord,
        result_id: &str,
        emitter: &ProgressEmitter,
    ) -> Result<QuizOutcome> {
        emitter.send(StreamEvent::progress(5, "Preparing your resume", Some(QuizStage::Prepare)));

        let ticker = SyntheticProgressTicker::from_config(&self.config.quiz)
            .with_stage(QuizStage::GeneratingQuestions);
        let drafted = ticker.wrap(emitter, self.generate_quiz_questions(request)).await?;

        emitter.send(StreamEvent::progress(
            ANALYSIS_PROGRESS,
            "Analysing how your resume matches the role",
            Some(QuizStage::GeneratingAnalysis),
        ));
        let ticker = SyntheticProgressTicker::new(
            self.config.quiz.ticker_interval(),
            ANALYSIS_PROGRESS,
            ANALYSIS_PROGRESS_CAP,
        )
        .starting_at(ANALYSIS_PROGRESS)
        .with_stage(QuizStage::GeneratingAnalysis);
        let (analysis, analysis_usage) = ticker
            .wrap(emitter, self.generate_quiz_analysis(request, &drafted.resume))
            .await?;
        let usage = drafted.usage.combine(&analysis_usage);

        emitter.send(StreamEvent::progress(90, "Saving your report", Some(QuizStage::Saving)));

        let model = if usage.model.is_empty() {
            self.model_name()
        } else {
            usage.model.clone()
        };
        let result = ResumeQuizResult {
            result_id: result_id.to_string(),
            user_id: request.user_id.clone(),
            consumption_record_id: record.record_id.clone(),
            company: request.company.clone(),
            position_name: request.position_name.clone(),
            resume_source: drafted.resume_source.to_string(),
            questions: drafted.questions,
            analysis,
            ai_model: Some(model.clone()),
            view_count: 0,
            created_at: Utc::now(),
            last_viewed_at: None,
        };
        self.quiz_results.insert(&result).await?;

        let output = json!({
            "resultId": result_id,
            "questionCount": result.total_questions(),
            "matchScore": result.analysis.match_score,
        });
        let usage = RecordUsage {
            ai_model: Some(model),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            duration_ms: Some(usage.duration_ms),
        };
        self.records
            .mark_success(&record.record_id, result_id, &output, &usage)
            .await?;

        log::info!(
            "[quiz] Generated {} questions for user {} (result {})",
            result.total_questions(),
            request.user_id,
            result_id
        );

        let outcome = QuizOutcome {
            result,
            consumption_record_id: record.record_id.clone(),
            from_cache: false,
            remaining_count: self.ledger.balance(&request.user_id, KIND).await.ok(),
        };
        emitter.send(StreamEvent::progress(100, "Done", Some(QuizStage::Done)));
        emitter.send(StreamEvent::Complete {
            data: Box::new(outcome.clone()),
        });
        Ok(outcome)
    }

    /// Resolve the resume, then the question set call
    async fn generate_quiz_questions(&self, request: &ResumeQuizRequest) -> Result<DraftedQuestions> {
        let (resume, source) = self
            .resolve_resume(request.resume_text.as_deref(), request.resume_url.as_deref())
            .await?;
        let resume = resume.ok_or_else(|| Error::validation("resume text is empty"))?;

        let check = validate_resume_content(&resume);
        if !check.is_valid {
            return Err(Error::validation(
                check.reason.unwrap_or_else(|| "resume text looks invalid".to_string()),
            ));
        }
        for warning in &check.warnings {
            log::warn!("[quiz] {}", warning);
        }

        let quiz = &self.config.quiz;
        let (resume, _) = truncate_to_budget(&resume, quiz.resume_token_budget, quiz.chars_per_token);

        let ctx = PromptContext::for_quiz(PromptKind::QuizQuestions, request, &resume, quiz.min_questions);
        let first = self.generate_structured(&ctx).await?;
        let set: QuestionSet = first.parse()?;
        let questions: Vec<QuizQuestion> = set
            .questions
            .into_iter()
            .filter(|q| !q.question.trim().is_empty())
            .collect();
        if questions.len() < quiz.min_questions {
            return Err(Error::generation(format!(
                "only {} questions generated, at least {} required",
                questions.len(),
                quiz.min_questions
            )));
        }

        Ok(DraftedQuestions {
            resume,
            resume_source: source.as_str(),
            questions,
            usage: first.usage,
        })
    }

    async fn generate_quiz_analysis(
        &self,
        request: &ResumeQuizRequest,
        resume: &str,
    ) -> Result<(QuizAnalysis, LlmUsage)> {
        let ctx = PromptContext::for_quiz(
            PromptKind::QuizAnalysis,
            request,
            resume,
            self.config.quiz.min_questions,
        );
        let reply = self.generate_structured(&ctx).await?;
        let mut analysis: QuizAnalysis = reply.parse()?;
        analysis.match_score = analysis.match_score.clamp(0.0, 100.0);
        Ok((analysis, reply.usage))
    }
}
