//! Mock interview state machine
//!
//! ```text
//!  start ─▶ [Starting] ──opening──▶ [AwaitingAnswer] ◀──────────────┐
//!                                      │   │    ▲                   │
//!                               answer │   │    │ resume            │
//!                                      ▼   └─▶ [Paused]             │
//!                                 [Thinking]                        │
//!                                      ▼                            │
//!                               [Questioning] ──question frozen─────┘
//!                                      │
//!            timeout / end marker / user end
//!                                      ▼
//!                                  [Ending] ─▶ [Ended]
//! ```
//!
//! An answer turn writes the durable QA record in four steps: the answer into
//! the latest slot, a new empty slot, the final question text, and the
//! reference answer. If generation fails before the question is frozen the
//! first two steps are undone and the candidate can answer again.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::question_stream::{QuestionSplitter, Segment};
use super::{require, SessionOrchestrator};
use crate::error::{Error, Result};
use crate::models::{
    ConsumptionRecord, EndReason, InterviewKind, InterviewPhase, InterviewSession, InterviewStatus,
    NewConsumptionRecord, PauseInfo, ResumeInfo, Speaker, StartInterviewRequest,
};
use crate::services::ai::{PromptContext, PromptKind};
use crate::services::consumption::{ConsumptionStore, RecordUsage};
use crate::services::document::truncate_to_budget;
use crate::services::events::{EventStream, ProgressEmitter, StreamEvent};
use crate::services::interview_store::InterviewStore;
use crate::services::ledger::UsageLedger;

const FALLBACK_CLOSING: &str =
    "Thank you for your time today. That concludes our interview, and your report is ready.";

/// Returned by a successful start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartInfo {
    pub session_id: String,
    pub result_id: String,
    pub consumption_record_id: String,
    pub opening: String,
}

/// How an answer turn finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerOutcome {
    NextQuestion {
        question: String,
        reference_answer: Option<String>,
        question_number: u32,
    },
    Ended(EndSummary),
}

/// Returned when an interview finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSummary {
    pub session_id: String,
    pub result_id: String,
    pub reason: EndReason,
    pub closing_statement: String,
    pub question_count: u32,
    pub elapsed_minutes: i64,
}

impl EndSummary {
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::End {
            session_id: self.session_id.clone(),
            result_id: self.result_id.clone(),
            reason: self.reason,
            content: self.closing_statement.clone(),
            elapsed_minutes: self.elapsed_minutes,
            question_count: self.question_count,
        }
    }
}

/// How far an answer turn got before it stopped
#[derive(Debug, Default)]
struct TurnProgress {
    answered_slot: Option<i64>,
    new_slot: Option<i64>,
    frozen: bool,
}

fn result_id_of(session: &InterviewSession) -> Result<String> {
    session
        .result_id
        .clone()
        .ok_or_else(|| Error::internal(format!("session {} has no result id", session.session_id)))
}

impl SessionOrchestrator {
    fn total_questions(&self, kind: InterviewKind) -> u32 {
        match kind {
            InterviewKind::Special => self.config.interview.special_total_questions,
            InterviewKind::Behavior => self.config.interview.behavior_total_questions,
        }
    }

    fn max_minutes(&self, kind: InterviewKind) -> u32 {
        match kind {
            InterviewKind::Special => self.config.interview.special_max_minutes,
            InterviewKind::Behavior => self.config.interview.behavior_max_minutes,
        }
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start an interview on a background task and stream the opening
    pub fn start_interview(&self, request: StartInterviewRequest) -> EventStream {
        let (emitter, stream) = ProgressEmitter::channel();
        let this = self.clone();
        tokio::spawn(async move {
            let _ = this.run_start_interview(request, &emitter).await;
        });
        stream
    }

    pub async fn run_start_interview(
        &self,
        request: StartInterviewRequest,
        emitter: &ProgressEmitter,
    ) -> Result<StartInfo> {
        let result = self.start_inner(&request, emitter).await;
        if let Err(e) = &result {
            log::warn!("[interview] Start for user {} failed: {}", request.user_id, e);
            emitter.send(StreamEvent::error(e.to_string()));
        }
        emitter.close();
        result
    }

    async fn start_inner(&self, request: &StartInterviewRequest, emitter: &ProgressEmitter) -> Result<StartInfo> {
        require(&request.user_id, "user id")?;
        let kind = request.interview_kind;
        let quota = kind.quota_kind();

        // Resolved before billing so a bad document costs nothing
        let (resume_text, _) = self
            .resolve_resume(request.resume_text.as_deref(), request.resume_url.as_deref())
            .await?;
        let resume_text = resume_text.map(|text| {
            truncate_to_budget(
                &text,
                self.config.quiz.resume_token_budget,
                self.config.quiz.chars_per_token,
            )
            .0
        });

        let mut session = InterviewSession::new(
            request.user_id.clone(),
            kind,
            self.config.interview.interviewer_name.clone(),
            request.context.clone(),
            resume_text,
            self.max_minutes(kind),
        );
        let idempotency_key = request
            .idempotency_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or_else(|| session.session_id.clone());

        if let Some(existing) = self
            .records
            .find_active(&request.user_id, quota, &idempotency_key)
            .await?
        {
            return Err(Error::AlreadyInProgress(format!(
                "request {} already started interview {}",
                idempotency_key,
                existing.result_id.as_deref().unwrap_or("-")
            )));
        }

        let result_id = uuid::Uuid::new_v4().to_string();
        session.result_id = Some(result_id.clone());

        // Billing, the record and the durable interview commit together
        let mut tx = self.pool.begin().await?;
        if !UsageLedger::try_consume_on(&mut *tx, &request.user_id, quota).await? {
            tx.rollback().await?;
            return Err(Error::QuotaExceeded(format!("no {} uses left, please top up", quota)));
        }
        let new_record = NewConsumptionRecord {
            user_id: request.user_id.clone(),
            kind: quota,
            idempotency_key,
            result_id: Some(result_id.clone()),
            input_snapshot: json!({
                "sessionId": session.session_id,
                "interviewKind": kind.as_str(),
                "company": request.context.company,
                "positionName": request.context.position_name,
                "hasResume": session.resume_text.is_some(),
            }),
        };
        let record = match ConsumptionStore::create_on(&mut *tx, &new_record).await {
            Ok(record) => record,
            Err(Error::Conflict(msg)) => return Err(Error::AlreadyInProgress(msg)),
            Err(e) => return Err(e),
        };
        session.consumption_record_id = Some(record.record_id.clone());
        InterviewStore::create_on(&mut *tx, &session).await?;
        tx.commit().await?;

        log::info!(
            "[interview] Started {} interview {} for user {}",
            kind.as_str(),
            session.session_id,
            request.user_id
        );

        match self.open_interview(&mut session, &result_id, &record, emitter).await {
            Ok(opening) => Ok(StartInfo {
                session_id: session.session_id.clone(),
                result_id,
                consumption_record_id: record.record_id,
                opening,
            }),
            Err(e) => {
                self.compensate(&request.user_id, quota, &record.record_id, &e).await;
                if let Err(mark_err) = self.interviews.mark_failed(&result_id).await {
                    log::error!("[interview] Failed to mark {} as failed: {}", result_id, mark_err);
                }
                if let Err(cache_err) = self.sessions.delete(&session.session_id).await {
                    log::warn!("[session-store] Failed to drop {}: {}", session.session_id, cache_err);
                }
                Err(e)
            }
        }
    }

    async fn open_interview(
        &self,
        session: &mut InterviewSession,
        result_id: &str,
        record: &ConsumptionRecord,
        emitter: &ProgressEmitter,
    ) -> Result<String> {
        self.sessions.put(session.clone()).await?;

        let start_event = |content: String, is_streaming: bool| StreamEvent::Start {
            session_id: session.session_id.clone(),
            result_id: result_id.to_string(),
            interviewer_name: session.interviewer_name.clone(),
            content,
            is_streaming,
            total_questions: self.total_questions(session.interview_kind),
        };

        let ctx = PromptContext::for_interview(PromptKind::InterviewOpening, session, 0);
        let mut stream = self.open_stream(&ctx).await?;
        let mut opening = String::new();
        while let Some(chunk) = self.next_chunk(&mut stream).await? {
            opening.push_str(&chunk);
            emitter.send(start_event(opening.clone(), true));
        }
        let summary = stream.finish().await?;

        let opening = opening.trim().to_string();
        if opening.is_empty() {
            return Err(Error::generation("model returned an empty opening statement"));
        }
        emitter.send(start_event(opening.clone(), false));

        self.interviews.append_slot(result_id, &opening).await?;
        session.append_turn(Speaker::Interviewer, opening.clone());
        session.phase = InterviewPhase::AwaitingAnswer;
        self.interviews.snapshot(session).await?;
        self.sessions.put(session.clone()).await?;

        let usage = RecordUsage {
            ai_model: Some(if summary.usage.model.is_empty() {
                self.model_name()
            } else {
                summary.usage.model.clone()
            }),
            prompt_tokens: summary.usage.prompt_tokens,
            completion_tokens: summary.usage.completion_tokens,
            duration_ms: Some(summary.usage.duration_ms),
        };
        let output = json!({ "sessionId": session.session_id, "resultId": result_id });
        self.records
            .mark_success(&record.record_id, result_id, &output, &usage)
            .await?;

        emitter.send(StreamEvent::Waiting {
            session_id: session.session_id.clone(),
        });
        Ok(opening)
    }

    // ========================================================================
    // Answer
    // ========================================================================

    /// Submit an answer on a background task and stream the next question
    pub fn submit_answer(&self, user_id: &str, session_id: &str, answer: &str) -> EventStream {
        let (emitter, stream) = ProgressEmitter::channel();
        let this = self.clone();
        let (user_id, session_id, answer) = (user_id.to_string(), session_id.to_string(), answer.to_string());
        tokio::spawn(async move {
            let _ = this.run_answer(&user_id, &session_id, &answer, &emitter).await;
        });
        stream
    }

    pub async fn run_answer(
        &self,
        user_id: &str,
        session_id: &str,
        answer: &str,
        emitter: &ProgressEmitter,
    ) -> Result<AnswerOutcome> {
        let result = self.answer_inner(user_id, session_id, answer, emitter).await;
        if let Err(e) = &result {
            log::warn!("[interview] Answer on session {} failed: {}", session_id, e);
            emitter.send(StreamEvent::error(e.to_string()));
        }
        emitter.close();
        result
    }

    async fn answer_inner(
        &self,
        user_id: &str,
        session_id: &str,
        answer: &str,
        emitter: &ProgressEmitter,
    ) -> Result<AnswerOutcome> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(Error::validation("answer must not be empty"));
        }

        let _guard = self.locks.try_lock(session_id)?;
        let mut session = self.live_session(user_id, session_id).await?;
        if session.phase != InterviewPhase::AwaitingAnswer {
            return Err(Error::AlreadyInProgress(format!(
                "session {} is not waiting for an answer",
                session_id
            )));
        }
        let result_id = result_id_of(&session)?;

        session.append_turn(Speaker::Candidate, answer);
        let mut progress = TurnProgress::default();
        let outcome = self
            .answer_turn(&mut session, &result_id, answer, &mut progress, emitter)
            .await;

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.recover_turn(&mut session, &result_id, &progress).await;
                Err(e)
            }
        }
    }

    async fn answer_turn(
        &self,
        session: &mut InterviewSession,
        result_id: &str,
        answer: &str,
        progress: &mut TurnProgress,
        emitter: &ProgressEmitter,
    ) -> Result<AnswerOutcome> {
        progress.answered_slot = self.interviews.write_answer(result_id, answer).await?;

        let now = Utc::now();
        if session.is_timed_out(now) {
            log::info!(
                "[interview] Session {} reached {} minutes, ending",
                session.session_id,
                session.target_duration_minutes
            );
            let summary = self.conclude(session, EndReason::Timeout, None).await?;
            self.finish_live_session(session).await;
            emitter.send(summary.to_event());
            return Ok(AnswerOutcome::Ended(summary));
        }
        let elapsed = session.elapsed_minutes(now);

        session.phase = InterviewPhase::Thinking;
        emitter.send(StreamEvent::Thinking {
            session_id: session.session_id.clone(),
        });

        let slot = self.interviews.append_slot(result_id, "").await?;
        progress.new_slot = Some(slot);

        let ctx = PromptContext::for_interview(PromptKind::InterviewQuestion, session, elapsed);
        let question_number = ctx.question_number;
        let total_questions = self.total_questions(session.interview_kind);
        let mut stream = self.open_stream(&ctx).await?;
        session.phase = InterviewPhase::Questioning;

        let question_event = |session: &InterviewSession, content: &str, is_streaming: bool| StreamEvent::Question {
            session_id: session.session_id.clone(),
            content: content.to_string(),
            is_streaming,
            question_number,
            total_questions,
            elapsed_minutes: elapsed,
        };
        let reference_event = |session: &InterviewSession, content: &str, is_streaming: bool| {
            StreamEvent::ReferenceAnswer {
                session_id: session.session_id.clone(),
                content: content.to_string(),
                is_streaming,
                question_number,
            }
        };

        let mut splitter = QuestionSplitter::new();
        let mut question = String::new();
        let mut reference = String::new();
        let mut saw_reference_marker = false;
        loop {
            let (segments, done) = match self.next_chunk(&mut stream).await? {
                Some(chunk) => (splitter.push(&chunk), false),
                None => (splitter.finish(), true),
            };
            for segment in segments {
                match segment {
                    Segment::Question(text) => {
                        question.push_str(&text);
                        emitter.send(question_event(&*session, &question, true));
                    }
                    Segment::QuestionComplete => {
                        saw_reference_marker = true;
                        let frozen = self.freeze_question(session, result_id, slot, &question, progress).await?;
                        emitter.send(question_event(&*session, &frozen, false));
                        emitter.send(StreamEvent::Waiting {
                            session_id: session.session_id.clone(),
                        });
                    }
                    Segment::Reference(text) => {
                        reference.push_str(&text);
                        emitter.send(reference_event(&*session, reference.trim_start(), true));
                    }
                    Segment::EndInterview => {
                        log::info!("[interview] Model ended session {}", session.session_id);
                    }
                }
            }
            if done {
                break;
            }
        }
        let summary = stream.finish().await?;
        log::debug!(
            "[interview] Turn on {} used {:?}/{:?} tokens",
            session.session_id,
            summary.usage.prompt_tokens,
            summary.usage.completion_tokens
        );

        if splitter.saw_end() {
            if !progress.frozen {
                self.interviews.discard_slot(result_id, slot).await?;
                progress.new_slot = None;
            }
            let mut parts = Vec::new();
            if !progress.frozen && !question.trim().is_empty() {
                parts.push(question.trim());
            }
            if !splitter.closing_text().trim().is_empty() {
                parts.push(splitter.closing_text().trim());
            }
            let closing = (!parts.is_empty()).then(|| parts.join("\n"));

            let summary = self.conclude(session, EndReason::AiDecision, closing).await?;
            self.finish_live_session(session).await;
            emitter.send(summary.to_event());
            return Ok(AnswerOutcome::Ended(summary));
        }

        if !progress.frozen {
            // No reference marker in the whole reply
            let frozen = self.freeze_question(session, result_id, slot, &question, progress).await?;
            emitter.send(question_event(&*session, &frozen, false));
            emitter.send(StreamEvent::Waiting {
                session_id: session.session_id.clone(),
            });
        }

        let reference = reference.trim().to_string();
        if saw_reference_marker || !reference.is_empty() {
            // The reference stream always closes with a final event once opened
            emitter.send(reference_event(&*session, &reference, false));
        }
        let reference_answer = if reference.is_empty() {
            None
        } else {
            self.interviews
                .set_reference_answer(result_id, slot, &reference)
                .await?;
            if let Some(turn) = session.last_question_mut() {
                turn.reference_answer = Some(reference.clone());
            }
            Some(reference)
        };

        session.touch();
        self.interviews.snapshot(session).await?;
        self.sessions.put(session.clone()).await?;

        let question = session
            .last_question()
            .map(|turn| turn.text.clone())
            .unwrap_or_default();
        Ok(AnswerOutcome::NextQuestion {
            question,
            reference_answer,
            question_number,
        })
    }

    /// Step 3: the question text becomes final and the candidate may answer it
    async fn freeze_question(
        &self,
        session: &mut InterviewSession,
        result_id: &str,
        slot: i64,
        question: &str,
        progress: &mut TurnProgress,
    ) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::generation("model returned an empty question"));
        }
        self.interviews.set_question(result_id, slot, question).await?;

        session.append_turn(Speaker::Interviewer, question);
        session.phase = InterviewPhase::AwaitingAnswer;
        progress.frozen = true;

        self.interviews.snapshot(session).await?;
        self.sessions.put(session.clone()).await?;
        Ok(question.to_string())
    }

    /// Put the session back into a state the candidate can continue from
    async fn recover_turn(&self, session: &mut InterviewSession, result_id: &str, progress: &TurnProgress) {
        if session.phase == InterviewPhase::Ended {
            return;
        }
        if !progress.frozen {
            session.rollback_candidate_turn();
            if let Some(slot) = progress.new_slot {
                if let Err(e) = self.interviews.discard_slot(result_id, slot).await {
                    log::error!("[interview] Failed to discard slot {} of {}: {}", slot, result_id, e);
                }
            }
            if let Some(slot) = progress.answered_slot {
                if let Err(e) = self.interviews.clear_answer(result_id, slot).await {
                    log::error!("[interview] Failed to clear answer {} of {}: {}", slot, result_id, e);
                }
            }
        }
        session.phase = InterviewPhase::AwaitingAnswer;
        session.is_active = true;

        if let Err(e) = self.interviews.snapshot(session).await {
            log::error!("[interview] Failed to snapshot {} after a failed turn: {}", result_id, e);
        }
        if let Err(e) = self.sessions.put(session.clone()).await {
            log::error!("[session-store] Failed to store {}: {}", session.session_id, e);
        }
    }

    // ========================================================================
    // Pause / resume / end
    // ========================================================================

    pub async fn pause_interview(&self, user_id: &str, session_id: &str) -> Result<PauseInfo> {
        let _guard = self.locks.try_lock(session_id)?;
        let mut session = self.live_session(user_id, session_id).await?;
        if session.phase != InterviewPhase::AwaitingAnswer {
            return Err(Error::validation(
                "an interview can only be paused while it waits for an answer",
            ));
        }
        let result_id = result_id_of(&session)?;

        session.phase = InterviewPhase::Paused;
        session.touch();
        if !self.interviews.mark_paused(&session).await? {
            return Err(Error::SessionExpired(format!("interview {} is not in progress", result_id)));
        }
        self.sessions.delete(session_id).await?;

        log::info!("[interview] Paused session {} after {} answers", session_id, session.question_count);
        Ok(PauseInfo {
            session_id: session.session_id,
            result_id,
            question_count: session.question_count,
            paused_at: Utc::now(),
        })
    }

    /// Bring a paused (or in-progress but no longer live) interview back
    pub async fn resume_interview(&self, user_id: &str, result_id: &str) -> Result<ResumeInfo> {
        let record = self
            .interviews
            .get(result_id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(result_id.to_string()))?;
        if record.user_id != user_id {
            return Err(Error::Unauthorized(format!("interview {} belongs to another user", result_id)));
        }
        if matches!(record.status, InterviewStatus::Completed | InterviewStatus::Failed) {
            return Err(Error::SessionExpired(format!(
                "interview {} is {}",
                result_id,
                record.status.as_str()
            )));
        }

        let _guard = self.locks.try_lock(&record.session_id)?;
        let mut session = match self.sessions.get(&record.session_id).await? {
            Some(live) if live.is_active => live,
            _ => self.interviews.restore(result_id).await?,
        };
        if session.conversation_history.last().map(|t| t.speaker) == Some(Speaker::Candidate) {
            // Interrupted mid-turn: the answer never got a follow-up question
            log::warn!("[interview] Dropping unanswered candidate turn on {}", session.session_id);
            session.rollback_candidate_turn();
        }
        self.interviews
            .reconcile_slots(result_id, session.questions_asked() as i64)
            .await?;
        session.phase = InterviewPhase::AwaitingAnswer;
        session.is_active = true;
        session.touch();

        if !self.interviews.mark_resumed(&session).await? {
            return Err(Error::SessionExpired(format!("interview {} can no longer be resumed", result_id)));
        }
        self.sessions.put(session.clone()).await?;

        log::info!("[interview] Resumed session {}", session.session_id);
        Ok(ResumeInfo {
            session_id: session.session_id.clone(),
            result_id: result_id.to_string(),
            interview_kind: session.interview_kind,
            interviewer_name: session.interviewer_name.clone(),
            last_question: session.last_question().map(|t| t.text.clone()),
            question_count: session.question_count,
            elapsed_minutes: session.elapsed_minutes(Utc::now()),
            conversation_history: session.conversation_history,
        })
    }

    /// End at the candidate's request
    pub async fn end_interview(&self, user_id: &str, session_id: &str) -> Result<EndSummary> {
        let _guard = self.locks.try_lock(session_id)?;

        let live_session = self.sessions.get(session_id).await?;
        let live = live_session.is_some();
        let mut session = match live_session {
            Some(session) => session,
            None => {
                // Paused interviews only exist in the durable store
                let result_id = self
                    .interviews
                    .find_by_session(session_id)
                    .await?
                    .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
                match self.interviews.status(&result_id).await? {
                    Some(InterviewStatus::Completed) | Some(InterviewStatus::Failed) => {
                        return Err(Error::SessionExpired(format!("interview {} has already ended", result_id)));
                    }
                    _ => self.interviews.restore(&result_id).await?,
                }
            }
        };
        if session.user_id != user_id {
            return Err(Error::Unauthorized(format!("session {} belongs to another user", session_id)));
        }
        if !session.is_active || session.phase == InterviewPhase::Ended {
            return Err(Error::SessionExpired(format!("session {} has already ended", session_id)));
        }
        if !live {
            let result_id = result_id_of(&session)?;
            self.interviews
                .reconcile_slots(&result_id, session.questions_asked() as i64)
                .await?;
        }

        let summary = self.conclude(&mut session, EndReason::UserEnded, None).await?;
        self.sessions.delete(session_id).await?;
        Ok(summary)
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    /// Live session owned by `user_id` that has not ended
    async fn live_session(&self, user_id: &str, session_id: &str) -> Result<InterviewSession> {
        let session = match self.sessions.get(session_id).await? {
            Some(session) => session,
            None => {
                if let Some(result_id) = self.interviews.find_by_session(session_id).await? {
                    match self.interviews.status(&result_id).await? {
                        Some(InterviewStatus::Completed) | Some(InterviewStatus::Failed) => {
                            return Err(Error::SessionExpired(format!(
                                "interview {} has already ended",
                                result_id
                            )));
                        }
                        Some(InterviewStatus::Paused) => {
                            return Err(Error::SessionNotFound(format!(
                                "session {} is paused, resume interview {} first",
                                session_id, result_id
                            )));
                        }
                        _ => {}
                    }
                }
                return Err(Error::SessionNotFound(session_id.to_string()));
            }
        };

        if session.user_id != user_id {
            return Err(Error::Unauthorized(format!("session {} belongs to another user", session_id)));
        }
        if !session.is_active || session.phase == InterviewPhase::Ended {
            return Err(Error::SessionExpired(format!("session {} has already ended", session_id)));
        }
        Ok(session)
    }

    /// Closing statement, completed record, inactive session
    async fn conclude(
        &self,
        session: &mut InterviewSession,
        reason: EndReason,
        closing: Option<String>,
    ) -> Result<EndSummary> {
        let result_id = result_id_of(session)?;
        session.phase = InterviewPhase::Ending;

        let closing = match closing.filter(|c| !c.trim().is_empty()) {
            Some(closing) => closing,
            None => self.closing_statement(session).await,
        };
        session.append_turn(Speaker::Interviewer, closing.clone());
        session.is_active = false;
        session.phase = InterviewPhase::Ended;

        if !self.interviews.mark_completed(session, reason).await? {
            return Err(Error::SessionExpired(format!("interview {} has already ended", result_id)));
        }

        Ok(EndSummary {
            session_id: session.session_id.clone(),
            result_id,
            reason,
            closing_statement: closing,
            question_count: session.question_count,
            elapsed_minutes: session.elapsed_minutes(Utc::now()),
        })
    }

    async fn closing_statement(&self, session: &InterviewSession) -> String {
        let elapsed = session.elapsed_minutes(Utc::now());
        let ctx = PromptContext::for_interview(PromptKind::InterviewClosing, session, elapsed);
        let generated = async {
            let mut stream = self.open_stream(&ctx).await?;
            let mut text = String::new();
            while let Some(chunk) = self.next_chunk(&mut stream).await? {
                text.push_str(&chunk);
            }
            stream.finish().await?;
            Ok::<_, Error>(text)
        }
        .await;

        match generated {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => FALLBACK_CLOSING.to_string(),
            Err(e) => {
                log::warn!(
                    "[interview] Closing statement for {} failed, using default: {}",
                    session.session_id,
                    e
                );
                FALLBACK_CLOSING.to_string()
            }
        }
    }

    /// Keep the ended session readable for a grace period, then drop it
    async fn finish_live_session(&self, session: &InterviewSession) {
        if let Err(e) = self.sessions.put(session.clone()).await {
            log::warn!("[session-store] Failed to store ended session {}: {}", session.session_id, e);
        }

        let sessions = self.sessions.clone();
        let session_id = session.session_id.clone();
        let grace = self.config.interview.cleanup_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = sessions.delete(&session_id).await {
                log::warn!("[session-store] Deferred cleanup of {} failed: {}", session_id, e);
            }
        });
    }
}
