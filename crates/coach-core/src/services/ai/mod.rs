//! AI generation port
//!
//! The orchestrator talks to the model through [`AiGenerationPort`] only. Two
//! call shapes exist:
//!
//! - `generate_structured` returns one JSON value.
//! - `generate_stream` returns a [`TextStream`]: an ordered chunk channel plus a
//!   separately resolved [`StreamSummary`] carrying the full text and usage.
//!
//! ```text
//! producer task                               consumer
//! ┌──────────────┐  mpsc<String> (ordered)  ┌──────────────┐
//! │ StreamWriter │ ───────────────────────▶ │  TextStream  │
//! │              │  oneshot<StreamSummary>  │ next_chunk() │
//! │              │ ───────────────────────▶ │  finish()    │
//! └──────────────┘                          └──────────────┘
//! ```

pub mod llm;
pub mod prompts;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::models::{ConversationTurn, InterviewKind, InterviewSession, ResumeQuizRequest};

pub use llm::LlmService;
pub use prompts::{END_INTERVIEW_MARKER, REFERENCE_ANSWER_MARKER};

// ============================================================================
// Prompt context
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    QuizQuestions,
    QuizAnalysis,
    InterviewOpening,
    InterviewQuestion,
    InterviewClosing,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::QuizQuestions => "quiz_questions",
            PromptKind::QuizAnalysis => "quiz_analysis",
            PromptKind::InterviewOpening => "interview_opening",
            PromptKind::InterviewQuestion => "interview_question",
            PromptKind::InterviewClosing => "interview_closing",
        }
    }
}

/// Everything a prompt may be rendered from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContext {
    pub kind: PromptKind,
    pub interview_kind: Option<InterviewKind>,
    pub interviewer_name: Option<String>,
    pub candidate_name: Option<String>,
    pub company: Option<String>,
    pub position_name: Option<String>,
    pub salary_range: Option<String>,
    pub job_description: Option<String>,
    pub resume_text: Option<String>,
    pub conversation: Vec<ConversationTurn>,
    pub question_number: u32,
    pub elapsed_minutes: i64,
    pub target_duration_minutes: u32,
    /// Minimum number of quiz questions requested
    pub min_questions: usize,
}

impl PromptContext {
    fn empty(kind: PromptKind) -> Self {
        Self {
            kind,
            interview_kind: None,
            interviewer_name: None,
            candidate_name: None,
            company: None,
            position_name: None,
            salary_range: None,
            job_description: None,
            resume_text: None,
            conversation: Vec::new(),
            question_number: 0,
            elapsed_minutes: 0,
            target_duration_minutes: 0,
            min_questions: 0,
        }
    }

    /// Context for either quiz phase
    pub fn for_quiz(
        kind: PromptKind,
        request: &ResumeQuizRequest,
        resume_text: &str,
        min_questions: usize,
    ) -> Self {
        let salary_range = match (request.min_salary, request.max_salary) {
            (Some(min), Some(max)) => Some(format!("{}-{}", min, max)),
            (Some(min), None) => Some(format!("{}+", min)),
            (None, Some(max)) => Some(format!("up to {}", max)),
            (None, None) => None,
        };
        Self {
            company: request.company.clone(),
            position_name: Some(request.position_name.clone()),
            salary_range,
            job_description: Some(request.job_description.clone()),
            resume_text: Some(resume_text.to_string()),
            min_questions,
            ..Self::empty(kind)
        }
    }

    /// Context for an interview turn, built from the live session
    pub fn for_interview(kind: PromptKind, session: &InterviewSession, elapsed_minutes: i64) -> Self {
        Self {
            interview_kind: Some(session.interview_kind),
            interviewer_name: Some(session.interviewer_name.clone()),
            candidate_name: session.context.candidate_name.clone(),
            company: session.context.company.clone(),
            position_name: session.context.position_name.clone(),
            salary_range: session.context.salary_range.clone(),
            job_description: session.context.job_description.clone(),
            resume_text: session.resume_text.clone(),
            conversation: session.conversation_history.clone(),
            question_number: session.question_count + 1,
            elapsed_minutes,
            target_duration_minutes: session.target_duration_minutes,
            ..Self::empty(kind)
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Token usage of one call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub model: String,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub duration_ms: i64,
}

impl LlmUsage {
    /// Sum of two calls, keeping the first model name
    pub fn combine(&self, other: &LlmUsage) -> LlmUsage {
        fn add(a: Option<i64>, b: Option<i64>) -> Option<i64> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
            }
        }
        LlmUsage {
            model: if self.model.is_empty() {
                other.model.clone()
            } else {
                self.model.clone()
            },
            prompt_tokens: add(self.prompt_tokens, other.prompt_tokens),
            completion_tokens: add(self.completion_tokens, other.completion_tokens),
            duration_ms: self.duration_ms + other.duration_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResult {
    pub value: serde_json::Value,
    pub usage: LlmUsage,
}

impl StructuredResult {
    /// Deserialize the payload; malformed output is a generation failure
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| Error::generation(format!("malformed AI output: {}", e)))
    }
}

/// Terminal value of a text stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    pub full_text: String,
    pub usage: LlmUsage,
}

// ============================================================================
// Text stream
// ============================================================================

/// Default chunk buffer between producer and consumer
pub const STREAM_BUFFER: usize = 64;

/// Consumer side of a streamed generation
pub struct TextStream {
    chunks: mpsc::Receiver<String>,
    summary: oneshot::Receiver<Result<StreamSummary>>,
}

/// Producer side of a streamed generation
pub struct StreamWriter {
    chunks: mpsc::Sender<String>,
    summary: oneshot::Sender<Result<StreamSummary>>,
}

impl TextStream {
    pub fn channel(buffer: usize) -> (StreamWriter, TextStream) {
        let (chunk_tx, chunk_rx) = mpsc::channel(buffer.max(1));
        let (summary_tx, summary_rx) = oneshot::channel();
        (
            StreamWriter {
                chunks: chunk_tx,
                summary: summary_tx,
            },
            TextStream {
                chunks: chunk_rx,
                summary: summary_rx,
            },
        )
    }

    /// A stream whose chunks are all available immediately
    pub fn from_chunks<I, S>(chunks: I, usage: LlmUsage) -> TextStream
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks: Vec<String> = chunks.into_iter().map(Into::into).collect();
        let (writer, stream) = TextStream::channel(chunks.len());
        let full_text = chunks.concat();
        for chunk in chunks {
            // Capacity equals the chunk count, so this cannot fill up
            let _ = writer.chunks.try_send(chunk);
        }
        writer.finish(StreamSummary { full_text, usage });
        stream
    }

    /// Next chunk in order; `None` once the producer is done
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.chunks.recv().await
    }

    /// Resolve the terminal value. Chunks not yet read are discarded.
    pub async fn finish(mut self) -> Result<StreamSummary> {
        self.chunks.close();
        match self.summary.await {
            Ok(summary) => summary,
            Err(_) => Err(Error::generation("stream ended without a result")),
        }
    }

    /// Read every chunk, then resolve the terminal value
    pub async fn collect_text(mut self) -> Result<StreamSummary> {
        let mut text = String::new();
        while let Some(chunk) = self.chunks.recv().await {
            text.push_str(&chunk);
        }
        let mut summary = self.finish().await?;
        if summary.full_text.is_empty() {
            summary.full_text = text;
        }
        Ok(summary)
    }
}

impl StreamWriter {
    /// Forward a chunk; `false` once the consumer has gone away
    pub async fn send(&self, chunk: impl Into<String>) -> bool {
        self.chunks.send(chunk.into()).await.is_ok()
    }

    pub fn finish(self, summary: StreamSummary) {
        let _ = self.summary.send(Ok(summary));
    }

    pub fn fail(self, error: Error) {
        let _ = self.summary.send(Err(error));
    }
}

// ============================================================================
// Port
// ============================================================================

#[async_trait]
pub trait AiGenerationPort: Send + Sync {
    /// One JSON result for the prompt
    async fn generate_structured(&self, context: &PromptContext) -> Result<StructuredResult>;

    /// Incremental text for the prompt
    async fn generate_stream(&self, context: &PromptContext) -> Result<TextStream>;

    /// Model identifier recorded with usage
    fn model_name(&self) -> String;
}
