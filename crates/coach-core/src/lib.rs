//! # coach-core
//!
//! Core business logic for Coach - shared between the CLI and any server front end.
//!
//! This crate provides:
//! - Database operations (`db` module)
//! - Data models (`models` module)
//! - Metered usage, AI generation and session orchestration (`services` module)
//! - Runtime configuration (`config` module)
//! - Unified error handling (`error` module)

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

// Re-exports for convenience
pub use config::CoachConfig;
pub use db::Database;
pub use error::{Error, Result};

// Re-export commonly used types from models
pub use models::{
    ConsumptionHistory, ConsumptionRecord, ConsumptionStatus, ConversationTurn, EndReason,
    InitialQuota, InterviewContext, InterviewKind, InterviewPhase, InterviewResult,
    InterviewSession, InterviewStatus, PauseInfo, QuizOutcome, QuotaKind, ResumeInfo,
    ResumeQuizRequest, ResumeQuizResult, Speaker, StartInterviewRequest, User,
};

// Re-export commonly used types from services
pub use services::{
    AiGenerationPort, AlertSink, AnswerOutcome, DocumentTextExtractor, EndSummary, EventStream,
    HttpDocumentExtractor, LlmService, ProgressEmitter, SessionOrchestrator, StartInfo,
    StreamEvent, UsageLedger,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
