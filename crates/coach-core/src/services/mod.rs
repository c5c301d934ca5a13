//! Services module

pub mod ai;
pub mod alert;
pub mod consumption;
pub mod document;
pub mod events;
pub mod interview_store;
pub mod ledger;
pub mod orchestrator;
pub mod quiz_store;
pub mod session_store;
pub mod ticker;

pub use ai::{
    AiGenerationPort, LlmService, LlmUsage, PromptContext, PromptKind, StreamSummary,
    StreamWriter, StructuredResult, TextStream, END_INTERVIEW_MARKER, REFERENCE_ANSWER_MARKER,
};
pub use alert::{AlertSink, LogAlertSink, RecordingAlertSink, RefundAlert};
pub use consumption::{ConsumptionStore, RecordUsage};
pub use document::{
    clean_text, estimate_tokens, truncate_to_budget, validate_resume_content, DocumentError,
    DocumentTextExtractor, HttpDocumentExtractor, ResumeValidation,
};
pub use events::{EventStream, ProgressEmitter, QuizStage, StreamEvent};
pub use interview_store::InterviewStore;
pub use ledger::UsageLedger;
pub use orchestrator::mock_interview::{AnswerOutcome, EndSummary, StartInfo};
pub use orchestrator::{ResumeSource, SessionOrchestrator};
pub use quiz_store::QuizStore;
pub use session_store::{InMemorySessionCache, SessionCache, SessionGuard, SessionLocks};
pub use ticker::{SyntheticProgressTicker, TickerHandle};
