//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod account;
pub mod config;
pub mod interview;
pub mod quiz;
pub mod records;

use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use coach_core::{
    CoachConfig, Database, EventStream, HttpDocumentExtractor, LlmService, QuizOutcome,
    SessionOrchestrator, StreamEvent,
};

use crate::output::{EventPrinter, OutputFormat};

/// Shared context for all commands
pub struct Context {
    pub db: Database,
    pub format: OutputFormat,
    pub quiet: bool,
    pub user: Option<String>,
    pub config: CoachConfig,
}

impl Context {
    /// The acting user; every metered or owned operation needs one
    pub fn user(&self) -> Result<&str> {
        self.user
            .as_deref()
            .ok_or_else(|| anyhow!("No user selected. Pass --user or set COACH_USER"))
    }

    pub fn orchestrator(&self) -> Result<SessionOrchestrator> {
        let llm = LlmService::new(self.config.ai.clone());
        if !llm.is_configured() {
            log::warn!(
                "[config] AI provider {} is not configured; generation calls will fail",
                llm.provider()
            );
        }
        let documents = HttpDocumentExtractor::new(&self.config.document)?;
        Ok(SessionOrchestrator::new(
            &self.db,
            Arc::new(llm),
            Arc::new(documents),
            self.config.clone(),
        ))
    }

    pub fn printer(&self) -> EventPrinter {
        EventPrinter::new(self.format, self.quiet)
    }
}

/// How an event stream finished
pub enum StreamEnd {
    /// Closed without a terminal event; the interview waits for the next answer
    Open,
    Ended,
    Failed(String),
    Completed(Box<QuizOutcome>),
}

/// Print every event until the stream closes
pub async fn drain(ctx: &Context, mut events: EventStream) -> Result<StreamEnd> {
    let mut printer = ctx.printer();
    let mut end = StreamEnd::Open;
    while let Some(event) = events.next_event().await {
        printer.print(&event)?;
        match event {
            StreamEvent::End { .. } => end = StreamEnd::Ended,
            StreamEvent::Error { message } => end = StreamEnd::Failed(message),
            StreamEvent::Complete { data } => end = StreamEnd::Completed(data),
            _ => {}
        }
    }
    Ok(end)
}

/// Read a resume or job description file; `~` is expanded
pub fn read_text_file(path: &str) -> Result<String> {
    let expanded = shellexpand::tilde(path);
    std::fs::read_to_string(&*expanded)
        .with_context(|| format!("Failed to read {}", path))
}
