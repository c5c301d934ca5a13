//! Output formatting module
//!
//! Table and JSON output for CLI commands, plus a printer for orchestrator event streams.

use std::fmt::Display;
use std::io::Write;

use coach_core::StreamEvent;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {}. Use 'table' or 'json'", s)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Print data in the specified format
pub fn print_output<T>(data: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("No items found.");
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
    }
    Ok(())
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(data: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(data)?);
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.green());
    }
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{}", message.red());
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

/// Shortens `text` to at most `max` characters for table cells
pub fn truncate(text: &str, max: usize) -> String {
    let text = text.trim().replace('\n', " ");
    if text.chars().count() <= max {
        return text;
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

// ============================================================================
// Event streams
// ============================================================================

/// Renders stream events as they arrive.
///
/// Text events carry cumulative content, so only the unseen suffix is written.
pub struct EventPrinter {
    format: OutputFormat,
    quiet: bool,
    block: Option<(&'static str, u32)>,
    written: usize,
}

impl EventPrinter {
    pub fn new(format: OutputFormat, quiet: bool) -> Self {
        Self {
            format,
            quiet,
            block: None,
            written: 0,
        }
    }

    pub fn print(&mut self, event: &StreamEvent) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }

        match event {
            StreamEvent::Progress { percent, label, .. } => {
                print_info(&format!("[{:>3}%] {}", percent, label).dimmed().to_string(), self.quiet);
            }
            StreamEvent::Start {
                interviewer_name,
                content,
                is_streaming,
                ..
            } => {
                let header = format!("{}:", interviewer_name).cyan().bold().to_string();
                self.text("start", 0, &header, content, *is_streaming)?;
            }
            StreamEvent::Question {
                content,
                is_streaming,
                question_number,
                total_questions,
                elapsed_minutes,
                ..
            } => {
                let header = format!(
                    "Q{}/{} ({} min):",
                    question_number, total_questions, elapsed_minutes
                )
                .cyan()
                .bold()
                .to_string();
                self.text("question", *question_number, &header, content, *is_streaming)?;
            }
            StreamEvent::ReferenceAnswer {
                content,
                is_streaming,
                question_number,
                ..
            } => {
                if !self.quiet {
                    let header = "Reference answer:".dimmed().to_string();
                    self.text("reference", *question_number, &header, content, *is_streaming)?;
                }
            }
            StreamEvent::Waiting { .. } => {
                self.close_block();
                print_info(&"Your answer (/pause or /end):".yellow().to_string(), self.quiet);
            }
            StreamEvent::Thinking { .. } => {
                self.close_block();
                print_info(&"...".dimmed().to_string(), self.quiet);
            }
            StreamEvent::End {
                reason,
                content,
                elapsed_minutes,
                question_count,
                ..
            } => {
                self.close_block();
                println!("{}", content);
                print_success(
                    &format!(
                        "Interview ended ({}) after {} answers, {} min",
                        reason.as_str(),
                        question_count,
                        elapsed_minutes
                    ),
                    self.quiet,
                );
            }
            // Reported by the command that owns the stream
            StreamEvent::Error { .. } | StreamEvent::Complete { .. } => self.close_block(),
        }
        Ok(())
    }

    fn text(
        &mut self,
        kind: &'static str,
        number: u32,
        header: &str,
        content: &str,
        streaming: bool,
    ) -> anyhow::Result<()> {
        if self.block != Some((kind, number)) {
            self.close_block();
            println!("{}", header);
            self.block = Some((kind, number));
        }

        let mut stdout = std::io::stdout();
        if let Some(unseen) = content.get(self.written..) {
            write!(stdout, "{}", unseen)?;
            self.written = content.len();
        }
        stdout.flush()?;

        if !streaming {
            self.close_block();
        }
        Ok(())
    }

    fn close_block(&mut self) {
        if self.block.take().is_some() {
            println!();
        }
        self.written = 0;
    }
}
