//! Interview commands
//!
//! `start` and `resume` run an interactive loop: each line read from stdin is
//! submitted as an answer and the interviewer's reply streams back. `/pause`
//! and `/end` are accepted in place of an answer.

use anyhow::{anyhow, bail, Result};
use clap::Subcommand;
use coach_core::{
    InterviewContext, InterviewKind, InterviewResult, ProgressEmitter, SessionOrchestrator,
    StartInterviewRequest,
};
use coach_core::services::SessionCache;
use serde::Serialize;
use tabled::Tabled;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{drain, read_text_file, Context, StreamEnd};
use crate::output::{print_error, print_info, print_json, print_output, print_success, truncate, OutputFormat};

#[derive(Subcommand)]
pub enum InterviewAction {
    /// Start a new interview and answer questions interactively
    Start {
        /// Interview kind: special (technical) or behavior
        #[arg(long, value_parser = parse_kind, default_value = "special")]
        kind: InterviewKind,

        /// Position name
        #[arg(long)]
        position: Option<String>,

        /// Company name
        #[arg(long)]
        company: Option<String>,

        /// Candidate name used by the interviewer
        #[arg(long)]
        candidate: Option<String>,

        /// Salary range, e.g. "30k-40k"
        #[arg(long)]
        salary: Option<String>,

        /// Read the job description from a file
        #[arg(long)]
        jd_file: Option<String>,

        /// Plain-text resume file (takes priority over --resume-url)
        #[arg(long)]
        resume_file: Option<String>,

        /// Resume document URL
        #[arg(long)]
        resume_url: Option<String>,

        /// Request id (defaults to the new session id)
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Resume a paused interview and continue answering
    Resume {
        /// Interview result id
        result_id: String,
    },

    /// Pause an interview that is waiting for an answer
    Pause {
        /// Interview result id
        result_id: String,
    },

    /// End an interview now
    End {
        /// Session id
        session_id: String,
    },

    /// Show a stored interview report
    Report {
        /// Interview result id
        result_id: String,
    },
}

fn parse_kind(s: &str) -> Result<InterviewKind, String> {
    InterviewKind::from_str(&s.to_lowercase())
        .ok_or_else(|| format!("Invalid interview kind: {}. Use 'special' or 'behavior'", s))
}

/// Q&A row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct QaRow {
    #[tabled(rename = "#")]
    pub slot: i64,
    #[tabled(rename = "Question")]
    pub question: String,
    #[tabled(rename = "Answer")]
    pub answer: String,
    #[tabled(rename = "Reference")]
    pub reference: String,
}

pub async fn execute(ctx: &Context, action: InterviewAction) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let user_id = ctx.user()?;

    match action {
        InterviewAction::Start {
            kind,
            position,
            company,
            candidate,
            salary,
            jd_file,
            resume_file,
            resume_url,
            request_id,
        } => {
            let request = StartInterviewRequest {
                user_id: user_id.to_string(),
                interview_kind: kind,
                idempotency_key: request_id,
                context: InterviewContext {
                    candidate_name: candidate,
                    company,
                    position_name: position,
                    salary_range: salary,
                    job_description: jd_file.as_deref().map(read_text_file).transpose()?,
                },
                resume_text: resume_file.as_deref().map(read_text_file).transpose()?,
                resume_url,
            };

            let (emitter, events) = ProgressEmitter::channel();
            let (started, _) = tokio::join!(
                orchestrator.run_start_interview(request, &emitter),
                drain(ctx, events)
            );
            let info = started?;
            print_info(
                &format!("Session {} (result {})", info.session_id, info.result_id),
                ctx.quiet,
            );
            answer_loop(ctx, &orchestrator, user_id, &info.session_id).await
        }
        InterviewAction::Resume { result_id } => {
            let info = orchestrator.resume_interview(user_id, &result_id).await?;
            if ctx.format == OutputFormat::Json {
                print_json(&info)?;
            } else {
                print_success(
                    &format!(
                        "Resumed interview {} ({} answers, {} min elapsed)",
                        info.result_id, info.question_count, info.elapsed_minutes
                    ),
                    ctx.quiet,
                );
                if let Some(question) = &info.last_question {
                    println!("{}:", info.interviewer_name);
                    println!("{}", question);
                }
            }
            answer_loop(ctx, &orchestrator, user_id, &info.session_id).await
        }
        InterviewAction::Pause { result_id } => {
            // A fresh process holds no live session, so bring it back before pausing
            let info = orchestrator.resume_interview(user_id, &result_id).await?;
            let paused = orchestrator.pause_interview(user_id, &info.session_id).await?;
            if ctx.format == OutputFormat::Json {
                return print_json(&paused);
            }
            print_success(
                &format!("Paused interview {} after {} answers", paused.result_id, paused.question_count),
                ctx.quiet,
            );
            Ok(())
        }
        InterviewAction::End { session_id } => {
            let summary = orchestrator.end_interview(user_id, &session_id).await?;
            ctx.printer().print(&summary.to_event())?;
            Ok(())
        }
        InterviewAction::Report { result_id } => {
            let result = orchestrator.view_interview_report(user_id, &result_id).await?;
            show_result(ctx, &result)
        }
    }
}

/// Read answers from stdin until the interview ends, pauses or input runs out
async fn answer_loop(
    ctx: &Context,
    orchestrator: &SessionOrchestrator,
    user_id: &str,
    session_id: &str,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let Some(line) = lines.next_line().await? else {
            // Input closed: keep the interview resumable
            match orchestrator.pause_interview(user_id, session_id).await {
                Ok(paused) => print_info(
                    &format!("Input closed; paused interview {}", paused.result_id),
                    ctx.quiet,
                ),
                Err(e) => log::warn!("[interview] Could not pause {} on exit: {}", session_id, e),
            }
            return Ok(());
        };

        let answer = line.trim();
        match answer {
            "" => continue,
            "/pause" => {
                let paused = orchestrator.pause_interview(user_id, session_id).await?;
                print_success(
                    &format!(
                        "Paused after {} answers. Continue with: coach interview resume {}",
                        paused.question_count, paused.result_id
                    ),
                    ctx.quiet,
                );
                return Ok(());
            }
            "/end" => {
                let summary = orchestrator.end_interview(user_id, session_id).await?;
                ctx.printer().print(&summary.to_event())?;
                return Ok(());
            }
            _ => match drain(ctx, orchestrator.submit_answer(user_id, session_id, answer)).await? {
                StreamEnd::Ended => return Ok(()),
                StreamEnd::Failed(message) => {
                    let live = orchestrator.sessions().get(session_id).await?;
                    if !live.is_some_and(|s| s.is_active) {
                        bail!(message);
                    }
                    print_error(&message);
                    print_info("The answer was not recorded; send it again to retry.", ctx.quiet);
                }
                StreamEnd::Open => {}
                StreamEnd::Completed(_) => return Err(anyhow!("unexpected quiz result on an interview stream")),
            },
        }
    }
}

fn show_result(ctx: &Context, result: &InterviewResult) -> Result<()> {
    if ctx.format == OutputFormat::Json {
        return print_json(result);
    }

    let rows: Vec<QaRow> = result
        .qa
        .iter()
        .map(|entry| QaRow {
            slot: entry.slot,
            question: truncate(&entry.question, 60),
            answer: entry.answer.as_deref().map(|a| truncate(a, 40)).unwrap_or_default(),
            reference: entry
                .reference_answer
                .as_deref()
                .map(|r| truncate(r, 40))
                .unwrap_or_default(),
        })
        .collect();
    print_output(&rows, ctx.format)?;

    let mut summary = format!(
        "{} interview {} is {}, {} answers",
        result.interview_kind.as_str(),
        result.result_id,
        result.status.as_str(),
        result.question_count
    );
    if let Some(reason) = result.end_reason {
        summary.push_str(&format!(", ended by {}", reason.as_str()));
    }
    if let Some(minutes) = result.duration_minutes {
        summary.push_str(&format!(", {} min", minutes));
    }
    print_info(&summary, ctx.quiet);
    Ok(())
}
