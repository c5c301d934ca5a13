//! Quiz commands
//!
//! Run a resume quiz with streamed progress and view stored quiz reports.

use anyhow::{bail, Result};
use clap::Subcommand;
use coach_core::{ResumeQuizRequest, ResumeQuizResult};
use serde::Serialize;
use tabled::Tabled;

use super::{drain, read_text_file, Context, StreamEnd};
use crate::output::{print_info, print_json, print_output, print_success, truncate, OutputFormat};

#[derive(Subcommand)]
pub enum QuizAction {
    /// Generate questions and a match analysis for a position
    Run {
        /// Position name
        #[arg(long)]
        position: String,

        /// Job description text
        #[arg(long, conflicts_with = "jd_file")]
        jd: Option<String>,

        /// Read the job description from a file
        #[arg(long)]
        jd_file: Option<String>,

        /// Company name
        #[arg(long)]
        company: Option<String>,

        /// Minimum salary
        #[arg(long)]
        min_salary: Option<u32>,

        /// Maximum salary
        #[arg(long)]
        max_salary: Option<u32>,

        /// Plain-text resume file (takes priority over --resume-url)
        #[arg(long)]
        resume_file: Option<String>,

        /// Resume document URL
        #[arg(long)]
        resume_url: Option<String>,

        /// Request id; repeating a request id never charges twice
        #[arg(long)]
        request_id: Option<String>,
    },

    /// Show a stored quiz report
    Report {
        /// Quiz result id
        result_id: String,
    },
}

/// Question row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct QuestionRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Category")]
    pub category: String,
    #[tabled(rename = "Difficulty")]
    pub difficulty: String,
    #[tabled(rename = "Question")]
    pub question: String,
}

pub async fn execute(ctx: &Context, action: QuizAction) -> Result<()> {
    match action {
        QuizAction::Run {
            position,
            jd,
            jd_file,
            company,
            min_salary,
            max_salary,
            resume_file,
            resume_url,
            request_id,
        } => {
            let job_description = match (jd, jd_file) {
                (Some(text), _) => text,
                (None, Some(path)) => read_text_file(&path)?,
                (None, None) => String::new(),
            };
            let resume_text = resume_file.as_deref().map(read_text_file).transpose()?;

            let request = ResumeQuizRequest {
                user_id: ctx.user()?.to_string(),
                idempotency_key: request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                company,
                position_name: position,
                job_description,
                min_salary,
                max_salary,
                resume_text,
                resume_url,
            };
            print_info(&format!("Request id: {}", request.idempotency_key), ctx.quiet);
            run(ctx, request).await
        }
        QuizAction::Report { result_id } => {
            let orchestrator = ctx.orchestrator()?;
            let result = orchestrator.view_quiz_report(ctx.user()?, &result_id).await?;
            show_result(ctx, &result)
        }
    }
}

async fn run(ctx: &Context, request: ResumeQuizRequest) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    match drain(ctx, orchestrator.resume_quiz(request)).await? {
        StreamEnd::Completed(outcome) => {
            if ctx.format == OutputFormat::Json {
                return Ok(());
            }
            if outcome.from_cache {
                print_info("Served from an earlier run with the same request id", ctx.quiet);
            }
            show_result(ctx, &outcome.result)?;
            if let Some(remaining) = outcome.remaining_count {
                print_success(&format!("{} quiz runs remaining", remaining), ctx.quiet);
            }
            Ok(())
        }
        StreamEnd::Failed(message) => bail!(message),
        StreamEnd::Open | StreamEnd::Ended => bail!("quiz stream closed without a result"),
    }
}

fn show_result(ctx: &Context, result: &ResumeQuizResult) -> Result<()> {
    if ctx.format == OutputFormat::Json {
        return print_json(result);
    }

    let rows: Vec<QuestionRow> = result
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| QuestionRow {
            index: i + 1,
            category: q.category.clone(),
            difficulty: q.difficulty.clone(),
            question: truncate(&q.question, 80),
        })
        .collect();
    print_output(&rows, ctx.format)?;

    let analysis = &result.analysis;
    println!();
    println!(
        "Match: {:.0}/100 {}",
        analysis.match_score,
        analysis.match_level
    );
    if !analysis.summary.is_empty() {
        println!("{}", analysis.summary);
    }
    if !analysis.missing_skills.is_empty() {
        println!("Missing skills: {}", analysis.missing_skills.join(", "));
    }
    for priority in &analysis.learning_priorities {
        println!("  [{}] {}: {}", priority.priority, priority.topic, priority.reason);
    }

    let distribution: Vec<String> = result
        .question_distribution()
        .iter()
        .map(|(category, count)| format!("{} {}", category, count))
        .collect();
    print_info(
        &format!(
            "Result {} ({} questions: {}, viewed {} times)",
            result.result_id,
            result.total_questions(),
            distribution.join(", "),
            result.view_count
        ),
        ctx.quiet,
    );
    Ok(())
}
