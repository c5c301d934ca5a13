//! Prompt rendering
//!
//! Turns a [`PromptContext`] into chat messages. Only the two stream markers
//! are part of the contract with the orchestrator; wording is free to change.

use serde::{Deserialize, Serialize};

use super::{PromptContext, PromptKind};
use crate::models::{InterviewKind, Speaker};

/// Separates the question from its reference answer in an interview stream
pub const REFERENCE_ANSWER_MARKER: &str = "[REFERENCE_ANSWER]";

/// Emitted by the model when it decides the interview is over
pub const END_INTERVIEW_MARKER: &str = "[END_INTERVIEW]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.trim().is_empty()).unwrap_or("not specified")
}

fn position_block(ctx: &PromptContext) -> String {
    format!(
        "Company: {}\nPosition: {}\nSalary range: {}\nJob description:\n{}",
        or_unknown(&ctx.company),
        or_unknown(&ctx.position_name),
        or_unknown(&ctx.salary_range),
        or_unknown(&ctx.job_description),
    )
}

fn resume_block(ctx: &PromptContext) -> String {
    match ctx.resume_text.as_deref() {
        Some(text) if !text.trim().is_empty() => format!("Candidate resume:\n{}", text),
        _ => "No resume was provided.".to_string(),
    }
}

fn interview_style(kind: Option<InterviewKind>) -> &'static str {
    match kind {
        Some(InterviewKind::Behavior) => {
            "This is a behavioural interview. Ask about past situations, teamwork, conflict, \
             ownership and motivation, one question at a time."
        }
        _ => {
            "This is a technical interview for the position. Ask one technical question at a \
             time, going deeper on topics from the candidate's resume and the job description."
        }
    }
}

/// Render the chat messages for a prompt
pub fn render(ctx: &PromptContext) -> Vec<ChatMessage> {
    match ctx.kind {
        PromptKind::QuizQuestions => vec![
            ChatMessage::system(
                "You are a senior interviewer preparing a candidate. Reply with a JSON object \
                 {\"questions\": [{\"question\", \"answer\", \"category\", \"difficulty\", \
                 \"tips\", \"keywords\"}], \"summary\"} and nothing else.",
            ),
            ChatMessage::user(format!(
                "{}\n\n{}\n\nWrite at least {} interview questions this candidate is likely to be \
                 asked, each with a model answer.",
                position_block(ctx),
                resume_block(ctx),
                ctx.min_questions
            )),
        ],
        PromptKind::QuizAnalysis => vec![
            ChatMessage::system(
                "You assess how well a resume matches a job. Reply with a JSON object with the \
                 keys matchScore (0-100), matchLevel, matchedSkills [{skill, matched, proficiency}], \
                 missingSkills, knowledgeGaps, learningPriorities [{topic, priority, reason}], \
                 radarData [{dimension, score}], strengths, weaknesses, summary, interviewTips.",
            ),
            ChatMessage::user(format!("{}\n\n{}", position_block(ctx), resume_block(ctx))),
        ],
        PromptKind::InterviewOpening | PromptKind::InterviewQuestion | PromptKind::InterviewClosing => {
            render_interview(ctx)
        }
    }
}

fn render_interview(ctx: &PromptContext) -> Vec<ChatMessage> {
    let interviewer = ctx.interviewer_name.as_deref().unwrap_or("Interviewer");
    let candidate = ctx.candidate_name.as_deref().unwrap_or("the candidate");

    let mut system = format!(
        "You are {}, interviewing {}. {}\n\n{}\n\n{}\n\nElapsed: {} of {} minutes.",
        interviewer,
        candidate,
        interview_style(ctx.interview_kind),
        position_block(ctx),
        resume_block(ctx),
        ctx.elapsed_minutes,
        ctx.target_duration_minutes
    );

    let instruction = match ctx.kind {
        PromptKind::InterviewOpening => {
            "Greet the candidate, introduce yourself briefly and ask them to introduce themselves."
                .to_string()
        }
        PromptKind::InterviewClosing => {
            "The interview is over. Thank the candidate and close the conversation politely. \
             Do not ask further questions."
                .to_string()
        }
        _ => format!(
            "Briefly react to the last answer, then ask question number {}. After the question \
             write {} on its own line followed by a concise reference answer. If you have \
             gathered enough signal to finish, write {} instead of a new question.",
            ctx.question_number, REFERENCE_ANSWER_MARKER, END_INTERVIEW_MARKER
        ),
    };
    system.push_str("\n\n");
    system.push_str(&instruction);

    let mut messages = vec![ChatMessage::system(system)];
    for turn in &ctx.conversation {
        messages.push(match turn.speaker {
            Speaker::Interviewer => ChatMessage::assistant(turn.text.clone()),
            Speaker::Candidate => ChatMessage::user(turn.text.clone()),
        });
    }
    if messages.len() == 1 {
        messages.push(ChatMessage::user("Hello, I'm ready."));
    }
    messages
}
