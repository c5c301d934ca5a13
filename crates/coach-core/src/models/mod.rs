//! Data models for the Coach application

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Accounts & quota
// ============================================================================

/// Metered feature; each kind is a separate per-user counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    ResumeQuiz,
    SpecialInterview,
    BehaviorInterview,
}

impl QuotaKind {
    pub const ALL: [QuotaKind; 3] = [
        QuotaKind::ResumeQuiz,
        QuotaKind::SpecialInterview,
        QuotaKind::BehaviorInterview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaKind::ResumeQuiz => "resume_quiz",
            QuotaKind::SpecialInterview => "special_interview",
            QuotaKind::BehaviorInterview => "behavior_interview",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "resume_quiz" => Some(QuotaKind::ResumeQuiz),
            "special_interview" => Some(QuotaKind::SpecialInterview),
            "behavior_interview" => Some(QuotaKind::BehaviorInterview),
            _ => None,
        }
    }

    /// Counter column on the `users` table
    pub(crate) fn column(&self) -> &'static str {
        match self {
            QuotaKind::ResumeQuiz => "resume_quiz_count",
            QuotaKind::SpecialInterview => "special_interview_count",
            QuotaKind::BehaviorInterview => "behavior_interview_count",
        }
    }
}

impl std::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User account with quota counters
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub resume_quiz_count: i64,
    pub special_interview_count: i64,
    pub behavior_interview_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn balance(&self, kind: QuotaKind) -> i64 {
        match kind {
            QuotaKind::ResumeQuiz => self.resume_quiz_count,
            QuotaKind::SpecialInterview => self.special_interview_count,
            QuotaKind::BehaviorInterview => self.behavior_interview_count,
        }
    }
}

/// Initial balances for a new account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitialQuota {
    pub resume_quiz: i64,
    pub special_interview: i64,
    pub behavior_interview: i64,
}

// ============================================================================
// Consumption records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionStatus {
    Pending,
    Success,
    Failed,
}

impl ConsumptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionStatus::Pending => "pending",
            ConsumptionStatus::Success => "success",
            ConsumptionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "success" => ConsumptionStatus::Success,
            "failed" => ConsumptionStatus::Failed,
            _ => ConsumptionStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConsumptionStatus::Pending)
    }
}

/// One billable attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub record_id: String,
    pub user_id: String,
    pub kind: QuotaKind,
    pub status: ConsumptionStatus,
    pub idempotency_key: String,
    pub result_id: Option<String>,
    pub input_snapshot: serde_json::Value,
    pub output_snapshot: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub ai_model: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub duration_ms: Option<i64>,
    pub refunded: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Input for creating a PENDING record
#[derive(Debug, Clone)]
pub struct NewConsumptionRecord {
    pub user_id: String,
    pub kind: QuotaKind,
    pub idempotency_key: String,
    pub result_id: Option<String>,
    pub input_snapshot: serde_json::Value,
}

/// Per-kind counts over a user's history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionStats {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub pending: i64,
    pub refunded: i64,
}

/// Paginated history plus per-kind statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionHistory {
    pub records: Vec<ConsumptionRecord>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
    pub stats: BTreeMap<QuotaKind, ConsumptionStats>,
}

// ============================================================================
// Interview session
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewKind {
    /// Technical / domain interview
    Special,
    /// Behavioural interview
    Behavior,
}

impl InterviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewKind::Special => "special",
            InterviewKind::Behavior => "behavior",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "special" => Some(InterviewKind::Special),
            "behavior" => Some(InterviewKind::Behavior),
            _ => None,
        }
    }

    pub fn quota_kind(&self) -> QuotaKind {
        match self {
            InterviewKind::Special => QuotaKind::SpecialInterview,
            InterviewKind::Behavior => QuotaKind::BehaviorInterview,
        }
    }
}

/// Interview state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewPhase {
    Starting,
    AwaitingAnswer,
    Thinking,
    Questioning,
    Ending,
    Ended,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Interviewer,
    Candidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_answer: Option<String>,
}

/// Why an interview ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Timeout,
    AiDecision,
    UserEnded,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Timeout => "timeout",
            EndReason::AiDecision => "ai_decision",
            EndReason::UserEnded => "user_ended",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(EndReason::Timeout),
            "ai_decision" => Some(EndReason::AiDecision),
            "user_ended" => Some(EndReason::UserEnded),
            _ => None,
        }
    }
}

/// Candidate and position context an interview is conducted against
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterviewContext {
    pub candidate_name: Option<String>,
    pub company: Option<String>,
    pub position_name: Option<String>,
    pub salary_range: Option<String>,
    pub job_description: Option<String>,
}

/// Live state of one mock interview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewSession {
    pub session_id: String,
    pub user_id: String,
    pub interview_kind: InterviewKind,
    pub interviewer_name: String,
    pub context: InterviewContext,
    pub resume_text: Option<String>,
    pub conversation_history: Vec<ConversationTurn>,
    pub question_count: u32,
    pub start_time: DateTime<Utc>,
    pub target_duration_minutes: u32,
    pub is_active: bool,
    pub phase: InterviewPhase,
    pub result_id: Option<String>,
    pub consumption_record_id: Option<String>,
    pub last_activity_at: DateTime<Utc>,
}

impl InterviewSession {
    pub fn new(
        user_id: impl Into<String>,
        interview_kind: InterviewKind,
        interviewer_name: impl Into<String>,
        context: InterviewContext,
        resume_text: Option<String>,
        target_duration_minutes: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            interview_kind,
            interviewer_name: interviewer_name.into(),
            context,
            resume_text,
            conversation_history: Vec::new(),
            question_count: 0,
            start_time: now,
            target_duration_minutes,
            is_active: true,
            phase: InterviewPhase::Starting,
            result_id: None,
            consumption_record_id: None,
            last_activity_at: now,
        }
    }

    /// Append a turn; timestamps stay strictly increasing even when the clock does not
    pub fn append_turn(&mut self, speaker: Speaker, text: impl Into<String>) -> &ConversationTurn {
        let mut timestamp = Utc::now();
        if let Some(last) = self.conversation_history.last() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + Duration::milliseconds(1);
            }
        }
        if speaker == Speaker::Candidate {
            self.question_count += 1;
        }
        self.last_activity_at = Utc::now();
        self.conversation_history.push(ConversationTurn {
            speaker,
            text: text.into(),
            timestamp,
            reference_answer: None,
        });
        let idx = self.conversation_history.len() - 1;
        &self.conversation_history[idx]
    }

    /// Undo the most recent turn if it is the candidate's
    pub fn rollback_candidate_turn(&mut self) -> Option<ConversationTurn> {
        match self.conversation_history.last() {
            Some(turn) if turn.speaker == Speaker::Candidate => {
                self.question_count = self.question_count.saturating_sub(1);
                self.conversation_history.pop()
            }
            _ => None,
        }
    }

    /// Most recent interviewer turn
    pub fn last_question(&self) -> Option<&ConversationTurn> {
        self.conversation_history
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::Interviewer)
    }

    pub fn last_question_mut(&mut self) -> Option<&mut ConversationTurn> {
        self.conversation_history
            .iter_mut()
            .rev()
            .find(|t| t.speaker == Speaker::Interviewer)
    }

    /// Interviewer turns so far; each one owns a Q&A slot
    pub fn questions_asked(&self) -> usize {
        self.conversation_history
            .iter()
            .filter(|t| t.speaker == Speaker::Interviewer)
            .count()
    }

    pub fn candidate_turns(&self) -> usize {
        self.conversation_history
            .iter()
            .filter(|t| t.speaker == Speaker::Candidate)
            .count()
    }

    /// Whole minutes since the interview started
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.start_time).num_minutes().max(0)
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_minutes(now) >= i64::from(self.target_duration_minutes)
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

// ============================================================================
// Resume quiz
// ============================================================================

/// Input of a resume quiz run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeQuizRequest {
    pub user_id: String,
    /// Client-supplied request id
    pub idempotency_key: String,
    pub company: Option<String>,
    pub position_name: String,
    pub job_description: String,
    pub min_salary: Option<u32>,
    pub max_salary: Option<u32>,
    /// Takes priority over `resume_url`
    pub resume_text: Option<String>,
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizQuestion {
    pub question: String,
    pub answer: String,
    pub category: String,
    pub difficulty: String,
    pub tips: Option<String>,
    pub keywords: Vec<String>,
}

/// First-phase structured result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestionSet {
    pub questions: Vec<QuizQuestion>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillMatch {
    pub skill: String,
    pub matched: bool,
    pub proficiency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LearningPriority {
    pub topic: String,
    pub priority: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RadarDimension {
    pub dimension: String,
    pub score: f64,
}

/// Second-phase structured result: resume vs. job match and gaps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuizAnalysis {
    pub match_score: f64,
    pub match_level: String,
    pub matched_skills: Vec<SkillMatch>,
    pub missing_skills: Vec<String>,
    pub knowledge_gaps: Vec<String>,
    pub learning_priorities: Vec<LearningPriority>,
    pub radar_data: Vec<RadarDimension>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub summary: String,
    pub interview_tips: Vec<String>,
}

/// Durable resume quiz artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeQuizResult {
    pub result_id: String,
    pub user_id: String,
    pub consumption_record_id: String,
    pub company: Option<String>,
    pub position_name: String,
    /// "inline" or "url"
    pub resume_source: String,
    pub questions: Vec<QuizQuestion>,
    pub analysis: QuizAnalysis,
    pub ai_model: Option<String>,
    pub view_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_viewed_at: Option<DateTime<Utc>>,
}

impl ResumeQuizResult {
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    /// Question count per category
    pub fn question_distribution(&self) -> BTreeMap<String, usize> {
        let mut distribution = BTreeMap::new();
        for q in &self.questions {
            let category = if q.category.trim().is_empty() {
                "general".to_string()
            } else {
                q.category.clone()
            };
            *distribution.entry(category).or_insert(0) += 1;
        }
        distribution
    }
}

/// Result of a resume quiz run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizOutcome {
    pub result: ResumeQuizResult,
    pub consumption_record_id: String,
    /// True when served from an earlier successful run with the same request id
    pub from_cache: bool,
    pub remaining_count: Option<i64>,
}

// ============================================================================
// Mock interview
// ============================================================================

/// Input of a mock interview start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInterviewRequest {
    pub user_id: String,
    pub interview_kind: InterviewKind,
    /// Defaults to the new session id
    pub idempotency_key: Option<String>,
    pub context: InterviewContext,
    pub resume_text: Option<String>,
    pub resume_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl InterviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStatus::InProgress => "in_progress",
            InterviewStatus::Paused => "paused",
            InterviewStatus::Completed => "completed",
            InterviewStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "paused" => InterviewStatus::Paused,
            "completed" => InterviewStatus::Completed,
            "failed" => InterviewStatus::Failed,
            _ => InterviewStatus::InProgress,
        }
    }
}

/// One question slot of the durable interview record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaEntry {
    pub slot: i64,
    pub question: String,
    pub answer: Option<String>,
    pub reference_answer: Option<String>,
    pub asked_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// Durable mock interview artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewResult {
    pub result_id: String,
    pub user_id: String,
    pub session_id: String,
    pub interview_kind: InterviewKind,
    pub interviewer_name: Option<String>,
    pub company: Option<String>,
    pub position_name: Option<String>,
    pub status: InterviewStatus,
    pub session_state: InterviewSession,
    pub consumption_record_id: Option<String>,
    pub end_reason: Option<EndReason>,
    pub question_count: i64,
    pub duration_minutes: Option<i64>,
    pub view_count: i64,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub qa: Vec<QaEntry>,
}

/// Returned by a successful pause
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseInfo {
    pub session_id: String,
    pub result_id: String,
    pub question_count: u32,
    pub paused_at: DateTime<Utc>,
}

/// Returned by a successful resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeInfo {
    pub session_id: String,
    pub result_id: String,
    pub interview_kind: InterviewKind,
    pub interviewer_name: String,
    /// Question the candidate still has to answer
    pub last_question: Option<String>,
    pub question_count: u32,
    pub elapsed_minutes: i64,
    pub conversation_history: Vec<ConversationTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_session() -> InterviewSession {
        InterviewSession::new(
            "user-1",
            InterviewKind::Special,
            "Interviewer",
            InterviewContext {
                position_name: Some("Backend Engineer".to_string()),
                ..Default::default()
            },
            None,
            120,
        )
    }

    // ========================================================================
    // Enum mapping tests
    // ========================================================================

    #[test]
    fn test_quota_kind_roundtrip() {
        for kind in QuotaKind::ALL {
            assert_eq!(QuotaKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(QuotaKind::from_str("unknown"), None);
    }

    #[test]
    fn test_interview_kind_quota_mapping() {
        assert_eq!(InterviewKind::Special.quota_kind(), QuotaKind::SpecialInterview);
        assert_eq!(InterviewKind::Behavior.quota_kind(), QuotaKind::BehaviorInterview);
    }

    #[test]
    fn test_consumption_status_terminal() {
        assert!(!ConsumptionStatus::Pending.is_terminal());
        assert!(ConsumptionStatus::Success.is_terminal());
        assert!(ConsumptionStatus::Failed.is_terminal());
        assert_eq!(ConsumptionStatus::from_str("garbage"), ConsumptionStatus::Pending);
    }

    // ========================================================================
    // InterviewSession tests
    // ========================================================================

    #[test]
    fn test_append_turn_counts_candidate_turns() {
        let mut session = create_test_session();
        session.append_turn(Speaker::Interviewer, "Hello");
        session.append_turn(Speaker::Candidate, "Hi");
        session.append_turn(Speaker::Interviewer, "Question 1");
        session.append_turn(Speaker::Candidate, "Answer 1");

        assert_eq!(session.question_count, 2);
        assert_eq!(session.candidate_turns(), 2);
    }

    #[test]
    fn test_append_turn_timestamps_strictly_increase() {
        let mut session = create_test_session();
        for i in 0..50 {
            let speaker = if i % 2 == 0 { Speaker::Interviewer } else { Speaker::Candidate };
            session.append_turn(speaker, format!("turn {}", i));
        }
        for pair in session.conversation_history.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[test]
    fn test_rollback_only_removes_candidate_turn() {
        let mut session = create_test_session();
        session.append_turn(Speaker::Interviewer, "Q");
        assert!(session.rollback_candidate_turn().is_none());

        session.append_turn(Speaker::Candidate, "A");
        let removed = session.rollback_candidate_turn().unwrap();
        assert_eq!(removed.text, "A");
        assert_eq!(session.question_count, 0);
        assert_eq!(session.conversation_history.len(), 1);
    }

    #[test]
    fn test_last_question() {
        let mut session = create_test_session();
        assert!(session.last_question().is_none());
        session.append_turn(Speaker::Interviewer, "Q1");
        session.append_turn(Speaker::Candidate, "A1");
        assert_eq!(session.last_question().unwrap().text, "Q1");
    }

    #[test]
    fn test_timeout_detection() {
        let mut session = create_test_session();
        let now = Utc::now();
        session.start_time = now - Duration::minutes(119);
        assert!(!session.is_timed_out(now));
        session.start_time = now - Duration::minutes(120);
        assert!(session.is_timed_out(now));
        assert_eq!(session.elapsed_minutes(now), 120);
    }

    #[test]
    fn test_session_snapshot_roundtrip() {
        let mut session = create_test_session();
        session.append_turn(Speaker::Interviewer, "Q1");
        session.conversation_history[0].reference_answer = Some("ref".to_string());
        session.append_turn(Speaker::Candidate, "A1");

        let json = serde_json::to_string(&session).unwrap();
        let restored: InterviewSession = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }

    // ========================================================================
    // Quiz payload tests
    // ========================================================================

    #[test]
    fn test_question_set_accepts_partial_ai_output() {
        let json = r#"{"questions":[{"question":"What is Rust?","difficulty":"easy"}]}"#;
        let set: QuestionSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.questions.len(), 1);
        assert_eq!(set.questions[0].difficulty, "easy");
        assert!(set.questions[0].keywords.is_empty());
    }

    #[test]
    fn test_analysis_uses_camel_case() {
        let json = r#"{"matchScore":82,"matchLevel":"good","missingSkills":["k8s"],
            "learningPriorities":[{"topic":"k8s","priority":"high","reason":"JD"}]}"#;
        let analysis: QuizAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.match_score, 82.0);
        assert_eq!(analysis.missing_skills, vec!["k8s".to_string()]);
        assert_eq!(analysis.learning_priorities[0].priority, "high");
    }

    #[test]
    fn test_question_distribution() {
        let result = ResumeQuizResult {
            result_id: "r".to_string(),
            user_id: "u".to_string(),
            consumption_record_id: "c".to_string(),
            company: None,
            position_name: "Dev".to_string(),
            resume_source: "inline".to_string(),
            questions: vec![
                QuizQuestion { category: "rust".to_string(), ..Default::default() },
                QuizQuestion { category: "rust".to_string(), ..Default::default() },
                QuizQuestion::default(),
            ],
            analysis: QuizAnalysis::default(),
            ai_model: None,
            view_count: 0,
            created_at: Utc::now(),
            last_viewed_at: None,
        };
        let dist = result.question_distribution();
        assert_eq!(dist.get("rust"), Some(&2));
        assert_eq!(dist.get("general"), Some(&1));
    }
}
