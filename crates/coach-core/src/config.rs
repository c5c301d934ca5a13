//! Runtime configuration
//!
//! Defaults reproduce the production behaviour; every value can be overridden
//! through `COACH_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Maximum interview length for both interview kinds, in minutes
pub const DEFAULT_INTERVIEW_MAX_MINUTES: u32 = 120;

/// Grace window before an ended session leaves the in-memory store
pub const DEFAULT_CLEANUP_GRACE_SECS: u64 = 300;

/// Synthetic progress tick interval
pub const DEFAULT_TICKER_INTERVAL_MS: u64 = 800;

/// Token budget for resume text handed to the AI
pub const DEFAULT_RESUME_TOKEN_BUDGET: usize = 6000;

/// A question set smaller than this is treated as a failed generation
pub const DEFAULT_MIN_QUIZ_QUESTIONS: usize = 10;

/// Minimum ticker interval accepted by `validate()`
pub const MIN_TICKER_INTERVAL_MS: u64 = 50;

// ============================================================================
// Sections
// ============================================================================

/// AI provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// "openai", "deepseek", "ollama" or "openai-compatible"
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Upper bound for a structured call and for the gap between two stream chunks
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: 4000,
            timeout_secs: 180,
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Mock interview settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewConfig {
    pub interviewer_name: String,
    pub special_max_minutes: u32,
    pub behavior_max_minutes: u32,
    /// Estimated question totals, only used for progress display
    pub special_total_questions: u32,
    pub behavior_total_questions: u32,
    pub cleanup_grace_secs: u64,
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            interviewer_name: "Interviewer (Ms. Mia)".to_string(),
            special_max_minutes: DEFAULT_INTERVIEW_MAX_MINUTES,
            behavior_max_minutes: DEFAULT_INTERVIEW_MAX_MINUTES,
            special_total_questions: 12,
            behavior_total_questions: 8,
            cleanup_grace_secs: DEFAULT_CLEANUP_GRACE_SECS,
        }
    }
}

impl InterviewConfig {
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }
}

/// Resume quiz settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    pub min_questions: usize,
    pub ticker_interval_ms: u64,
    /// The synthetic percentage wraps back to `progress_floor` once it passes `progress_cap`
    pub progress_floor: u8,
    pub progress_cap: u8,
    pub resume_token_budget: usize,
    /// Characters kept per budget token when truncating
    pub chars_per_token: f64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            min_questions: DEFAULT_MIN_QUIZ_QUESTIONS,
            ticker_interval_ms: DEFAULT_TICKER_INTERVAL_MS,
            progress_floor: 10,
            progress_cap: 50,
            resume_token_budget: DEFAULT_RESUME_TOKEN_BUDGET,
            chars_per_token: 1.5,
        }
    }
}

impl QuizConfig {
    pub fn ticker_interval(&self) -> Duration {
        Duration::from_millis(self.ticker_interval_ms)
    }
}

/// Resume document download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    pub max_bytes: u64,
    pub download_timeout_secs: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            download_timeout_secs: 30,
        }
    }
}

// ============================================================================
// CoachConfig
// ============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachConfig {
    pub ai: AiConfig,
    pub interview: InterviewConfig,
    pub quiz: QuizConfig,
    pub document: DocumentConfig,
}

impl CoachConfig {
    /// Build configuration from defaults overlaid with `COACH_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_string("COACH_AI_PROVIDER") {
            config.ai.provider = v;
        }
        if let Some(v) = env_string("COACH_AI_MODEL") {
            config.ai.model = v;
        }
        config.ai.api_key = env_string("COACH_AI_API_KEY").or(config.ai.api_key);
        config.ai.base_url = env_string("COACH_AI_BASE_URL").or(config.ai.base_url);
        if let Some(v) = env_parse("COACH_AI_TEMPERATURE") {
            config.ai.temperature = v;
        }
        if let Some(v) = env_parse("COACH_AI_MAX_TOKENS") {
            config.ai.max_tokens = v;
        }
        if let Some(v) = env_parse("COACH_AI_TIMEOUT_SECS") {
            config.ai.timeout_secs = v;
        }

        if let Some(v) = env_string("COACH_INTERVIEWER_NAME") {
            config.interview.interviewer_name = v;
        }
        if let Some(v) = env_parse("COACH_SPECIAL_MAX_MINUTES") {
            config.interview.special_max_minutes = v;
        }
        if let Some(v) = env_parse("COACH_BEHAVIOR_MAX_MINUTES") {
            config.interview.behavior_max_minutes = v;
        }
        if let Some(v) = env_parse("COACH_CLEANUP_GRACE_SECS") {
            config.interview.cleanup_grace_secs = v;
        }

        if let Some(v) = env_parse("COACH_QUIZ_MIN_QUESTIONS") {
            config.quiz.min_questions = v;
        }
        if let Some(v) = env_parse("COACH_TICKER_INTERVAL_MS") {
            config.quiz.ticker_interval_ms = v;
        }
        if let Some(v) = env_parse("COACH_RESUME_TOKEN_BUDGET") {
            config.quiz.resume_token_budget = v;
        }

        if let Some(v) = env_parse("COACH_DOCUMENT_MAX_BYTES") {
            config.document.max_bytes = v;
        }

        config.validate()
    }

    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        let mut config = self.clone();

        config.ai.temperature = config.ai.temperature.clamp(0.0, 2.0);
        config.ai.max_tokens = config.ai.max_tokens.max(256);
        config.ai.timeout_secs = config.ai.timeout_secs.max(1);

        config.interview.special_max_minutes = config.interview.special_max_minutes.max(1);
        config.interview.behavior_max_minutes = config.interview.behavior_max_minutes.max(1);

        config.quiz.ticker_interval_ms = config.quiz.ticker_interval_ms.max(MIN_TICKER_INTERVAL_MS);
        config.quiz.progress_cap = config.quiz.progress_cap.clamp(1, 99);
        config.quiz.progress_floor = config.quiz.progress_floor.min(config.quiz.progress_cap);
        config.quiz.resume_token_budget = config.quiz.resume_token_budget.max(500);
        if !(config.quiz.chars_per_token.is_finite() && config.quiz.chars_per_token > 0.0) {
            config.quiz.chars_per_token = QuizConfig::default().chars_per_token;
        }

        config
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[config] Ignoring invalid value for {}: {}", key, raw);
            None
        }
    }
}
