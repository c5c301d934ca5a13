//! Config commands
//!
//! Shows the configuration the orchestrator runs with.

use anyhow::Result;
use clap::Subcommand;
use coach_core::{db, CoachConfig};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{print_output, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show effective configuration
    Show,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    if ctx.format == OutputFormat::Json {
        let mut config = ctx.config.clone();
        config.ai.api_key = config.ai.api_key.map(|_| "****".to_string());
        return crate::output::print_json(&config);
    }
    print_output(&config_rows(&ctx.config), ctx.format)
}

fn row(key: &str, value: impl ToString) -> ConfigRow {
    let source = if std::env::var(key).map(|v| !v.trim().is_empty()).unwrap_or(false) {
        "env"
    } else {
        "default"
    };
    ConfigRow {
        key: key.to_string(),
        value: value.to_string(),
        source: source.to_string(),
    }
}

fn config_rows(config: &CoachConfig) -> Vec<ConfigRow> {
    let db_path = db::get_db_path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());

    vec![
        row("COACH_DB_PATH", db_path),
        row("COACH_AI_PROVIDER", &config.ai.provider),
        row("COACH_AI_MODEL", &config.ai.model),
        row(
            "COACH_AI_API_KEY",
            if config.ai.api_key.is_some() { "****" } else { "Not set" },
        ),
        row(
            "COACH_AI_BASE_URL",
            config.ai.base_url.as_deref().unwrap_or("(provider default)"),
        ),
        row("COACH_AI_TEMPERATURE", config.ai.temperature),
        row("COACH_AI_MAX_TOKENS", config.ai.max_tokens),
        row("COACH_AI_TIMEOUT_SECS", config.ai.timeout_secs),
        row("COACH_INTERVIEWER_NAME", &config.interview.interviewer_name),
        row("COACH_SPECIAL_MAX_MINUTES", config.interview.special_max_minutes),
        row("COACH_BEHAVIOR_MAX_MINUTES", config.interview.behavior_max_minutes),
        row("COACH_CLEANUP_GRACE_SECS", config.interview.cleanup_grace_secs),
        row("COACH_QUIZ_MIN_QUESTIONS", config.quiz.min_questions),
        row("COACH_TICKER_INTERVAL_MS", config.quiz.ticker_interval_ms),
        row("COACH_RESUME_TOKEN_BUDGET", config.quiz.resume_token_budget),
        row("COACH_DOCUMENT_MAX_BYTES", config.document.max_bytes),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_is_masked() {
        let mut config = CoachConfig::default();
        config.ai.api_key = Some("sk-secret".to_string());
        let rows = config_rows(&config);
        let key = rows.iter().find(|r| r.key == "COACH_AI_API_KEY").unwrap();
        assert_eq!(key.value, "****");
        assert!(rows.iter().all(|r| !r.value.contains("sk-secret")));
    }
}
