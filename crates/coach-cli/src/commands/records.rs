//! Records commands
//!
//! Consumption history and per-feature statistics.

use anyhow::Result;
use clap::Subcommand;
use coach_core::ConsumptionRecord;
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{print_info, print_json, print_output, OutputFormat};

#[derive(Subcommand)]
pub enum RecordsAction {
    /// List billable attempts, newest first
    List {
        /// Number of records to skip
        #[arg(long, default_value = "0")]
        skip: i64,

        /// Maximum number of records
        #[arg(long, short, default_value = "20")]
        limit: i64,
    },

    /// Per-feature success, failure and refund counts
    Stats,
}

/// Record row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct RecordRow {
    #[tabled(rename = "Record")]
    pub record_id: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Refunded")]
    pub refunded: String,
    #[tabled(rename = "Request")]
    pub idempotency_key: String,
    #[tabled(rename = "Started")]
    pub started_at: String,
}

impl From<&ConsumptionRecord> for RecordRow {
    fn from(record: &ConsumptionRecord) -> Self {
        Self {
            record_id: short_id(&record.record_id),
            kind: record.kind.as_str().to_string(),
            status: record.status.as_str().to_string(),
            refunded: if record.refunded { "yes" } else { "" }.to_string(),
            idempotency_key: record.idempotency_key.clone(),
            started_at: record.started_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Stats row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct StatsRow {
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Total")]
    pub total: i64,
    #[tabled(rename = "Success")]
    pub success: i64,
    #[tabled(rename = "Failed")]
    pub failed: i64,
    #[tabled(rename = "Pending")]
    pub pending: i64,
    #[tabled(rename = "Refunded")]
    pub refunded: i64,
}

pub async fn execute(ctx: &Context, action: RecordsAction) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let user_id = ctx.user()?;

    match action {
        RecordsAction::List { skip, limit } => {
            let history = orchestrator.consumption_history(user_id, skip, limit).await?;
            if ctx.format == OutputFormat::Json {
                return print_json(&history);
            }
            let rows: Vec<RecordRow> = history.records.iter().map(RecordRow::from).collect();
            print_output(&rows, ctx.format)?;
            print_info(
                &format!("Showing {} of {} records", rows.len(), history.total),
                ctx.quiet,
            );
        }
        RecordsAction::Stats => {
            let history = orchestrator.consumption_history(user_id, 0, 1).await?;
            let rows: Vec<StatsRow> = history
                .stats
                .iter()
                .map(|(kind, stats)| StatsRow {
                    kind: kind.as_str().to_string(),
                    total: stats.total,
                    success: stats.success,
                    failed: stats.failed,
                    pending: stats.pending,
                    refunded: stats.refunded,
                })
                .collect();
            print_output(&rows, ctx.format)?;
        }
    }
    Ok(())
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
