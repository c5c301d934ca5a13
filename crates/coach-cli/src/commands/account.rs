//! Account commands
//!
//! Create accounts and inspect remaining quota.

use anyhow::Result;
use clap::Subcommand;
use coach_core::{InitialQuota, QuotaKind, UsageLedger, User};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{print_output, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum AccountAction {
    /// Create an account with starting balances
    Create {
        /// Account id
        id: String,

        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,

        /// Resume quiz runs
        #[arg(long, default_value = "0")]
        quiz: i64,

        /// Technical interviews
        #[arg(long, default_value = "0")]
        special: i64,

        /// Behavioural interviews
        #[arg(long, default_value = "0")]
        behavior: i64,
    },

    /// Show remaining balances for the current user
    Balance,
}

/// Balance row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct BalanceRow {
    #[tabled(rename = "Feature")]
    pub feature: String,
    #[tabled(rename = "Remaining")]
    pub remaining: i64,
}

impl BalanceRow {
    fn from_user(user: &User) -> Vec<Self> {
        QuotaKind::ALL
            .iter()
            .map(|kind| BalanceRow {
                feature: kind.as_str().to_string(),
                remaining: user.balance(*kind),
            })
            .collect()
    }
}

pub async fn execute(ctx: &Context, action: AccountAction) -> Result<()> {
    let ledger = UsageLedger::new(ctx.db.pool.clone());
    match action {
        AccountAction::Create {
            id,
            name,
            quiz,
            special,
            behavior,
        } => {
            let quota = InitialQuota {
                resume_quiz: quiz,
                special_interview: special,
                behavior_interview: behavior,
            };
            let display_name = name.unwrap_or_else(|| id.clone());
            let user = ledger.create_account(&id, &display_name, &quota).await?;
            print_success(&format!("Created account {}", user.id), ctx.quiet);
            show(ctx, &user)
        }
        AccountAction::Balance => {
            let user = ledger.get_user(ctx.user()?).await?;
            show(ctx, &user)
        }
    }
}

fn show(ctx: &Context, user: &User) -> Result<()> {
    match ctx.format {
        OutputFormat::Json => crate::output::print_json(user),
        OutputFormat::Table => print_output(&BalanceRow::from_user(user), ctx.format),
    }
}
