//! Coach CLI - AI mock interviews and resume quizzes
//!
//! A command-line front end for managing accounts, running resume quizzes,
//! conducting mock interviews and inspecting consumption history.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use coach_core::{CoachConfig, Database};

#[derive(Parser)]
#[command(name = "coach")]
#[command(author, version, about = "AI interview coaching CLI", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set COACH_DB_PATH env var)
    #[arg(long, env = "COACH_DB_PATH", global = true)]
    db: Option<String>,

    /// Acting user id (or set COACH_USER env var)
    #[arg(long, env = "COACH_USER", global = true)]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts and quota balances
    Account {
        #[command(subcommand)]
        action: commands::account::AccountAction,
    },

    /// Generate interview questions from a resume and job description
    Quiz {
        #[command(subcommand)]
        action: commands::quiz::QuizAction,
    },

    /// Run an interactive mock interview
    Interview {
        #[command(subcommand)]
        action: commands::interview::InterviewAction,
    },

    /// Inspect consumption history
    Records {
        #[command(subcommand)]
        action: commands::records::RecordsAction,
    },

    /// Show effective configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var("COACH_DB_PATH", shellexpand::tilde(db_path).to_string());
    }

    let db = Database::new().await?;

    let ctx = commands::Context {
        db,
        format: cli.format,
        quiet: cli.quiet,
        user: cli.user.filter(|u| !u.trim().is_empty()),
        config: CoachConfig::from_env(),
    };

    match cli.command {
        Commands::Account { action } => commands::account::execute(&ctx, action).await,
        Commands::Quiz { action } => commands::quiz::execute(&ctx, action).await,
        Commands::Interview { action } => commands::interview::execute(&ctx, action).await,
        Commands::Records { action } => commands::records::execute(&ctx, action).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
