//! # Sales Insight CLI (`insight`)
//!
//! The `insight` binary answers natural-language questions about a retail
//! sales log, lists trend recommendations, and serves the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! insight --config ./config/insight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `insight ask "<question>"` | Answer one question |
//! | `insight recommend` | List trend recommendations |
//! | `insight metadata` | Show products, locations, months, parse report |
//! | `insight check` | Validate configuration and credentials |
//! | `insight serve` | Start the HTTP server |
//! | `insight completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Scalar question, answered without a text generator
//! insight ask "What were total sales for Cold Brew in December 2024?"
//!
//! # Follow-up with the previous question as context
//! insight ask "and in November?" --context "total sales for Cold Brew in December 2024"
//!
//! # Machine-readable output
//! insight recommend --json
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sales_insight::commands;
use sales_insight::config::{self, Credentials};
use sales_insight::server;

/// Sales Insight CLI: natural-language analytics over a retail sales log.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/insight.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "insight",
    about = "Sales Insight: natural-language analytics over a retail sales log",
    version,
    long_about = "Sales Insight resolves free-text questions about a retail transaction log \
    into exact aggregates, answers scalar questions from templates, narrates open-ended ones \
    through a text generator with a static fallback, and derives trend recommendations."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/insight.toml`.
    #[arg(long, global = true, default_value = "./config/insight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question about the sales data.
    Ask {
        /// The question, in plain English.
        question: String,

        /// Earlier user turns, oldest first. Repeat for several turns.
        #[arg(long)]
        context: Vec<String>,

        /// Print the full response (answer, source, intent) as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List trend-based recommendations.
    Recommend {
        #[arg(long)]
        json: bool,
    },

    /// Show the products, locations, and months present in the dataset.
    Metadata {
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and required credentials.
    ///
    /// Does not fetch the dataset or contact the text generator.
    Check,

    /// Start the HTTP server on `[server] bind`.
    Serve,

    /// Print a shell completion script to stdout.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(
            *shell,
            &mut Cli::command(),
            "insight",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let credentials = Credentials::from_env();

    match cli.command {
        Commands::Ask {
            question,
            context,
            json,
        } => {
            commands::run_ask(&cfg, &credentials, &question, &context, json).await?;
        }
        Commands::Recommend { json } => {
            commands::run_recommend(&cfg, &credentials, json).await?;
        }
        Commands::Metadata { json } => {
            commands::run_metadata(&cfg, &credentials, json).await?;
        }
        Commands::Check => {
            commands::run_check(&cfg, &credentials)?;
        }
        Commands::Serve => {
            server::run_server(&cfg, &credentials).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
