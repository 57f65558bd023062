//! Cardsmith CLI: generate, study, adapt, and tune flashcard decks.

mod commands;
mod study;

use cardsmith_core::convergence::ReturnPolicy;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Cardsmith: self-improving, personalized flashcard decks
#[derive(Parser, Debug)]
#[command(name = "cardsmith", version, about, long_about = None)]
struct Cli {
    /// LLM model to use
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Generate a deck from source text and improve it
    Generate {
        /// Source material (plain text)
        input: PathBuf,
        /// Maximum critique/revise iterations
        #[arg(short, long)]
        iterations: Option<usize>,
        /// Which set to return when the budget runs out: best or last
        #[arg(long)]
        policy: Option<ReturnPolicy>,
        /// Directory for the exported deck
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Do not record this run for later optimization
        #[arg(long)]
        no_record: bool,
    },
    /// Rate each card of a deck interactively
    Study {
        /// Deck JSON file
        deck: PathBuf,
        /// Where to write the study session (default: next to the deck)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also record the session into this run directory
        #[arg(long)]
        run: Option<PathBuf>,
    },
    /// Adapt a deck to a rated study session
    Adapt {
        /// Study session JSON file
        session: PathBuf,
        /// Source material the deck was generated from
        #[arg(short, long)]
        source: Option<PathBuf>,
        /// Directory for the exported deck
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Record into this run directory instead of a new one
        #[arg(long)]
        run: Option<PathBuf>,
    },
    /// Score a deck with the LLM judge
    Evaluate {
        /// Deck JSON file
        deck: PathBuf,
        /// Source material to check accuracy against
        #[arg(short, long)]
        source: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search for better prompts using recorded runs
    Optimize {
        /// Directory of recorded runs
        #[arg(long)]
        eval_data_dir: Option<PathBuf>,
        /// Role to optimize
        #[arg(long, value_enum, default_value = "all")]
        role: RoleArg,
        /// Candidate configurations per role
        #[arg(long)]
        num_candidates: Option<usize>,
        /// Examples evaluated per candidate
        #[arg(long)]
        max_examples: Option<usize>,
        /// Where optimized prompts are saved
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Skip guided search and bootstrap demos only
        #[arg(long)]
        bootstrap_only: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RoleArg {
    Critique,
    Revise,
    Adapt,
    All,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = cardsmith_core::config::data_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cardsmith.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.model.as_deref()).await
}
