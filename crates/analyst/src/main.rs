//! Analyst - a data analyst agent for the terminal

use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use analyst_agent::AgentError;

mod commands;

use commands::{ask_command, AskOptions};

/// Analyst - ask questions about your ClickHouse data
#[derive(Parser)]
#[command(name = "analyst")]
#[command(about = "◆ A data analyst agent for ClickHouse")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Question to answer
    #[arg(trailing_var_arg = true)]
    question: Vec<String>,

    /// Tool server launch configuration
    #[arg(long, value_name = "PATH")]
    tools_config: Option<PathBuf>,

    /// Model name, overrides ANALYST_MODEL
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum model/tool iterations, overrides ANALYST_MAX_ITERATIONS
    #[arg(long, value_name = "N")]
    max_iterations: Option<u32>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout is reserved for the answer
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let question = cli.question.join(" ");
    if question.trim().is_empty() {
        eprintln!("{}", Cli::command().render_usage());
        std::process::exit(1);
    }

    let options = AskOptions {
        question,
        tools_config: cli.tools_config,
        model: cli.model,
        max_iterations: cli.max_iterations,
    };

    if let Err(e) = ask_command(options).await {
        // Run failures were already shown by the observer
        if e.downcast_ref::<AgentError>().is_none() {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}
