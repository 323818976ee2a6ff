//! Undertow CLI - Command-line interface
//!
//! Runs the media server and offers small helpers around content identifiers.

mod commands;

use clap::Parser;
use undertow_core::tracing_setup::{CliLogLevel, TracingOptions, init_tracing};

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "On-demand torrent media server")]
struct Cli {
    /// Console log level
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli.log_level.into();
    let options = match cli.command {
        commands::Commands::Serve { .. } => TracingOptions::with_trace_file(level, "logs"),
        _ => TracingOptions::console(level),
    };
    init_tracing(&options)?;

    commands::handle_command(cli.command).await
}
