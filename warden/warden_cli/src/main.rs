use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use warden_core::utils::config::LoggingConfig;
use warden_core::EngineConfig;

mod commands;
mod policy;

use commands::check::CheckArgs;
use commands::lookup::LookupArgs;

/// Warden authorization command line
///
/// Resolves rules and runs authorization requests against a policy file.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Engine configuration file
    #[clap(long, global = true, env = "WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level regardless of configuration
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rule that governs a right
    Lookup(LookupArgs),

    /// Authorize one or more rights
    Check(CheckArgs),
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let level = if verbose {
        warden_core::LogLevel::Debug
    } else {
        config.level
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    // Results go to stdout, logs to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("warden: logging unavailable: {}", e);
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = EngineConfig::load(cli.config.as_deref())
        .context("Failed to load engine configuration")?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Lookup(args) => commands::lookup::execute(&args),
        Commands::Check(args) => commands::check::execute(&args, config),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("warden: {:#}", e);
            ExitCode::from(commands::EXIT_ERROR)
        }
    }
}
