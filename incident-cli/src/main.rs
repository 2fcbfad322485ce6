// incident-cli/src/main.rs
// ============================================================================
// Module: Incident CLI Entry Point
// Description: Command dispatcher for running the ingestion/orchestrator
//              HTTP service, verifying an issue's audit chain, and
//              validating pipeline configuration.
// Purpose: The single binary that turns the incident-* library crates into
//          a runnable service and a small set of operator utilities.
// Dependencies: axum, clap, incident-broker, incident-config, incident-core,
//               incident-pipeline, incident-providers, incident-safety,
//               incident-store, serde_json, thiserror, tokio,
//               tracing, tracing-subscriber.
// ============================================================================

//! ## Overview
//! Three subcommands: `serve` runs the HTTP ingestion/orchestrator service,
//! `verify-audit` walks a stored issue's audit chain and reports whether it
//! is intact, and `config validate` loads `incident.toml` and reports
//! whether it passes validation. All three share the same backend wiring in
//! [`wiring::build_pipeline`], so `serve` and the offline utilities always
//! agree on how the `SQLite` store, the Claude client, and the HTTP-backed
//! providers are constructed.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod http;
mod settings;
mod wiring;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use incident_config::IncidentConfig;
use incident_core::AuditStore;
use incident_core::IssueId;
use incident_core::verify_chain;
use thiserror::Error;

use crate::http::AppState;
use crate::settings::Settings;
use crate::wiring::build_pipeline;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "incident", arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingestion/orchestrator HTTP service.
    Serve(ServeCommand),
    /// Verify an issue's audit chain against its stored hash links.
    VerifyAudit(VerifyAuditCommand),
    /// Configuration inspection utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Path to `incident.toml` (defaults to `INCIDENT_CONFIG` or `./incident.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Configuration for the `verify-audit` command.
#[derive(Args, Debug)]
struct VerifyAuditCommand {
    /// Path to `incident.toml` (defaults to `INCIDENT_CONFIG` or `./incident.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Issue id to verify the audit chain for.
    #[arg(long, value_name = "ISSUE_ID")]
    issue_id: String,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate `incident.toml`.
    Validate {
        /// Path to `incident.toml` (defaults to `INCIDENT_CONFIG` or `./incident.toml`).
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{0}")]
struct CliError(String);

impl From<incident_config::ConfigError> for CliError {
    fn from(error: incident_config::ConfigError) -> Self {
        Self(error.to_string())
    }
}

impl From<crate::wiring::WiringError> for CliError {
    fn from(error: crate::wiring::WiringError) -> Self {
        Self(error.to_string())
    }
}

impl From<incident_core::StoreError> for CliError {
    fn from(error: incident_core::StoreError) -> Self {
        Self(error.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self(error.to_string())
    }
}

type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error_type = "cli_error", error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::VerifyAudit(command) => command_verify_audit(command),
        Commands::Config {
            command,
        } => command_config(command),
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = IncidentConfig::load(command.config.as_deref())?;
    let settings = Settings::from_env();
    let pipeline = Arc::new(build_pipeline(config, &settings, None)?);

    tracing::info!(bind = %settings.bind_addr, db_path = %settings.db_path.display(), "starting incident ingestion service");

    let app = http::router(AppState {
        pipeline,
    });
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(ExitCode::SUCCESS)
}

/// Waits for Ctrl+C (or, on Unix, SIGTERM) so `serve` shuts down cleanly.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

// ============================================================================
// SECTION: Verify-Audit Command
// ============================================================================

/// Executes the `verify-audit` command.
fn command_verify_audit(command: VerifyAuditCommand) -> CliResult<ExitCode> {
    let config = IncidentConfig::load(command.config.as_deref())?;
    let settings = Settings::from_env();
    let pipeline = build_pipeline(config, &settings, None)?;

    let issue_id = IssueId::new(command.issue_id.clone());
    let chain = AuditStore::load_chain(pipeline.store.as_ref(), &issue_id)?;
    if chain.is_empty() {
        println!("issue {issue_id} has no recorded audit entries");
        return Ok(ExitCode::SUCCESS);
    }

    let entry_count = chain.len();
    match verify_chain(&chain) {
        Ok(()) => {
            println!("issue {issue_id}: audit chain intact ({entry_count} entries)");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            println!("issue {issue_id}: audit chain broken: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate {
            config,
        } => command_config_validate(config.as_deref()),
    }
}

/// Executes the `config validate` command.
fn command_config_validate(path: Option<&Path>) -> CliResult<ExitCode> {
    match IncidentConfig::load(path) {
        Ok(config) => {
            println!("config ok: pattern detector window {}s, retry cap {}s", config.pattern_detector.window_seconds, config.retry.cap_seconds);
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            println!("config invalid: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}
