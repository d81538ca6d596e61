mod auth;
mod config;
mod dto;
mod error;
mod routes;
mod state;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use sftp_core::{ActivationConfig, DeactivationConfig};
use sftp_infra::{BackendName, build_backends};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::dto::{ActivationResponse, DeactivationResponse};
use crate::routes::api_router;
use crate::state::AppState;

/// Scheduled start/stop of a managed SFTP server.
#[derive(Parser)]
#[command(name = "sftp-scheduler", version, about)]
struct Cli {
    /// Backend set to drive (`aws` or `memory`). Overrides `SFTP_BACKEND`.
    #[arg(long, global = true)]
    backend: Option<BackendName>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP trigger API (default).
    Serve,
    /// Bring the server online once and print the report.
    Activate,
    /// Stop and delete the server once and print the report.
    Deactivate,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            print_json(&serde_json::json!({ "error": e.to_string() }));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let backend = match cli.backend {
        Some(name) => name,
        None => BackendName::from_env()?,
    };
    let backends = build_backends(backend).await;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Activate => {
            let config = ActivationConfig::from_env()?;
            let report =
                sftp_core::activate(backends.control.as_ref(), backends.dns.as_ref(), &config)
                    .await?;
            let complete = report.is_complete();
            print_json(&ActivationResponse::from(report));
            if !complete {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Deactivate => {
            let config = DeactivationConfig::from_env()?;
            let report = sftp_core::deactivate(backends.control.as_ref(), &config).await?;
            print_json(&DeactivationResponse::from(report));
        }
        Command::Serve => {
            let config = AppConfig::from_env()?;
            let state = AppState::new(
                backends,
                ActivationConfig::from_env()?,
                DeactivationConfig::from_env()?,
                config.clone(),
            );

            let app = api_router(state).layer(TraceLayer::new_for_http());
            let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

            tracing::info!(
                addr = %config.listen_addr,
                backend = %backend,
                auth = config.api_key.is_some(),
                "starting SFTP scheduler API"
            );

            axum::serve(listener, app).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}
