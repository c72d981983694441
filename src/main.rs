mod app_error;
mod cli;
mod config;
mod controllers;
mod model;
mod repositories;
mod services;
mod state;

use crate::cli::{Cli, Command};
use crate::config::config::Config;
use crate::controllers::{generate, models, outputs, queue, system};
use crate::repositories::gpu_repository::GpuRepository;
use crate::services::generation_worker::{ProcessGenerator, run_worker};
use crate::services::installer::install;
use crate::services::launcher::{diagnose, launch, runtime_settings};
use crate::state::AppState;
use axum::Router;
use axum::routing::{delete, get, post};
use clap::Parser;
use std::process::ExitCode;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    enable_logging(cli.verbose);
    let Some(mut config) = Config::from_path(&cli.config_path) else {
        return Ok(ExitCode::FAILURE);
    };

    match cli.command.unwrap_or_default() {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::Detect { json } => detect(config, json).await,
        Command::Install => match install(&config).await {
            Ok(outcome) => {
                if !outcome.skipped.is_empty() {
                    warn!(
                        "Skipped optional packages: {}",
                        outcome.skipped.join(", ")
                    );
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                error!("Install failed: {}", err);
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Launch => match launch(&config).await {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(err) => {
                error!("Launch failed: {}", err);
                Ok(ExitCode::FAILURE)
            }
        },
    }
}

async fn detect(config: Config, json: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let gpu_repository = GpuRepository::new();
    let sage_available = gpu_repository
        .sage_attention_installed(&config.server.python)
        .await;
    match diagnose(
        &gpu_repository,
        config.server.attention_mode,
        config.server.profile,
        sage_available,
    )
    .await
    {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!("{}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn serve(config: Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let gpu_repository = GpuRepository::new();
    let sage_available = gpu_repository
        .sage_attention_installed(&config.server.python)
        .await;
    if !sage_available {
        warn!("SageAttention is not installed, falling back to sdpa for auto attention");
    }

    let detected = diagnose(
        &gpu_repository,
        config.server.attention_mode,
        config.server.profile,
        sage_available,
    )
    .await;
    let runtime = runtime_settings(detected, &config.server, gpu_repository.total_ram_mb());

    tokio::fs::create_dir_all(&config.server.save_path).await?;
    tokio::fs::create_dir_all(&config.server.inputs_path).await?;

    let address = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, runtime);

    match state.config.generation.command.clone() {
        Some(command) => {
            let generator = ProcessGenerator::new(command, state.config.server.save_path.clone());
            tokio::spawn(run_worker(
                state.queue.clone(),
                state.worker_notify.clone(),
                generator,
            ));
        }
        None => warn!("No generation command configured, submitted tasks will stay queued"),
    }

    let app = router(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods(Any),
    );

    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(ExitCode::SUCCESS)
}

fn router(state: AppState) -> Router {
    let api_router = Router::new()
        .route("/", get(system::get_api_root))
        .route("/models", get(models::get_models))
        .route("/models/{model_type}", get(models::get_model))
        .route(
            "/models/{model_type}/settings",
            get(models::get_model_settings),
        )
        .route("/generate", post(generate::post_generate))
        .route(
            "/queue",
            get(queue::get_queue).delete(queue::delete_queue),
        )
        .route("/queue/{task_id}", delete(queue::delete_task))
        .route("/status/{task_id}", get(queue::get_task_status))
        .route("/outputs", get(outputs::get_outputs))
        .route("/download/{filename}", get(outputs::get_download))
        .route("/preview/{filename}", get(outputs::get_preview))
        .route("/config", get(system::get_config))
        .route("/health", get(system::get_health));

    Router::new()
        .route("/api/v1/", get(system::get_api_root))
        .nest("/api/v1", api_router)
        .with_state(state)
}

fn enable_logging(verbose: u8) {
    let log_level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
