use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use diffserver_pipeline::{Orchestrator, PipelineConfig};
use diffserver_runninghub::{RunningHubApi, RunningHubConfig, TaskService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use diffserver_api::config::ServerConfig;
use diffserver_api::hooks::LogReport;
use diffserver_api::router::build_app_router;
use diffserver_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "diffserver_api=debug,diffserver_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid server configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let rh_config = match RunningHubConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid RunningHub configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        api_base = %rh_config.api_base,
        webhook_url = %rh_config.webhook_url,
        "Loaded RunningHub configuration",
    );

    let pipeline_config = PipelineConfig::from_env();

    // --- RunningHub client ---
    let workflows = rh_config.workflows.clone();
    let service: Arc<dyn TaskService> = match RunningHubApi::new(rh_config) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build RunningHub client");
            std::process::exit(1);
        }
    };

    // --- Orchestrator ---
    let orchestrator = Orchestrator::start(pipeline_config, workflows, service, Arc::new(LogReport));

    // --- App state + router ---
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::clone(&orchestrator),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(host = %config.host, error = %e, "Invalid bind address");
            std::process::exit(1);
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    let drain = Duration::from_secs(config.shutdown_timeout_secs);
    if tokio::time::timeout(drain, orchestrator.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(timeout_secs = drain.as_secs(), "Orchestrator shutdown timed out");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
