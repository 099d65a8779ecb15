use std::time::Duration;

use clap::Parser;
use taskctl_config::registry::Registry;
use taskctl_config::Configurable;
use taskctl_core::config::RootConfig;
use taskctl_core::Coordinator;
use taskctl_tracing::{
    init_global_filter_layer, init_otel_layer, init_panic_tracing_hook, init_stdout_layer,
    init_tracing,
};
use tokio::signal::unix::{signal, SignalKind};

const CONFIG_PATH_ENV_VAR: &str = "CONFIG_PATH";
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const CLEANUP_MAX_AGE_SECONDS: i64 = 3600;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a YAML config file. Falls back to $CONFIG_PATH, then to defaults.
    #[arg(long)]
    config_path: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match args.config_path.or_else(|| std::env::var(CONFIG_PATH_ENV_VAR).ok()) {
        Some(path) => RootConfig::load_from_path(&path),
        None => RootConfig::load(),
    };

    let tracing_layers = vec![
        init_global_filter_layer(&config.otel_filters),
        init_otel_layer(&config.service_name, &config.otel_endpoint),
        init_stdout_layer(),
    ];
    init_tracing(tracing_layers);
    init_panic_tracing_hook();

    tracing::info!(service_name = %config.service_name, port = config.port, "loaded coordinator configuration");

    let registry = Registry::new();
    let coordinator = Coordinator::try_from_config(&config, &registry)
        .await
        .expect("failed to construct coordinator from config");

    run_cleanup_loop(coordinator).await;
}

/// Periodically sweeps attached-function rows stuck in PARTIAL past
/// `CLEANUP_MAX_AGE_SECONDS`, until SIGTERM. The gRPC surface itself is not
/// wired up here; this process only keeps the background lifecycle hygiene
/// running.
async fn run_cleanup_loop(coordinator: Coordinator) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!(%err, "failed to install SIGTERM handler");
            return;
        }
    };

    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match coordinator
                    .cleanup_expired_partial_attached_functions(CLEANUP_MAX_AGE_SECONDS)
                    .await
                {
                    Ok(expired) => tracing::info!(count = expired.len(), "cleanup sweep completed"),
                    Err(err) => tracing::error!(%err, "cleanup sweep failed"),
                }
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
        }
    }
}
