use std::sync::Arc;

mod config;
mod functions;
mod schema;
mod services;

use config::Config;
use functions::{Dispatcher, LifecycleController};
use services::{KlingClient, TelegramClient};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        kling_api_base = %config.kling_api_base,
        model = %config.params.model_name,
        poll_interval_secs = config.poll.interval.as_secs(),
        poll_max_attempts = config.poll.max_attempts,
        scratch_dir = %config.scratch_dir.display(),
        "configuration loaded"
    );

    tokio::fs::create_dir_all(&config.scratch_dir).await?;

    let kling = Arc::new(KlingClient::new(&config)?);
    let lifecycle = Arc::new(LifecycleController::from_config(&config, kling));
    let bot = Arc::new(TelegramClient::new(&config)?);

    let dispatcher = Dispatcher::new(bot.clone(), bot.clone(), lifecycle, config.params.clone());

    tracing::info!("bot started");
    functions::run_gateway(bot, dispatcher, shutdown_signal()).await
}
