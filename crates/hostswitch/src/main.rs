use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hostswitch::actions::ActionProvider;
use hostswitch::actions::CommandProvider;
use hostswitch::entity::build_entities;
use hostswitch::entity::EntityContext;
use hostswitch::mqtt::RumqttcClient;
use hostswitch::Bridge;
use hostswitch::Config;
use hostswitch::Registry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Parser)]
#[command(version, about = "Expose display power and dark mode as MQTT switches")]
struct Cli {
    /// TOML config file; broker settings may also come from the environment
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env is fine; variables may be set directly
    let dotenv = dotenvy::dotenv().ok();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.targets())
        .init();

    tracing::info!("hostswitch starting");
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from: {}", path.display());
    }
    if let Some(path) = dotenv {
        tracing::info!("Loaded environment from: {}", path.display());
    }
    tracing::info!(
        "Host {} ({}) using broker {}:{}",
        config.device.host_id,
        config.device.name,
        config.mqtt.broker,
        config.mqtt.port
    );

    let actions: Arc<dyn ActionProvider> = Arc::new(CommandProvider::new(config.commands.clone()));
    let ctx = EntityContext {
        config: &config,
        actions,
    };

    let mut registry = Registry::new(&config.mqtt.status_topic, &config.mqtt.birth_payload);
    for entity in build_entities(&ctx).await? {
        registry.register(entity)?;
    }
    if registry.is_empty() {
        tracing::warn!("No entities enabled, nothing will be exposed");
    }

    let client = RumqttcClient::new(&config.mqtt);
    let mut bridge = Bridge::new(client, registry);
    bridge.start().await.context("failed to start MQTT bridge")?;

    tracing::info!("Entering main loop, press Ctrl+C to exit");
    bridge.run(shutdown_signal()).await?;

    tracing::info!("hostswitch shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
