//! ruuvi-bridge - BLE-to-MQTT/HTTP bridge for RuuviTag broadcasts.
//!
//! Run with: `cargo run -p ruuvi-bridge -- --config bridge.toml`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ruuvi_bridge::source::BleSource;
use ruuvi_bridge::{Config, config, sink};
use ruuvi_core::{DeviceRegistry, Publisher, SampleListener};

/// BLE-to-MQTT/HTTP bridge for RuuviTag sensor broadcasts.
#[derive(Parser, Debug)]
#[command(name = "ruuvi-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ruuvi_bridge=info".parse()?)
                .add_directive("ruuvi_core=info".parse()?),
        )
        .init();

    let config_path = args.config.unwrap_or_else(config::default_config_path);
    info!("Loading configuration from {:?}", config_path);
    let config = Config::load_validated(&config_path)?;

    if args.check {
        println!("Configuration is valid");
        return Ok(());
    }

    run_bridge(config).await
}

async fn run_bridge(config: Config) -> anyhow::Result<()> {
    let registry = Arc::new(DeviceRegistry::from_devices(config.registry_devices()));
    info!("Loaded {} known devices", registry.len());

    let listener = SampleListener::new(config.listener_options()).with_resolver(registry);
    let sink = sink::build(&config.sink).await?;
    let publisher = Publisher::new(sink, config.publish_mode());
    let source = BleSource::new(config.scanner.adapter_index);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    let stream = listener.listen(&source, cancel.clone()).await?;
    listener.wait_until_listening(cancel.clone()).await;
    info!("Bridge running");

    publisher.run(stream, cancel).await?;

    let snapshot = listener.metrics().snapshot();
    info!(
        received = snapshot.received,
        accepted = snapshot.accepted,
        skipped_decode = snapshot.skipped_decode,
        skipped_format = snapshot.skipped_format,
        skipped_unknown_device = snapshot.skipped_unknown_device,
        "Bridge stopped"
    );

    Ok(())
}
