use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;

mod attributes;
mod beacon;
mod config;
mod discovery;
mod manager;
mod messages;
mod mqtt;
mod registry;
mod scanner;
mod vendors;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config_contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let config: config::AppConfig = toml::de::from_str(&config_contents)?;

    let (mqtt_client, eventloop) = mqtt::MqttClient::new(&config.mqtt);

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no Bluetooth adapters found")?;

    let core = manager::Manager::new(central, mqtt_client, eventloop, &config);
    core.run_loop().await
}
