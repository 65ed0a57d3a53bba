use std::path::PathBuf;

use clap::Parser;
use log::{LevelFilter, info};

mod config;
mod controller;
mod display;
mod manager;
mod messages;
mod motion;
mod mqtt;
#[cfg(test)]
mod testing;

/// Wakes the display and publishes MQTT occupancy when the PIR sensor sees motion.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    pretty_env_logger::formatted_timed_builder()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .parse_default_env()
        .init();

    let config = config::AppConfig::load(&args.config)?;
    info!(
        "Loaded {}; publishing to {} on {}",
        args.config.display(),
        config.mqtt.state_topic(),
        config.mqtt.host
    );

    manager::Manager::new(config).run_loop().await
}
