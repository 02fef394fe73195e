use clap::Parser;
use log::{error, info};
use pcapline::configuration::config::Config;
use pcapline::configuration::types::ConfigOverrides;
use pcapline::network::network_listener::NetworkListener;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pcapline")]
#[command(version = "0.0.2")]
#[command(about = "A TCP relay that records every connection as a pcap capture")]
struct Args {
    config_file: PathBuf,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
                                   pcapline
              passive pcap capture for relayed TCP connections
==============================================================================
"
    );

    let args = Args::parse();

    info!("Importing configuration");
    let mut config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };

    let settings = match config
        .apply_overrides(args.overrides)
        .and_then(|_| config.resolve())
    {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let mut listener = NetworkListener::new(settings);
    if let Err(e) = listener.bind().await {
        error!("Unable to start the listener: {}, exiting...", e);
        std::process::exit(1);
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {:?}", e);
        }
    };

    if let Err(e) = listener.start_listening_until(shutdown).await {
        error!("Error occured in the listener: {}, exiting...", e);
        std::process::exit(1);
    }
    info!("Stopped");
}
