use std::path::PathBuf;

use ::tracing::error;
use clap::Parser;
use service::Service;

mod config;
mod http_objects;
mod middleware;
mod routes;
mod service;
mod tracing;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => match config::ServerConfig::from_path(path.to_str().unwrap()) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("invalid config: {err:?}");
                return;
            }
        },
        None => config::ServerConfig::default(),
    };

    if let Err(err) = setup_tracing(&config) {
        eprintln!("error setting up tracing: {err:?}");
        return;
    }

    if let Err(err) = config.validate() {
        error!("invalid configuration: {err:?}");
        return;
    }

    let service = match Service::new(config).await {
        Ok(service) => service,
        Err(err) => {
            error!("error creating service: {err:?}");
            return;
        }
    };
    if let Err(err) = service.start().await {
        error!("error starting service: {err:?}");
    }
}
