//! channel-pipe server binary
//!
//! Configuration via CLI arguments or TOML file.

use channel_pipe::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let stages: Vec<String> = config.stages.iter().map(|s| s.to_string()).collect();
    info!(
        host = %config.host,
        port = config.port,
        service = ?config.service,
        stages = %stages.join(","),
        workers = config.workers.unwrap_or_else(num_cpus),
        max_connections = config.max_connections,
        "Starting channel-pipe server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    let server = Server::new(config)?;
    runtime.block_on(server.run())?;
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
