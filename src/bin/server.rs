// bin/server.rs
use std::process::exit;

use chatd::{Config, Supervisor};
use clap::Parser;

/// Command-line overrides layered on top of environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-user chat server", long_about = None)]
struct Args {
    /// Override HOST
    #[arg(long)]
    host: Option<String>,

    /// Override PORT
    #[arg(long)]
    port: Option<u16>,

    /// Override the worker pool size (max concurrent sessions)
    #[arg(long)]
    pool_size: Option<usize>,
}

fn main() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut config = Config::load();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }

    let supervisor = Supervisor::new(config);
    let shutdown = supervisor.shutdown_handle();

    ctrlc::set_handler(move || {
        log::info!("received SIGINT, shutting down...");
        shutdown.stop();
    })
    .expect("failed to install SIGINT handler");

    if let Err(e) = supervisor.run() {
        log::error!("server encountered a fatal error: {e}");
        exit(1);
    }
}
