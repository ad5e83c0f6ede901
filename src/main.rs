//! LiteKV - A Small In-Memory Key-Value Server
//!
//! This is the main entry point for the LiteKV server.
//! It parses flags, sets up logging, recovers the snapshot and serves
//! connections until Ctrl+C.

use anyhow::Context;
use litekv::commands::Router;
use litekv::persistence::disk;
use litekv::server::Server;
use litekv::storage::{start_expiry_sweeper, Store};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Directory holding the snapshot file
    dir: PathBuf,
    /// Skip reading the snapshot at startup
    no_load: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: litekv::DEFAULT_HOST.to_string(),
            port: litekv::DEFAULT_PORT,
            dir: PathBuf::from(disk::DEFAULT_DIR),
            no_load: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    config.host = required_value(&args, i, "--host").to_string();
                    i += 2;
                }
                "--port" | "-p" => {
                    config.port = required_value(&args, i, "--port")
                        .parse()
                        .unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                    i += 2;
                }
                "--dir" | "-d" => {
                    config.dir = PathBuf::from(required_value(&args, i, "--dir"));
                    i += 2;
                }
                "--no-load" => {
                    config.no_load = true;
                    i += 1;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("LiteKV version {}", litekv::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn required_value<'a>(args: &'a [String], i: usize, flag: &str) -> &'a str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {flag} requires a value");
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"
LiteKV - A Small In-Memory Key-Value Server

USAGE:
    litekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>    Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>    Port to listen on (default: 6379)
    -d, --dir <DIR>      Snapshot directory (default: data)
        --no-load        Start empty instead of loading <DIR>/data.rdb
    -v, --version        Print version information
        --help           Print this help message

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=litekv=debug

CONNECTING:
    $ redis-cli -p 6379
    127.0.0.1:6379> SET greeting hello PX 5000
    OK
    127.0.0.1:6379> GET greeting
    "hello"
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!(version = litekv::VERSION, "Starting LiteKV");

    let store = Arc::new(Store::with_snapshot_path(disk::snapshot_path(&config.dir)));
    if config.no_load {
        info!("Snapshot loading disabled, starting empty");
    } else {
        store.load_from_disk().with_context(|| {
            format!(
                "failed to load snapshot from {}",
                store.snapshot_path().display()
            )
        })?;
    }

    let sweeper = start_expiry_sweeper(Arc::clone(&store));

    let server = Server::bind(config.bind_address(), Router::new(Arc::clone(&store)))
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, stopping server..."),
        }
    };

    server.serve(shutdown).await;
    sweeper.stop();

    info!("Server shutdown complete");
    Ok(())
}
