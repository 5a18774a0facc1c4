//! Standalone relay server binary
//!
//! Keeps the daemon connection open and serves inter-context messages on a
//! Unix socket.
//!
//! ```bash
//! relay-server
//! relay-server --config ~/gdownloader.toml --socket /tmp/gdl.sock
//! ```

use relay_service::{RelayServer, Settings, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    config_path: PathBuf,
    socket_path: Option<PathBuf>,
}

/// Parse command line arguments
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: Settings::default_config_path(),
        socket_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("GDownloader relay v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    parsed.config_path = PathBuf::from(&args[i]);
                }
            }
            "--socket" => {
                i += 1;
                if i < args.len() {
                    parsed.socket_path = Some(PathBuf::from(&args[i]));
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                eprintln!("Use --help for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"GDownloader relay - forwards downloads to an aria2 daemon

USAGE:
    relay-server [OPTIONS]

OPTIONS:
    -h, --help              Show this help message
    -v, --version           Show version
    -c, --config <PATH>     Settings file (default: <config dir>/gdownloader/settings.toml)
    --socket <PATH>         Unix socket path (default: /tmp/gdownloader-relay.sock)

ENVIRONMENT:
    RUST_LOG                Log filter (default: info)
"#
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let settings = Arc::new(SettingsStore::open(args.config_path));

    let mut server = RelayServer::with_settings(settings);
    if let Some(socket_path) = args.socket_path {
        server = server.with_socket_path(socket_path);
    }
    info!("Socket: {:?}", server.socket_path());

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    server.shutdown();

    // Clean up socket file
    if server.socket_path().exists() {
        std::fs::remove_file(server.socket_path())?;
    }

    Ok(())
}
