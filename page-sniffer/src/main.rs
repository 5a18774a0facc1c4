//! Page Sniffer - command line entry point
//!
//! ```bash
//! # List downloadable resources in a saved page
//! page-sniffer scan page.html --url https://example.com/files/
//!
//! # Same, and hand every resource to the relay
//! page-sniffer scan - --url https://example.com/ --send < page.html
//!
//! # Drive a live session: page events in on stdin, outputs on stdout
//! page-sniffer watch
//! ```

use page_sniffer::client::spawn_settings_poll;
use page_sniffer::session::{self, PageEvent, SnifferOutput, SnifferSession};
use page_sniffer::{DetectorConfig, PageContext, RelayClient, ResourceDetector, ResourceSink};
use relay_service::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often `watch` re-reads settings from the relay
const SETTINGS_POLL: Duration = Duration::from_secs(2);

enum Mode {
    Scan,
    Watch,
}

struct Args {
    mode: Mode,
    input: Option<String>,
    page_url: Option<String>,
    referrer: Option<String>,
    file_types: Option<String>,
    send: bool,
    socket_path: Option<PathBuf>,
}

/// Parse command line arguments
fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        mode: Mode::Scan,
        input: None,
        page_url: None,
        referrer: None,
        file_types: None,
        send: false,
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
                println!("GDownloader page sniffer v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "scan" if i == 1 => parsed.mode = Mode::Scan,
            "watch" if i == 1 => parsed.mode = Mode::Watch,
            "--url" | "-u" => {
                i += 1;
                if i < args.len() {
                    parsed.page_url = Some(args[i].clone());
                }
            }
            "--referrer" => {
                i += 1;
                if i < args.len() {
                    parsed.referrer = Some(args[i].clone());
                }
            }
            "--file-types" => {
                i += 1;
                if i < args.len() {
                    parsed.file_types = Some(args[i].clone());
                }
            }
            "--send" => {
                parsed.send = true;
            }
            "--socket" => {
                i += 1;
                if i < args.len() {
                    parsed.socket_path = Some(PathBuf::from(&args[i]));
                }
            }
            arg if !arg.starts_with('-') || arg == "-" => {
                parsed.input = Some(arg.to_string());
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
        r#"GDownloader page sniffer - finds downloadable resources in page markup

USAGE:
    page-sniffer scan <FILE|-> --url <PAGE_URL> [OPTIONS]
    page-sniffer watch [OPTIONS]

OPTIONS:
    -h, --help              Show this help message
    -v, --version           Show version
    -u, --url <URL>         Page URL used to resolve relative links (scan)
    --referrer <URL>        Document referrer (scan)
    --file-types <LIST>     Comma-separated extensions, overrides settings
    --send                  Dispatch every detected resource to the relay (scan)
    --socket <PATH>         Relay socket path (default: from settings)

WATCH MODE:
    Reads page events as JSON lines on stdin, e.g.
        {{"event":"load","url":"https://x/","html":"<a href=\"/a.zip\">a</a>"}}
        {{"event":"hover_enter","element":4294967296,"rect":{{"x":0,"y":0,"width":40,"height":12}}}}
        {{"event":"button_click","url":"https://x/a.zip"}}
    and writes outputs as JSON lines on stdout. Settings are re-read from
    the relay every 2 seconds, so a sniffing toggle made there rebuilds the
    detector; with --file-types the startup settings are kept and only
    "settings" events change them.

ENVIRONMENT:
    RUST_LOG                Log filter (default: info), logs go to stderr
"#
    );
}

/// Settings from the relay when it is up, else the local settings file
async fn resolve_settings(client: &RelayClient, file_types: Option<String>) -> Settings {
    let mut settings = match client.settings().await {
        Ok(settings) => {
            debug!("Using settings from relay");
            settings
        }
        Err(e) => {
            debug!("Relay settings unavailable ({}), loading local settings", e);
            Settings::load()
        }
    };
    if let Some(file_types) = file_types {
        settings.file_types = file_types;
    }
    settings
}

async fn read_input(input: Option<&str>) -> std::io::Result<String> {
    match input {
        None | Some("-") => {
            let mut html = String::new();
            tokio::io::stdin().read_to_string(&mut html).await?;
            Ok(html)
        }
        Some(path) => tokio::fs::read_to_string(path).await,
    }
}

async fn scan(args: Args, settings: Settings, client: RelayClient) -> Result<(), Box<dyn std::error::Error>> {
    let page_url = args.page_url.ok_or("scan needs --url <PAGE_URL>")?;
    let html = read_input(args.input.as_deref()).await?;

    let page = PageContext::new(&page_url)?.with_referrer(args.referrer);
    let user_agent = Some(settings.user_agent.clone());
    let mut detector = ResourceDetector::new(DetectorConfig::from_settings(&settings), page);
    let result = detector.scan_document(&html);
    info!("Found {} resources on {}", result.added.len(), page_url);

    let mut stdout = tokio::io::stdout();
    for resource in &result.added {
        let mut line = serde_json::to_string(resource)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;

        if args.send {
            if let Err(e) = client.download(resource, user_agent.as_deref()).await {
                warn!("Failed to send {}: {}", resource.url, e);
            }
        }
    }
    stdout.flush().await?;

    Ok(())
}

async fn watch(
    settings: Settings,
    client: RelayClient,
    follow_relay: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (event_tx, event_rx) = mpsc::channel::<PageEvent>(100);
    let (output_tx, mut output_rx) = mpsc::channel::<SnifferOutput>(100);

    let poll = follow_relay.then(|| {
        spawn_settings_poll(client.clone(), settings.clone(), SETTINGS_POLL, event_tx.clone())
    });

    // Page events from stdin
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PageEvent>(&line) {
                Ok(event) => {
                    if event_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring malformed page event: {}", e),
            }
        }
    });

    // The session ends once stdin closes and the poll lets go of its sender
    tokio::spawn(async move {
        let _ = reader.await;
        if let Some(poll) = poll {
            poll.abort();
        }
    });

    let sink: Arc<dyn ResourceSink> = Arc::new(client);
    let runner = tokio::spawn(session::run(
        SnifferSession::new(settings),
        event_rx,
        sink,
        output_tx,
    ));

    let mut stdout = tokio::io::stdout();
    while let Some(output) = output_rx.recv().await {
        let mut line = serde_json::to_string(&output)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }

    runner.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging; stdout carries results
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = parse_args();
    let socket_path = args
        .socket_path
        .clone()
        .unwrap_or_else(|| Settings::load().socket_path);
    let client = RelayClient::new(socket_path);
    let settings = resolve_settings(&client, args.file_types.clone()).await;

    match args.mode {
        Mode::Scan => scan(args, settings, client).await,
        Mode::Watch => {
            let follow_relay = args.file_types.is_none();
            watch(settings, client, follow_relay).await
        }
    }
}
