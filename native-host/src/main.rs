//! Native Messaging Host - bridge between the browser extension and the relay
//!
//! The extension talks native messaging on stdin/stdout (4-byte native-endian
//! length prefix, then JSON). Each message is re-serialized compactly and
//! forwarded to the relay's Unix socket as one JSON line, and the relay's
//! answer line goes back the same way. Logs go to stderr; stdout carries the protocol.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SOCKET_PATH: &str = "/tmp/gdownloader-relay.sock";
const SOCKET_ENV: &str = "GDL_RELAY_SOCKET";
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

/// Browsers reject host messages above 1 MiB
const MAX_OUTGOING: usize = 1024 * 1024;

/// Largest message a browser sends to a host
const MAX_INCOMING: usize = 64 * 1024 * 1024;

fn socket_path() -> PathBuf {
    std::env::var_os(SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

/// Read one native messaging frame; `None` at end of input
fn read_message<R: Read>(input: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut length_bytes = [0u8; 4];

    match input.read_exact(&mut length_bytes) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let length = u32::from_ne_bytes(length_bytes) as usize;
    if length == 0 {
        return Ok(None);
    }
    if length > MAX_INCOMING {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("incoming message of {} bytes exceeds the native messaging limit", length),
        ));
    }

    let mut message = vec![0u8; length];
    input.read_exact(&mut message)?;

    Ok(Some(message))
}

/// Write one native messaging frame
fn write_message<W: Write>(output: &mut W, message: &[u8]) -> io::Result<()> {
    if message.len() > MAX_OUTGOING {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response of {} bytes exceeds the native messaging limit", message.len()),
        ));
    }

    output.write_all(&(message.len() as u32).to_ne_bytes())?;
    output.write_all(message)?;
    output.flush()
}

/// Forward one message to the relay and return its response line
fn forward_to_relay<S: Read + Write>(stream: S, message: &[u8]) -> io::Result<Vec<u8>> {
    let mut reader = BufReader::new(stream);

    let stream = reader.get_mut();
    stream.write_all(message)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut response = Vec::new();
    if reader.read_until(b'\n', &mut response)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "relay closed the connection without answering",
        ));
    }
    if response.last() == Some(&b'\n') {
        response.pop();
    }

    Ok(response)
}

fn connect(path: &Path) -> io::Result<UnixStream> {
    let stream = UnixStream::connect(path)?;
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
    Ok(stream)
}

/// Response in the relay's shape for failures on this side
fn error_response(message: &str) -> Vec<u8> {
    serde_json::json!({
        "success": false,
        "error": message,
    })
    .to_string()
    .into_bytes()
}

fn handle(path: &Path, message: &[u8]) -> Vec<u8> {
    // The relay reads one message per line, so never forward raw newlines
    let line = match serde_json::from_slice::<serde_json::Value>(message)
        .and_then(|value| serde_json::to_vec(&value))
    {
        Ok(line) => line,
        Err(e) => {
            warn!("Extension sent invalid JSON: {}", e);
            return error_response(&format!("Invalid message: {}", e));
        }
    };

    match connect(path).and_then(|stream| forward_to_relay(stream, &line)) {
        Ok(response) => {
            debug!("Relay response: {} bytes", response.len());
            response
        }
        Err(e) => {
            error!("Relay error: {}", e);
            error_response(&format!("Relay unavailable: {}", e))
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let path = socket_path();
    info!("Native host started, relaying to {:?}", path);

    let mut stdin = io::stdin().lock();
    loop {
        match read_message(&mut stdin) {
            Ok(Some(message)) => {
                debug!("Received {} bytes from extension", message.len());
                let response = handle(&path, &message);

                if let Err(e) = write_message(&mut io::stdout().lock(), &response) {
                    error!("Failed to write response: {}", e);
                    break;
                }
            }
            Ok(None) => {
                info!("Extension closed the connection");
                break;
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }
}
