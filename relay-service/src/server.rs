//! Unix socket server for inter-context messages
//!
//! Each connection carries newline-delimited JSON: one [`RelayMessage`] per
//! line in, one [`RelayResponse`] per line out.

use crate::config::{SettingsOverrides, SettingsStore};
use crate::connection::ConnectionManager;
use crate::cookies::{ConfiguredCookieFile, CookieStore};
use crate::dispatcher::Dispatcher;
use crate::message::{RelayMessage, RelayResponse};
use crate::notify::{Notifier, TracingNotifier};
use crate::takeover::{ActionRecorder, InterceptOutcome, Takeover};
use crate::transport::{Connector, WebSocketConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Shared state behind every connection
struct RelayState {
    settings: Arc<SettingsStore>,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<Dispatcher>,
    takeover: Takeover,
}

/// Relay server that listens on a Unix socket
pub struct RelayServer {
    socket_path: PathBuf,
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create a server with explicit collaborators
    pub fn new(
        settings: Arc<SettingsStore>,
        connector: Arc<dyn Connector>,
        cookies: Arc<dyn CookieStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let current = settings.get();
        let connection = ConnectionManager::new(&current.server_url, connector);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&connection),
            Arc::clone(&settings),
            cookies,
            notifier,
        ));
        let takeover = Takeover::new(Arc::clone(&dispatcher), Arc::clone(&settings));

        Self {
            socket_path: current.socket_path,
            state: Arc::new(RelayState {
                settings,
                connection,
                dispatcher,
                takeover,
            }),
        }
    }

    /// WebSocket transport, cookies from the configured file, log notifications
    pub fn with_settings(settings: Arc<SettingsStore>) -> Self {
        let cookies = Arc::new(ConfiguredCookieFile::new(Arc::clone(&settings)));
        Self::new(
            settings,
            Arc::new(WebSocketConnector::default()),
            cookies,
            Arc::new(TracingNotifier),
        )
    }

    /// Listen somewhere other than `Settings.socket_path`
    pub fn with_socket_path(mut self, socket_path: PathBuf) -> Self {
        self.socket_path = socket_path;
        self
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.state.connection
    }

    /// Start background tasks and serve connections until cancelled
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        // Remove existing socket file if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("Relay server listening on {:?}", self.socket_path);

        let _background = BackgroundTasks(vec![
            self.state.dispatcher.spawn_event_relay(),
            spawn_settings_watcher(Arc::clone(&self.state)),
        ]);

        if let Err(e) = self.state.connection.connect().await {
            warn!("Daemon not reachable yet: {}", e);
        }

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }

    /// Process a single message (for direct integration without socket)
    pub async fn process(&self, message: RelayMessage) -> RelayResponse {
        process_message(&self.state, message).await
    }

    pub fn shutdown(&self) {
        self.state.connection.shutdown();
    }
}

/// Aborts its tasks when dropped
struct BackgroundTasks(Vec<JoinHandle<()>>);

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Point the connection at a new endpoint when the server URL changes.
/// Compared against the endpoint last applied: the watch channel coalesces
/// writes that land before this task wakes.
fn spawn_settings_watcher(state: Arc<RelayState>) -> JoinHandle<()> {
    let mut rx = state.settings.subscribe();
    let mut applied = state.connection.status().endpoint;
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let server_url = rx.borrow_and_update().settings.server_url.clone();
            if server_url == applied {
                continue;
            }

            debug!("Server URL changed: {} -> {}", applied, server_url);
            state.connection.set_endpoint(&server_url);
            applied = server_url;
            if let Err(e) = state.connection.reconnect_now().await {
                warn!("Reconnect to new endpoint failed: {}", e);
            }
        }
    })
}

/// Handle a single client connection
async fn handle_connection(
    stream: UnixStream,
    state: Arc<RelayState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Read one JSON message per line
    while reader.read_line(&mut line).await? > 0 {
        if line.trim().is_empty() {
            line.clear();
            continue;
        }

        let response = match serde_json::from_str::<RelayMessage>(&line) {
            Ok(message) => {
                debug!("Received {}", message.kind());
                process_message(&state, message).await
            }
            Err(e) => {
                warn!("Failed to parse message: {}", e);
                RelayResponse::error(&format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn process_message(state: &RelayState, message: RelayMessage) -> RelayResponse {
    match message {
        RelayMessage::DownloadResource { resource } => {
            match state.dispatcher.dispatch(&resource).await {
                Ok(_) => RelayResponse::ok("Download task added"),
                Err(e) => {
                    warn!("Download request failed: {}", e);
                    RelayResponse::error(&e.to_string())
                }
            }
        }

        RelayMessage::DownloadIntercept { download } => {
            let recorder = ActionRecorder::default();
            let outcome = state.takeover.intercept(&download, &recorder).await;
            let taken_over = outcome == InterceptOutcome::TakenOver;
            let mut response = RelayResponse::intercepted(taken_over, recorder.into_actions());
            if let InterceptOutcome::FailedOpen(reason) = outcome {
                response.error = Some(reason);
            }
            response
        }

        RelayMessage::DownloadFinished { id } => {
            let recorder = ActionRecorder::default();
            state.takeover.finished(id, &recorder).await;
            RelayResponse {
                success: true,
                actions: recorder.into_actions(),
                ..Default::default()
            }
        }

        RelayMessage::ConnectionStatus => {
            let api_key = state.settings.get().api_key;
            match state.connection.probe_version(&api_key).await {
                Ok(version) => RelayResponse::ok(&format!("Connected to aria2 {}", version.version)),
                Err(e) => RelayResponse::error(&format!("Connection check failed: {}", e)),
            }
        }

        RelayMessage::Reconnect => match state.connection.reconnect_now().await {
            Ok(()) => RelayResponse::ok("Reconnected"),
            Err(e) => RelayResponse::error(&e.to_string()),
        },

        RelayMessage::ToggleSniffing => {
            let enabled = !state.settings.get().enable_sniffing;
            let overrides = SettingsOverrides {
                enable_sniffing: Some(enabled),
                ..Default::default()
            };
            match state.settings.set(&overrides) {
                Ok(_) => RelayResponse::with_settings(state.settings.get()),
                Err(e) => RelayResponse::error(&e.to_string()),
            }
        }

        RelayMessage::GetSettings => RelayResponse::with_settings(state.settings.get()),

        RelayMessage::UpdateSettings { settings } => match state.settings.set(&settings) {
            Ok(_) => RelayResponse::with_settings(state.settings.get()),
            Err(e) => {
                warn!("Rejected settings update: {}", e);
                RelayResponse::error(&e.to_string())
            }
        },

        RelayMessage::ResetSettings => match state.settings.reset() {
            Ok(_) => RelayResponse::with_settings(state.settings.get()),
            Err(e) => RelayResponse::error(&e.to_string()),
        },
    }
}
