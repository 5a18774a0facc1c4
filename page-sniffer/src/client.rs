//! Client for the relay's inter-context socket

use crate::session::PageEvent;
use crate::types::{Resource, SnifferError};
use relay_service::{RelayMessage, RelayResponse, Settings};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where detected resources go
#[async_trait::async_trait]
pub trait ResourceSink: Send + Sync {
    /// Hand a resource over for download; returns the confirmation message
    async fn download(&self, resource: &Resource, user_agent: Option<&str>) -> Result<String, SnifferError>;
}

/// Talks to the relay over its Unix socket, one request per connection
#[derive(Debug, Clone)]
pub struct RelayClient {
    socket_path: PathBuf,
}

impl RelayClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one message and wait for its response line
    pub async fn request(&self, message: &RelayMessage) -> Result<RelayResponse, SnifferError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        debug!("Sent {} to relay", message.kind());

        let mut reader = BufReader::new(reader);
        let mut response = String::new();
        if reader.read_line(&mut response).await? == 0 {
            return Err(SnifferError::NoResponse);
        }
        Ok(serde_json::from_str(&response)?)
    }

    /// Current settings from the relay
    pub async fn settings(&self) -> Result<Settings, SnifferError> {
        let response = self.request(&RelayMessage::GetSettings).await?;
        match (response.success, response.settings) {
            (true, Some(settings)) => Ok(settings),
            _ => Err(SnifferError::Rejected(
                response.error.unwrap_or_else(|| "no settings in response".to_string()),
            )),
        }
    }
}

/// Poll the relay's settings and feed changes into a session as
/// `settings` events, so toggles made through the relay reach a running
/// sniffer. Stops when the event receiver goes away.
pub fn spawn_settings_poll(
    client: RelayClient,
    mut current: Settings,
    period: Duration,
    events: mpsc::Sender<PageEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let settings = match client.settings().await {
                Ok(settings) => settings,
                Err(e) => {
                    debug!("Settings poll failed: {}", e);
                    continue;
                }
            };
            if settings == current {
                continue;
            }

            current = settings.clone();
            if events.send(PageEvent::Settings { settings }).await.is_err() {
                break;
            }
        }
    })
}

#[async_trait::async_trait]
impl ResourceSink for RelayClient {
    async fn download(&self, resource: &Resource, user_agent: Option<&str>) -> Result<String, SnifferError> {
        let message = RelayMessage::DownloadResource {
            resource: resource.to_request(user_agent),
        };
        let response = self.request(&message).await?;

        if response.success {
            let message = response.message.unwrap_or_default();
            info!("Relay accepted {}: {}", resource.url, message);
            Ok(message)
        } else {
            let error = response.error.unwrap_or_else(|| "unknown error".to_string());
            warn!("Relay rejected {}: {}", resource.url, error);
            Err(SnifferError::Rejected(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementKey, ResourceKind};
    use tokio::net::UnixListener;

    /// Answer one connection with a canned response, returning the request
    async fn serve_once(listener: UnixListener, reply: &'static str) -> serde_json::Value {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        writer.write_all(reply.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    fn resource() -> Resource {
        Resource {
            url: "http://x/a.zip".to_string(),
            element: ElementKey(1),
            filename: "a.zip".to_string(),
            kind: ResourceKind::Archive,
            page_url: "http://x/".to_string(),
            referrer: "http://x/".to_string(),
        }
    }

    #[tokio::test]
    async fn test_download_sends_resource_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            r#"{"success":true,"message":"Download task added"}"#,
        ));

        let client = RelayClient::new(&path);
        let message = client.download(&resource(), Some("UA/1")).await.unwrap();
        assert_eq!(message, "Download task added");

        let request = server.await.unwrap();
        assert_eq!(request["type"], "DOWNLOAD_RESOURCE");
        assert_eq!(request["resource"]["url"], "http://x/a.zip");
        assert_eq!(request["resource"]["pageUrl"], "http://x/");
        assert_eq!(request["resource"]["userAgent"], "UA/1");
    }

    #[tokio::test]
    async fn test_download_surfaces_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = tokio::spawn(serve_once(
            listener,
            r#"{"success":false,"error":"Connection to the download daemon is unavailable: refused"}"#,
        ));

        let result = RelayClient::new(&path).download(&resource(), None).await;
        assert!(matches!(result, Err(SnifferError::Rejected(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_poll_forwards_changes_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let toggled = Settings {
            enable_sniffing: false,
            ..Settings::default()
        };
        let reply = serde_json::to_string(&RelayResponse::with_settings(toggled.clone())).unwrap();
        let relay = tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let (reader, mut writer) = stream.into_split();
                let mut line = String::new();
                BufReader::new(reader).read_line(&mut line).await.unwrap();
                writer.write_all(reply.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
        });

        let (tx, mut rx) = mpsc::channel(4);
        let poll = spawn_settings_poll(
            RelayClient::new(&path),
            Settings::default(),
            Duration::from_millis(10),
            tx,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event, PageEvent::Settings { settings: toggled });

        // Unchanged settings are not re-sent
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        poll.abort();
        relay.abort();
    }

    #[tokio::test]
    async fn test_missing_socket_is_io_error() {
        let result = RelayClient::new("/nonexistent/relay.sock")
            .request(&RelayMessage::GetSettings)
            .await;
        assert!(matches!(result, Err(SnifferError::Io(_))));
    }
}
