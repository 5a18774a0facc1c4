//! Message transport to the daemon
//!
//! A [`Connector`] opens one duplex text-message stream. The connection
//! manager only sees the two channel ends, so the WebSocket details stay
//! here and tests can swap in an in-memory peer.

use crate::error::RelayError;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

/// Channel ends of an open transport. Dropping `outbound` closes the
/// socket; `inbound` yields `None` once the peer has gone away.
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens transports to an endpoint
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Transport, RelayError>;
}

/// WebSocket connector used against a real daemon
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &str) -> Result<Transport, RelayError> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| RelayError::ConnectionUnavailable(format!("timed out connecting to {}", endpoint)))?
            .map_err(|e| RelayError::ConnectionUnavailable(e.to_string()))?;

        debug!("WebSocket connected to {}", endpoint);

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket closed by peer: {:?}", frame);
                        break;
                    }
                    Ok(other) => {
                        trace!("Ignoring control frame: {:?}", other);
                        continue;
                    }
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                };

                if in_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(Transport {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Daemon side of an in-memory transport
    pub struct FakePeer {
        pub received: mpsc::UnboundedReceiver<String>,
        pub push: mpsc::UnboundedSender<String>,
    }

    impl FakePeer {
        /// Next frame the manager wrote, as JSON
        pub async fn next_frame(&mut self) -> serde_json::Value {
            let text = self.received.recv().await.expect("transport closed");
            serde_json::from_str(&text).expect("frame is JSON")
        }

        pub fn try_next_frame(&mut self) -> Option<serde_json::Value> {
            self.received
                .try_recv()
                .ok()
                .map(|text| serde_json::from_str(&text).expect("frame is JSON"))
        }
    }

    #[derive(Default)]
    pub struct FakeConnector {
        pub opens: AtomicUsize,
        pub fail: AtomicBool,
        pub delay: Mutex<Option<Duration>>,
        peers: Mutex<Vec<FakePeer>>,
    }

    impl FakeConnector {
        pub fn with_delay(delay: Duration) -> Self {
            let connector = Self::default();
            *connector.delay.lock().unwrap() = Some(delay);
            connector
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        /// Oldest peer not yet taken
        pub fn take_peer(&self) -> FakePeer {
            self.peers.lock().unwrap().remove(0)
        }
    }

    #[async_trait::async_trait]
    impl Connector for FakeConnector {
        async fn open(&self, _endpoint: &str) -> Result<Transport, RelayError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(RelayError::ConnectionUnavailable("connection refused".into()));
            }

            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.peers.lock().unwrap().push(FakePeer {
                received: out_rx,
                push: in_tx,
            });

            Ok(Transport {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}
