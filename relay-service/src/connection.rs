//! Persistent connection to the download daemon
//!
//! One [`ConnectionManager`] owns the only socket to the daemon. It moves
//! through `Disconnected -> Connecting -> Open` and back, reconnects on a
//! fixed delay forever, sends heartbeats while open, correlates responses
//! with waiting callers and broadcasts lifecycle notifications.

use crate::error::{RelayError, Result};
use crate::rpc::{self, DaemonEvent, InboundFrame, RequestId, RpcRequest, RpcResponse, VersionInfo};
use crate::transport::Connector;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Delay before a reconnect attempt
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval between heartbeats while open
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long `call` waits for a correlated response
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Timing knobs, overridable for tests
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Point-in-time view of the connection
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub endpoint: String,
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    pub reconnect_pending: bool,
    pub pending_requests: usize,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

struct Inner {
    endpoint: String,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<String>>,
    pending: HashMap<RequestId, oneshot::Sender<RpcResponse>>,
    reconnect_attempt: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    /// Bumped per transport so a stale reader cannot tear down a newer one
    generation: u64,
    shut_down: bool,
}

enum ConnectStep {
    Ready,
    Wait(watch::Receiver<ConnectionState>),
    Open(String),
}

pub struct ConnectionManager {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<DaemonEvent>,
    connector: Arc<dyn Connector>,
    options: ConnectionOptions,
    next_id: AtomicI64,
}

impl ConnectionManager {
    pub fn new(endpoint: &str, connector: Arc<dyn Connector>) -> Arc<Self> {
        Self::with_options(endpoint, connector, ConnectionOptions::default())
    }

    pub fn with_options(
        endpoint: &str,
        connector: Arc<dyn Connector>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events, _events_rx) = broadcast::channel(64);

        Arc::new(Self {
            inner: Mutex::new(Inner {
                endpoint: endpoint.to_string(),
                state: ConnectionState::Disconnected,
                outbound: None,
                pending: HashMap::new(),
                reconnect_attempt: 0,
                reconnect_timer: None,
                heartbeat: None,
                reader: None,
                last_heartbeat_at: None,
                generation: 0,
                shut_down: false,
            }),
            state_tx,
            events,
            connector,
            options,
            next_id: AtomicI64::new(Utc::now().timestamp_millis()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, inner: &mut Inner, next: ConnectionState) {
        if inner.state != next {
            debug!("Connection state {:?} -> {:?}", inner.state, next);
            inner.state = next;
            self.state_tx.send_replace(next);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn status(&self) -> ConnectionStatus {
        let inner = self.lock();
        ConnectionStatus {
            endpoint: inner.endpoint.clone(),
            state: inner.state,
            reconnect_attempt: inner.reconnect_attempt,
            reconnect_pending: inner.reconnect_timer.is_some(),
            pending_requests: inner.pending.len(),
            last_heartbeat_at: inner.last_heartbeat_at,
        }
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Receive daemon lifecycle notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<DaemonEvent> {
        self.events.subscribe()
    }

    /// Fresh correlation id; monotonic, seeded from the clock
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure the connection is open.
    ///
    /// Returns immediately when already open. Callers arriving while an
    /// attempt is in flight wait for that attempt instead of opening a
    /// second socket.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let step = {
            let mut inner = self.lock();
            if inner.shut_down {
                return Err(RelayError::ConnectionUnavailable("connection manager is shut down".into()));
            }
            match inner.state {
                ConnectionState::Open => ConnectStep::Ready,
                ConnectionState::Connecting => ConnectStep::Wait(self.state_tx.subscribe()),
                ConnectionState::Disconnected => {
                    self.transition(&mut inner, ConnectionState::Connecting);
                    ConnectStep::Open(inner.endpoint.clone())
                }
                ConnectionState::Closing => {
                    return Err(RelayError::ConnectionUnavailable("connection is closing".into()));
                }
            }
        };

        match step {
            ConnectStep::Ready => Ok(()),
            ConnectStep::Wait(mut rx) => {
                let state = rx
                    .wait_for(|state| *state != ConnectionState::Connecting)
                    .await
                    .map(|state| *state)
                    .unwrap_or(ConnectionState::Disconnected);
                if state == ConnectionState::Open {
                    Ok(())
                } else {
                    Err(RelayError::ConnectionUnavailable(format!("connection attempt ended {:?}", state)))
                }
            }
            ConnectStep::Open(endpoint) => self.open_transport(endpoint).await,
        }
    }

    async fn open_transport(self: &Arc<Self>, endpoint: String) -> Result<()> {
        info!("Connecting to download daemon at {}", endpoint);
        let opened = self.connector.open(&endpoint).await;

        let mut inner = self.lock();
        match opened {
            Ok(transport) => {
                if inner.shut_down {
                    self.transition(&mut inner, ConnectionState::Disconnected);
                    return Err(RelayError::ConnectionUnavailable("connection manager is shut down".into()));
                }

                inner.generation += 1;
                let generation = inner.generation;
                inner.outbound = Some(transport.outbound);
                inner.reconnect_attempt = 0;
                if let Some(timer) = inner.reconnect_timer.take() {
                    timer.abort();
                }
                self.transition(&mut inner, ConnectionState::Open);

                let weak = Arc::downgrade(self);
                inner.reader = Some(tokio::spawn(read_loop(weak.clone(), generation, transport.inbound)));
                inner.heartbeat = Some(tokio::spawn(heartbeat_loop(
                    weak,
                    generation,
                    self.options.heartbeat_interval,
                )));

                info!("Connected to download daemon at {}", endpoint);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", endpoint, e);
                self.transition(&mut inner, ConnectionState::Disconnected);
                self.schedule_reconnect(&mut inner);
                Err(e)
            }
        }
    }

    /// Arm the reconnect timer unless one is already pending
    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) {
        if inner.shut_down || inner.reconnect_timer.is_some() {
            return;
        }

        inner.reconnect_attempt += 1;
        let delay = self.options.reconnect_delay;
        info!(
            "Reconnecting in {:?} (attempt {})",
            delay, inner.reconnect_attempt
        );

        let weak = Arc::downgrade(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(manager) = weak.upgrade() else {
                return;
            };
            manager.lock().reconnect_timer = None;
            if let Err(e) = manager.connect().await {
                debug!("Reconnect attempt failed: {}", e);
            }
        }));
    }

    /// Write a request without waiting for its response
    pub fn send(&self, request: &RpcRequest) -> Result<()> {
        let text = request.to_json()?;
        let inner = self.lock();
        write_frame(&inner, text)?;
        debug!("Sent {} (id {})", request.method, request.id);
        Ok(())
    }

    /// Send a request and wait for the correlated response
    pub async fn call(&self, request: RpcRequest) -> Result<Value> {
        let text = request.to_json()?;
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut inner = self.lock();
            inner.pending.insert(id.clone(), tx);
            if let Err(e) = write_frame(&inner, text) {
                inner.pending.remove(&id);
                return Err(e);
            }
        }
        debug!("Sent {} (id {}), awaiting response", request.method, id);

        match tokio::time::timeout(self.options.request_timeout, rx).await {
            Err(_) => {
                self.lock().pending.remove(&id);
                Err(RelayError::Timeout)
            }
            Ok(Err(_)) => Err(RelayError::ConnectionUnavailable(
                "connection closed before the daemon answered".into(),
            )),
            Ok(Ok(response)) => response.outcome.map_err(|e| RelayError::Daemon(e.message)),
        }
    }

    /// Connect if needed and ask the daemon for its version
    pub async fn probe_version(self: &Arc<Self>, api_key: &str) -> Result<VersionInfo> {
        self.connect().await?;
        let result = self.call(rpc::get_version(self.next_id(), api_key)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Point at a new endpoint; takes effect on the next connect
    pub fn set_endpoint(&self, endpoint: &str) {
        let mut inner = self.lock();
        if inner.endpoint != endpoint {
            info!("Daemon endpoint changed to {}", endpoint);
            inner.endpoint = endpoint.to_string();
        }
    }

    /// Drop the current transport and connect again right away
    pub async fn reconnect_now(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Connecting {
                self.teardown(&mut inner);
                if let Some(timer) = inner.reconnect_timer.take() {
                    timer.abort();
                }
                self.transition(&mut inner, ConnectionState::Disconnected);
            }
        }
        self.connect().await
    }

    /// Close the connection and stop reconnecting
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.shut_down {
            return;
        }
        info!("Shutting down daemon connection");
        inner.shut_down = true;
        self.transition(&mut inner, ConnectionState::Closing);
        self.teardown(&mut inner);
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        self.transition(&mut inner, ConnectionState::Disconnected);
    }

    /// Release the live transport. Dropping the pending senders fails
    /// every in-flight `call`.
    fn teardown(&self, inner: &mut Inner) {
        inner.generation += 1;
        inner.outbound = None;
        inner.pending.clear();
        if let Some(heartbeat) = inner.heartbeat.take() {
            heartbeat.abort();
        }
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame = match rpc::parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping inbound frame: {}", e);
                return;
            }
        };

        match frame {
            InboundFrame::Event(event) => {
                debug!("Daemon event {:?} (gid {:?})", event.kind, event.gid);
                // No subscribers is fine
                let _ = self.events.send(event);
            }
            InboundFrame::Unhandled(method) => {
                trace!("Ignoring notification {}", method);
            }
            InboundFrame::Response(response) => {
                if response.id.is_heartbeat() {
                    trace!("Heartbeat acknowledged");
                    return;
                }
                let waiter = self.lock().pending.remove(&response.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!("No waiter for response id {}, dropping", response.id),
                }
            }
        }
    }

    fn on_transport_closed(self: &Arc<Self>, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Open {
            return;
        }

        warn!("Connection to download daemon lost");
        inner.reader = None;
        self.teardown(&mut inner);
        self.transition(&mut inner, ConnectionState::Disconnected);
        self.schedule_reconnect(&mut inner);
    }

    fn send_heartbeat(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != ConnectionState::Open {
            return false;
        }

        let text = match RpcRequest::heartbeat().to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode heartbeat: {}", e);
                return true;
            }
        };
        match write_frame(&inner, text) {
            Ok(()) => {
                trace!("Heartbeat sent");
                inner.last_heartbeat_at = Some(Utc::now());
            }
            Err(e) => debug!("Heartbeat not sent: {}", e),
        }
        true
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        for handle in [
            inner.reconnect_timer.take(),
            inner.heartbeat.take(),
            inner.reader.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

fn write_frame(inner: &Inner, text: String) -> Result<()> {
    if inner.state != ConnectionState::Open {
        return Err(RelayError::ConnectionUnavailable("connection is not open".into()));
    }
    inner
        .outbound
        .as_ref()
        .ok_or_else(|| RelayError::ConnectionUnavailable("no transport".into()))?
        .send(text)
        .map_err(|_| RelayError::ConnectionUnavailable("transport closed".into()))
}

async fn read_loop(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut inbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = inbound.recv().await {
        match manager.upgrade() {
            Some(manager) => manager.handle_frame(&text),
            None => return,
        }
    }

    if let Some(manager) = manager.upgrade() {
        manager.on_transport_closed(generation);
    }
}

async fn heartbeat_loop(manager: Weak<ConnectionManager>, generation: u64, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        interval.tick().await;
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if !manager.send_heartbeat(generation) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::DaemonEventKind;
    use crate::transport::testing::FakeConnector;
    use futures_util::future::join_all;
    use serde_json::json;

    fn manager(connector: &Arc<FakeConnector>) -> Arc<ConnectionManager> {
        ConnectionManager::new("ws://localhost:16888/jsonrpc", connector.clone())
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
            .await
            .expect("state reached in time")
            .expect("state channel open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_opens_one_transport() {
        let connector = Arc::new(FakeConnector::with_delay(Duration::from_millis(50)));
        let manager = manager(&connector);

        let results = join_all((0..8).map(|_| manager.connect())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_open_is_noop() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.status().reconnect_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_arms_single_timer() {
        let connector = Arc::new(FakeConnector::default());
        connector.set_failing(true);
        let manager = manager(&connector);

        assert!(manager.connect().await.is_err());
        assert!(manager.connect().await.is_err());

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.reconnect_pending);
        assert_eq!(status.reconnect_attempt, 1);

        connector.set_failing(false);
        wait_for_state(&manager, ConnectionState::Open).await;

        assert_eq!(connector.open_count(), 3);
        let status = manager.status();
        assert!(!status.reconnect_pending);
        assert_eq!(status.reconnect_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_close_reconnects_after_delay() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        let peer = connector.take_peer();
        drop(peer);
        wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert!(manager.status().reconnect_pending);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(connector.open_count(), 1);

        wait_for_state(&manager, ConnectionState::Open).await;
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_open() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);

        let result = manager.send(&RpcRequest::heartbeat());
        assert!(matches!(result, Err(RelayError::ConnectionUnavailable(_))));
        assert_eq!(connector.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_resolves_matching_response() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();
        let mut peer = connector.take_peer();

        let caller = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .call(rpc::get_version(RequestId::Number(99), "secret"))
                    .await
            })
        };

        let frame = peer.next_frame().await;
        assert_eq!(frame["id"], 99);
        assert_eq!(frame["params"], json!(["token:secret"]));

        // An unknown id and garbage must not disturb the reader
        peer.push.send(r#"{"jsonrpc":"2.0","id":12345,"result":"x"}"#.into()).unwrap();
        peer.push.send("{garbage".into()).unwrap();
        peer.push
            .send(r#"{"jsonrpc":"2.0","id":99,"result":{"version":"1.37.0"}}"#.into())
            .unwrap();

        let result = caller.await.unwrap().unwrap();
        assert_eq!(result["version"], "1.37.0");
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.status().pending_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_surfaces_daemon_error() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();
        let mut peer = connector.take_peer();

        let caller = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.call(rpc::get_version(RequestId::Number(5), "")).await })
        };
        peer.next_frame().await;
        peer.push
            .send(r#"{"jsonrpc":"2.0","id":5,"error":{"code":1,"message":"Unauthorized"}}"#.into())
            .unwrap();

        match caller.await.unwrap() {
            Err(RelayError::Daemon(message)) => assert_eq!(message, "Unauthorized"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();
        let _peer = connector.take_peer();

        let result = manager.call(rpc::get_version(RequestId::Number(1), "")).await;
        assert!(matches!(result, Err(RelayError::Timeout)));
        assert_eq!(manager.status().pending_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_drops_only_in_flight_call() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();
        let mut peer = connector.take_peer();

        let in_flight = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.call(rpc::get_version(RequestId::Number(1), "")).await })
        };
        peer.next_frame().await;
        drop(peer);

        let result = in_flight.await.unwrap();
        assert!(matches!(result, Err(RelayError::ConnectionUnavailable(_))));

        wait_for_state(&manager, ConnectionState::Open).await;
        let mut peer = connector.take_peer();

        let next = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.call(rpc::get_version(RequestId::Number(2), "")).await })
        };
        let frame = peer.next_frame().await;
        assert_eq!(frame["id"], 2);
        peer.push
            .send(r#"{"jsonrpc":"2.0","id":2,"result":{"version":"1.37.0"}}"#.into())
            .unwrap();
        assert!(next.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_sent_while_open() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();
        let mut peer = connector.take_peer();

        tokio::time::sleep(Duration::from_secs(31)).await;
        let frame = peer.next_frame().await;
        assert_eq!(
            frame,
            json!({"jsonrpc": "2.0", "id": "heartbeat", "method": "aria2.getVersion"})
        );
        assert!(manager.status().last_heartbeat_at.is_some());

        // Unanswered heartbeats never force a reconnect
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_are_broadcast() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        let mut events = manager.subscribe_events();
        manager.connect().await.unwrap();
        let peer = connector.take_peer();

        peer.push
            .send(r#"{"jsonrpc":"2.0","method":"aria2.onDownloadStart","params":[{"gid":"g1"}]}"#.into())
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, DaemonEventKind::Started);
        assert_eq!(event.gid.as_deref(), Some("g1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnecting() {
        let connector = Arc::new(FakeConnector::default());
        connector.set_failing(true);
        let manager = manager(&connector);

        assert!(manager.connect().await.is_err());
        manager.shutdown();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.open_count(), 1);
        assert!(manager.connect().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_now_replaces_transport() {
        let connector = Arc::new(FakeConnector::default());
        let manager = manager(&connector);
        manager.connect().await.unwrap();

        manager.reconnect_now().await.unwrap();
        assert_eq!(connector.open_count(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(!manager.status().reconnect_pending);
    }
}
