//! Connection manager
//!
//! Owns the single WebSocket connection of a session. A spawned task opens the
//! socket, forwards inbound text frames to subscribers, serves writes, and on
//! close waits a fixed delay before connecting again. There is never more than
//! one pending reconnect: the delay is a step of the task's loop, not a timer
//! armed per close event.
//!
//! Consumers hold a [`Connection`], which stays valid across reconnects. A
//! [`ConnectionHandle`] names one concrete connection; writing through a handle
//! that has since been replaced fails with [`SyncError::NotConnected`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_RECONNECT_DELAY_MS, DEFAULT_SERVER_URL};
use crate::error::{SyncError, SyncResult};

/// Capacity of the inbound event broadcast
const EVENT_CAPACITY: usize = 256;

/// Lifecycle status of the current connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Attempting to connect
    Connecting,
    /// Connected; writes are accepted
    Open,
    /// Closed; a reconnect is scheduled unless the manager was shut down
    Closed,
    /// Transport failure, about to close
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closed => "closed",
            ConnectionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status of the manager, tagged with the connection it describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// Connection attempt counter, starting at 1
    pub generation: u64,
    pub status: ConnectionStatus,
    /// Set once the manager has stopped for good
    pub terminated: bool,
}

/// Identity of one concrete connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub url: String,
    pub generation: u64,
    pub status: ConnectionStatus,
}

impl ConnectionHandle {
    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }
}

/// Events delivered to subscribers, in transport order
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Lifecycle change of the connection with the given generation
    StatusChanged {
        generation: u64,
        status: ConnectionStatus,
    },
    /// Inbound text frame
    Message(String),
    /// The manager has stopped; no further events follow
    Terminated,
}

/// Settings for the connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL
    pub url: String,
    /// Fixed delay between a close and the next attempt
    pub reconnect_delay: Duration,
    /// Upper bound on one connection attempt
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens WebSocket connections for the manager
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Underlying byte stream
    type Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, url: &str) -> Result<WebSocketStream<Self::Socket>, tungstenite::Error>;
}

/// Connector over TCP (and TLS for `wss://`) using tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Socket = MaybeTlsStream<TcpStream>;

    async fn connect(&self, url: &str) -> Result<WebSocketStream<Self::Socket>, tungstenite::Error> {
        let (ws_stream, _response) = connect_async(url).await?;
        Ok(ws_stream)
    }
}

/// Commands sent to the manager task
#[derive(Debug)]
enum Command {
    /// Write a text frame; `generation` pins the write to one connection
    Send {
        generation: Option<u64>,
        text: String,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    /// Stop the manager
    Shutdown,
}

/// Why a served connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Peer closed the socket
    Closed,
    /// Transport error
    Failed,
    /// Shutdown requested
    Shutdown,
}

/// Shared, cloneable access to the session's connection
#[derive(Clone)]
pub struct Connection {
    url: String,
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl Connection {
    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle status
    pub fn status(&self) -> ConnectionStatus {
        self.state_rx.borrow().status
    }

    /// Full state including the generation
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Handle naming the current connection
    pub fn handle(&self) -> ConnectionHandle {
        let state = self.state();
        ConnectionHandle {
            url: self.url.clone(),
            generation: state.generation,
            status: state.status,
        }
    }

    /// Watch status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to status changes and inbound frames
    ///
    /// Events published before the call are not replayed. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Write a text frame on whichever connection is currently open
    pub async fn send_text(&self, text: String) -> SyncResult<()> {
        if self.status() != ConnectionStatus::Open {
            return Err(SyncError::NotConnected);
        }
        self.dispatch(None, text).await
    }

    /// Write a text frame only if `handle` still names the live connection
    pub async fn send_on(&self, handle: &ConnectionHandle, text: String) -> SyncResult<()> {
        let state = self.state();
        if state.generation != handle.generation || state.status != ConnectionStatus::Open {
            return Err(SyncError::NotConnected);
        }
        self.dispatch(Some(handle.generation), text).await
    }

    async fn dispatch(&self, generation: Option<u64>, text: String) -> SyncResult<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Send {
                generation,
                text,
                reply,
            })
            .await
            .map_err(|_| SyncError::Shutdown)?;
        reply_rx.await.map_err(|_| SyncError::Shutdown)?
    }

    /// Wait until a connection is open
    pub async fn wait_until_open(&self, timeout: Duration) -> SyncResult<ConnectionHandle> {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|state| state.status == ConnectionStatus::Open || state.terminated);

        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) if !state.terminated => {}
            Ok(_) => return Err(SyncError::Shutdown),
            Err(_) => return Err(SyncError::ConnectTimeout(timeout)),
        }
        Ok(self.handle())
    }

    /// Stop the manager: close the live socket, if any, and stop reconnecting
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.command_tx.send(Command::Shutdown).await.is_err() {
            debug!("Connection manager already stopped");
        }
    }
}

/// Task that owns the socket
pub struct ConnectionManager<C: Connector> {
    config: ConnectionConfig,
    connector: C,
    command_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    generation: u64,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create the manager and the shared connection without starting it
    ///
    /// Lets consumers subscribe before the first status change is published.
    pub fn new(config: ConnectionConfig, connector: C) -> (Self, Connection) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState {
            generation: 0,
            status: ConnectionStatus::Closed,
            terminated: false,
        });
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let connection = Connection {
            url: config.url.clone(),
            command_tx,
            state_rx,
            events_tx: events_tx.clone(),
        };

        let manager = ConnectionManager {
            config,
            connector,
            command_rx,
            state_tx,
            events_tx,
            generation: 0,
        };

        (manager, connection)
    }

    /// Run the manager on the tokio runtime
    ///
    /// The task runs until [`Connection::shutdown`] is called or every
    /// `Connection` clone has been dropped.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Create and start a manager in one step
    pub fn spawn(config: ConnectionConfig, connector: C) -> (Connection, JoinHandle<()>) {
        let (manager, connection) = Self::new(config, connector);
        (connection, manager.start())
    }

    /// Main loop: connect, serve, wait, repeat
    async fn run(mut self) {
        loop {
            self.generation += 1;
            self.set_status(ConnectionStatus::Connecting);
            info!(
                "Connecting to {} (attempt {})",
                self.config.url, self.generation
            );

            let end = match self.open().await {
                Ok(Some(ws_stream)) => {
                    info!("Connected to {}", self.config.url);
                    self.set_status(ConnectionStatus::Open);
                    self.serve(ws_stream).await
                }
                Ok(None) => SessionEnd::Shutdown,
                Err(e) => {
                    warn!("Connection to {} failed: {}", self.config.url, e);
                    SessionEnd::Failed
                }
            };

            if end == SessionEnd::Failed {
                self.set_status(ConnectionStatus::Error);
            }
            self.set_status(ConnectionStatus::Closed);

            if end == SessionEnd::Shutdown || !self.wait_before_reconnect().await {
                break;
            }
        }

        self.state_tx.send_modify(|state| state.terminated = true);
        let _ = self.events_tx.send(ConnectionEvent::Terminated);
        info!("Connection manager for {} stopped", self.config.url);
    }

    /// Connect, still answering commands while the attempt is in flight
    ///
    /// Returns `Ok(None)` when shutdown was requested.
    async fn open(&mut self) -> SyncResult<Option<WebSocketStream<C::Socket>>> {
        let url = self.config.url.clone();
        let timeout = self.config.connect_timeout;
        let connect = tokio::time::timeout(timeout, self.connector.connect(&url));
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok(ws_stream)) => Ok(Some(ws_stream)),
                        Ok(Err(e)) => Err(SyncError::Transport(e)),
                        Err(_) => Err(SyncError::ConnectTimeout(timeout)),
                    };
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(Command::Send { reply, .. }) => reject(reply),
                        Some(Command::Shutdown) | None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Serve one open connection until it ends
    async fn serve(&mut self, ws_stream: WebSocketStream<C::Socket>) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(Command::Send { generation, text, reply }) => {
                            if generation.is_some_and(|g| g != self.generation) {
                                reject(reply);
                            } else {
                                debug!("Sending frame ({} bytes)", text.len());
                                match write.send(Message::Text(text)).await {
                                    Ok(()) => {
                                        let _ = reply.send(Ok(()));
                                    }
                                    Err(e) => {
                                        warn!("Write to {} failed: {}", self.config.url, e);
                                        reject(reply);
                                        return SessionEnd::Failed;
                                    }
                                }
                            }
                        }
                        Some(Command::Shutdown) | None => {
                            write.close().await.ok();
                            return SessionEnd::Shutdown;
                        }
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Received frame ({} bytes)", text.len());
                            let _ = self.events_tx.send(ConnectionEvent::Message(text));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Ignoring binary frame ({} bytes)", data.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Server closed connection: {:?}", frame);
                            return SessionEnd::Closed;
                        }
                        None => {
                            info!("Connection to {} closed", self.config.url);
                            return SessionEnd::Closed;
                        }
                        Some(Err(e)) => {
                            warn!("Connection to {} lost: {}", self.config.url, e);
                            return SessionEnd::Failed;
                        }
                        // Ping/pong is answered by tungstenite
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Sleep for the reconnect delay; returns false if shutdown was requested
    async fn wait_before_reconnect(&mut self) -> bool {
        info!("Reconnecting in {:?}", self.config.reconnect_delay);
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(Command::Send { reply, .. }) => reject(reply),
                        Some(Command::Shutdown) | None => return false,
                    }
                }
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        let generation = self.generation;
        self.state_tx.send_modify(|state| {
            state.generation = generation;
            state.status = status;
        });
        let _ = self
            .events_tx
            .send(ConnectionEvent::StatusChanged { generation, status });
    }
}

fn reject(reply: oneshot::Sender<SyncResult<()>>) {
    let _ = reply.send(Err(SyncError::NotConnected));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{next_text, TestConnector};
    use tokio::time::Instant;

    fn test_config(delay_ms: u64) -> ConnectionConfig {
        ConnectionConfig {
            url: "ws://localhost:5000/ws".to_string(),
            reconnect_delay: Duration::from_millis(delay_ms),
            connect_timeout: Duration::from_secs(10),
        }
    }

    async fn wait_for_generation_open(connection: &Connection, generation: u64) {
        let mut rx = connection.subscribe_status();
        tokio::time::timeout(
            Duration::from_secs(60),
            rx.wait_for(|s| s.generation == generation && s.status == ConnectionStatus::Open),
        )
        .await
        .expect("timed out waiting for open")
        .expect("manager stopped");
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.url, "ws://localhost:5000/ws");
        assert_eq!(config.reconnect_delay, Duration::from_millis(5000));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Open.to_string(), "open");
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_writes() {
        let (connector, mut servers) = TestConnector::new();
        let (connection, task) = ConnectionManager::spawn(test_config(5000), connector);

        let handle = connection
            .wait_until_open(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(handle.generation, 1);
        assert!(handle.is_open());

        let mut server = servers.recv().await.unwrap();
        connection.send_text("hello".to_string()).await.unwrap();
        assert_eq!(next_text(&mut server).await.as_deref(), Some("hello"));

        connection.shutdown().await;
        task.await.unwrap();
        assert!(connection.state().terminated);
        assert_eq!(connection.status(), ConnectionStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay() {
        let (connector, mut servers) = TestConnector::new();
        let attempts = connector.attempts();
        let (connection, task) = ConnectionManager::spawn(test_config(5000), connector);

        wait_for_generation_open(&connection, 1).await;
        let mut server = servers.recv().await.unwrap();

        let closed_at = Instant::now();
        server.close(None).await.unwrap();

        wait_for_generation_open(&connection, 2).await;
        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1] >= closed_at + Duration::from_millis(5000));

        connection.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempts_retry_linearly() {
        let (connector, _servers) = TestConnector::new();
        connector.set_refusing(true);
        let attempts = connector.attempts();
        let (connection, task) = ConnectionManager::spawn(test_config(1000), connector);

        let mut rx = connection.subscribe_status();
        rx.wait_for(|s| s.generation == 4).await.unwrap();

        let attempts = attempts.lock().unwrap().clone();
        assert!(attempts.len() >= 3);
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1000), "retried early: {:?}", gap);
            assert!(gap < Duration::from_millis(1100), "no backoff expected: {:?}", gap);
        }

        connection.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_passes_through_error() {
        let (connector, _servers) = TestConnector::new();
        connector.set_refusing(true);
        let (connection, task) = ConnectionManager::spawn(test_config(1000), connector);

        let mut events = connection.subscribe();
        let mut seen = Vec::new();
        while seen.len() < 3 {
            if let Ok(ConnectionEvent::StatusChanged { status, .. }) = events.recv().await {
                seen.push(status);
            }
        }
        // The first Connecting may be published before we subscribed
        let tail: Vec<_> = seen.iter().skip_while(|s| **s == ConnectionStatus::Connecting).take(2).collect();
        assert_eq!(tail, vec![&ConnectionStatus::Error, &ConnectionStatus::Closed]);

        connection.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_while_disconnected_fails() {
        let (connector, _servers) = TestConnector::new();
        connector.set_refusing(true);
        let (connection, task) = ConnectionManager::spawn(test_config(5000), connector);

        let err = connection.send_text("lost".to_string()).await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));

        let err = connection
            .wait_until_open(Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ConnectTimeout(_)));

        connection.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_cannot_write() {
        let (connector, mut servers) = TestConnector::new();
        let (connection, task) = ConnectionManager::spawn(test_config(100), connector);

        wait_for_generation_open(&connection, 1).await;
        let stale = connection.handle();
        let mut first = servers.recv().await.unwrap();
        first.close(None).await.unwrap();

        wait_for_generation_open(&connection, 2).await;
        let mut second = servers.recv().await.unwrap();

        let err = connection
            .send_on(&stale, "old".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));

        let fresh = connection.handle();
        connection.send_on(&fresh, "new".to_string()).await.unwrap();
        assert_eq!(next_text(&mut second).await.as_deref(), Some("new"));

        connection.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_delivered_in_order() {
        let (connector, mut servers) = TestConnector::new();
        let (connection, task) = ConnectionManager::spawn(test_config(5000), connector);
        let mut events = connection.subscribe();

        wait_for_generation_open(&connection, 1).await;
        let mut server = servers.recv().await.unwrap();
        for n in 0..5 {
            server.send(Message::Text(format!("frame-{}", n))).await.unwrap();
        }

        let mut frames = Vec::new();
        while frames.len() < 5 {
            if let ConnectionEvent::Message(text) = events.recv().await.unwrap() {
                frames.push(text);
            }
        }
        assert_eq!(frames, vec!["frame-0", "frame-1", "frame-2", "frame-3", "frame-4"]);

        connection.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconnecting() {
        let (connector, mut servers) = TestConnector::new();
        let attempts = connector.attempts();
        let (connection, task) = ConnectionManager::spawn(test_config(1000), connector);

        wait_for_generation_open(&connection, 1).await;
        let mut server = servers.recv().await.unwrap();
        server.close(None).await.unwrap();

        let mut rx = connection.subscribe_status();
        rx.wait_for(|s| s.status == ConnectionStatus::Closed).await.unwrap();
        connection.shutdown().await;
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(attempts.lock().unwrap().len(), 1);

        // A second shutdown is harmless
        connection.shutdown().await;
    }
}
