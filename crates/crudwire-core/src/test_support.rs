//! In-memory transport for unit tests
//!
//! Each connect creates a `tokio::io::duplex` pipe, runs the client handshake
//! on one end and hands the accepted server end to the test.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::connection::Connector;

pub(crate) type ServerSocket = WebSocketStream<DuplexStream>;

pub(crate) struct TestConnector {
    attempts: Arc<Mutex<Vec<Instant>>>,
    refusing: Arc<AtomicBool>,
    servers: mpsc::UnboundedSender<ServerSocket>,
}

impl TestConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ServerSocket>) {
        let (servers, servers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            attempts: Arc::new(Mutex::new(Vec::new())),
            refusing: Arc::new(AtomicBool::new(false)),
            servers,
        };
        (connector, servers_rx)
    }

    /// Times at which connect was called
    pub(crate) fn attempts(&self) -> Arc<Mutex<Vec<Instant>>> {
        self.attempts.clone()
    }

    /// Make every attempt fail with "connection refused"
    pub(crate) fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for TestConnector {
    type Socket = DuplexStream;

    async fn connect(&self, url: &str) -> Result<WebSocketStream<DuplexStream>, tungstenite::Error> {
        self.attempts.lock().unwrap().push(Instant::now());

        if self.refusing.load(Ordering::SeqCst) {
            return Err(tungstenite::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let servers = self.servers.clone();
        tokio::spawn(async move {
            if let Ok(server) = tokio_tungstenite::accept_async(server_io).await {
                let _ = servers.send(server);
            }
        });

        let (ws_stream, _response) = tokio_tungstenite::client_async(url, client_io).await?;
        Ok(ws_stream)
    }
}

/// Next text frame received by the server end, skipping control frames
pub(crate) async fn next_text(server: &mut ServerSocket) -> Option<String> {
    while let Some(msg) = server.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}
