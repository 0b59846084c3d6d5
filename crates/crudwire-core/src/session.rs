//! Session composition
//!
//! A [`Session`] wires one connection manager and one synchronizer together
//! from a [`Config`]. Front ends create a session explicitly and pass it (or
//! its clonable parts) to whatever needs the connection.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::connection::{Connection, ConnectionHandle, ConnectionManager, Connector, WsConnector};
use crate::error::SyncResult;
use crate::protocol::Domain;
use crate::sync::Synchronizer;

/// A running client session
pub struct Session {
    connection: Connection,
    synchronizer: Synchronizer,
    manager_task: JoinHandle<()>,
    sync_task: JoinHandle<()>,
}

impl Session {
    /// Start a session over real WebSockets
    pub fn start(config: &Config) -> Self {
        Self::start_with(config, WsConnector)
    }

    /// Start a session with a custom connector
    pub fn start_with<C: Connector>(config: &Config, connector: C) -> Self {
        info!("Starting session for {}", config.server_url);

        let (manager, connection) = ConnectionManager::new(config.connection_config(), connector);
        let synchronizer = Synchronizer::new(connection.clone(), config.sync_options());
        // Subscribe before the first status change can be published
        let sync_task = synchronizer.spawn();
        let manager_task = manager.start();

        Self {
            connection,
            synchronizer,
            manager_task,
            sync_task,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Wait for an open connection
    pub async fn wait_until_open(&self, timeout: Duration) -> SyncResult<ConnectionHandle> {
        self.connection.wait_until_open(timeout).await
    }

    /// Wait for an open connection and a first snapshot of the given collections
    pub async fn wait_until_synced(&self, domains: &[Domain], timeout: Duration) -> SyncResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.connection.wait_until_open(timeout).await?;
        for domain in domains {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            self.synchronizer.wait_for_collection(*domain, remaining).await?;
        }
        Ok(())
    }

    /// Close the connection, stop reconnecting and wait for both tasks
    pub async fn shutdown(mut self) {
        self.connection.shutdown().await;
        if let Err(e) = (&mut self.manager_task).await {
            debug!("Connection manager task ended abnormally: {}", e);
        }
        if let Err(e) = (&mut self.sync_task).await {
            debug!("Synchronizer task ended abnormally: {}", e);
        }
        info!("Session closed");
    }
}

impl Drop for Session {
    // The synchronizer holds a Connection, so neither task ends on its own
    fn drop(&mut self) {
        self.manager_task.abort();
        self.sync_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;
    use crate::sync::SyncEvent;
    use crate::test_support::{next_text, TestConnector};
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    #[tokio::test(start_paused = true)]
    async fn test_session_resyncs_and_waits_for_data() {
        let (connector, mut servers) = TestConnector::new();
        let session = Session::start_with(&Config::default(), connector);
        let mut events = session.synchronizer().subscribe_events();

        session.wait_until_open(Duration::from_secs(5)).await.unwrap();
        let mut server = servers.recv().await.unwrap();
        for expected in ["customer:read-all", "item:read-all"] {
            let sent: serde_json::Value =
                serde_json::from_str(&next_text(&mut server).await.unwrap()).unwrap();
            assert_eq!(sent["action"], expected);
        }

        server
            .send(Message::Text(r#"{"customer":[],"item":[]}"#.to_string()))
            .await
            .unwrap();
        session
            .wait_until_synced(&Domain::ALL, Duration::from_secs(5))
            .await
            .unwrap();

        let mut saw_open = false;
        while let Ok(event) = events.try_recv() {
            if event == SyncEvent::StatusChanged(ConnectionStatus::Open) {
                saw_open = true;
            }
        }
        assert!(saw_open);

        session.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_both_tasks() {
        let (connector, _servers) = TestConnector::new();
        let session = Session::start_with(&Config::default(), connector);
        session.wait_until_open(Duration::from_secs(5)).await.unwrap();

        let connection = session.connection().clone();
        session.shutdown().await;
        assert!(connection.state().terminated);
        assert_eq!(connection.status(), ConnectionStatus::Closed);
    }
}
