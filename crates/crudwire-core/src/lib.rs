//! crudwire Core Library
//!
//! This crate provides the client-side synchronization layer for crudwire, an
//! admin client for customers and inventory items that talks to its backend
//! over a single WebSocket.
//!
//! # Architecture
//!
//! - **Connection manager**: owns the socket, reconnects after a fixed delay
//! - **Synchronizer**: validates outbound actions, folds inbound snapshots
//!
//! The server is the source of truth: every snapshot field replaces the local
//! collection of the same name.
//!
//! # Quick Start
//!
//! ```text
//! let mut session = Session::start(&Config::load()?);
//! session.wait_until_synced(&Domain::ALL, Duration::from_secs(10)).await?;
//!
//! // Create a customer; the server assigns the id
//! let customer = Customer::new("John Doe", "john.doe@example.com");
//! session
//!     .synchronizer()
//!     .send(ActionKind::new(Domain::Customer, Verb::Create), Payload::Customers(vec![customer]))
//!     .await?;
//!
//! // Read the view state
//! let customers = session.synchronizer().view().customers;
//! ```
//!
//! # Modules
//!
//! - `connection`: connection lifecycle and reconnect
//! - `sync`: view state and action dispatch
//! - `protocol`: wire message types
//! - `models`: Customer and Item
//! - `session`: composes the above from a `Config`

pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod protocol;
pub mod session;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager,
    ConnectionState, ConnectionStatus, Connector, WsConnector,
};
pub use error::{SyncError, SyncResult};
pub use models::{Customer, Item, Record};
pub use protocol::{
    Ack, ActionKind, ActionMessage, Domain, Payload, RequestId, ServerMessage, StateSnapshot, Verb,
};
pub use session::Session;
pub use sync::{Changed, Confirmation, Freshness, SyncEvent, SyncOptions, Synchronizer, ViewState};
