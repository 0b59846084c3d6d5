//! State synchronizer
//!
//! Turns front-end intents into action messages and folds server frames into
//! the local view state. Each snapshot field replaces its collection
//! wholesale; a field that is absent leaves the collection as it was.
//!
//! The synchronizer runs as one task consuming [`ConnectionEvent`]s in the
//! order the connection manager published them. View state is published on a
//! `watch` channel, lifecycle notifications on a bounded broadcast channel that
//! keeps nothing when nobody subscribes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionEvent, ConnectionStatus};
use crate::error::{SyncError, SyncResult};
use crate::models::{Customer, Item, Record};
use crate::protocol::{
    ActionKind, ActionMessage, Domain, Payload, RequestId, ServerMessage, StateSnapshot, Verb,
};

/// Behavior switches for the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Send `read-all` for both collections whenever a connection opens
    pub resync_on_connect: bool,
    /// Apply mutations locally before the server confirms them
    pub optimistic_updates: bool,
    /// Stamp UUIDs on created entities that lack an id
    pub client_generated_ids: bool,
    /// Attach a request id to each outbound action (`{"action","payload"}` otherwise)
    pub request_ids: bool,
}

/// Capacity of the front-end event broadcast
const EVENT_CAPACITY: usize = 256;

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            resync_on_connect: true,
            optimistic_updates: false,
            client_generated_ids: false,
            request_ids: false,
        }
    }
}

/// Which collections a change touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changed {
    pub customers: bool,
    pub items: bool,
}

impl Changed {
    pub const BOTH: Changed = Changed {
        customers: true,
        items: true,
    };

    pub fn any(&self) -> bool {
        self.customers || self.items
    }

    fn domain(domain: Domain) -> Self {
        match domain {
            Domain::Customer => Changed {
                customers: true,
                items: false,
            },
            Domain::Item => Changed {
                customers: false,
                items: true,
            },
        }
    }
}

/// Client copy of the latest known collections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewState {
    pub customers: Vec<Customer>,
    pub items: Vec<Item>,
}

impl ViewState {
    /// Replace every collection present in the snapshot
    ///
    /// Reports the fields the snapshot carried, whether or not their contents
    /// differed.
    pub fn apply_snapshot(&mut self, snapshot: &StateSnapshot) -> Changed {
        let mut changed = Changed::default();
        if let Some(customers) = &snapshot.customer {
            self.customers = customers.clone();
            changed.customers = true;
        }
        if let Some(items) = &snapshot.item {
            self.items = items.clone();
            changed.items = true;
        }
        changed
    }

    /// Apply an outbound action locally, ahead of the server
    ///
    /// Returns true when the view changed. Reads never change anything, and a
    /// create is only applied when its entities already carry ids.
    pub fn apply_optimistic(&mut self, action: ActionKind, payload: &[Value]) -> bool {
        match action.domain {
            Domain::Customer => apply_local(&mut self.customers, action.verb, payload),
            Domain::Item => apply_local(&mut self.items, action.verb, payload),
        }
    }

    pub fn customer(&self, id: &str) -> Option<&Customer> {
        self.customers.iter().find(|c| c.customer_id == id)
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.item_id == id)
    }

    /// Number of entities in a collection
    pub fn len(&self, domain: Domain) -> usize {
        match domain {
            Domain::Customer => self.customers.len(),
            Domain::Item => self.items.len(),
        }
    }
}

fn apply_local<R: Record>(records: &mut Vec<R>, verb: Verb, payload: &[Value]) -> bool {
    match verb {
        Verb::Read | Verb::ReadAll => false,
        Verb::DeleteAll => {
            let had_any = !records.is_empty();
            records.clear();
            had_any
        }
        Verb::Delete => {
            let ids: HashSet<&str> = payload.iter().filter_map(Value::as_str).collect();
            let before = records.len();
            records.retain(|r| !ids.contains(r.id()));
            records.len() != before
        }
        Verb::Create | Verb::Update => {
            let mut changed = false;
            for entry in payload {
                let Ok(record) = R::deserialize(entry) else {
                    continue;
                };
                if !record.has_id() {
                    continue;
                }
                match records.iter_mut().find(|r| r.id() == record.id()) {
                    Some(existing) if *existing != record => {
                        *existing = record;
                        changed = true;
                    }
                    Some(_) => {}
                    // An update for an unknown id is left for the server to sort out
                    None if verb == Verb::Create => {
                        records.push(record);
                        changed = true;
                    }
                    None => {}
                }
            }
            changed
        }
    }
}

/// When each collection was last replaced by a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Freshness {
    pub customers: Option<DateTime<Utc>>,
    pub items: Option<DateTime<Utc>>,
}

impl Freshness {
    pub fn get(&self, domain: Domain) -> Option<DateTime<Utc>> {
        match domain {
            Domain::Customer => self.customers,
            Domain::Item => self.items,
        }
    }

    fn touch(&mut self, changed: Changed, at: DateTime<Utc>) {
        if changed.customers {
            self.customers = Some(at);
        }
        if changed.items {
            self.items = Some(at);
        }
    }
}

/// Outcome of an action sent with [`Synchronizer::send_and_confirm`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The server acknowledged the request id
    Acknowledged,
    /// A snapshot arrived after the action; no acknowledgement was sent
    ConfirmedBySnapshot,
    /// The server refused the action
    Rejected(String),
    /// The connection closed before the server answered
    Lost,
}

impl Confirmation {
    pub fn is_success(&self) -> bool {
        matches!(self, Confirmation::Acknowledged | Confirmation::ConfirmedBySnapshot)
    }
}

/// Notifications for front ends
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection status changed
    StatusChanged(ConnectionStatus),
    /// View state changed
    StateChanged(Changed),
    /// The server acknowledged a request
    ActionAcknowledged(RequestId),
    /// The server rejected a request
    ActionRejected {
        request_id: RequestId,
        action: ActionKind,
        reason: String,
    },
    /// An inbound frame could not be decoded
    MessageDropped(String),
    /// Requests still outstanding when the connection closed
    ActionsLost(usize),
}

/// An encoded action ready for the socket
struct Prepared {
    request_id: RequestId,
    message: ActionMessage,
    text: String,
}

/// An action awaiting an answer from the server
struct Pending {
    action: ActionKind,
    waiter: Option<oneshot::Sender<Confirmation>>,
}

impl Pending {
    fn resolve(self, confirmation: Confirmation) {
        if let Some(waiter) = self.waiter {
            let _ = waiter.send(confirmation);
        }
    }
}

/// Mutable synchronizer state
#[derive(Default)]
struct SyncStore {
    /// What front ends see, including optimistic changes
    view: ViewState,
    /// Last server-confirmed state
    confirmed: ViewState,
    pending: HashMap<RequestId, Pending>,
}

struct Inner {
    connection: Connection,
    options: SyncOptions,
    store: Mutex<SyncStore>,
    view_tx: watch::Sender<ViewState>,
    freshness_tx: watch::Sender<Freshness>,
    event_tx: broadcast::Sender<SyncEvent>,
}

/// Shared handle to the synchronizer
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl Synchronizer {
    /// Create a synchronizer bound to a connection
    ///
    /// Call [`spawn`](Self::spawn) to start consuming inbound frames.
    pub fn new(connection: Connection, options: SyncOptions) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (view_tx, _) = watch::channel(ViewState::default());
        let (freshness_tx, _) = watch::channel(Freshness::default());

        let inner = Inner {
            connection,
            options,
            store: Mutex::new(SyncStore::default()),
            view_tx,
            freshness_tx,
            event_tx,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Subscribe to the connection and consume its events on a new task
    ///
    /// The subscription is taken before this returns, so no event published
    /// afterwards is missed. The task ends when the connection manager stops.
    pub fn spawn(&self) -> JoinHandle<()> {
        let events = self.inner.connection.subscribe();
        let this = self.clone();
        tokio::spawn(async move { this.run(events).await })
    }

    async fn run(self, mut events: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Message(text)) => self.handle_message(&text).await,
                Ok(ConnectionEvent::StatusChanged { status, .. }) => {
                    self.handle_status(status).await
                }
                Ok(ConnectionEvent::Terminated) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Synchronizer lagged, skipped {} connection events", skipped);
                }
            }
        }
        debug!("Synchronizer stopped");
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn options(&self) -> SyncOptions {
        self.inner.options
    }

    /// Current view state
    pub fn view(&self) -> ViewState {
        self.inner.view_tx.borrow().clone()
    }

    /// Receive lifecycle notifications published from now on
    ///
    /// A receiver that falls more than a few hundred events behind skips the
    /// oldest ones.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Watch view state changes
    pub fn subscribe_view(&self) -> watch::Receiver<ViewState> {
        self.inner.view_tx.subscribe()
    }

    /// Last time each collection was replaced by the server
    pub fn freshness(&self) -> Freshness {
        *self.inner.freshness_tx.borrow()
    }

    /// Number of requests awaiting an answer
    pub async fn pending_count(&self) -> usize {
        self.inner.store.lock().await.pending.len()
    }

    /// Wait until the server has sent the given collection at least once
    pub async fn wait_for_collection(&self, domain: Domain, timeout: Duration) -> SyncResult<()> {
        let mut rx = self.inner.freshness_tx.subscribe();
        let wait = async {
            rx.wait_for(|freshness| freshness.get(domain).is_some())
                .await
                .map(|_| ())
        };
        let result = match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SyncError::Shutdown),
            Err(_) => Err(SyncError::SnapshotTimeout(timeout)),
        };
        result
    }

    /// Send a typed action
    ///
    /// Validation failures return [`SyncError::MalformedPayload`] without
    /// touching the socket.
    pub async fn send(&self, action: ActionKind, payload: Payload) -> SyncResult<RequestId> {
        let values = typed_values(action, payload)?;
        self.send_values(action, values, None).await
    }

    /// Send an action given as `"<domain>:<verb>"` with a JSON array payload
    pub async fn send_raw(&self, action: &str, payload: Value) -> SyncResult<RequestId> {
        self.send_json(action.parse()?, payload).await
    }

    /// Send a parsed action with an untyped JSON array payload
    pub async fn send_json(&self, action: ActionKind, payload: Value) -> SyncResult<RequestId> {
        let values = array_values(action, payload)?;
        self.send_values(action, values, None).await
    }

    /// Send a typed action and wait for the server's answer
    pub async fn send_and_confirm(
        &self,
        action: ActionKind,
        payload: Payload,
        timeout: Duration,
    ) -> SyncResult<Confirmation> {
        let values = typed_values(action, payload)?;
        self.confirm_values(action, values, timeout).await
    }

    /// Raw counterpart of [`send_and_confirm`](Self::send_and_confirm)
    pub async fn send_raw_and_confirm(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> SyncResult<Confirmation> {
        self.send_json_and_confirm(action.parse()?, payload, timeout).await
    }

    /// Counterpart of [`send_and_confirm`](Self::send_and_confirm) for untyped payloads
    pub async fn send_json_and_confirm(
        &self,
        action: ActionKind,
        payload: Value,
        timeout: Duration,
    ) -> SyncResult<Confirmation> {
        let values = array_values(action, payload)?;
        self.confirm_values(action, values, timeout).await
    }

    async fn confirm_values(
        &self,
        action: ActionKind,
        values: Vec<Value>,
        timeout: Duration,
    ) -> SyncResult<Confirmation> {
        let (waiter, answer) = oneshot::channel();
        let request_id = self.send_values(action, values, Some(waiter)).await?;

        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(confirmation)) => Ok(confirmation),
            // Waiter dropped without an answer
            Ok(Err(_)) => Ok(Confirmation::Lost),
            Err(_) => {
                self.inner.store.lock().await.pending.remove(&request_id);
                Err(SyncError::ConfirmationTimeout(timeout))
            }
        }
    }

    /// Stamp ids, validate and encode an outbound action
    fn prepare(&self, action: ActionKind, mut values: Vec<Value>) -> SyncResult<Prepared> {
        if self.inner.options.client_generated_ids && action.verb == Verb::Create {
            match action.domain {
                Domain::Customer => stamp_ids::<Customer>(&mut values)?,
                Domain::Item => stamp_ids::<Item>(&mut values)?,
            }
        }

        let mut message = ActionMessage::new(action, values)?;
        let request_id = Uuid::new_v4().to_string();
        if self.inner.options.request_ids {
            message = message.with_request_id(request_id.clone());
        }
        let text = message.encode()?;
        Ok(Prepared {
            request_id,
            message,
            text,
        })
    }

    async fn send_values(
        &self,
        action: ActionKind,
        values: Vec<Value>,
        waiter: Option<oneshot::Sender<Confirmation>>,
    ) -> SyncResult<RequestId> {
        let Prepared {
            request_id,
            message,
            text,
        } = self.prepare(action, values)?;

        // Pending entry and optimistic change land together, before the write,
        // so an answer can never be handled ahead of either
        {
            let mut store = self.inner.store.lock().await;
            store
                .pending
                .insert(request_id.clone(), Pending { action, waiter });
            if self.inner.options.optimistic_updates
                && store.view.apply_optimistic(action, &message.payload)
            {
                self.inner.view_tx.send_replace(store.view.clone());
                self.emit(SyncEvent::StateChanged(Changed::domain(action.domain)));
            }
        }

        if let Err(e) = self.inner.connection.send_text(text).await {
            let mut store = self.inner.store.lock().await;
            store.pending.remove(&request_id);
            if store.view != store.confirmed {
                store.view = store.confirmed.clone();
                self.inner.view_tx.send_replace(store.view.clone());
                self.emit(SyncEvent::StateChanged(Changed::BOTH));
            }
            return Err(e);
        }
        debug!("Sent {} ({})", action, request_id);

        Ok(request_id)
    }

    /// Ask for both collections without tracking the requests as pending
    async fn resync(&self) {
        for domain in Domain::ALL {
            let action = ActionKind::new(domain, Verb::ReadAll);
            let sent = match self.prepare(action, Vec::new()) {
                Ok(prepared) => self.inner.connection.send_text(prepared.text).await,
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => debug!("Sent resync {}", action),
                Err(e) => warn!("Resync request {} failed: {}", action, e),
            }
        }
    }

    /// Fold one inbound text frame into the view state
    ///
    /// Frames that do not decode are dropped with a warning and leave the
    /// state untouched.
    pub async fn handle_message(&self, text: &str) {
        let message = match ServerMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed server frame: {}", e);
                self.emit(SyncEvent::MessageDropped(e.to_string()));
                return;
            }
        };

        let mut store = self.inner.store.lock().await;
        let changed = store.view.apply_snapshot(&message.snapshot);
        store.confirmed.apply_snapshot(&message.snapshot);

        if changed.any() {
            debug!(
                "Applied snapshot (customers: {}, items: {})",
                changed.customers, changed.items
            );
            self.inner.view_tx.send_replace(store.view.clone());
            let now = Utc::now();
            self.inner
                .freshness_tx
                .send_modify(|freshness| freshness.touch(changed, now));
            self.emit(SyncEvent::StateChanged(changed));
        }

        match message.ack {
            Some(ack) => {
                let Some(pending) = store.pending.remove(&ack.request_id) else {
                    debug!("Ignoring ack for unknown request {}", ack.request_id);
                    return;
                };
                match ack.error {
                    None => {
                        pending.resolve(Confirmation::Acknowledged);
                        self.emit(SyncEvent::ActionAcknowledged(ack.request_id));
                    }
                    Some(reason) => {
                        warn!("Server rejected {} ({}): {}", pending.action, ack.request_id, reason);
                        if self.inner.options.optimistic_updates && store.view != store.confirmed {
                            store.view = store.confirmed.clone();
                            self.inner.view_tx.send_replace(store.view.clone());
                            self.emit(SyncEvent::StateChanged(Changed::BOTH));
                        }
                        let action = pending.action;
                        pending.resolve(Confirmation::Rejected(reason.clone()));
                        self.emit(SyncEvent::ActionRejected {
                            request_id: ack.request_id,
                            action,
                            reason,
                        });
                    }
                }
            }
            None if changed.any() => {
                for (_, pending) in store.pending.drain() {
                    pending.resolve(Confirmation::ConfirmedBySnapshot);
                }
            }
            None => {}
        }
    }

    async fn handle_status(&self, status: ConnectionStatus) {
        self.emit(SyncEvent::StatusChanged(status));

        match status {
            ConnectionStatus::Open if self.inner.options.resync_on_connect => self.resync().await,
            ConnectionStatus::Closed => {
                let mut store = self.inner.store.lock().await;
                let lost = store.pending.len();
                for (_, pending) in store.pending.drain() {
                    pending.resolve(Confirmation::Lost);
                }
                if lost > 0 {
                    info!("Connection closed with {} unanswered actions", lost);
                    self.emit(SyncEvent::ActionsLost(lost));
                }
            }
            _ => {}
        }
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine
        let _ = self.inner.event_tx.send(event);
    }
}

fn typed_values(action: ActionKind, payload: Payload) -> SyncResult<Vec<Value>> {
    if let Some(domain) = payload.domain() {
        if domain != action.domain {
            return Err(SyncError::MalformedPayload(format!(
                "{}: payload holds {} entities",
                action, domain
            )));
        }
    }
    payload.into_values()
}

fn array_values(action: ActionKind, payload: Value) -> SyncResult<Vec<Value>> {
    match payload {
        Value::Array(values) => Ok(values),
        other => Err(SyncError::MalformedPayload(format!(
            "{}: payload must be a JSON array, got {}",
            action,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Give every entity that decodes as `R` and lacks an id a fresh UUID
///
/// Entries that do not decode are left as they are for validation to report.
fn stamp_ids<R: Record>(values: &mut [Value]) -> SyncResult<()> {
    for value in values.iter_mut() {
        let Ok(mut record) = R::deserialize(&*value) else {
            continue;
        };
        if !record.has_id() {
            record.ensure_id();
            *value = serde_json::to_value(&record)?;
        }
    }
    Ok(())
}
