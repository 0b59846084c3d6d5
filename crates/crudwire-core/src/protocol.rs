//! Wire protocol message types
//!
//! JSON text frames exchanged with the backend:
//!
//! - client → server: `{"action": "<domain>:<verb>", "payload": [...], "request_id": "..."}`
//! - server → client: `{"customer"?: [...], "item"?: [...], "ack"?: {...}}`
//!
//! An absent collection in a server frame means "unchanged", never "empty".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use crate::models::{Customer, Item, Record};

/// Correlation id attached to outbound actions
pub type RequestId = String;

/// Entity collection an action targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Customer,
    Item,
}

impl Domain {
    pub const ALL: [Domain; 2] = [Domain::Customer, Domain::Item];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Customer => "customer",
            Domain::Item => "item",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Read,
    ReadAll,
    Update,
    Delete,
    DeleteAll,
}

impl Verb {
    pub const ALL: [Verb; 6] = [
        Verb::Create,
        Verb::Read,
        Verb::ReadAll,
        Verb::Update,
        Verb::Delete,
        Verb::DeleteAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Read => "read",
            Verb::ReadAll => "read-all",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::DeleteAll => "delete-all",
        }
    }

    /// Verbs whose payload is a list of entity objects
    pub fn carries_entities(&self) -> bool {
        matches!(self, Verb::Create | Verb::Update)
    }

    /// Verbs whose payload is a list of identifiers
    pub fn carries_ids(&self) -> bool {
        matches!(self, Verb::Read | Verb::Delete)
    }
}

/// One of the twelve `<domain>:<verb>` actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ActionKind {
    pub domain: Domain,
    pub verb: Verb,
}

impl ActionKind {
    pub const fn new(domain: Domain, verb: Verb) -> Self {
        Self { domain, verb }
    }

    /// Every recognized action, customer actions first
    pub fn all() -> impl Iterator<Item = ActionKind> {
        Domain::ALL
            .into_iter()
            .flat_map(|domain| Verb::ALL.into_iter().map(move |verb| ActionKind::new(domain, verb)))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.domain, self.verb.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::all()
            .find(|action| action.to_string() == s)
            .ok_or_else(|| SyncError::MalformedPayload(format!("unknown action '{}'", s)))
    }
}

impl From<ActionKind> for String {
    fn from(action: ActionKind) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for ActionKind {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Typed outbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Customers(Vec<Customer>),
    Items(Vec<Item>),
    Ids(Vec<String>),
    Empty,
}

impl Payload {
    /// Collection the entities belong to, if the payload carries entities
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Payload::Customers(_) => Some(Domain::Customer),
            Payload::Items(_) => Some(Domain::Item),
            Payload::Ids(_) | Payload::Empty => None,
        }
    }

    /// Convert to the JSON array sent on the wire
    pub fn into_values(self) -> SyncResult<Vec<Value>> {
        let values: Vec<Value> = match self {
            Payload::Customers(customers) => customers
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            Payload::Items(items) => items
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<_, _>>()?,
            Payload::Ids(ids) => ids.into_iter().map(Value::String).collect(),
            Payload::Empty => Vec::new(),
        };
        Ok(values)
    }
}

/// Message sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMessage {
    pub action: ActionKind,
    pub payload: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl ActionMessage {
    /// Build a message after checking the payload against the action
    pub fn new(action: ActionKind, payload: Vec<Value>) -> SyncResult<Self> {
        validate_payload(action, &payload)?;
        Ok(Self {
            action,
            payload,
            request_id: None,
        })
    }

    /// Attach a correlation id
    pub fn with_request_id(mut self, request_id: impl Into<RequestId>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Encode to a JSON text frame
    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Check that a payload has the shape its action expects
///
/// Create and update take entity objects of the action's domain (update needs
/// the id), read and delete take identifier strings, the `-all` verbs take any
/// array.
pub fn validate_payload(action: ActionKind, payload: &[Value]) -> SyncResult<()> {
    for (index, entry) in payload.iter().enumerate() {
        if action.verb.carries_entities() {
            if !entry.is_object() {
                return Err(malformed(action, index, "must be an entity object"));
            }
            match action.domain {
                Domain::Customer => check_record::<Customer>(action, index, entry)?,
                Domain::Item => check_record::<Item>(action, index, entry)?,
            }
        } else if action.verb.carries_ids() {
            match entry.as_str() {
                Some(id) if !id.is_empty() => {}
                Some(_) => return Err(malformed(action, index, "is an empty identifier")),
                None => return Err(malformed(action, index, "must be an identifier string")),
            }
        }
    }
    Ok(())
}

fn check_record<R: Record>(action: ActionKind, index: usize, entry: &Value) -> SyncResult<()> {
    let record = R::deserialize(entry)
        .map_err(|e| malformed(action, index, &format!("is not a valid {}: {}", R::DOMAIN, e)))?;

    if action.verb == Verb::Update && !record.has_id() {
        return Err(malformed(action, index, "needs an id to be updated"));
    }

    record
        .validate()
        .map_err(|reason| malformed(action, index, &reason))
}

fn malformed(action: ActionKind, index: usize, reason: &str) -> SyncError {
    SyncError::MalformedPayload(format!("{}: payload[{}] {}", action, index, reason))
}

/// Server-pushed replacement of one or both collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<Vec<Customer>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Vec<Item>>,
}

impl StateSnapshot {
    /// True when the snapshot replaces nothing
    pub fn is_empty(&self) -> bool {
        self.customer.is_none() && self.item.is_none()
    }
}

/// Per-request acknowledgement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// A decoded server frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(flatten)]
    pub snapshot: StateSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<Ack>,
}

impl ServerMessage {
    /// Decode a JSON text frame
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_names() {
        let names: Vec<String> = ActionKind::all().map(|a| a.to_string()).collect();
        assert_eq!(names.len(), 12);
        assert_eq!(names[0], "customer:create");
        assert!(names.contains(&"customer:read-all".to_string()));
        assert!(names.contains(&"item:delete-all".to_string()));
    }

    #[test]
    fn test_action_parse() {
        let action: ActionKind = "item:update".parse().unwrap();
        assert_eq!(action, ActionKind::new(Domain::Item, Verb::Update));

        let err = "bogus:verb".parse::<ActionKind>().unwrap_err();
        assert!(matches!(err, SyncError::MalformedPayload(_)));
        assert!("customer".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_create_message_encoding() {
        let action = ActionKind::new(Domain::Customer, Verb::Create);
        let payload = Payload::Customers(vec![Customer::new("John Doe", "john.doe@example.com")])
            .into_values()
            .unwrap();
        let msg = ActionMessage::new(action, payload).unwrap();

        let encoded: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "action": "customer:create",
                "payload": [{"name": "John Doe", "email": "john.doe@example.com"}]
            })
        );
    }

    #[test]
    fn test_request_id_on_wire() {
        let action = ActionKind::new(Domain::Item, Verb::DeleteAll);
        let msg = ActionMessage::new(action, vec![])
            .unwrap()
            .with_request_id("r-1");

        let encoded: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(encoded["request_id"], "r-1");
        assert_eq!(encoded["payload"], json!([]));
    }

    #[test]
    fn test_validate_delete_requires_ids() {
        let action = ActionKind::new(Domain::Customer, Verb::Delete);
        assert!(validate_payload(action, &[json!("c1"), json!("c2")]).is_ok());
        assert!(validate_payload(action, &[json!({"customer_id": "c1"})]).is_err());
        assert!(validate_payload(action, &[json!("")]).is_err());
    }

    #[test]
    fn test_validate_entities() {
        let create = ActionKind::new(Domain::Item, Verb::Create);
        assert!(validate_payload(create, &[json!({"name": "Apple", "quantity": 3, "price": 0.5})]).is_ok());
        // Wrong domain
        assert!(validate_payload(create, &[json!({"name": "A", "email": "a@example.com"})]).is_err());
        // Bare id where an object is expected
        assert!(validate_payload(create, &[json!("i1")]).is_err());
        // Negative price
        assert!(validate_payload(create, &[json!({"name": "A", "quantity": 1, "price": -2.0})]).is_err());

        let update = ActionKind::new(Domain::Customer, Verb::Update);
        assert!(validate_payload(update, &[json!({"name": "A", "email": "a@example.com"})]).is_err());
        assert!(validate_payload(
            update,
            &[json!({"customer_id": "c1", "name": "A", "email": "a@example.com"})]
        )
        .is_ok());
    }

    #[test]
    fn test_decode_snapshot_fields() {
        let msg = ServerMessage::decode(
            r#"{"customer":[{"customer_id":"c1","name":"John Doe","email":"john.doe@example.com"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.snapshot.customer.as_ref().map(Vec::len), Some(1));
        assert!(msg.snapshot.item.is_none());
        assert!(msg.ack.is_none());

        let empty = ServerMessage::decode(r#"{"customer":[]}"#).unwrap();
        assert_eq!(empty.snapshot.customer, Some(vec![]));
    }

    #[test]
    fn test_decode_ack() {
        let msg = ServerMessage::decode(
            r#"{"item":[],"ack":{"request_id":"r-9","error":"quantity too large"}}"#,
        )
        .unwrap();
        let ack = msg.ack.unwrap();
        assert_eq!(ack.request_id, "r-9");
        assert!(!ack.is_ok());
        assert_eq!(msg.snapshot.item, Some(vec![]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(ServerMessage::decode("not json").is_err());
        assert!(ServerMessage::decode(r#""just a string""#).is_err());
        assert!(ServerMessage::decode(r#"{"customer":"nope"}"#).is_err());
    }
}
