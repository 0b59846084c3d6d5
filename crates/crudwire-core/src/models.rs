//! Data models for crudwire
//!
//! Defines the two synchronized collections: Customer and Item.
//! Identifiers are normally assigned by the server, so an entity built
//! locally for a create action carries an empty id which is left off the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::Domain;

/// Common behavior of synchronized entities
pub trait Record: Clone + PartialEq + Serialize + DeserializeOwned {
    /// Collection this entity belongs to
    const DOMAIN: Domain;

    /// Identifier (empty if not yet assigned)
    fn id(&self) -> &str;

    /// Replace the identifier
    fn set_id(&mut self, id: String);

    /// Client-side shape checks
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Whether an identifier has been assigned
    fn has_id(&self) -> bool {
        !self.id().is_empty()
    }

    /// Stamp a UUIDv4 identifier if none is set
    fn ensure_id(&mut self) {
        if !self.has_id() {
            self.set_id(Uuid::new_v4().to_string());
        }
    }
}

/// A customer row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    /// Unique identifier, server-assigned
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub customer_id: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
}

impl Customer {
    /// Create a customer that has not been assigned an id yet
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            customer_id: String::new(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Create a customer with a known id
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            customer_id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }
}

impl Record for Customer {
    const DOMAIN: Domain = Domain::Customer;

    fn id(&self) -> &str {
        &self.customer_id
    }

    fn set_id(&mut self, id: String) {
        self.customer_id = id;
    }

    fn validate(&self) -> Result<(), String> {
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(format!(
                "customer '{}' has invalid email '{}'",
                self.name, self.email
            )),
        }
    }
}

/// An inventory item row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Unique identifier, server-assigned
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub item_id: String,
    /// Item name
    pub name: String,
    /// Units in stock
    pub quantity: u64,
    /// Unit price in dollars
    pub price: f64,
}

impl Item {
    /// Create an item that has not been assigned an id yet
    pub fn new(name: impl Into<String>, quantity: u64, price: f64) -> Self {
        Self {
            item_id: String::new(),
            name: name.into(),
            quantity,
            price,
        }
    }

    /// Create an item with a known id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, quantity: u64, price: f64) -> Self {
        Self {
            item_id: id.into(),
            name: name.into(),
            quantity,
            price,
        }
    }
}

impl Record for Item {
    const DOMAIN: Domain = Domain::Item;

    fn id(&self) -> &str {
        &self.item_id
    }

    fn set_id(&mut self, id: String) {
        self.item_id = id;
    }

    fn validate(&self) -> Result<(), String> {
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(format!(
                "item '{}' has invalid price {}; price must be a non-negative number",
                self.name, self.price
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_customer_omits_id_on_wire() {
        let customer = Customer::new("John Doe", "john.doe@example.com");
        assert!(!customer.has_id());

        let json = serde_json::to_value(&customer).unwrap();
        assert!(json.get("customer_id").is_none());
        assert_eq!(json["name"], "John Doe");
        assert_eq!(json["email"], "john.doe@example.com");
    }

    #[test]
    fn test_customer_from_server() {
        let customer: Customer = serde_json::from_str(
            r#"{"customer_id":"c1","name":"John Doe","email":"john.doe@example.com"}"#,
        )
        .unwrap();
        assert_eq!(customer.id(), "c1");
        assert_eq!(
            customer,
            Customer::with_id("c1", "John Doe", "john.doe@example.com")
        );
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut customer = Customer::with_id("c1", "A", "a@example.com");
        customer.ensure_id();
        assert_eq!(customer.id(), "c1");

        let mut fresh = Customer::new("B", "b@example.com");
        fresh.ensure_id();
        assert!(Uuid::parse_str(fresh.id()).is_ok());
    }

    #[test]
    fn test_item_validation() {
        assert!(Item::new("Apple", 23, 0.5).validate().is_ok());
        assert!(Item::new("Free sample", 0, 0.0).validate().is_ok());
        assert!(Item::new("Refund", 1, -1.0).validate().is_err());
        assert!(Item::new("Broken", 1, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_customer_email_validation() {
        assert!(Customer::new("John Doe", "john.doe@example.com").validate().is_ok());
        assert!(Customer::new("John Doe", "john.doe").validate().is_err());
        assert!(Customer::new("John Doe", "@example.com").validate().is_err());
        assert!(Customer::new("John Doe", "john@localhost").validate().is_err());
    }

    #[test]
    fn test_item_rejects_negative_quantity() {
        let result: Result<Item, _> =
            serde_json::from_str(r#"{"item_id":"i1","name":"Pencils","quantity":-4,"price":0.99}"#);
        assert!(result.is_err());
    }
}
