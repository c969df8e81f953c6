//! Events flowing through a relay session.
//!
//! [`RelayEvent`] is the structured payload carried in both directions.
//! [`ClientEvent`] and [`UpstreamEvent`] are what the two adapters emit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{EventParseError, UpstreamError};

/// A JSON object with a string `type` field and an arbitrary payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct RelayEvent {
    event_type: String,
    body: Map<String, Value>,
}

impl RelayEvent {
    /// Parse untrusted client text into an event.
    ///
    /// The text must be a JSON object whose `type` field is a string.
    pub fn parse(raw: &str) -> Result<Self, EventParseError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Build an event from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, EventParseError> {
        match value {
            Value::Object(body) => Self::try_from(body),
            _ => Err(EventParseError::NotAnObject),
        }
    }

    /// The event's `type` field.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Whether the event carries a top-level field.
    pub fn contains_key(&self, key: &str) -> bool {
        self.body.contains_key(key)
    }

    /// Set a top-level field. Setting `type` to a string retypes the event;
    /// other values for `type` are ignored.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if key == "type" {
            let Value::String(ty) = value else { return };
            self.event_type.clone_from(&ty);
            let _ = self.body.insert(key, Value::String(ty));
            return;
        }
        let _ = self.body.insert(key, value);
    }

    /// Serialize to JSON text for the wire.
    pub fn to_json(&self) -> String {
        Value::Object(self.body.clone()).to_string()
    }

    /// Borrow the full JSON object, including `type`.
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.body
    }

    /// Consume the event and return the JSON object.
    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

impl TryFrom<Map<String, Value>> for RelayEvent {
    type Error = EventParseError;

    fn try_from(body: Map<String, Value>) -> Result<Self, Self::Error> {
        let event_type = match body.get("type") {
            Some(Value::String(ty)) => ty.clone(),
            Some(_) => return Err(EventParseError::InvalidType),
            None => return Err(EventParseError::MissingType),
        };
        Ok(Self { event_type, body })
    }
}

impl From<RelayEvent> for Map<String, Value> {
    fn from(event: RelayEvent) -> Self {
        event.body
    }
}

/// Notifications emitted by the client socket adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// One inbound text frame, unparsed.
    Message(String),
    /// The client closed the connection.
    Close,
}

/// Notifications emitted by an upstream peer.
#[derive(Clone, Debug)]
pub enum UpstreamEvent {
    /// A server event destined for the client.
    ServerEvent(RelayEvent),
    /// The upstream link closed.
    Close,
    /// The upstream peer surfaced an error.
    Error(UpstreamError),
}
