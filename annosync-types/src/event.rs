//! Change events for the annotation hierarchy.
//!
//! Events describe what happened to a single object: it was created with a
//! full serialized state, edited with a shallow diff, or deleted. They are
//! immutable once constructed and are the unit written to changesets.
//!
//! On the wire every event is a flat JSON object carrying an `eventType`
//! discriminator next to its payload fields:
//!
//! ```json
//! {"id":"…","timestamp":"2024-05-01T12:00:00Z","eventType":"edit","diff":{"properties":{…}}}
//! ```
//!
//! Decoding dispatches on `eventType` before the payload is parsed, so an
//! unknown type is reported as such rather than as a shape mismatch.

use crate::{Error, ObjectId};
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Serialized state of an object: a JSON object keyed by top-level field.
pub type ObjectState = Map<String, Value>;

/// The `eventType` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Edit,
    Delete,
}

impl EventType {
    /// Returns the wire name of this event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "edit" => Ok(Self::Edit),
            "delete" => Ok(Self::Delete),
            other => Err(Error::UnknownEventType(other.to_string())),
        }
    }
}

/// An object was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEvent {
    pub id: ObjectId,
    pub timestamp: DateTime<Utc>,
    /// Full serialized state of the new object.
    pub fields: ObjectState,
}

/// An object was edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    pub id: ObjectId,
    pub timestamp: DateTime<Utc>,
    /// Top-level keys whose values changed, each carrying its complete new value.
    pub diff: ObjectState,
}

/// An object was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteEvent {
    pub id: ObjectId,
    pub timestamp: DateTime<Utc>,
}

/// A single change to one object in the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Create(CreateEvent),
    Edit(EditEvent),
    Delete(DeleteEvent),
}

impl Event {
    /// Creates a create event stamped with the current time.
    #[must_use]
    pub fn create(id: ObjectId, fields: ObjectState) -> Self {
        Self::create_at(id, Utc::now(), fields)
    }

    /// Creates a create event with an explicit timestamp.
    #[must_use]
    pub fn create_at(id: ObjectId, timestamp: DateTime<Utc>, fields: ObjectState) -> Self {
        Self::Create(CreateEvent {
            id,
            timestamp,
            fields,
        })
    }

    /// Creates an edit event stamped with the current time.
    #[must_use]
    pub fn edit(id: ObjectId, diff: ObjectState) -> Self {
        Self::edit_at(id, Utc::now(), diff)
    }

    /// Creates an edit event with an explicit timestamp.
    #[must_use]
    pub fn edit_at(id: ObjectId, timestamp: DateTime<Utc>, diff: ObjectState) -> Self {
        Self::Edit(EditEvent {
            id,
            timestamp,
            diff,
        })
    }

    /// Creates a delete event stamped with the current time.
    #[must_use]
    pub fn delete(id: ObjectId) -> Self {
        Self::delete_at(id, Utc::now())
    }

    /// Creates a delete event with an explicit timestamp.
    #[must_use]
    pub fn delete_at(id: ObjectId, timestamp: DateTime<Utc>) -> Self {
        Self::Delete(DeleteEvent { id, timestamp })
    }

    /// The object this event applies to.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Create(e) => e.id,
            Self::Edit(e) => e.id,
            Self::Delete(e) => e.id,
        }
    }

    /// When the change was observed.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Create(e) => e.timestamp,
            Self::Edit(e) => e.timestamp,
            Self::Delete(e) => e.timestamp,
        }
    }

    /// The discriminator written as `eventType`.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Create(_) => EventType::Create,
            Self::Edit(_) => EventType::Edit,
            Self::Delete(_) => EventType::Delete,
        }
    }

    /// Decodes an event from a JSON value, dispatching on `eventType` first.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        let event_type: EventType = value
            .get("eventType")
            .and_then(Value::as_str)
            .ok_or(Error::MissingEventType)?
            .parse()?;

        Ok(match event_type {
            EventType::Create => Self::Create(serde_json::from_value(value)?),
            EventType::Edit => Self::Edit(serde_json::from_value(value)?),
            EventType::Delete => Self::Delete(serde_json::from_value(value)?),
        })
    }

    /// Decodes an event from a single JSON line.
    pub fn from_json(line: &str) -> crate::Result<Self> {
        Self::from_value(serde_json::from_str(line)?)
    }

    /// Encodes this event as a single JSON line (without the trailing newline).
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<CreateEvent> for Event {
    fn from(event: CreateEvent) -> Self {
        Self::Create(event)
    }
}

impl From<EditEvent> for Event {
    fn from(event: EditEvent) -> Self {
        Self::Edit(event)
    }
}

impl From<DeleteEvent> for Event {
    fn from(event: DeleteEvent) -> Self {
        Self::Delete(event)
    }
}

/// Payload plus discriminator, flattened into one object.
#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    #[serde(flatten)]
    body: &'a T,
    #[serde(rename = "eventType")]
    event_type: EventType,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let event_type = self.event_type();
        match self {
            Self::Create(body) => Tagged { body, event_type }.serialize(serializer),
            Self::Edit(body) => Tagged { body, event_type }.serialize(serializer),
            Self::Delete(body) => Tagged { body, event_type }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}
