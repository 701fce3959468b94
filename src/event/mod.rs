//! Domain events.
//!
//! The event set is closed: every kind the processor understands is a
//! variant of [`EventPayload`], and dispatch over it is an exhaustive
//! `match`. Tags that arrive on the wire but are not part of this set are
//! handled by [`wire::decode_event`], never by a catch-all arm.

pub mod wire;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Location, Properties};
use crate::time::next_timestamp;

pub use wire::{decode_event, decode_value, encode_event, DecodeError, InboundEvent};

/// Unique identifier of a single event.
///
/// # Examples
///
/// ```
/// use trackgraph::EventId;
///
/// let id = EventId::new();
/// assert_ne!(id, EventId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Every `eventType` tag this crate knows how to apply.
pub const KNOWN_EVENT_TYPES: [&str; 12] = [
    "ITEM_CREATED",
    "ITEM_ACTIVATED",
    "ITEM_DEACTIVATED",
    "ITEM_POSITION_CHANGED",
    "ITEM_SPEED_CHANGED",
    "ITEM_PROPERTIES_UPDATED",
    "LOCATION_CREATED",
    "LOCATION_ACTIVATED",
    "LOCATION_DEACTIVATED",
    "LOCATION_DELETED",
    "LOCATION_PROPERTIES_UPDATED",
    "LOCATION_CONNECTION_CREATED",
];

const fn default_true() -> bool {
    true
}

/// The delta an event carries, tagged by `eventType` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "eventType",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum EventPayload {
    /// A new item enters the system.
    ItemCreated {
        /// Display name.
        name: String,
        /// Initial speed.
        #[serde(default)]
        speed: f64,
        /// Initial activation state.
        #[serde(default = "default_true")]
        active: bool,
        /// Initial properties.
        #[serde(default)]
        properties: Option<Properties>,
    },
    /// The item starts moving.
    ItemActivated,
    /// The item stops.
    ItemDeactivated,
    /// The item moved onto another location.
    ItemPositionChanged {
        /// Target location id.
        location_id: String,
    },
    /// The item changed speed.
    ItemSpeedChanged {
        /// New speed.
        speed: f64,
    },
    /// Properties to merge into the item.
    ItemPropertiesUpdated {
        /// Keys to add or overwrite.
        #[serde(default)]
        properties: Option<Properties>,
    },
    /// A new location enters the network.
    LocationCreated {
        /// Display name.
        name: String,
        /// Initial activation state.
        #[serde(default = "default_true")]
        active: bool,
        /// Optional latitude.
        #[serde(default)]
        latitude: Option<f64>,
        /// Optional longitude.
        #[serde(default)]
        longitude: Option<f64>,
        /// Length in meters.
        length: f64,
        /// Nominal transit speed.
        #[serde(default)]
        speed: f64,
        /// Category tag.
        #[serde(rename = "type", default)]
        location_type: String,
        /// Initial properties.
        #[serde(default)]
        properties: Option<Properties>,
    },
    /// The location accepts traffic again.
    LocationActivated,
    /// The location stops accepting traffic.
    LocationDeactivated,
    /// The location is removed from the network.
    LocationDeleted,
    /// Replacement property map for the location.
    LocationPropertiesUpdated {
        /// New property map.
        #[serde(default)]
        updated_properties: Option<Properties>,
    },
    /// A directed connection from the event's entity to `to_id`.
    ///
    /// `fromId` is optional on the wire and must equal `entityId` when
    /// present. `location1Id`/`location2Id` are accepted as aliases.
    LocationConnectionCreated {
        /// Source location id, echoing `entity_id`.
        #[serde(default, alias = "location1Id", skip_serializing_if = "Option::is_none")]
        from_id: Option<String>,
        /// Target location id.
        #[serde(alias = "location2Id")]
        to_id: String,
    },
}

impl EventPayload {
    /// The wire tag of this payload.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ItemCreated { .. } => "ITEM_CREATED",
            Self::ItemActivated => "ITEM_ACTIVATED",
            Self::ItemDeactivated => "ITEM_DEACTIVATED",
            Self::ItemPositionChanged { .. } => "ITEM_POSITION_CHANGED",
            Self::ItemSpeedChanged { .. } => "ITEM_SPEED_CHANGED",
            Self::ItemPropertiesUpdated { .. } => "ITEM_PROPERTIES_UPDATED",
            Self::LocationCreated { .. } => "LOCATION_CREATED",
            Self::LocationActivated => "LOCATION_ACTIVATED",
            Self::LocationDeactivated => "LOCATION_DEACTIVATED",
            Self::LocationDeleted => "LOCATION_DELETED",
            Self::LocationPropertiesUpdated { .. } => "LOCATION_PROPERTIES_UPDATED",
            Self::LocationConnectionCreated { .. } => "LOCATION_CONNECTION_CREATED",
        }
    }

    /// Returns true if the payload targets an item rather than a location.
    #[must_use]
    pub const fn targets_item(&self) -> bool {
        matches!(
            self,
            Self::ItemCreated { .. }
                | Self::ItemActivated
                | Self::ItemDeactivated
                | Self::ItemPositionChanged { .. }
                | Self::ItemSpeedChanged { .. }
                | Self::ItemPropertiesUpdated { .. }
        )
    }
}

/// An immutable domain event.
///
/// `entity_id` names the item or location the event applies to. For
/// `LocationConnectionCreated` it is the source location.
///
/// # Examples
///
/// ```
/// use trackgraph::DomainEvent;
///
/// let event = DomainEvent::item_position_changed("I1", "L2");
/// assert_eq!(event.entity_id, "I1");
/// assert_eq!(event.event_type(), "ITEM_POSITION_CHANGED");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Globally unique id.
    pub event_id: EventId,
    /// Target entity.
    pub entity_id: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// The kind-specific delta.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Creates an event with a fresh id and the next process timestamp.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: EventId::new(),
            entity_id: entity_id.into(),
            timestamp: next_timestamp(),
            payload,
        }
    }

    /// Overrides the creation time, e.g. when replaying archived events.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Overrides the event id, e.g. to simulate a redelivery.
    #[must_use]
    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    /// The wire tag of this event.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// `ITEM_CREATED` for an active item with no properties.
    #[must_use]
    pub fn item_created(item_id: impl Into<String>, name: impl Into<String>, speed: f64) -> Self {
        Self::new(
            item_id,
            EventPayload::ItemCreated {
                name: name.into(),
                speed,
                active: true,
                properties: None,
            },
        )
    }

    /// `ITEM_ACTIVATED`.
    #[must_use]
    pub fn item_activated(item_id: impl Into<String>) -> Self {
        Self::new(item_id, EventPayload::ItemActivated)
    }

    /// `ITEM_DEACTIVATED`.
    #[must_use]
    pub fn item_deactivated(item_id: impl Into<String>) -> Self {
        Self::new(item_id, EventPayload::ItemDeactivated)
    }

    /// `ITEM_POSITION_CHANGED`.
    #[must_use]
    pub fn item_position_changed(item_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self::new(
            item_id,
            EventPayload::ItemPositionChanged {
                location_id: location_id.into(),
            },
        )
    }

    /// `ITEM_SPEED_CHANGED`.
    #[must_use]
    pub fn item_speed_changed(item_id: impl Into<String>, speed: f64) -> Self {
        Self::new(item_id, EventPayload::ItemSpeedChanged { speed })
    }

    /// `ITEM_PROPERTIES_UPDATED`.
    #[must_use]
    pub fn item_properties_updated(item_id: impl Into<String>, properties: Properties) -> Self {
        Self::new(
            item_id,
            EventPayload::ItemPropertiesUpdated {
                properties: Some(properties),
            },
        )
    }

    /// `LOCATION_CREATED` carrying every field of `location` except its
    /// connections.
    #[must_use]
    pub fn location_created(location: &Location) -> Self {
        Self::new(
            location.id.clone(),
            EventPayload::LocationCreated {
                name: location.name.clone(),
                active: location.active,
                latitude: location.latitude,
                longitude: location.longitude,
                length: location.length,
                speed: location.speed,
                location_type: location.location_type.clone(),
                properties: location.properties.clone(),
            },
        )
    }

    /// `LOCATION_ACTIVATED`.
    #[must_use]
    pub fn location_activated(location_id: impl Into<String>) -> Self {
        Self::new(location_id, EventPayload::LocationActivated)
    }

    /// `LOCATION_DEACTIVATED`.
    #[must_use]
    pub fn location_deactivated(location_id: impl Into<String>) -> Self {
        Self::new(location_id, EventPayload::LocationDeactivated)
    }

    /// `LOCATION_DELETED`.
    #[must_use]
    pub fn location_deleted(location_id: impl Into<String>) -> Self {
        Self::new(location_id, EventPayload::LocationDeleted)
    }

    /// `LOCATION_PROPERTIES_UPDATED`.
    #[must_use]
    pub fn location_properties_updated(
        location_id: impl Into<String>,
        updated_properties: Properties,
    ) -> Self {
        Self::new(
            location_id,
            EventPayload::LocationPropertiesUpdated {
                updated_properties: Some(updated_properties),
            },
        )
    }

    /// `LOCATION_CONNECTION_CREATED` from `from_id` to `to_id`.
    #[must_use]
    pub fn location_connection_created(from_id: impl Into<String>, to_id: impl Into<String>) -> Self {
        let from_id = from_id.into();
        Self::new(
            from_id.clone(),
            EventPayload::LocationConnectionCreated {
                from_id: Some(from_id),
                to_id: to_id.into(),
            },
        )
    }
}
