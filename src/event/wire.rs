//! JSON decoding of inbound events.
//!
//! Producers may be newer than this consumer. An `eventType` outside
//! [`KNOWN_EVENT_TYPES`](super::KNOWN_EVENT_TYPES) decodes to
//! [`InboundEvent::Unrecognized`] instead of failing, so the pipeline can log
//! it and move on. A known tag with a malformed body is still an error.

use serde_json::Value;
use thiserror::Error;

use super::{DomainEvent, KNOWN_EVENT_TYPES};

/// Errors raised while decoding an inbound message.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is not a JSON object")]
    NotAnObject,

    #[error("Message has no string 'eventType' field")]
    MissingEventType,

    #[error("Invalid {event_type} event: {reason}")]
    InvalidBody {
        event_type: String,
        reason: String,
    },
}

/// The result of decoding one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// A fully decoded event of a known kind.
    Known(DomainEvent),
    /// A well-formed message whose kind this consumer does not understand.
    Unrecognized {
        /// The unknown `eventType` tag.
        event_type: String,
        /// The `entityId` field, if present.
        entity_id: Option<String>,
    },
}

impl From<DomainEvent> for InboundEvent {
    fn from(event: DomainEvent) -> Self {
        Self::Known(event)
    }
}

/// Decodes one JSON-encoded event.
///
/// # Errors
///
/// Returns `DecodeError` if the bytes are not a JSON object with a string
/// `eventType`, or if a known event kind has an invalid body.
///
/// # Examples
///
/// ```
/// use trackgraph::event::{decode_event, InboundEvent};
///
/// let raw = br#"{"eventType":"ITEM_TELEPORTED","entityId":"I1"}"#;
/// let decoded = decode_event(raw).unwrap();
/// assert!(matches!(decoded, InboundEvent::Unrecognized { .. }));
/// ```
pub fn decode_event(bytes: &[u8]) -> Result<InboundEvent, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_value(value)
}

/// Decodes an already-parsed JSON value.
///
/// # Errors
///
/// See [`decode_event`].
pub fn decode_value(value: Value) -> Result<InboundEvent, DecodeError> {
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let event_type = object
        .get("eventType")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingEventType)?
        .to_string();

    if !KNOWN_EVENT_TYPES.contains(&event_type.as_str()) {
        let entity_id = object
            .get("entityId")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(InboundEvent::Unrecognized {
            event_type,
            entity_id,
        });
    }

    serde_json::from_value::<DomainEvent>(value)
        .map(InboundEvent::Known)
        .map_err(|e| DecodeError::InvalidBody {
            event_type,
            reason: e.to_string(),
        })
}

/// Encodes an event as a single JSON line (no trailing newline).
///
/// # Errors
///
/// Returns the serializer error; events built from finite numbers always
/// encode.
pub fn encode_event(event: &DomainEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;

    #[test]
    fn test_decode_known_event() {
        let raw = br#"{
            "eventId": "7f1a9b8e-9c3d-4b7a-8e2f-0a1b2c3d4e5f",
            "entityId": "I1",
            "timestamp": "2024-05-01T12:00:00Z",
            "eventType": "ITEM_POSITION_CHANGED",
            "locationId": "L2"
        }"#;
        let InboundEvent::Known(event) = decode_event(raw).unwrap() else {
            panic!("expected a known event");
        };
        assert_eq!(event.entity_id, "I1");
        assert_eq!(
            event.payload,
            EventPayload::ItemPositionChanged {
                location_id: "L2".to_string()
            }
        );
    }

    #[test]
    fn test_decode_connection_with_location_aliases() {
        let raw = br#"{
            "eventId": "7f1a9b8e-9c3d-4b7a-8e2f-0a1b2c3d4e5f",
            "entityId": "L1",
            "timestamp": "2024-05-01T12:00:00Z",
            "eventType": "LOCATION_CONNECTION_CREATED",
            "location1Id": "L1",
            "location2Id": "L2"
        }"#;
        let InboundEvent::Known(event) = decode_event(raw).unwrap() else {
            panic!("expected a known event");
        };
        assert_eq!(
            event.payload,
            EventPayload::LocationConnectionCreated {
                from_id: Some("L1".to_string()),
                to_id: "L2".to_string(),
            }
        );

        let bare = br#"{
            "eventId": "7f1a9b8e-9c3d-4b7a-8e2f-0a1b2c3d4e5f",
            "entityId": "L1",
            "timestamp": "2024-05-01T12:00:00Z",
            "eventType": "LOCATION_CONNECTION_CREATED",
            "toId": "L2"
        }"#;
        let InboundEvent::Known(event) = decode_event(bare).unwrap() else {
            panic!("expected a known event");
        };
        assert!(matches!(
            event.payload,
            EventPayload::LocationConnectionCreated { from_id: None, .. }
        ));
    }

    #[test]
    fn test_decode_unit_variant_ignores_extra_fields() {
        let raw = br#"{
            "eventId": "7f1a9b8e-9c3d-4b7a-8e2f-0a1b2c3d4e5f",
            "entityId": "L1",
            "timestamp": "2024-05-01T12:00:00Z",
            "eventType": "LOCATION_DELETED",
            "reason": "decommissioned"
        }"#;
        let InboundEvent::Known(event) = decode_event(raw).unwrap() else {
            panic!("expected a known event");
        };
        assert_eq!(event.payload, EventPayload::LocationDeleted);
    }

    #[test]
    fn test_decode_applies_defaults() {
        let raw = br#"{
            "eventId": "7f1a9b8e-9c3d-4b7a-8e2f-0a1b2c3d4e5f",
            "entityId": "L1",
            "timestamp": "2024-05-01T12:00:00Z",
            "eventType": "LOCATION_CREATED",
            "name": "belt",
            "length": 10.0
        }"#;
        let InboundEvent::Known(event) = decode_event(raw).unwrap() else {
            panic!("expected a known event");
        };
        let EventPayload::LocationCreated {
            active,
            latitude,
            location_type,
            ..
        } = event.payload
        else {
            panic!("expected LocationCreated");
        };
        assert!(active);
        assert!(latitude.is_none());
        assert!(location_type.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_unrecognized() {
        let raw = br#"{"eventType":"ITEM_TELEPORTED","entityId":"I9","x":1}"#;
        assert_eq!(
            decode_event(raw).unwrap(),
            InboundEvent::Unrecognized {
                event_type: "ITEM_TELEPORTED".to_string(),
                entity_id: Some("I9".to_string()),
            }
        );
    }

    #[test]
    fn test_known_tag_with_bad_body_is_an_error() {
        let raw = br#"{"eventType":"ITEM_SPEED_CHANGED","entityId":"I1","speed":"fast"}"#;
        let err = decode_event(raw).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBody { .. }));
    }

    #[test]
    fn test_missing_tag_and_non_object() {
        assert!(matches!(
            decode_event(br#"{"entityId":"I1"}"#),
            Err(DecodeError::MissingEventType)
        ));
        assert!(matches!(decode_event(b"[1,2]"), Err(DecodeError::NotAnObject)));
        assert!(matches!(decode_event(b"{"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_encoded_event_decodes_to_itself() {
        let mut props = crate::domain::Properties::new();
        props.insert("color".to_string(), serde_json::json!("red"));
        let event = DomainEvent::item_properties_updated("I1", props);
        let line = encode_event(&event).unwrap();
        assert!(!line.contains('\n'));
        assert_eq!(decode_event(line.as_bytes()).unwrap(), InboundEvent::Known(event));
    }
}
