//! Locations: the vertices items travel over.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::Properties;

/// A segment of the network (conveyor section, road, ...) that items
/// traverse.
///
/// `outbound_connection_ids` lists the locations an item may move to next.
/// A location never connects to itself.
///
/// # Examples
///
/// ```
/// use trackgraph::Location;
///
/// let a = Location::new("L1", "inbound belt", 10.0);
/// let a = a.add_connection_to("L2").add_connection_to("L1");
/// assert!(a.can_move_to("L2"));
/// assert!(!a.can_move_to("L1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Stable external key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional latitude in degrees.
    pub latitude: Option<f64>,
    /// Optional longitude in degrees.
    pub longitude: Option<f64>,
    /// Length in meters; always positive.
    pub length: f64,
    /// Nominal transit speed on this location.
    pub speed: f64,
    /// Category tag.
    #[serde(rename = "type")]
    pub location_type: String,
    /// Whether the location currently accepts traffic.
    pub active: bool,
    /// Open property map.
    pub properties: Option<Properties>,
    /// Locations this one connects to directly.
    #[serde(default)]
    pub outbound_connection_ids: BTreeSet<String>,
}

impl Location {
    /// Creates an active location with no coordinates, speed or connections.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, length: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude: None,
            longitude: None,
            length,
            speed: 0.0,
            location_type: String::new(),
            active: true,
            properties: None,
            outbound_connection_ids: BTreeSet::new(),
        }
    }

    /// Checks the invariants a freshly created location must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidField` for an empty id, a length that
    /// is not strictly positive, a negative or non-finite speed, or
    /// coordinates out of range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::invalid_field("id", "location id cannot be empty"));
        }
        if !self.length.is_finite() || self.length <= 0.0 {
            return Err(ValidationError::invalid_field(
                "length",
                format!("must be a positive number of meters (got {})", self.length),
            ));
        }
        if !self.speed.is_finite() || self.speed < 0.0 {
            return Err(ValidationError::invalid_field(
                "speed",
                format!("must be a non-negative number (got {})", self.speed),
            ));
        }
        if let Some(lat) = self.latitude {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ValidationError::invalid_field(
                    "latitude",
                    format!("{lat} is outside [-90, 90]"),
                ));
            }
        }
        if let Some(lon) = self.longitude {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(ValidationError::invalid_field(
                    "longitude",
                    format!("{lon} is outside [-180, 180]"),
                ));
            }
        }
        Ok(())
    }

    /// Returns an active copy of this location.
    #[must_use]
    pub fn activate(&self) -> Self {
        Self {
            active: true,
            ..self.clone()
        }
    }

    /// Returns an inactive copy of this location.
    #[must_use]
    pub fn deactivate(&self) -> Self {
        Self {
            active: false,
            ..self.clone()
        }
    }

    /// Replaces the property map. `None` leaves the current map untouched.
    #[must_use]
    pub fn update_properties(&self, updated: Option<&Properties>) -> Self {
        match updated {
            Some(props) => Self {
                properties: Some(props.clone()),
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// Adds an outbound connection. Empty ids and self-connections are ignored.
    #[must_use]
    pub fn add_connection_to(&self, to_id: &str) -> Self {
        let mut next = self.clone();
        if !to_id.is_empty() && to_id != self.id {
            next.outbound_connection_ids.insert(to_id.to_string());
        }
        next
    }

    /// Removes an outbound connection; unknown ids are ignored.
    #[must_use]
    pub fn remove_connection_to(&self, to_id: &str) -> Self {
        let mut next = self.clone();
        next.outbound_connection_ids.remove(to_id);
        next
    }

    /// Returns true if an item here may move directly to `target_id`.
    #[must_use]
    pub fn can_move_to(&self, target_id: &str) -> bool {
        self.outbound_connection_ids.contains(target_id)
    }
}
