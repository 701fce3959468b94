//! Items: the mobile things tracked across locations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::time::elapsed_millis;

use super::{Location, ProgressInfo, Properties};

/// A mobile item and its current position on the location graph.
///
/// Transitions never mutate in place: each returns the next state, so a
/// load-transform-save cycle can be restarted from scratch after a write
/// conflict.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use trackgraph::{Item, Location};
///
/// let belt = Location::new("L1", "belt", 10.0);
/// let item = Item::new("I1", "crate", 2.0)
///     .update_position(&belt, Utc::now())
///     .unwrap();
/// assert_eq!(item.location_id(), Some("L1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Stable external key.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current speed, in meters per unit time.
    pub speed: f64,
    /// Whether the item is moving.
    pub active: bool,
    /// Open property map.
    pub properties: Option<Properties>,
    /// The location the item is currently on.
    pub location: Option<Location>,
    /// Progress along `location`.
    pub progress_info: Option<ProgressInfo>,
}

impl Item {
    /// Creates an active, unpositioned item.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, speed: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            speed,
            active: true,
            properties: None,
            location: None,
            progress_info: None,
        }
    }

    /// Checks the invariants a freshly created item must satisfy.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidField` for an empty id or a negative
    /// or non-finite speed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::invalid_field("id", "item id cannot be empty"));
        }
        check_speed(self.speed)
    }

    /// Id of the current location, if any.
    #[must_use]
    pub fn location_id(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.id.as_str())
    }

    /// Returns an active copy. Already-active items come back unchanged.
    #[must_use]
    pub fn resume(&self) -> Self {
        Self {
            active: true,
            ..self.clone()
        }
    }

    /// Returns a stopped copy. Already-stopped items come back unchanged.
    #[must_use]
    pub fn stop(&self) -> Self {
        Self {
            active: false,
            ..self.clone()
        }
    }

    /// Moves the item onto `new_location`.
    ///
    /// An unpositioned item accepts any location. A positioned item may only
    /// move along one of its current location's outbound connections. Every
    /// move starts a fresh `ProgressInfo` at `at`; staying on the current
    /// location keeps the existing progress.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidTransition` if the current location
    /// does not connect to `new_location`.
    pub fn update_position(
        &self,
        new_location: &Location,
        at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        match &self.location {
            Some(current) if current.id == new_location.id => Ok(Self {
                location: Some(new_location.clone()),
                ..self.clone()
            }),
            Some(current) if !current.can_move_to(&new_location.id) => {
                Err(ValidationError::InvalidTransition {
                    item_id: self.id.clone(),
                    from: current.id.clone(),
                    to: new_location.id.clone(),
                })
            }
            _ => Ok(Self {
                location: Some(new_location.clone()),
                progress_info: Some(ProgressInfo::start(at)),
                ..self.clone()
            }),
        }
    }

    /// Applies a speed change observed at `at`.
    ///
    /// Progress is first advanced with the speed the item had until now:
    /// `elapsed_ms * previous_speed / location.length`. The new speed only
    /// applies from `at` onwards.
    ///
    /// # Errors
    ///
    /// - `PreconditionFailed` if the item has no location, no progress record,
    ///   or the location has no positive length
    /// - `StaleEvent` if `at` precedes the last progress update
    /// - `InvalidField` if `new_speed` is negative or not finite
    pub fn update_speed(&self, new_speed: f64, at: DateTime<Utc>) -> Result<Self, ValidationError> {
        check_speed(new_speed)?;

        let location = self.location.as_ref().ok_or_else(|| {
            ValidationError::precondition(format!("item {} has no location", self.id))
        })?;
        let progress = self.progress_info.ok_or_else(|| {
            ValidationError::precondition(format!("item {} has no progress record", self.id))
        })?;
        if !location.length.is_finite() || location.length <= 0.0 {
            return Err(ValidationError::precondition(format!(
                "location {} has no positive length",
                location.id
            )));
        }

        let elapsed = elapsed_millis(progress.datetime, at);
        if elapsed < 0 {
            return Err(ValidationError::StaleEvent {
                entity_id: self.id.clone(),
                event_time: at,
                last_time: progress.datetime,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let delta = elapsed as f64 * self.speed / location.length;

        Ok(Self {
            speed: new_speed,
            progress_info: Some(ProgressInfo::new(progress.progress + delta, at)),
            ..self.clone()
        })
    }

    /// Merges `updates` into the property map, overwriting existing keys.
    ///
    /// `None` is a no-op; an item without properties starts from an empty map.
    #[must_use]
    pub fn update_properties(&self, updates: Option<&Properties>) -> Self {
        let Some(updates) = updates else {
            return self.clone();
        };
        let mut merged = self.properties.clone().unwrap_or_default();
        merged.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            properties: Some(merged),
            ..self.clone()
        }
    }
}

fn check_speed(speed: f64) -> Result<(), ValidationError> {
    if speed.is_finite() && speed >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::invalid_field(
            "speed",
            format!("must be a non-negative number (got {speed})"),
        ))
    }
}
