//! Domain model.
//!
//! This module groups the two tracked entity types and the progress record
//! kept for positioned items. Every transition is a pure function from the
//! old entity to a new one; nothing here touches storage.

pub mod item;
pub mod location;
pub mod progress;

use std::collections::BTreeMap;

pub use item::Item;
pub use location::Location;
pub use progress::ProgressInfo;

/// Open, string-keyed property bag attached to items and locations.
pub type Properties = BTreeMap<String, serde_json::Value>;
