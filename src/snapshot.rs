//! Point-in-time view of the whole read model.
//!
//! Useful for dumping the graph after a replay and for comparing two runs.
//! A snapshot is built from individual reads, not a transaction, so it is
//! only consistent when no events are being applied.

use serde::{Deserialize, Serialize};

use crate::domain::{Location, ProgressInfo, Properties};
use crate::error::TrackResult;
use crate::storage::projection::{load_item, load_location};
use crate::storage::{GraphStore, VertexKind};

/// An item as seen from its location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    /// Item id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current speed.
    pub speed: f64,
    /// Whether the item is moving.
    pub active: bool,
    /// Open property map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
    /// Progress along its location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressInfo>,
}

/// A location and the items positioned on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationView {
    /// The location itself.
    #[serde(flatten)]
    pub location: Location,
    /// Items positioned on it, ordered by id.
    pub items: Vec<ItemView>,
}

/// A directed `CONNECTED_TO` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    /// Upstream location.
    pub source_id: String,
    /// Downstream location.
    pub target_id: String,
}

/// The read model at one moment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    /// Every location, ordered by id.
    pub locations: Vec<LocationView>,
    /// Items without a position, ordered by id.
    pub unpositioned: Vec<ItemView>,
    /// Every connection, ordered by source then target.
    pub connections: Vec<ConnectionView>,
}

impl GraphSnapshot {
    /// Read the whole graph from `store`.
    ///
    /// # Errors
    /// Returns `TrackError::Storage` if a read fails or a record cannot be
    /// decoded.
    pub fn capture(store: &dyn GraphStore) -> TrackResult<Self> {
        let mut snapshot = Self::default();

        for vertex in store.list_vertices(VertexKind::Location)? {
            let loaded = load_location(store, &vertex.external_id)?;
            snapshot
                .connections
                .extend(loaded.location.outbound_connection_ids.iter().map(|to| {
                    ConnectionView {
                        source_id: loaded.location.id.clone(),
                        target_id: to.clone(),
                    }
                }));
            snapshot.locations.push(LocationView {
                location: loaded.location,
                items: Vec::new(),
            });
        }

        for vertex in store.list_vertices(VertexKind::Item)? {
            let item = load_item(store, &vertex.external_id)?.item;
            let view = ItemView {
                id: item.id.clone(),
                name: item.name.clone(),
                speed: item.speed,
                active: item.active,
                properties: item.properties.clone(),
                progress: item.progress_info,
            };
            let slot = item.location_id().and_then(|id| {
                snapshot
                    .locations
                    .iter_mut()
                    .find(|view| view.location.id == id)
            });
            match slot {
                Some(location) => location.items.push(view),
                None => snapshot.unpositioned.push(view),
            }
        }

        Ok(snapshot)
    }

    /// Number of positioned items.
    #[must_use]
    pub fn positioned_items(&self) -> usize {
        self.locations.iter().map(|l| l.items.len()).sum()
    }

    /// The location holding `item_id`, if any.
    #[must_use]
    pub fn location_of(&self, item_id: &str) -> Option<&str> {
        self.locations
            .iter()
            .find(|l| l.items.iter().any(|i| i.id == item_id))
            .map(|l| l.location.id.as_str())
    }
}
