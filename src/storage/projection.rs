//! Mapping between domain entities and graph records.
//!
//! Entities are never kept resident. Each event loads the vertex, its
//! relevant edges and (for items) the current location, rebuilds the
//! entity, and hands both the entity and the raw records to the caller so
//! the subsequent write can carry the versions it read.
//!
//! An item vertex also records its committed position (location id plus
//! progress). Every position or speed change writes that record in the same
//! vertex save that passes the version check, and the `HasPosition` edge and
//! its progress properties are brought in line afterwards. A unit retried
//! after an edge write failed therefore reads what it already committed
//! instead of a half-updated pair of records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{Item, Location, ProgressInfo, Properties};
use crate::storage::traits::{Edge, EdgeKind, GraphStore, StorageError, Vertex, VertexKind};

/// Vertex property keys.
pub mod keys {
    /// Display name.
    pub const NAME: &str = "name";
    /// Speed.
    pub const SPEED: &str = "speed";
    /// Activation flag.
    pub const ACTIVE: &str = "active";
    /// Open property map.
    pub const PROPERTIES: &str = "properties";
    /// Location length.
    pub const LENGTH: &str = "length";
    /// Location latitude.
    pub const LATITUDE: &str = "latitude";
    /// Location longitude.
    pub const LONGITUDE: &str = "longitude";
    /// Location category.
    pub const TYPE: &str = "type";
    /// Position-edge progress.
    pub const PROGRESS: &str = "progress";
    /// Position-edge progress timestamp.
    pub const DATETIME: &str = "datetime";
    /// Committed position on an item vertex.
    pub const POSITION: &str = "position";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRecord {
    location_id: String,
    progress: f64,
    datetime: DateTime<Utc>,
}

impl PositionRecord {
    fn progress_info(&self) -> ProgressInfo {
        ProgressInfo::new(self.progress, self.datetime)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ItemRecord {
    name: String,
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    properties: Option<Properties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<PositionRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocationRecord {
    name: String,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
    length: f64,
    #[serde(default)]
    speed: f64,
    #[serde(rename = "type", default)]
    location_type: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    properties: Option<Properties>,
}

fn to_properties<T: Serialize>(record: &T) -> Result<Properties, StorageError> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(map)) => Ok(map.into_iter().collect()),
        Ok(other) => Err(StorageError::Serialization(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(StorageError::Serialization(e.to_string())),
    }
}

fn from_properties<T: DeserializeOwned>(what: &str, properties: &Properties) -> Result<T, StorageError> {
    let object: serde_json::Map<String, serde_json::Value> = properties
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| StorageError::Serialization(format!("{what}: {e}")))
}

/// Vertex properties for an item.
///
/// The `HasPosition` edge is not created here; a positioned item with
/// progress only carries its committed position record.
///
/// # Errors
/// Returns `StorageError::Serialization` if a field does not serialize.
pub fn item_properties(item: &Item) -> Result<Properties, StorageError> {
    let position = match (item.location_id(), item.progress_info) {
        (Some(location_id), Some(progress)) => Some(PositionRecord {
            location_id: location_id.to_string(),
            progress: progress.progress,
            datetime: progress.datetime,
        }),
        _ => None,
    };
    to_properties(&ItemRecord {
        name: item.name.clone(),
        speed: item.speed,
        active: item.active,
        properties: item.properties.clone(),
        position,
    })
}

/// Records `progress` on `location_id` as the item's committed position.
///
/// # Errors
/// Returns `StorageError::Serialization` if the record does not serialize.
pub fn set_committed_position(
    vertex: &mut Vertex,
    location_id: &str,
    progress: &ProgressInfo,
) -> Result<(), StorageError> {
    let record = PositionRecord {
        location_id: location_id.to_string(),
        progress: progress.progress,
        datetime: progress.datetime,
    };
    let value = serde_json::to_value(record).map_err(|e| StorageError::Serialization(e.to_string()))?;
    vertex.properties.insert(keys::POSITION.to_string(), value);
    Ok(())
}

/// Picks the progress for an item positioned on `edge`.
///
/// The committed record wins when it names the edge's target. A record for
/// another location belongs to a move that never linked its edge and is
/// ignored. Edge progress newer than the record (hand-built data) wins.
fn resolve_progress(
    committed: Option<&PositionRecord>,
    edge: &Edge,
) -> Result<Option<ProgressInfo>, StorageError> {
    let on_edge = edge_progress(edge)?;
    let committed = committed
        .filter(|record| record.location_id == edge.target_id)
        .map(PositionRecord::progress_info);
    Ok(match (committed, on_edge) {
        (Some(record), Some(copy)) if copy.datetime > record.datetime => Some(copy),
        (Some(record), _) => Some(record),
        (None, copy) => copy,
    })
}

/// Vertex properties for a location. Connections live on edges, not here.
///
/// # Errors
/// Returns `StorageError::Serialization` if a field does not serialize.
pub fn location_properties(location: &Location) -> Result<Properties, StorageError> {
    to_properties(&LocationRecord {
        name: location.name.clone(),
        latitude: location.latitude,
        longitude: location.longitude,
        length: location.length,
        speed: location.speed,
        location_type: location.location_type.clone(),
        active: location.active,
        properties: location.properties.clone(),
    })
}

/// Edge properties recording progress on a position edge.
///
/// # Errors
/// Returns `StorageError::Serialization` if the record does not serialize.
pub fn progress_properties(progress: &ProgressInfo) -> Result<Properties, StorageError> {
    to_properties(progress)
}

/// Reads progress from a position edge. Edges without progress yield `None`.
///
/// # Errors
/// Returns `StorageError::Serialization` if the stored fields are malformed.
pub fn edge_progress(edge: &Edge) -> Result<Option<ProgressInfo>, StorageError> {
    if !edge.properties.contains_key(keys::PROGRESS) {
        return Ok(None);
    }
    from_properties("position edge", &edge.properties).map(Some)
}

/// Rebuilds a location from its vertex and outbound connection edges.
///
/// # Errors
/// Returns `StorageError::Serialization` if the vertex fields are malformed.
pub fn location_from_records(vertex: &Vertex, connections: &[Edge]) -> Result<Location, StorageError> {
    let record: LocationRecord = from_properties(&vertex.external_id, &vertex.properties)?;
    Ok(Location {
        id: vertex.external_id.clone(),
        name: record.name,
        latitude: record.latitude,
        longitude: record.longitude,
        length: record.length,
        speed: record.speed,
        location_type: record.location_type,
        active: record.active,
        properties: record.properties,
        outbound_connection_ids: connections
            .iter()
            .map(|e| e.target_id.clone())
            .filter(|id| *id != vertex.external_id)
            .collect::<BTreeSet<_>>(),
    })
}

/// A location as read from the store, with the records it came from.
#[derive(Debug, Clone)]
pub struct LoadedLocation {
    /// The location vertex.
    pub vertex: Vertex,
    /// The rebuilt entity, connections included.
    pub location: Location,
    /// Outbound `ConnectedTo` edges.
    pub connection_edges: Vec<Edge>,
}

/// Loads a location and its outbound connections.
///
/// # Errors
/// Returns `StorageError::NotFound` if no such location exists.
pub fn load_location(store: &dyn GraphStore, location_id: &str) -> Result<LoadedLocation, StorageError> {
    let vertex = store.load_vertex(VertexKind::Location, location_id)?;
    load_location_vertex(store, vertex)
}

fn load_location_vertex(store: &dyn GraphStore, vertex: Vertex) -> Result<LoadedLocation, StorageError> {
    let connection_edges = store.outbound_edges(vertex.id, EdgeKind::ConnectedTo)?;
    let location = location_from_records(&vertex, &connection_edges)?;
    Ok(LoadedLocation {
        vertex,
        location,
        connection_edges,
    })
}

/// An item as read from the store, with the records it came from.
#[derive(Debug, Clone)]
pub struct LoadedItem {
    /// The item vertex.
    pub vertex: Vertex,
    /// The rebuilt entity, location and progress included.
    pub item: Item,
    /// The `HasPosition` edge, if the item is positioned.
    pub position_edge: Option<Edge>,
}

/// Loads an item, its position edge, and the location it points at.
///
/// # Errors
/// Returns `StorageError::NotFound` if no such item exists.
pub fn load_item(store: &dyn GraphStore, item_id: &str) -> Result<LoadedItem, StorageError> {
    let vertex = store.load_vertex(VertexKind::Item, item_id)?;
    let record: ItemRecord = from_properties(item_id, &vertex.properties)?;

    let position_edge = store
        .outbound_edges(vertex.id, EdgeKind::HasPosition)?
        .into_iter()
        .next();

    let (location, progress_info) = match &position_edge {
        Some(edge) => {
            let target = store.get_vertex(edge.to)?;
            let loaded = load_location_vertex(store, target)?;
            (Some(loaded.location), resolve_progress(record.position.as_ref(), edge)?)
        }
        None => (None, None),
    };

    let item = Item {
        id: vertex.external_id.clone(),
        name: record.name,
        speed: record.speed,
        active: record.active,
        properties: record.properties,
        location,
        progress_info,
    };
    Ok(LoadedItem {
        vertex,
        item,
        position_edge,
    })
}
