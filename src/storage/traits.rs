//! Abstract graph storage contract.
//!
//! The read model is a property graph: items and locations are vertices,
//! an item's position and a location's outbound connections are typed
//! edges. Every vertex and edge carries a version; writes supply the
//! version they read and fail with `ConcurrentModification` if another
//! writer got there first.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Properties;
use crate::event::DomainEvent;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No vertex with this external id.
    #[error("Entity not found: {id}")]
    NotFound { id: String },

    /// A vertex with this external id already exists.
    #[error("Entity already exists: {id}")]
    AlreadyExists { id: String },

    /// The record changed (or vanished) since it was read.
    #[error("Concurrent modification of {id}: expected version {expected}, found {actual:?}")]
    ConcurrentModification {
        id: String,
        expected: u64,
        actual: Option<u64>,
    },

    /// A vertex of the wrong kind was supplied.
    #[error("Vertex {id} is a {actual}, expected a {expected}")]
    KindMismatch {
        id: String,
        expected: VertexKind,
        actual: VertexKind,
    },

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Stored properties could not be converted.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Returns true for optimistic-concurrency conflicts.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// Internal vertex handle assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub u64);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Internal edge handle assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub u64);

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Vertex classes. External ids are unique per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VertexKind {
    /// A mobile item.
    Item,
    /// A location segment.
    Location,
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item => write!(f, "Item"),
            Self::Location => write!(f, "Location"),
        }
    }
}

/// Edge classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Item -> Location. At most one per item.
    HasPosition,
    /// Location -> Location.
    ConnectedTo,
}

impl EdgeKind {
    /// The (source, target) vertex kinds this edge class joins.
    #[must_use]
    pub const fn endpoints(self) -> (VertexKind, VertexKind) {
        match self {
            Self::HasPosition => (VertexKind::Item, VertexKind::Location),
            Self::ConnectedTo => (VertexKind::Location, VertexKind::Location),
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HasPosition => write!(f, "HasPosition"),
            Self::ConnectedTo => write!(f, "ConnectedTo"),
        }
    }
}

/// A stored entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    /// Store-assigned handle.
    pub id: VertexId,
    /// Vertex class.
    pub kind: VertexKind,
    /// Stable external key (item or location id).
    pub external_id: String,
    /// Optimistic-concurrency version; starts at 1.
    pub version: u64,
    /// Entity fields.
    pub properties: Properties,
}

/// A stored, typed, directed relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Store-assigned handle.
    pub id: EdgeId,
    /// Edge class.
    pub kind: EdgeKind,
    /// Source vertex.
    pub from: VertexId,
    /// Target vertex.
    pub to: VertexId,
    /// External id of the source vertex.
    pub source_id: String,
    /// External id of the target vertex.
    pub target_id: String,
    /// Optimistic-concurrency version; starts at 1.
    pub version: u64,
    /// Edge-local fields (e.g. position progress).
    pub properties: Properties,
}

/// Storage trait for the graph-backed read model and its event log.
///
/// # Concurrency
/// - `save_vertex`, `delete_vertex`, `save_edge` and `delete_edge` compare
///   the supplied version with the stored one and fail with
///   `ConcurrentModification` on mismatch or if the record is gone
/// - Implementations must be safe to share across threads
///
/// # Lifecycle
/// After `close` every call fails with `StorageError::Closed`.
pub trait GraphStore: Send + Sync {
    /// Load a vertex by kind and external id.
    fn load_vertex(&self, kind: VertexKind, external_id: &str) -> Result<Vertex, StorageError>;

    /// Load a vertex by handle.
    fn get_vertex(&self, id: VertexId) -> Result<Vertex, StorageError>;

    /// All vertices of a kind, ordered by external id.
    fn list_vertices(&self, kind: VertexKind) -> Result<Vec<Vertex>, StorageError>;

    /// Create a vertex. Fails with `AlreadyExists` if the external id is taken.
    fn create_vertex(
        &self,
        kind: VertexKind,
        external_id: &str,
        properties: Properties,
    ) -> Result<Vertex, StorageError>;

    /// Persist a vertex's properties, returning it with its new version.
    fn save_vertex(&self, vertex: &Vertex) -> Result<Vertex, StorageError>;

    /// Delete a vertex together with every incident edge.
    fn delete_vertex(&self, vertex: &Vertex) -> Result<(), StorageError>;

    /// Outbound edges of one class, ordered by edge id.
    fn outbound_edges(&self, from: VertexId, kind: EdgeKind) -> Result<Vec<Edge>, StorageError>;

    /// Inbound edges of one class, ordered by edge id.
    fn inbound_edges(&self, to: VertexId, kind: EdgeKind) -> Result<Vec<Edge>, StorageError>;

    /// Create an edge with empty properties.
    fn create_edge(&self, from: &Vertex, to: &Vertex, kind: EdgeKind) -> Result<Edge, StorageError>;

    /// Persist an edge's properties, returning it with its new version.
    fn save_edge(&self, edge: &Edge) -> Result<Edge, StorageError>;

    /// Delete an edge.
    fn delete_edge(&self, edge: &Edge) -> Result<(), StorageError>;

    /// Append an event to the durable per-entity event log.
    ///
    /// Appending an `event_id` already logged for the entity is a no-op, so a
    /// redelivered event appears in the history once.
    fn append_event_log(&self, event: &DomainEvent) -> Result<(), StorageError>;

    /// Logged events for an entity, ordered by timestamp.
    fn events_for_entity(&self, entity_id: &str) -> Result<Vec<DomainEvent>, StorageError>;

    /// Release backend resources. Idempotent.
    fn close(&self) -> Result<(), StorageError>;
}
