//! In-memory graph store.
//!
//! A thread-safe implementation of [`GraphStore`] for embedded usage, tests,
//! and as a reference for the optimistic-concurrency contract.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::domain::Properties;
use crate::event::DomainEvent;
use crate::storage::traits::{
    Edge, EdgeId, EdgeKind, GraphStore, StorageError, Vertex, VertexId, VertexKind,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

fn conflict(id: &str, expected: u64, actual: Option<u64>) -> StorageError {
    StorageError::ConcurrentModification {
        id: id.to_string(),
        expected,
        actual,
    }
}

#[derive(Debug, Default)]
struct GraphState {
    next_vertex: u64,
    next_edge: u64,
    vertices: HashMap<VertexId, Vertex>,
    by_external: HashMap<(VertexKind, String), VertexId>,
    edges: HashMap<EdgeId, Edge>,
    outbound: HashMap<VertexId, BTreeSet<EdgeId>>,
    inbound: HashMap<VertexId, BTreeSet<EdgeId>>,
    event_log: HashMap<String, Vec<DomainEvent>>,
}

impl GraphState {
    fn vertex(&self, id: VertexId) -> Result<&Vertex, StorageError> {
        self.vertices.get(&id).ok_or_else(|| StorageError::NotFound {
            id: id.to_string(),
        })
    }

    fn edges_in(&self, index: &HashMap<VertexId, BTreeSet<EdgeId>>, at: VertexId, kind: EdgeKind) -> Vec<Edge> {
        index
            .get(&at)
            .into_iter()
            .flatten()
            .filter_map(|id| self.edges.get(id))
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    fn unlink_edge(&mut self, edge_id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&edge_id)?;
        if let Some(set) = self.outbound.get_mut(&edge.from) {
            set.remove(&edge_id);
        }
        if let Some(set) = self.inbound.get_mut(&edge.to) {
            set.remove(&edge_id);
        }
        Some(edge)
    }
}

/// Write counters, useful for asserting that reconciliation is minimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Successful `create_vertex` and `save_vertex` calls.
    pub vertex_writes: u64,
    /// Edges created.
    pub edges_created: u64,
    /// Edges deleted, including those removed with their vertex.
    pub edges_deleted: u64,
    /// Successful `save_edge` calls.
    pub edge_writes: u64,
    /// Events appended to the log.
    pub events_logged: u64,
}

impl StoreStats {
    /// Structural edge writes (creates plus deletes).
    #[must_use]
    pub const fn edge_churn(&self) -> u64 {
        self.edges_created + self.edges_deleted
    }
}

#[derive(Debug, Default)]
struct Counters {
    vertex_writes: AtomicU64,
    edges_created: AtomicU64,
    edges_deleted: AtomicU64,
    edge_writes: AtomicU64,
    events_logged: AtomicU64,
}

/// Thread-safe in-memory graph store.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
    counters: Counters,
    closed: AtomicBool,
}

impl InMemoryGraphStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the write counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            vertex_writes: self.counters.vertex_writes.load(Ordering::Relaxed),
            edges_created: self.counters.edges_created.load(Ordering::Relaxed),
            edges_deleted: self.counters.edges_deleted.load(Ordering::Relaxed),
            edge_writes: self.counters.edge_writes.load(Ordering::Relaxed),
            events_logged: self.counters.events_logged.load(Ordering::Relaxed),
        }
    }

    /// Number of live edges.
    ///
    /// # Errors
    /// Returns an error if the store is closed or its lock is poisoned.
    pub fn edge_count(&self) -> Result<usize, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("graph state"))?;
        Ok(state.edges.len())
    }

    /// Returns true once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

impl GraphStore for InMemoryGraphStore {
    fn load_vertex(&self, kind: VertexKind, external_id: &str) -> Result<Vertex, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("graph state"))?;
        state
            .by_external
            .get(&(kind, external_id.to_string()))
            .and_then(|id| state.vertices.get(id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                id: external_id.to_string(),
            })
    }

    fn get_vertex(&self, id: VertexId) -> Result<Vertex, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("graph state"))?;
        state.vertex(id).cloned()
    }

    fn list_vertices(&self, kind: VertexKind) -> Result<Vec<Vertex>, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("graph state"))?;
        let mut out: Vec<Vertex> = state
            .vertices
            .values()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(out)
    }

    fn create_vertex(
        &self,
        kind: VertexKind,
        external_id: &str,
        properties: Properties,
    ) -> Result<Vertex, StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("graph state"))?;
        let key = (kind, external_id.to_string());
        if state.by_external.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                id: external_id.to_string(),
            });
        }

        state.next_vertex += 1;
        let vertex = Vertex {
            id: VertexId(state.next_vertex),
            kind,
            external_id: external_id.to_string(),
            version: 1,
            properties,
        };
        state.by_external.insert(key, vertex.id);
        state.vertices.insert(vertex.id, vertex.clone());
        Self::bump(&self.counters.vertex_writes, 1);
        Ok(vertex)
    }

    fn save_vertex(&self, vertex: &Vertex) -> Result<Vertex, StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("graph state"))?;
        let Some(stored) = state.vertices.get_mut(&vertex.id) else {
            return Err(conflict(&vertex.external_id, vertex.version, None));
        };
        if stored.version != vertex.version {
            return Err(conflict(&vertex.external_id, vertex.version, Some(stored.version)));
        }

        stored.properties.clone_from(&vertex.properties);
        stored.version += 1;
        let saved = stored.clone();
        Self::bump(&self.counters.vertex_writes, 1);
        Ok(saved)
    }

    fn delete_vertex(&self, vertex: &Vertex) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("graph state"))?;
        let actual = state.vertices.get(&vertex.id).map(|v| v.version);
        if actual != Some(vertex.version) {
            return Err(conflict(&vertex.external_id, vertex.version, actual));
        }

        let incident: Vec<EdgeId> = state
            .outbound
            .remove(&vertex.id)
            .into_iter()
            .flatten()
            .chain(state.inbound.remove(&vertex.id).into_iter().flatten())
            .collect();
        let mut removed = 0;
        for edge_id in incident {
            if state.unlink_edge(edge_id).is_some() {
                removed += 1;
            }
        }

        state.vertices.remove(&vertex.id);
        state
            .by_external
            .remove(&(vertex.kind, vertex.external_id.clone()));
        Self::bump(&self.counters.edges_deleted, removed);
        Ok(())
    }

    fn outbound_edges(&self, from: VertexId, kind: EdgeKind) -> Result<Vec<Edge>, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("graph state"))?;
        Ok(state.edges_in(&state.outbound, from, kind))
    }

    fn inbound_edges(&self, to: VertexId, kind: EdgeKind) -> Result<Vec<Edge>, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("graph state"))?;
        Ok(state.edges_in(&state.inbound, to, kind))
    }

    fn create_edge(&self, from: &Vertex, to: &Vertex, kind: EdgeKind) -> Result<Edge, StorageError> {
        self.ensure_open()?;
        let (from_kind, to_kind) = kind.endpoints();
        for (vertex, expected) in [(from, from_kind), (to, to_kind)] {
            if vertex.kind != expected {
                return Err(StorageError::KindMismatch {
                    id: vertex.external_id.clone(),
                    expected,
                    actual: vertex.kind,
                });
            }
        }

        let mut state = self.state.write().map_err(|_| lock_err("graph state"))?;
        state.vertex(from.id)?;
        state.vertex(to.id)?;

        state.next_edge += 1;
        let edge = Edge {
            id: EdgeId(state.next_edge),
            kind,
            from: from.id,
            to: to.id,
            source_id: from.external_id.clone(),
            target_id: to.external_id.clone(),
            version: 1,
            properties: BTreeMap::new(),
        };
        state.outbound.entry(from.id).or_default().insert(edge.id);
        state.inbound.entry(to.id).or_default().insert(edge.id);
        state.edges.insert(edge.id, edge.clone());
        Self::bump(&self.counters.edges_created, 1);
        Ok(edge)
    }

    fn save_edge(&self, edge: &Edge) -> Result<Edge, StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("graph state"))?;
        let Some(stored) = state.edges.get_mut(&edge.id) else {
            return Err(conflict(&edge.id.to_string(), edge.version, None));
        };
        if stored.version != edge.version {
            return Err(conflict(&edge.id.to_string(), edge.version, Some(stored.version)));
        }

        stored.properties.clone_from(&edge.properties);
        stored.version += 1;
        let saved = stored.clone();
        Self::bump(&self.counters.edge_writes, 1);
        Ok(saved)
    }

    fn delete_edge(&self, edge: &Edge) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("graph state"))?;
        let actual = state.edges.get(&edge.id).map(|e| e.version);
        if actual != Some(edge.version) {
            return Err(conflict(&edge.id.to_string(), edge.version, actual));
        }
        state.unlink_edge(edge.id);
        Self::bump(&self.counters.edges_deleted, 1);
        Ok(())
    }

    fn append_event_log(&self, event: &DomainEvent) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut state = self.state.write().map_err(|_| lock_err("event log"))?;
        let log = state.event_log.entry(event.entity_id.clone()).or_default();
        if log.iter().any(|logged| logged.event_id == event.event_id) {
            tracing::debug!(event_id = %event.event_id, "event already logged");
            return Ok(());
        }
        log.push(event.clone());
        Self::bump(&self.counters.events_logged, 1);
        Ok(())
    }

    fn events_for_entity(&self, entity_id: &str) -> Result<Vec<DomainEvent>, StorageError> {
        self.ensure_open()?;
        let state = self.state.read().map_err(|_| lock_err("event log"))?;
        let mut events = state.event_log.get(entity_id).cloned().unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    fn close(&self) -> Result<(), StorageError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("in-memory graph store closed");
        }
        Ok(())
    }
}
