//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use trackgraph::archive::{ArchiveError, EventArchive};
use trackgraph::domain::Properties;
use trackgraph::retry::RetryPolicy;
use trackgraph::storage::{Edge, EdgeKind, GraphStore, StorageError, Vertex, VertexId, VertexKind};
use trackgraph::{
    ChangeNotifier, DomainEvent, EventProcessor, InMemoryEventArchive, InMemoryGraphStore,
    Location, NoopNotifier, ProcessorConfig,
};

/// A store write that `FlakyStore` can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Write {
    SaveVertex,
    CreateEdge,
    SaveEdge,
    DeleteEdge,
}

/// Wraps an in-memory store and fails one kind of write with a conflict a
/// set number of times before letting writes through.
pub struct FlakyStore {
    inner: InMemoryGraphStore,
    target: Mutex<Write>,
    conflicts_left: AtomicU32,
    calls: [AtomicU32; 4],
}

impl FlakyStore {
    pub fn new(conflicts: u32) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            target: Mutex::new(Write::SaveVertex),
            conflicts_left: AtomicU32::new(conflicts),
            calls: Default::default(),
        }
    }

    /// Inject `conflicts` more `save_vertex` conflicts and reset the counters.
    pub fn set_conflicts(&self, conflicts: u32) {
        self.inject(Write::SaveVertex, conflicts);
    }

    /// Inject `conflicts` conflicts on `write` and reset the counters.
    pub fn inject(&self, write: Write, conflicts: u32) {
        *self.target.lock().unwrap() = write;
        self.conflicts_left.store(conflicts, Ordering::SeqCst);
        for calls in &self.calls {
            calls.store(0, Ordering::SeqCst);
        }
    }

    pub fn calls(&self, write: Write) -> u32 {
        self.calls[write as usize].load(Ordering::SeqCst)
    }

    pub fn save_vertex_calls(&self) -> u32 {
        self.calls(Write::SaveVertex)
    }

    pub fn inner(&self) -> &InMemoryGraphStore {
        &self.inner
    }

    fn check(&self, write: Write, id: &str, version: u64) -> Result<(), StorageError> {
        self.calls[write as usize].fetch_add(1, Ordering::SeqCst);
        if *self.target.lock().unwrap() != write {
            return Ok(());
        }
        let injected = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::ConcurrentModification {
                id: id.to_string(),
                expected: version,
                actual: Some(version + 1),
            });
        }
        Ok(())
    }
}

impl GraphStore for FlakyStore {
    fn load_vertex(&self, kind: VertexKind, external_id: &str) -> Result<Vertex, StorageError> {
        self.inner.load_vertex(kind, external_id)
    }

    fn get_vertex(&self, id: VertexId) -> Result<Vertex, StorageError> {
        self.inner.get_vertex(id)
    }

    fn list_vertices(&self, kind: VertexKind) -> Result<Vec<Vertex>, StorageError> {
        self.inner.list_vertices(kind)
    }

    fn create_vertex(
        &self,
        kind: VertexKind,
        external_id: &str,
        properties: Properties,
    ) -> Result<Vertex, StorageError> {
        self.inner.create_vertex(kind, external_id, properties)
    }

    fn save_vertex(&self, vertex: &Vertex) -> Result<Vertex, StorageError> {
        self.check(Write::SaveVertex, &vertex.external_id, vertex.version)?;
        self.inner.save_vertex(vertex)
    }

    fn delete_vertex(&self, vertex: &Vertex) -> Result<(), StorageError> {
        self.inner.delete_vertex(vertex)
    }

    fn outbound_edges(&self, from: VertexId, kind: EdgeKind) -> Result<Vec<Edge>, StorageError> {
        self.inner.outbound_edges(from, kind)
    }

    fn inbound_edges(&self, to: VertexId, kind: EdgeKind) -> Result<Vec<Edge>, StorageError> {
        self.inner.inbound_edges(to, kind)
    }

    fn create_edge(&self, from: &Vertex, to: &Vertex, kind: EdgeKind) -> Result<Edge, StorageError> {
        self.check(Write::CreateEdge, &from.external_id, from.version)?;
        self.inner.create_edge(from, to, kind)
    }

    fn save_edge(&self, edge: &Edge) -> Result<Edge, StorageError> {
        self.check(Write::SaveEdge, &edge.id.to_string(), edge.version)?;
        self.inner.save_edge(edge)
    }

    fn delete_edge(&self, edge: &Edge) -> Result<(), StorageError> {
        self.check(Write::DeleteEdge, &edge.id.to_string(), edge.version)?;
        self.inner.delete_edge(edge)
    }

    fn append_event_log(&self, event: &DomainEvent) -> Result<(), StorageError> {
        self.inner.append_event_log(event)
    }

    fn events_for_entity(&self, entity_id: &str) -> Result<Vec<DomainEvent>, StorageError> {
        self.inner.events_for_entity(entity_id)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

/// An archive that rejects every event.
pub struct FailingArchive;

impl EventArchive for FailingArchive {
    fn record(&self, _event: &DomainEvent) -> Result<(), ArchiveError> {
        Err(ArchiveError::Backend("sink unavailable".to_string()))
    }
}

/// A processor over `store` that retries without sleeping.
pub fn fast_processor(
    store: Arc<dyn GraphStore>,
    notifier: Arc<dyn ChangeNotifier>,
) -> EventProcessor {
    EventProcessor::with_config(
        store,
        Arc::new(InMemoryEventArchive::new()),
        notifier,
        ProcessorConfig {
            retry: RetryPolicy::immediate(3),
            ..ProcessorConfig::default()
        },
    )
    .unwrap()
}

/// A processor over a fresh in-memory store.
pub fn memory_processor() -> (Arc<InMemoryGraphStore>, EventProcessor) {
    let store = Arc::new(InMemoryGraphStore::new());
    let processor = fast_processor(store.clone(), Arc::new(NoopNotifier));
    (store, processor)
}

/// `L1 -> L2` plus an unconnected `L3`, and item `I1`.
pub fn small_network() -> Vec<DomainEvent> {
    vec![
        DomainEvent::location_created(&Location::new("L1", "inbound belt", 10.0)),
        DomainEvent::location_created(&Location::new("L2", "sorter", 10.0)),
        DomainEvent::location_created(&Location::new("L3", "outbound belt", 10.0)),
        DomainEvent::location_connection_created("L1", "L2"),
        DomainEvent::item_created("I1", "crate", 1.0),
    ]
}
