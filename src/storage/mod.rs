//! Graph storage for the read model.
//!
//! [`GraphStore`] is the contract the processor consumes; the in-memory
//! implementation backs tests and embedded use. [`projection`] maps between
//! graph records and domain entities.

mod memory;
pub mod projection;
mod traits;

pub use memory::{InMemoryGraphStore, StoreStats};
pub use projection::{load_item, load_location, LoadedItem, LoadedLocation};
pub use traits::{Edge, EdgeId, EdgeKind, GraphStore, StorageError, Vertex, VertexId, VertexKind};
