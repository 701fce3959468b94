//! # trackgraph - Event-sourced item tracking over a location graph
//!
//! trackgraph consumes domain events about items moving across a directed
//! network of locations (conveyor segments, zones, stations) and keeps a
//! property-graph read model of the current state up to date.
//!
//! ## Core Concepts
//!
//! - **Location**: A node in the network with a length and outbound connections
//! - **Item**: Something that moves; it sits on at most one location at a time
//! - **ProgressInfo**: How far an item has travelled along its location
//! - **DomainEvent**: An immutable fact (`ITEM_POSITION_CHANGED`, ...) to apply
//!
//! Events flow through an [`EventProcessor`]: archived, logged, applied to a
//! [`GraphStore`] under optimistic concurrency with bounded retry, then
//! announced to a [`ChangeNotifier`].
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use trackgraph::{
//!     DomainEvent, EventProcessor, InMemoryEventArchive, InMemoryGraphStore, Location,
//!     NoopNotifier,
//! };
//!
//! let processor = EventProcessor::new(
//!     Arc::new(InMemoryGraphStore::new()),
//!     Arc::new(InMemoryEventArchive::new()),
//!     Arc::new(NoopNotifier),
//! );
//!
//! processor
//!     .process(&DomainEvent::location_created(&Location::new("L1", "inbound belt", 10.0)))
//!     .unwrap();
//! processor
//!     .process(&DomainEvent::item_created("I1", "crate", 0.5))
//!     .unwrap();
//! let outcome = processor
//!     .process(&DomainEvent::item_position_changed("I1", "L1"))
//!     .unwrap();
//! assert!(outcome.is_applied());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Domain model
pub mod domain;
pub mod error;
pub mod event;
pub mod time;

// Read model and reconciliation
pub mod reconcile;
pub mod snapshot;
pub mod storage;

// Pipeline
pub mod archive;
pub mod inbox;
pub mod notify;
pub mod processor;
pub mod retry;
pub mod runtime;

// Re-export primary types at crate root for convenience
pub use domain::{Item, Location, ProgressInfo, Properties};
pub use error::{TrackError, TrackResult, ValidationError};
pub use event::{DomainEvent, EventId, EventPayload, InboundEvent};
pub use snapshot::GraphSnapshot;
pub use storage::{GraphStore, InMemoryGraphStore, StorageError};

pub use archive::{ArchiveError, EventArchive, InMemoryEventArchive};
pub use inbox::{ChannelInbox, EventInbox, JsonLinesInbox};
pub use notify::{ChangeNotifier, ChannelNotifier, NoopNotifier};
pub use processor::{ArchiveFailurePolicy, EventProcessor, ProcessOutcome, ProcessorConfig};
pub use retry::RetryPolicy;
pub use runtime::{Dispatch, ProcessorRuntime, RuntimeConfig};
