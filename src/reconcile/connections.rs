//! Set-diff reconciliation of a location's outbound connections.

use std::collections::{BTreeMap, BTreeSet};

use tracing::info;

use crate::storage::{Edge, EdgeKind, GraphStore, StorageError, Vertex, VertexKind};

/// Edge changes needed to turn the current connections into the desired set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionDiff {
    /// Edges whose target is no longer wanted, plus duplicate edges to a
    /// target that is kept.
    pub to_delete: Vec<Edge>,
    /// Target ids with no edge yet, in sorted order.
    pub to_add: Vec<String>,
    /// Target ids present on both sides; their edges are left alone.
    pub kept: Vec<String>,
}

impl ConnectionDiff {
    /// Returns true if no store write is needed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_add.is_empty()
    }
}

/// Computes `current - desired` and `desired - current` by target id.
///
/// `from_id` is excluded from the desired set: a location never connects to
/// itself.
#[must_use]
pub fn diff_connections(from_id: &str, current: &[Edge], desired: &BTreeSet<String>) -> ConnectionDiff {
    let mut by_target: BTreeMap<&str, &Edge> = BTreeMap::new();
    let mut diff = ConnectionDiff::default();

    for edge in current {
        if by_target.contains_key(edge.target_id.as_str()) {
            diff.to_delete.push(edge.clone());
        } else {
            by_target.insert(edge.target_id.as_str(), edge);
        }
    }

    for (target, edge) in &by_target {
        if desired.contains(*target) {
            diff.kept.push((*target).to_string());
        } else {
            diff.to_delete.push((*edge).clone());
        }
    }

    diff.to_add = desired
        .iter()
        .filter(|id| id.as_str() != from_id && !by_target.contains_key(id.as_str()))
        .cloned()
        .collect();
    diff
}

/// What `reconcile_connections` changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionChanges {
    /// Newly created edges.
    pub added: Vec<Edge>,
    /// Target ids whose edges were deleted.
    pub removed: Vec<String>,
    /// Number of edges left untouched.
    pub kept: usize,
}

impl ConnectionChanges {
    /// Returns true if nothing was written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Applies the minimal edge changes so `from`'s outbound connections match
/// `desired`.
///
/// Every target to add is loaded before the first write, so an unknown id
/// fails the call without touching the graph. Kept edges are never
/// rewritten and keep their properties.
///
/// # Errors
/// - `NotFound` if a desired target does not exist
/// - `ConcurrentModification` if an edge to delete changed since it was read
pub fn reconcile_connections(
    store: &dyn GraphStore,
    from: &Vertex,
    current: &[Edge],
    desired: &BTreeSet<String>,
) -> Result<ConnectionChanges, StorageError> {
    let diff = diff_connections(&from.external_id, current, desired);
    if diff.is_empty() {
        return Ok(ConnectionChanges {
            kept: diff.kept.len(),
            ..ConnectionChanges::default()
        });
    }

    let targets = diff
        .to_add
        .iter()
        .map(|id| store.load_vertex(VertexKind::Location, id))
        .collect::<Result<Vec<_>, _>>()?;

    let mut changes = ConnectionChanges {
        kept: diff.kept.len(),
        ..ConnectionChanges::default()
    };

    for edge in &diff.to_delete {
        store.delete_edge(edge)?;
        info!(from = %from.external_id, to = %edge.target_id, "deleted connection");
        changes.removed.push(edge.target_id.clone());
    }

    for target in &targets {
        let edge = store.create_edge(from, target, EdgeKind::ConnectedTo)?;
        info!(from = %from.external_id, to = %edge.target_id, "created connection");
        changes.added.push(edge);
    }

    Ok(changes)
}
