//! Reconciliation of an item's single position edge.

use tracing::{debug, info};

use crate::storage::{Edge, EdgeKind, GraphStore, StorageError, Vertex, VertexKind};

/// What must happen to a position edge to reach the desired target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionPlan {
    /// Current and desired targets agree (both may be absent).
    Unchanged,
    /// Drop the current edge, if any, and point at `target`, if any.
    Replace {
        /// Whether an existing edge has to be deleted.
        remove_current: bool,
        /// External id of the new target location.
        target: Option<String>,
    },
}

impl PositionPlan {
    /// Returns true if no store write is needed.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Compares the persisted position edge with the desired location id.
///
/// # Examples
///
/// ```
/// use trackgraph::reconcile::{plan_position, PositionPlan};
///
/// assert_eq!(plan_position(None, None), PositionPlan::Unchanged);
/// assert_eq!(
///     plan_position(None, Some("L2")),
///     PositionPlan::Replace { remove_current: false, target: Some("L2".to_string()) }
/// );
/// ```
#[must_use]
pub fn plan_position(current: Option<&Edge>, desired: Option<&str>) -> PositionPlan {
    let current_target = current.map(|e| e.target_id.as_str());
    if current_target == desired {
        return PositionPlan::Unchanged;
    }
    PositionPlan::Replace {
        remove_current: current.is_some(),
        target: desired.map(str::to_string),
    }
}

/// Moves `item`'s position edge to `desired`, writing only when the target
/// changes.
///
/// The target location is loaded before anything is deleted, so a missing
/// target leaves the current edge in place. The delete and the create are
/// not atomic; the caller runs this inside the retry executor so an
/// interrupted move is redone from a fresh read.
///
/// Returns the edge now in place: the untouched current edge, the newly
/// created one (with empty properties), or `None`.
///
/// # Errors
/// - `NotFound` if `desired` names no location
/// - `ConcurrentModification` if the current edge changed since it was read
pub fn reconcile_position(
    store: &dyn GraphStore,
    item: &Vertex,
    current: Option<&Edge>,
    desired: Option<&str>,
) -> Result<Option<Edge>, StorageError> {
    let PositionPlan::Replace {
        remove_current,
        target,
    } = plan_position(current, desired)
    else {
        debug!(item_id = %item.external_id, "position unchanged");
        return Ok(current.cloned());
    };

    let target_vertex = target
        .as_deref()
        .map(|id| store.load_vertex(VertexKind::Location, id))
        .transpose()?;

    if let (true, Some(edge)) = (remove_current, current) {
        store.delete_edge(edge)?;
        info!(item_id = %item.external_id, from = %edge.target_id, "removed position");
    }

    let Some(target_vertex) = target_vertex else {
        return Ok(None);
    };
    let edge = store.create_edge(item, &target_vertex, EdgeKind::HasPosition)?;
    info!(item_id = %item.external_id, to = %edge.target_id, "set position");
    Ok(Some(edge))
}
