//! Edge reconciliation.
//!
//! Both algorithms compare the persisted adjacency with the adjacency a
//! domain transition asks for and write only the difference. Edges that
//! survive are never dropped and recreated, so their properties and ids
//! stay stable.

mod connections;
mod position;

pub use connections::{diff_connections, reconcile_connections, ConnectionChanges, ConnectionDiff};
pub use position::{plan_position, reconcile_position, PositionPlan};
