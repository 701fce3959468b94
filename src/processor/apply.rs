//! Read-model mutations, one per event kind.
//!
//! Each mutation is a single "load, transform, save" unit run under the
//! retry executor. A unit always re-reads the records it writes, so a rerun
//! after a conflict starts from whatever the competing writer committed.
//!
//! Write order inside a unit: the entity vertex is saved first (its version
//! check is what detects a competing writer), then edges are reconciled.
//! Position and speed changes commit the item's position record in that
//! vertex save, so a rerun after a failed edge write finds the committed
//! state and only finishes the edges.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::domain::{Item, Location, ProgressInfo, Properties};
use crate::error::{TrackError, TrackResult, ValidationError};
use crate::event::{DomainEvent, EventPayload};
use crate::reconcile::{reconcile_connections, reconcile_position};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::storage::projection::{self, keys};
use crate::storage::{Edge, EdgeKind, GraphStore, Vertex, VertexKind};

/// A committed position change to report to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionChange {
    /// The item that moved.
    pub item_id: String,
    /// Its new location.
    pub location_id: Option<String>,
}

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Attempts used by the retry executor.
    pub attempts: u32,
    /// Set when the event moved an item.
    pub position: Option<PositionChange>,
}

/// Applies `event` to the read model under `policy`.
pub(crate) fn apply_event(
    store: &dyn GraphStore,
    policy: &RetryPolicy,
    event: &DomainEvent,
) -> TrackResult<Applied> {
    let unit = Unit { store, event };
    let outcome = execute_with_retry(policy, || unit.run(), TrackError::is_retryable)?;
    Ok(Applied {
        attempts: outcome.attempts,
        position: outcome.value,
    })
}

struct Unit<'a> {
    store: &'a dyn GraphStore,
    event: &'a DomainEvent,
}

fn set_property(vertex: &mut Vertex, key: &str, value: serde_json::Value) {
    vertex.properties.insert(key.to_string(), value);
}

fn properties_value(properties: Option<&Properties>) -> TrackResult<serde_json::Value> {
    serde_json::to_value(properties).map_err(|e| TrackError::internal(format!("properties: {e}")))
}

impl Unit<'_> {
    fn id(&self) -> &str {
        &self.event.entity_id
    }

    fn run(&self) -> TrackResult<Option<PositionChange>> {
        match &self.event.payload {
            EventPayload::ItemCreated {
                name,
                speed,
                active,
                properties,
            } => {
                let item = Item {
                    active: *active,
                    properties: properties.clone(),
                    ..Item::new(self.id(), name.clone(), *speed)
                };
                self.create_item(&item).map(|()| None)
            }
            EventPayload::ItemActivated => self.set_item_active(true).map(|()| None),
            EventPayload::ItemDeactivated => self.set_item_active(false).map(|()| None),
            EventPayload::ItemPositionChanged { location_id } => self.move_item(location_id),
            EventPayload::ItemSpeedChanged { speed } => self.change_speed(*speed).map(|()| None),
            EventPayload::ItemPropertiesUpdated { properties } => {
                self.update_item_properties(properties.as_ref()).map(|()| None)
            }
            EventPayload::LocationCreated {
                name,
                active,
                latitude,
                longitude,
                length,
                speed,
                location_type,
                properties,
            } => {
                let location = Location {
                    latitude: *latitude,
                    longitude: *longitude,
                    speed: *speed,
                    location_type: location_type.clone(),
                    active: *active,
                    properties: properties.clone(),
                    ..Location::new(self.id(), name.clone(), *length)
                };
                self.create_location(&location).map(|()| None)
            }
            EventPayload::LocationActivated => self.set_location_active(true).map(|()| None),
            EventPayload::LocationDeactivated => self.set_location_active(false).map(|()| None),
            EventPayload::LocationDeleted => self.delete_location().map(|()| None),
            EventPayload::LocationPropertiesUpdated { updated_properties } => self
                .update_location_properties(updated_properties.as_ref())
                .map(|()| None),
            EventPayload::LocationConnectionCreated { from_id, to_id } => {
                self.connect(from_id.as_deref(), to_id).map(|()| None)
            }
        }
    }

    fn create_item(&self, item: &Item) -> TrackResult<()> {
        item.validate()?;
        let props = projection::item_properties(item)?;
        self.store.create_vertex(VertexKind::Item, &item.id, props)?;
        Ok(())
    }

    fn set_item_active(&self, active: bool) -> TrackResult<()> {
        let loaded = projection::load_item(self.store, self.id())?;
        let next = if active {
            loaded.item.resume()
        } else {
            loaded.item.stop()
        };
        if next.active == loaded.item.active {
            debug!(item_id = %self.id(), active, "activation unchanged");
            return Ok(());
        }

        let mut vertex = loaded.vertex;
        set_property(&mut vertex, keys::ACTIVE, serde_json::Value::Bool(next.active));
        self.store.save_vertex(&vertex)?;
        Ok(())
    }

    fn moved(&self, location_id: &str) -> PositionChange {
        PositionChange {
            item_id: self.id().to_string(),
            location_id: Some(location_id.to_string()),
        }
    }

    /// Writes `progress` onto the position edge unless it already carries it.
    ///
    /// Runs after the item vertex committed `progress`. A conflict is only
    /// tolerated when a later commit has already replaced the edge or written
    /// newer progress onto it; anything else goes back to the retry executor.
    fn sync_edge_progress(&self, edge: &Edge, progress: &ProgressInfo) -> TrackResult<()> {
        if projection::edge_progress(edge)?.as_ref() == Some(progress) {
            return Ok(());
        }
        let mut update = edge.clone();
        update.properties = projection::progress_properties(progress)?;
        match self.store.save_edge(&update) {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => {
                if !self.edge_overtaken(edge, progress)? {
                    return Err(err.into());
                }
                debug!(item_id = %self.id(), "position edge already carries a later commit");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn edge_overtaken(&self, edge: &Edge, progress: &ProgressInfo) -> TrackResult<bool> {
        for current in self.store.outbound_edges(edge.from, EdgeKind::HasPosition)? {
            if current.id != edge.id {
                return Ok(true);
            }
            if let Some(stored) = projection::edge_progress(&current)? {
                if stored.datetime >= progress.datetime {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn move_item(&self, location_id: &str) -> TrackResult<Option<PositionChange>> {
        let loaded = projection::load_item(self.store, self.id())?;
        let target = projection::load_location(self.store, location_id)?;

        let next = loaded
            .item
            .update_position(&target.location, self.event.timestamp)?;
        if loaded.item.location_id() == Some(location_id) {
            return self.settle_current_position(loaded, location_id);
        }

        let progress = next
            .progress_info
            .unwrap_or_else(|| ProgressInfo::start(self.event.timestamp));
        let mut vertex = loaded.vertex;
        projection::set_committed_position(&mut vertex, location_id, &progress)?;
        let saved = self.store.save_vertex(&vertex)?;

        let edge = reconcile_position(
            self.store,
            &saved,
            loaded.position_edge.as_ref(),
            Some(location_id),
        )?
        .ok_or_else(|| TrackError::internal(format!("no position edge to {location_id}")))?;
        self.sync_edge_progress(&edge, &progress)?;

        Ok(Some(self.moved(location_id)))
    }

    /// Handles a move onto the location the item's edge already points at.
    ///
    /// An edge without progress is left by a move whose edge write failed;
    /// that move is finished here and reported. An edge whose progress lags
    /// the committed record is brought in line without a report.
    fn settle_current_position(
        &self,
        loaded: projection::LoadedItem,
        location_id: &str,
    ) -> TrackResult<Option<PositionChange>> {
        let Some(edge) = loaded.position_edge else {
            return Err(TrackError::internal(format!(
                "item {} has a location but no position edge",
                self.id()
            )));
        };
        let on_edge = projection::edge_progress(&edge)?;
        let progress = loaded
            .item
            .progress_info
            .unwrap_or_else(|| ProgressInfo::start(self.event.timestamp));
        if on_edge == Some(progress) {
            debug!(item_id = %self.id(), location_id, "item already at location");
            return Ok(None);
        }

        let mut vertex = loaded.vertex;
        projection::set_committed_position(&mut vertex, location_id, &progress)?;
        self.store.save_vertex(&vertex)?;
        self.sync_edge_progress(&edge, &progress)?;

        if on_edge.is_some() {
            debug!(item_id = %self.id(), location_id, "position edge progress refreshed");
            return Ok(None);
        }
        info!(item_id = %self.id(), location_id, "finished interrupted move");
        Ok(Some(self.moved(location_id)))
    }

    fn change_speed(&self, speed: f64) -> TrackResult<()> {
        let loaded = projection::load_item(self.store, self.id())?;
        let next = loaded.item.update_speed(speed, self.event.timestamp)?;

        let (Some(edge), Some(progress)) = (loaded.position_edge, next.progress_info) else {
            return Err(TrackError::internal(format!(
                "item {} has a location but no position edge",
                self.id()
            )));
        };

        // Speed and progress commit together; the edge copy follows.
        let mut vertex = loaded.vertex;
        set_property(&mut vertex, keys::SPEED, serde_json::json!(next.speed));
        projection::set_committed_position(&mut vertex, &edge.target_id, &progress)?;
        self.store.save_vertex(&vertex)?;

        self.sync_edge_progress(&edge, &progress)
    }

    fn update_item_properties(&self, updates: Option<&Properties>) -> TrackResult<()> {
        let loaded = projection::load_item(self.store, self.id())?;
        let next = loaded.item.update_properties(updates);
        if next.properties == loaded.item.properties {
            debug!(item_id = %self.id(), "properties unchanged");
            return Ok(());
        }

        let mut vertex = loaded.vertex;
        set_property(
            &mut vertex,
            keys::PROPERTIES,
            properties_value(next.properties.as_ref())?,
        );
        self.store.save_vertex(&vertex)?;
        Ok(())
    }

    fn create_location(&self, location: &Location) -> TrackResult<()> {
        location.validate()?;
        let props = projection::location_properties(location)?;
        self.store
            .create_vertex(VertexKind::Location, &location.id, props)?;
        Ok(())
    }

    fn set_location_active(&self, active: bool) -> TrackResult<()> {
        let loaded = projection::load_location(self.store, self.id())?;
        let next = if active {
            loaded.location.activate()
        } else {
            loaded.location.deactivate()
        };
        if next.active == loaded.location.active {
            debug!(location_id = %self.id(), active, "activation unchanged");
            return Ok(());
        }

        let mut vertex = loaded.vertex;
        set_property(&mut vertex, keys::ACTIVE, serde_json::Value::Bool(next.active));
        self.store.save_vertex(&vertex)?;
        Ok(())
    }

    fn update_location_properties(&self, updated: Option<&Properties>) -> TrackResult<()> {
        let loaded = projection::load_location(self.store, self.id())?;
        let next = loaded.location.update_properties(updated);
        if next.properties == loaded.location.properties {
            debug!(location_id = %self.id(), "properties unchanged");
            return Ok(());
        }

        let mut vertex = loaded.vertex;
        set_property(
            &mut vertex,
            keys::PROPERTIES,
            properties_value(next.properties.as_ref())?,
        );
        self.store.save_vertex(&vertex)?;
        Ok(())
    }

    fn connect(&self, from_id: Option<&str>, to_id: &str) -> TrackResult<()> {
        if let Some(from_id) = from_id.filter(|from| *from != self.id()) {
            return Err(ValidationError::invalid_field(
                "fromId",
                format!("{from_id} does not match entity {}", self.id()),
            )
            .into());
        }
        let source = projection::load_location(self.store, self.id())?;
        self.store.load_vertex(VertexKind::Location, to_id)?;

        let next = source.location.add_connection_to(to_id);
        if next.outbound_connection_ids == source.location.outbound_connection_ids {
            debug!(from = %self.id(), to = to_id, "connection already present");
            return Ok(());
        }

        let saved = self.store.save_vertex(&source.vertex)?;
        reconcile_connections(
            self.store,
            &saved,
            &source.connection_edges,
            &next.outbound_connection_ids,
        )?;
        Ok(())
    }

    fn delete_location(&self) -> TrackResult<()> {
        let loaded = projection::load_location(self.store, self.id())?;

        let occupants = self
            .store
            .inbound_edges(loaded.vertex.id, EdgeKind::HasPosition)?;
        if !occupants.is_empty() {
            return Err(ValidationError::LocationOccupied {
                location_id: self.id().to_string(),
                items: occupants.len(),
            }
            .into());
        }

        let sources: BTreeSet<String> = self
            .store
            .inbound_edges(loaded.vertex.id, EdgeKind::ConnectedTo)?
            .into_iter()
            .map(|e| e.source_id)
            .filter(|id| id != self.id())
            .collect();
        for source_id in sources {
            let source = projection::load_location(self.store, &source_id)?;
            let next = source.location.remove_connection_to(self.id());
            let saved = self.store.save_vertex(&source.vertex)?;
            reconcile_connections(
                self.store,
                &saved,
                &source.connection_edges,
                &next.outbound_connection_ids,
            )?;
        }

        self.store.delete_vertex(&loaded.vertex)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    use crate::storage::InMemoryGraphStore;

    fn apply(store: &InMemoryGraphStore, event: &DomainEvent) -> TrackResult<Applied> {
        apply_event(store, &RetryPolicy::immediate(3), event)
    }

    fn belt(id: &str) -> DomainEvent {
        DomainEvent::location_created(&Location::new(id, id, 10.0))
    }

    #[test]
    fn activation_writes_only_on_change() {
        let store = InMemoryGraphStore::new();
        apply(&store, &DomainEvent::item_created("I1", "crate", 1.0)).unwrap();
        let before = store.stats().vertex_writes;

        apply(&store, &DomainEvent::item_activated("I1")).unwrap();
        assert_eq!(store.stats().vertex_writes, before);

        apply(&store, &DomainEvent::item_deactivated("I1")).unwrap();
        assert_eq!(store.stats().vertex_writes, before + 1);
        assert!(!projection::load_item(&store, "I1").unwrap().item.active);
    }

    #[test]
    fn position_change_stores_fresh_progress() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &DomainEvent::item_created("I1", "crate", 1.0)).unwrap();

        let event = DomainEvent::item_position_changed("I1", "L1");
        let applied = apply(&store, &event).unwrap();
        assert_eq!(
            applied.position,
            Some(PositionChange {
                item_id: "I1".to_string(),
                location_id: Some("L1".to_string()),
            })
        );

        let item = projection::load_item(&store, "I1").unwrap().item;
        let progress = item.progress_info.unwrap();
        assert_eq!(progress.progress, 0.0);
        assert_eq!(progress.datetime, event.timestamp);
    }

    #[test]
    fn repeated_position_change_is_a_no_op() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &DomainEvent::item_created("I1", "crate", 1.0)).unwrap();
        apply(&store, &DomainEvent::item_position_changed("I1", "L1")).unwrap();
        let before = store.stats();

        let applied = apply(&store, &DomainEvent::item_position_changed("I1", "L1")).unwrap();
        assert!(applied.position.is_none());
        assert_eq!(store.stats(), before);
    }

    #[test]
    fn speed_change_advances_progress_on_edge() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &DomainEvent::item_created("I1", "crate", 2.0)).unwrap();
        let moved = DomainEvent::item_position_changed("I1", "L1");
        apply(&store, &moved).unwrap();

        let speed = DomainEvent::item_speed_changed("I1", 5.0)
            .with_timestamp(moved.timestamp + Duration::milliseconds(3_000));
        apply(&store, &speed).unwrap();

        let item = projection::load_item(&store, "I1").unwrap().item;
        assert!((item.speed - 5.0).abs() < f64::EPSILON);
        let progress = item.progress_info.unwrap();
        assert!((progress.progress - 600.0).abs() < 1e-9);
        assert_eq!(progress.datetime, speed.timestamp);
    }

    fn position_edge(store: &InMemoryGraphStore) -> Edge {
        projection::load_item(store, "I1")
            .unwrap()
            .position_edge
            .unwrap()
    }

    #[test]
    fn move_onto_edge_without_progress_finishes_the_move() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &DomainEvent::item_created("I1", "crate", 1.0)).unwrap();
        let moved = DomainEvent::item_position_changed("I1", "L1");
        apply(&store, &moved).unwrap();

        // Edge linked, progress never written.
        let mut edge = position_edge(&store);
        edge.properties = Properties::new();
        store.save_edge(&edge).unwrap();

        let applied = apply(&store, &moved).unwrap();
        assert_eq!(applied.position.unwrap().location_id.as_deref(), Some("L1"));
        let progress = projection::edge_progress(&position_edge(&store)).unwrap();
        assert_eq!(progress, Some(ProgressInfo::start(moved.timestamp)));
    }

    #[test]
    fn lagging_edge_progress_is_refreshed_without_a_report() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &DomainEvent::item_created("I1", "crate", 2.0)).unwrap();
        let moved = DomainEvent::item_position_changed("I1", "L1");
        apply(&store, &moved).unwrap();
        let stale_copy = position_edge(&store).properties;

        let speed = DomainEvent::item_speed_changed("I1", 5.0)
            .with_timestamp(moved.timestamp + Duration::milliseconds(3_000));
        apply(&store, &speed).unwrap();

        // Put back the pre-speed-change copy, as if the edge write was lost.
        let mut edge = position_edge(&store);
        edge.properties = stale_copy;
        store.save_edge(&edge).unwrap();
        let progress = projection::load_item(&store, "I1").unwrap().item.progress_info;
        assert!((progress.unwrap().progress - 600.0).abs() < 1e-9);

        let applied = apply(&store, &DomainEvent::item_position_changed("I1", "L1")).unwrap();
        assert!(applied.position.is_none());
        let on_edge = projection::edge_progress(&position_edge(&store)).unwrap().unwrap();
        assert!((on_edge.progress - 600.0).abs() < 1e-9);
        assert_eq!(on_edge.datetime, speed.timestamp);
    }

    #[test]
    fn speed_change_without_position_fails_precondition() {
        let store = InMemoryGraphStore::new();
        apply(&store, &DomainEvent::item_created("I1", "crate", 2.0)).unwrap();
        let err = apply(&store, &DomainEvent::item_speed_changed("I1", 5.0)).unwrap_err();
        assert!(matches!(
            err,
            TrackError::Validation(ValidationError::PreconditionFailed { .. })
        ));
    }

    #[test]
    fn connection_to_unknown_location_is_not_found() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        let before = store.stats();
        let err = apply(&store, &DomainEvent::location_connection_created("L1", "L9")).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.stats(), before);
    }

    #[test]
    fn connection_source_must_match_entity() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &belt("L2")).unwrap();

        let mut event = DomainEvent::location_connection_created("L1", "L2");
        event.payload = EventPayload::LocationConnectionCreated {
            from_id: Some("L9".to_string()),
            to_id: "L2".to_string(),
        };
        let err = apply(&store, &event).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.edge_count().unwrap(), 0);
    }

    #[test]
    fn deleting_a_location_unlinks_sources() {
        let store = InMemoryGraphStore::new();
        for id in ["L1", "L2", "L3"] {
            apply(&store, &belt(id)).unwrap();
        }
        apply(&store, &DomainEvent::location_connection_created("L1", "L2")).unwrap();
        apply(&store, &DomainEvent::location_connection_created("L1", "L3")).unwrap();
        apply(&store, &DomainEvent::location_connection_created("L2", "L3")).unwrap();

        apply(&store, &DomainEvent::location_deleted("L2")).unwrap();

        let l1 = projection::load_location(&store, "L1").unwrap();
        assert_eq!(
            l1.location.outbound_connection_ids,
            ["L3".to_string()].into_iter().collect()
        );
        assert!(projection::load_location(&store, "L2").is_err());
        assert_eq!(store.edge_count().unwrap(), 1);
    }

    #[test]
    fn deleting_an_occupied_location_is_rejected() {
        let store = InMemoryGraphStore::new();
        apply(&store, &belt("L1")).unwrap();
        apply(&store, &DomainEvent::item_created("I1", "crate", 1.0)).unwrap();
        apply(&store, &DomainEvent::item_position_changed("I1", "L1")).unwrap();

        let err = apply(&store, &DomainEvent::location_deleted("L1")).unwrap_err();
        assert!(matches!(
            err,
            TrackError::Validation(ValidationError::LocationOccupied { items: 1, .. })
        ));
        assert!(projection::load_location(&store, "L1").is_ok());
    }

    #[test]
    fn location_properties_are_replaced() {
        let store = InMemoryGraphStore::new();
        let mut first = Properties::new();
        first.insert("zone".to_string(), serde_json::json!("A"));
        let mut location = Location::new("L1", "belt", 10.0);
        location.properties = Some(first);
        apply(&store, &DomainEvent::location_created(&location)).unwrap();

        let mut second = Properties::new();
        second.insert("temp".to_string(), serde_json::json!(20));
        apply(
            &store,
            &DomainEvent::location_properties_updated("L1", second.clone()),
        )
        .unwrap();

        let loaded = projection::load_location(&store, "L1").unwrap();
        assert_eq!(loaded.location.properties, Some(second));
    }

    #[test]
    fn invalid_location_is_rejected() {
        let store = InMemoryGraphStore::new();
        let err = apply(
            &store,
            &DomainEvent::location_created(&Location::new("L1", "belt", -1.0)),
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(store.list_vertices(VertexKind::Location).unwrap().is_empty());
    }
}
