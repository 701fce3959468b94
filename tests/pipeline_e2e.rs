//! End-to-end tests for the event pipeline over the in-memory store.

mod common;

use std::io::Cursor;
use std::sync::Arc;

use chrono::Duration;

use common::{fast_processor, memory_processor, small_network, FailingArchive};
use trackgraph::event::encode_event;
use trackgraph::storage::projection::{load_item, load_location};
use trackgraph::{
    ArchiveFailurePolicy, ChannelNotifier, DomainEvent, EventProcessor, GraphSnapshot,
    InMemoryGraphStore, InboundEvent, JsonLinesInbox, Location, NoopNotifier, ProcessOutcome,
    ProcessorConfig, ProcessorRuntime, RuntimeConfig, TrackError, ValidationError,
};

#[test]
fn test_move_along_connections_then_reject_unconnected_target() {
    let (store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }

    processor
        .process(&DomainEvent::item_position_changed("I1", "L1"))
        .unwrap();
    processor
        .process(&DomainEvent::item_position_changed("I1", "L2"))
        .unwrap();

    let err = processor
        .process(&DomainEvent::item_position_changed("I1", "L3"))
        .unwrap_err();
    assert!(err.is_invalid_transition(), "got {err:?}");

    let item = load_item(store.as_ref(), "I1").unwrap();
    assert_eq!(item.item.location_id(), Some("L2"));
    assert_eq!(store.edge_count().unwrap(), 2);
}

#[test]
fn test_moves_are_announced_in_order() {
    let store = Arc::new(InMemoryGraphStore::new());
    let (notifier, rx) = ChannelNotifier::new(16);
    let processor = fast_processor(store, Arc::new(notifier));
    for event in small_network() {
        processor.process(&event).unwrap();
    }

    processor
        .process(&DomainEvent::item_position_changed("I1", "L1"))
        .unwrap();
    processor
        .process(&DomainEvent::item_position_changed("I1", "L2"))
        .unwrap();
    let _ = processor.process(&DomainEvent::item_position_changed("I1", "L3"));

    let seen: Vec<_> = rx.try_iter().map(|u| u.location_id).collect();
    assert_eq!(seen, vec![Some("L1".to_string()), Some("L2".to_string())]);
}

#[test]
fn test_unknown_references_fail_with_not_found() {
    let (_store, processor) = memory_processor();
    processor
        .process(&DomainEvent::item_created("I1", "crate", 1.0))
        .unwrap();

    assert!(processor
        .process(&DomainEvent::item_position_changed("I1", "L404"))
        .unwrap_err()
        .is_not_found());
    assert!(processor
        .process(&DomainEvent::item_speed_changed("I404", 2.0))
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_duplicate_creation_is_rejected() {
    let (_store, processor) = memory_processor();
    processor
        .process(&DomainEvent::item_created("I1", "crate", 1.0))
        .unwrap();
    let err = processor
        .process(&DomainEvent::item_created("I1", "other crate", 1.0))
        .unwrap_err();
    assert!(err.is_already_exists());
}

#[test]
fn test_item_and_location_ids_do_not_collide() {
    let (_store, processor) = memory_processor();
    processor
        .process(&DomainEvent::item_created("X1", "crate", 1.0))
        .unwrap();
    processor
        .process(&DomainEvent::location_created(&Location::new("X1", "belt", 5.0)))
        .unwrap();
    processor
        .process(&DomainEvent::item_position_changed("X1", "X1"))
        .unwrap();
}

#[test]
fn test_speed_change_integrates_previous_speed() {
    let (store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    processor
        .process(&DomainEvent::item_speed_changed("I1", 2.0))
        .unwrap_err();

    let moved = DomainEvent::item_position_changed("I1", "L1");
    processor.process(&moved).unwrap();
    let faster = DomainEvent::item_speed_changed("I1", 2.0)
        .with_timestamp(moved.timestamp + Duration::milliseconds(1_000));
    processor.process(&faster).unwrap();
    let fastest = DomainEvent::item_speed_changed("I1", 5.0)
        .with_timestamp(moved.timestamp + Duration::milliseconds(4_000));
    processor.process(&fastest).unwrap();

    // 1000ms at speed 1.0, then 3000ms at speed 2.0, over length 10.
    let item = load_item(store.as_ref(), "I1").unwrap().item;
    let progress = item.progress_info.unwrap();
    assert!((progress.progress - 700.0).abs() < 1e-9);
    assert!((item.speed - 5.0).abs() < f64::EPSILON);
}

#[test]
fn test_stale_speed_change_is_rejected() {
    let (_store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    let moved = DomainEvent::item_position_changed("I1", "L1");
    processor.process(&moved).unwrap();

    let stale = DomainEvent::item_speed_changed("I1", 3.0)
        .with_timestamp(moved.timestamp - Duration::seconds(1));
    let err = processor.process(&stale).unwrap_err();
    assert!(matches!(
        err,
        TrackError::Validation(ValidationError::StaleEvent { .. })
    ));
}

#[test]
fn test_redelivered_speed_change_is_applied_once() {
    let (store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    let moved = DomainEvent::item_position_changed("I1", "L1");
    processor.process(&moved).unwrap();

    let speed = DomainEvent::item_speed_changed("I1", 4.0)
        .with_timestamp(moved.timestamp + Duration::milliseconds(2_000));
    assert!(processor.process(&speed).unwrap().is_applied());
    assert!(processor.process(&speed).unwrap().is_duplicate());

    let progress = load_item(store.as_ref(), "I1")
        .unwrap()
        .item
        .progress_info
        .unwrap();
    assert!((progress.progress - 200.0).abs() < 1e-9);
}

#[test]
fn test_location_lifecycle() {
    let (store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    processor
        .process(&DomainEvent::location_connection_created("L2", "L3"))
        .unwrap();
    processor
        .process(&DomainEvent::location_deactivated("L2"))
        .unwrap();
    assert!(!load_location(store.as_ref(), "L2").unwrap().location.active);

    processor
        .process(&DomainEvent::item_position_changed("I1", "L2"))
        .unwrap();
    let err = processor
        .process(&DomainEvent::location_deleted("L2"))
        .unwrap_err();
    assert!(matches!(
        err,
        TrackError::Validation(ValidationError::LocationOccupied { .. })
    ));

    processor
        .process(&DomainEvent::item_position_changed("I1", "L3"))
        .unwrap();
    processor
        .process(&DomainEvent::location_deleted("L2"))
        .unwrap();

    let l1 = load_location(store.as_ref(), "L1").unwrap();
    assert!(l1.location.outbound_connection_ids.is_empty());
    assert!(load_location(store.as_ref(), "L2").is_err());
    assert_eq!(store.edge_count().unwrap(), 1);
}

#[test]
fn test_unrecognized_and_malformed_messages_do_not_stop_a_drain() {
    let (_store, processor) = memory_processor();
    let runtime = ProcessorRuntime::new(
        Arc::new(processor),
        RuntimeConfig {
            workers: 1,
            ..RuntimeConfig::default()
        },
    )
    .unwrap();

    let mut lines: Vec<String> = small_network()
        .iter()
        .map(|e| encode_event(e).unwrap())
        .collect();
    lines.insert(2, r#"{"eventType":"ITEM_TELEPORTED","entityId":"I1"}"#.to_string());
    lines.insert(3, r#"{"eventType":"ITEM_SPEED_CHANGED","entityId":"I1"}"#.to_string());
    lines.push(encode_event(&DomainEvent::item_position_changed("I1", "L1")).unwrap());

    let mut inbox = JsonLinesInbox::new(Cursor::new(lines.join("\n")));
    let summary = runtime.drain(&mut inbox);

    assert_eq!(summary.applied, 6);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.decode_errors, 1);
    assert!(summary.failures.is_empty());
}

#[test]
fn test_unrecognized_kind_is_skipped() {
    let (_store, processor) = memory_processor();
    let outcome = processor
        .process_inbound(&InboundEvent::Unrecognized {
            event_type: "ITEM_TELEPORTED".to_string(),
            entity_id: None,
        })
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::Skipped { .. }));
}

#[test]
fn test_history_is_ordered_by_timestamp() {
    let (_store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    let first = DomainEvent::item_position_changed("I1", "L1");
    let second = DomainEvent::item_position_changed("I1", "L2");
    processor.process(&first).unwrap();
    processor.process(&second).unwrap();

    let history = processor.history("I1").unwrap();
    let types: Vec<_> = history.iter().map(DomainEvent::event_type).collect();
    assert_eq!(
        types,
        vec!["ITEM_CREATED", "ITEM_POSITION_CHANGED", "ITEM_POSITION_CHANGED"]
    );
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn test_failed_events_are_still_logged() {
    let (_store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    processor
        .process(&DomainEvent::item_position_changed("I1", "L1"))
        .unwrap();
    let rejected = DomainEvent::item_position_changed("I1", "L3");
    assert!(processor.process(&rejected).is_err());

    let history = processor.history("I1").unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].event_id, rejected.event_id);
}

#[test]
fn test_redelivered_failed_event_is_logged_once() {
    let (_store, processor) = memory_processor();
    let early = DomainEvent::item_position_changed("I1", "L1");
    assert!(processor.process(&early).unwrap_err().is_not_found());

    for event in small_network() {
        processor.process(&event).unwrap();
    }
    assert!(processor.process(&early).unwrap().is_applied());

    let history = processor.history("I1").unwrap();
    let copies = history
        .iter()
        .filter(|e| e.event_id == early.event_id)
        .count();
    assert_eq!(copies, 1);
    assert_eq!(history.len(), 2);
}

#[test]
fn test_archive_failure_policy() {
    let fatal = EventProcessor::new(
        Arc::new(InMemoryGraphStore::new()),
        Arc::new(FailingArchive),
        Arc::new(NoopNotifier),
    );
    let err = fatal
        .process(&DomainEvent::item_created("I1", "crate", 1.0))
        .unwrap_err();
    assert!(matches!(err, TrackError::Archive(_)));

    let store = Arc::new(InMemoryGraphStore::new());
    let tolerant = EventProcessor::with_config(
        store.clone(),
        Arc::new(FailingArchive),
        Arc::new(NoopNotifier),
        ProcessorConfig {
            archive_failure: ArchiveFailurePolicy::LogAndContinue,
            ..ProcessorConfig::default()
        },
    )
    .unwrap();
    tolerant
        .process(&DomainEvent::item_created("I1", "crate", 1.0))
        .unwrap();
    assert!(load_item(store.as_ref(), "I1").is_ok());
}

#[test]
fn test_snapshot_after_replay() {
    let (store, processor) = memory_processor();
    for event in small_network() {
        processor.process(&event).unwrap();
    }
    processor
        .process(&DomainEvent::item_created("I2", "pallet", 1.0))
        .unwrap();
    processor
        .process(&DomainEvent::item_position_changed("I1", "L1"))
        .unwrap();

    let snapshot = GraphSnapshot::capture(store.as_ref()).unwrap();
    assert_eq!(snapshot.location_of("I1"), Some("L1"));
    assert_eq!(snapshot.unpositioned.len(), 1);
    assert_eq!(snapshot.connections.len(), 1);
    let l1 = &snapshot.locations[0];
    assert_eq!(l1.items[0].progress.unwrap().progress, 0.0);
}
