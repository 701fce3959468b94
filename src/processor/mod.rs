//! The event-processing pipeline.
//!
//! Every event walks the same stages:
//!
//! ```text
//! Received ─► Archived ─► Logged ─► Applied ─► Notified
//!     │           │          │         │
//!     └───────────┴──────────┴─────────┴──► Failed
//! ```
//!
//! Archiving and the store's event log come first so the raw event is kept
//! even when applying it fails. Applying runs under the retry executor.
//! Notification happens only after the read model has committed.

mod apply;
mod ledger;

pub use apply::{Applied, PositionChange};
pub use ledger::{Claim, DeliveryLedger};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::archive::EventArchive;
use crate::error::{TrackError, TrackResult, ValidationError};
use crate::event::{DomainEvent, EventId, InboundEvent};
use crate::notify::ChangeNotifier;
use crate::retry::RetryPolicy;
use crate::storage::GraphStore;

/// Stage an event reached in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Accepted from the inbox.
    Received,
    /// Written to the archive (or tolerated archive failure).
    Archived,
    /// Appended to the store's event log.
    Logged,
    /// Read model updated.
    Applied,
    /// Subscribers informed; terminal success.
    Notified,
    /// Terminal failure.
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Archived => "archived",
            Self::Logged => "logged",
            Self::Applied => "applied",
            Self::Notified => "notified",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to do when the archive rejects an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFailurePolicy {
    /// Fail the event without touching the read model.
    #[default]
    Fatal,
    /// Log a warning and keep processing.
    LogAndContinue,
}

/// Processor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Retry policy for read-model mutations.
    pub retry: RetryPolicy,
    /// Reaction to archive failures.
    pub archive_failure: ArchiveFailurePolicy,
    /// Completed event ids remembered for deduplication; zero disables it.
    pub dedup_capacity: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            archive_failure: ArchiveFailurePolicy::default(),
            dedup_capacity: 10_000,
        }
    }
}

impl ProcessorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidField` for an invalid retry policy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.retry.validate()
    }
}

/// Summary of a successfully applied event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    /// The event's id.
    pub event_id: EventId,
    /// The entity it addressed.
    pub entity_id: String,
    /// Its wire tag.
    pub event_type: &'static str,
    /// Last stage reached; `Notified` for every success.
    pub final_stage: PipelineStage,
    /// Attempts the mutation needed.
    pub attempts: u32,
    /// False if the archive failed under `LogAndContinue`.
    pub archived: bool,
    /// The position change that was announced, if any.
    pub position: Option<PositionChange>,
}

/// Result of handing one event to the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The event went through every stage.
    Applied(ProcessReport),
    /// The event id was already applied or is in flight.
    Duplicate {
        /// The repeated id.
        event_id: EventId,
    },
    /// The message kind is not one this processor handles.
    Skipped {
        /// The unrecognized tag.
        event_type: String,
        /// The addressed entity, when the message carried one.
        entity_id: Option<String>,
    },
}

impl ProcessOutcome {
    /// Returns true for [`ProcessOutcome::Applied`].
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Returns true for [`ProcessOutcome::Duplicate`].
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns true for [`ProcessOutcome::Skipped`].
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Applies domain events to the graph read model.
///
/// Shareable across threads; every dependency is injected.
pub struct EventProcessor {
    store: Arc<dyn GraphStore>,
    archive: Arc<dyn EventArchive>,
    notifier: Arc<dyn ChangeNotifier>,
    config: ProcessorConfig,
    ledger: DeliveryLedger,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl EventProcessor {
    /// Create a processor with the default configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn GraphStore>,
        archive: Arc<dyn EventArchive>,
        notifier: Arc<dyn ChangeNotifier>,
    ) -> Self {
        let config = ProcessorConfig::default();
        Self {
            store,
            archive,
            notifier,
            ledger: DeliveryLedger::new(config.dedup_capacity),
            config,
        }
    }

    /// Create a processor with an explicit configuration.
    ///
    /// # Errors
    /// Returns `TrackError::Validation` if `config` is invalid.
    pub fn with_config(
        store: Arc<dyn GraphStore>,
        archive: Arc<dyn EventArchive>,
        notifier: Arc<dyn ChangeNotifier>,
        config: ProcessorConfig,
    ) -> TrackResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            archive,
            notifier,
            ledger: DeliveryLedger::new(config.dedup_capacity),
            config,
        })
    }

    /// The read-model store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process one decoded message. Unrecognized kinds are logged and
    /// skipped.
    ///
    /// # Errors
    /// See [`EventProcessor::process`].
    pub fn process_inbound(&self, inbound: &InboundEvent) -> TrackResult<ProcessOutcome> {
        match inbound {
            InboundEvent::Known(event) => self.process(event),
            InboundEvent::Unrecognized {
                event_type,
                entity_id,
            } => {
                warn!(
                    event_type = %event_type,
                    entity_id = entity_id.as_deref().unwrap_or("-"),
                    "skipping unrecognized event kind"
                );
                Ok(ProcessOutcome::Skipped {
                    event_type: event_type.clone(),
                    entity_id: entity_id.clone(),
                })
            }
        }
    }

    /// Process one event through every pipeline stage.
    ///
    /// # Errors
    /// - `TrackError::Archive` if archiving fails under `ArchiveFailurePolicy::Fatal`
    /// - `TrackError::Validation` if the domain transition is rejected
    /// - `TrackError::Storage` for missing or duplicate entities, and for a
    ///   concurrent modification that outlasted the retry policy
    pub fn process(&self, event: &DomainEvent) -> TrackResult<ProcessOutcome> {
        if self.ledger.claim(event.event_id)? == Claim::Duplicate {
            debug!(event_id = %event.event_id, "duplicate delivery ignored");
            return Ok(ProcessOutcome::Duplicate {
                event_id: event.event_id,
            });
        }

        let mut stage = PipelineStage::Received;
        match self.run(event, &mut stage) {
            Ok(report) => {
                self.ledger.complete(event.event_id)?;
                Ok(ProcessOutcome::Applied(report))
            }
            Err(err) => {
                error!(
                    event_id = %event.event_id,
                    entity_id = %event.entity_id,
                    event_type = event.event_type(),
                    stage = %PipelineStage::Failed,
                    last_completed = %stage,
                    error = %err,
                    "event failed"
                );
                self.ledger.release(event.event_id)?;
                Err(err)
            }
        }
    }

    fn run(&self, event: &DomainEvent, stage: &mut PipelineStage) -> TrackResult<ProcessReport> {
        info!(
            event_id = %event.event_id,
            entity_id = %event.entity_id,
            event_type = event.event_type(),
            "processing event"
        );

        let archived = match self.archive.record(event) {
            Ok(()) => true,
            Err(err) => match self.config.archive_failure {
                ArchiveFailurePolicy::Fatal => return Err(err.into()),
                ArchiveFailurePolicy::LogAndContinue => {
                    warn!(event_id = %event.event_id, error = %err, "archive failed, continuing");
                    false
                }
            },
        };
        *stage = PipelineStage::Archived;

        self.store.append_event_log(event)?;
        *stage = PipelineStage::Logged;

        let applied = apply::apply_event(self.store.as_ref(), &self.config.retry, event)?;
        *stage = PipelineStage::Applied;

        if let Some(change) = &applied.position {
            self.notifier
                .notify_position_changed(&change.item_id, change.location_id.as_deref());
        }
        *stage = PipelineStage::Notified;

        debug!(event_id = %event.event_id, attempts = applied.attempts, "event applied");
        Ok(ProcessReport {
            event_id: event.event_id,
            entity_id: event.entity_id.clone(),
            event_type: event.event_type(),
            final_stage: *stage,
            attempts: applied.attempts,
            archived,
            position: applied.position,
        })
    }

    /// Events logged for `entity_id`, oldest first.
    ///
    /// # Errors
    /// Returns `TrackError::Storage` if the store is unavailable.
    pub fn history(&self, entity_id: &str) -> TrackResult<Vec<DomainEvent>> {
        Ok(self.store.events_for_entity(entity_id)?)
    }
}
