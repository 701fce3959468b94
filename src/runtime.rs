//! Worker-pool runtime for the event processor.
//!
//! `EventProcessor::process` is synchronous. This module runs it on a small,
//! bounded pool of threads fed through crossbeam channels, so an inbox can be
//! drained concurrently without unbounded buffering.
//!
//! Two dispatch modes are available. `EntityAffinity` gives every worker its
//! own lane and routes each event by a hash of its entity id, so events for
//! one entity are applied in submission order. `Shared` puts all workers on a
//! single queue; it maximizes throughput but lets events for the same entity
//! race, leaving the store's optimistic concurrency to sort them out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::error::{TrackError, TrackResult, ValidationError};
use crate::event::{DomainEvent, EventId, InboundEvent};
use crate::inbox::EventInbox;
use crate::processor::{EventProcessor, ProcessOutcome};

/// How events are spread over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dispatch {
    /// One queue per worker, chosen by entity id.
    #[default]
    EntityAffinity,
    /// A single queue shared by every worker.
    Shared,
}

/// Runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued events per lane.
    pub queue_capacity: usize,
    /// Dispatch mode.
    pub dispatch: Dispatch,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            dispatch: Dispatch::default(),
        }
    }
}

impl RuntimeConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ValidationError::InvalidField` if `workers` or
    /// `queue_capacity` is zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::invalid_field("workers", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::invalid_field(
                "queue_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

enum Job {
    Process {
        event: DomainEvent,
        reply: Sender<TrackResult<ProcessOutcome>>,
    },

    #[cfg(test)]
    Sleep {
        duration: Duration,
        reply: Sender<()>,
    },
}

struct Lane {
    name: String,
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl Lane {
    fn start(
        name: String,
        workers: usize,
        queue_capacity: usize,
        processor: &Arc<EventProcessor>,
    ) -> TrackResult<Self> {
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let processor = Arc::clone(processor);
            let handle = thread::Builder::new()
                .name(format!("trackgraph-{name}-{idx}"))
                .spawn(move || loop {
                    match rx.recv() {
                        Ok(Job::Process { event, reply }) => {
                            let result = processor.process(&event);
                            let _ = reply.send(result);
                        }
                        Err(_) => break,

                        #[cfg(test)]
                        Ok(Job::Sleep { duration, reply }) => {
                            thread::sleep(duration);
                            let _ = reply.send(());
                        }
                    }
                })
                .map_err(|e| TrackError::internal(format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }
        debug!(lane = %name, workers, queue_capacity, "lane started");

        Ok(Self {
            name,
            tx,
            workers: handles,
            queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> TrackResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TrackError::QueueFull {
                lane: self.name.clone(),
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(TrackError::Disconnected {
                lane: self.name.clone(),
            }),
        }
    }

    fn submit_blocking(&self, job: Job) -> TrackResult<()> {
        self.tx.send(job).map_err(|_| TrackError::Disconnected {
            lane: self.name.clone(),
        })
    }

    fn shutdown(self) {
        // Workers drain queued jobs, then see the closed channel and exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Handle to one submitted event.
#[derive(Debug)]
pub struct ProcessingHandle {
    event_id: EventId,
    lane: String,
    rx: Receiver<TrackResult<ProcessOutcome>>,
}

impl ProcessingHandle {
    /// The submitted event's id.
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }

    /// The lane the event was queued on.
    #[must_use]
    pub fn lane(&self) -> &str {
        &self.lane
    }

    /// Waits for the event to be processed.
    ///
    /// # Errors
    /// Returns the processing error, or `TrackError::Disconnected` if the
    /// worker went away without replying.
    pub fn join(self) -> TrackResult<ProcessOutcome> {
        let lane = self.lane;
        self.rx
            .recv()
            .map_err(|_| TrackError::Disconnected { lane })?
    }

    /// Returns true once the result is ready, so `join` will not block.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Waits for the event to be processed, at most `timeout`.
    ///
    /// # Errors
    /// As [`ProcessingHandle::join`], plus `TrackError::Timeout`.
    pub fn join_timeout(self, timeout: Duration) -> TrackResult<ProcessOutcome> {
        let lane = self.lane;
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => TrackError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => TrackError::Disconnected { lane },
        })?
    }
}

/// An event that failed during [`ProcessorRuntime::drain`].
#[derive(Debug)]
pub struct DrainFailure {
    /// The failed event's id.
    pub event_id: EventId,
    /// The entity it addressed.
    pub entity_id: String,
    /// Its wire tag.
    pub event_type: &'static str,
    /// Why it failed.
    pub error: TrackError,
}

/// Totals for one drained inbox.
#[derive(Debug, Default)]
pub struct DrainSummary {
    /// Events that went through every stage.
    pub applied: usize,
    /// Redeliveries ignored by the ledger.
    pub duplicates: usize,
    /// Messages of unknown kind.
    pub skipped: usize,
    /// Messages that could not be decoded or read.
    pub decode_errors: usize,
    /// Events that failed.
    pub failures: Vec<DrainFailure>,
}

impl DrainSummary {
    /// Messages taken from the inbox.
    #[must_use]
    pub fn received(&self) -> usize {
        self.applied + self.duplicates + self.skipped + self.decode_errors + self.failures.len()
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.decode_errors == 0
    }

    fn record(&mut self, meta: (EventId, String, &'static str), result: TrackResult<ProcessOutcome>) {
        match result {
            Ok(ProcessOutcome::Applied(_)) => self.applied += 1,
            Ok(ProcessOutcome::Duplicate { .. }) => self.duplicates += 1,
            Ok(ProcessOutcome::Skipped { .. }) => self.skipped += 1,
            Err(error) => self.failures.push(DrainFailure {
                event_id: meta.0,
                entity_id: meta.1,
                event_type: meta.2,
                error,
            }),
        }
    }
}

/// Runs an [`EventProcessor`] on a bounded worker pool.
pub struct ProcessorRuntime {
    processor: Arc<EventProcessor>,
    dispatch: Dispatch,
    lanes: Vec<Lane>,
}

impl std::fmt::Debug for ProcessorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRuntime")
            .field("dispatch", &self.dispatch)
            .field("lanes", &self.lanes.len())
            .finish_non_exhaustive()
    }
}

impl ProcessorRuntime {
    /// Start the worker threads.
    ///
    /// # Errors
    /// - `TrackError::Validation` if `config` is invalid
    /// - `TrackError::Internal` if a worker thread cannot be spawned
    pub fn new(processor: Arc<EventProcessor>, config: RuntimeConfig) -> TrackResult<Self> {
        config.validate()?;
        let lanes = match config.dispatch {
            Dispatch::Shared => vec![Lane::start(
                "shared".to_string(),
                config.workers,
                config.queue_capacity,
                &processor,
            )?],
            Dispatch::EntityAffinity => (0..config.workers)
                .map(|idx| Lane::start(format!("lane{idx}"), 1, config.queue_capacity, &processor))
                .collect::<TrackResult<Vec<_>>>()?,
        };
        Ok(Self {
            processor,
            dispatch: config.dispatch,
            lanes,
        })
    }

    /// The processor the workers run.
    #[must_use]
    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    /// Number of lanes (queues).
    #[must_use]
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }

    fn lane_for(&self, entity_id: &str) -> &Lane {
        let idx = match self.dispatch {
            Dispatch::Shared => 0,
            Dispatch::EntityAffinity => lane_index(entity_id, self.lanes.len()),
        };
        &self.lanes[idx]
    }

    fn job(event: DomainEvent) -> (Job, ProcessingHandle, String) {
        let (reply, rx) = bounded(1);
        let entity_id = event.entity_id.clone();
        let handle = ProcessingHandle {
            event_id: event.event_id,
            lane: String::new(),
            rx,
        };
        (Job::Process { event, reply }, handle, entity_id)
    }

    /// Queue an event without blocking.
    ///
    /// # Errors
    /// - `TrackError::QueueFull` if the lane is at capacity
    /// - `TrackError::Disconnected` if the lane's workers are gone
    pub fn submit(&self, event: DomainEvent) -> TrackResult<ProcessingHandle> {
        let (job, mut handle, entity_id) = Self::job(event);
        let lane = self.lane_for(&entity_id);
        lane.try_submit(job)?;
        handle.lane.clone_from(&lane.name);
        Ok(handle)
    }

    fn submit_blocking(&self, event: DomainEvent) -> TrackResult<ProcessingHandle> {
        let (job, mut handle, entity_id) = Self::job(event);
        let lane = self.lane_for(&entity_id);
        lane.submit_blocking(job)?;
        handle.lane.clone_from(&lane.name);
        Ok(handle)
    }

    /// Process an event on the pool and wait for the result.
    ///
    /// # Errors
    /// Queueing errors from [`ProcessorRuntime::submit`], or the processing
    /// error itself.
    pub fn process(&self, event: DomainEvent) -> TrackResult<ProcessOutcome> {
        self.submit(event)?.join()
    }

    /// Pull every message from `inbox`, process it, and wait for all of it
    /// to finish.
    ///
    /// Submission blocks while a lane is full. Unrecognized kinds are
    /// skipped inline; undecodable messages are counted and logged.
    /// Finished handles are collected as the drain goes, and no more handles
    /// are held than the lanes can have queued or running.
    pub fn drain(&self, inbox: &mut dyn EventInbox) -> DrainSummary {
        let mut summary = DrainSummary::default();
        let mut pending = VecDeque::new();
        let in_flight = self.in_flight_limit();

        while let Some(next) = inbox.next_event() {
            let event = match next {
                Ok(InboundEvent::Known(event)) => event,
                Ok(unknown @ InboundEvent::Unrecognized { .. }) => {
                    if let Ok(ProcessOutcome::Skipped { .. }) = self.processor.process_inbound(&unknown) {
                        summary.skipped += 1;
                    }
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "dropping unreadable message");
                    summary.decode_errors += 1;
                    continue;
                }
            };

            let meta = (event.event_id, event.entity_id.clone(), event.event_type());
            match self.submit_blocking(event) {
                Ok(handle) => pending.push_back((meta, handle)),
                Err(err) => summary.record(meta, Err(err)),
            }

            while pending.len() > in_flight
                || pending.front().is_some_and(|(_, handle)| handle.is_finished())
            {
                let Some((meta, handle)) = pending.pop_front() else {
                    break;
                };
                summary.record(meta, handle.join());
            }
        }

        for (meta, handle) in pending {
            summary.record(meta, handle.join());
        }
        summary
    }

    fn in_flight_limit(&self) -> usize {
        self.lanes
            .iter()
            .map(|lane| lane.queue_capacity + lane.workers.len())
            .sum()
    }

    #[cfg(test)]
    fn submit_sleep(&self, entity_id: &str, duration: Duration) -> TrackResult<Receiver<()>> {
        let (tx, rx) = bounded::<()>(1);
        self.lane_for(entity_id)
            .try_submit(Job::Sleep { duration, reply: tx })?;
        Ok(rx)
    }
}

fn lane_index(entity_id: &str, lanes: usize) -> usize {
    let hash = blake3::hash(entity_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    let lanes = u64::try_from(lanes.max(1)).unwrap_or(u64::MAX);
    usize::try_from(u64::from_le_bytes(prefix) % lanes).unwrap_or(0)
}

impl Drop for ProcessorRuntime {
    fn drop(&mut self) {
        for lane in self.lanes.drain(..) {
            lane.shutdown();
        }
    }
}
