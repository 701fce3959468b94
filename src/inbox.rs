//! Event sources.
//!
//! An [`EventInbox`] hands the processor one decoded message at a time.
//! Delivery is assumed to be at least once; deduplication happens in the
//! processor, not here.

use std::io::BufRead;

use crossbeam_channel::{bounded, Receiver, Sender};
use thiserror::Error;

use crate::event::{decode_event, DecodeError, InboundEvent};

/// Errors raised while pulling from an inbox.
#[derive(Debug, Error)]
pub enum InboxError {
    #[error("I/O error reading inbox: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message {position} could not be decoded: {source}")]
    Decode {
        position: u64,
        #[source]
        source: DecodeError,
    },
}

/// A source of inbound events.
pub trait EventInbox {
    /// The next message, or `None` once the source is exhausted.
    ///
    /// A malformed message yields `Some(Err(..))`; the inbox stays usable
    /// and the following call moves on to the next message.
    fn next_event(&mut self) -> Option<Result<InboundEvent, InboxError>>;
}

/// Reads one JSON event per line. Blank lines are skipped.
#[derive(Debug)]
pub struct JsonLinesInbox<R> {
    reader: R,
    line: u64,
    buf: String,
}

impl<R: BufRead> JsonLinesInbox<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }

    /// Number of lines consumed so far.
    #[must_use]
    pub const fn lines_read(&self) -> u64 {
        self.line
    }
}

impl<R: BufRead> EventInbox for JsonLinesInbox<R> {
    fn next_event(&mut self) -> Option<Result<InboundEvent, InboxError>> {
        loop {
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(InboxError::Io(e))),
            }
            self.line += 1;

            let trimmed = self.buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Some(decode_event(trimmed.as_bytes()).map_err(|source| InboxError::Decode {
                position: self.line,
                source,
            }));
        }
    }
}

/// Receives raw messages from an in-process channel, as a bus consumer
/// would. Ends when every sender has been dropped.
#[derive(Debug)]
pub struct ChannelInbox {
    rx: Receiver<Vec<u8>>,
    received: u64,
}

impl ChannelInbox {
    /// Wrap an existing receiver.
    #[must_use]
    pub const fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx, received: 0 }
    }

    /// Create a bounded channel and the inbox reading from it.
    #[must_use]
    pub fn channel(capacity: usize) -> (Sender<Vec<u8>>, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        (tx, Self::new(rx))
    }
}

impl EventInbox for ChannelInbox {
    fn next_event(&mut self) -> Option<Result<InboundEvent, InboxError>> {
        let raw = self.rx.recv().ok()?;
        self.received += 1;
        Some(decode_event(&raw).map_err(|source| InboxError::Decode {
            position: self.received,
            source,
        }))
    }
}
