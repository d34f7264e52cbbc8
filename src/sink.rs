//! Filtered event records and the sinks that receive them.
//!
//! # Responsibilities
//! - Turn a published Event into the record handed to persistence
//! - Apply the payload filter registry on the way out
//! - Provide a log sink and a bounded in-memory sink
//!
//! # Design Decisions
//! - Filtering happens in the listener, after publish: listeners that want
//!   the raw payload (e.g. debuggers) can still subscribe to the bus
//! - Sinks are synchronous; a slow sink slows the publisher

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::filters::PayloadFilterRegistry;
use crate::notifications::event::epoch_millis;
use crate::notifications::{BoxError, Event, Failure, InstrumenterId, Listener, Payload};

/// What leaves the capture layer for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub name: String,
    /// Payload after filtering.
    pub payload: Payload,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    pub finished_at: u64,
    pub duration_us: u64,
    pub instrumenter_id: InstrumenterId,
    pub failure: Option<Failure>,
}

impl Record {
    pub fn from_event(event: &Event, registry: &PayloadFilterRegistry) -> Self {
        Self {
            name: event.name().to_string(),
            payload: registry.filter(event.name(), event.payload()),
            started_at: epoch_millis(event.started_at()),
            finished_at: epoch_millis(event.finished_at()),
            duration_us: micros(event.duration()),
            instrumenter_id: event.instrumenter_id(),
            failure: event.failure().cloned(),
        }
    }
}

/// Whole microseconds, saturating at `u64::MAX`.
fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

/// Destination for filtered records.
pub trait RecordSink: Send + Sync + 'static {
    fn store(&self, record: Record) -> Result<(), BoxError>;
}

impl<S: RecordSink + ?Sized> RecordSink for Arc<S> {
    fn store(&self, record: Record) -> Result<(), BoxError> {
        (**self).store(record)
    }
}

/// Bus listener that filters each event and hands it to a sink.
pub struct FilteringListener<S> {
    registry: Arc<PayloadFilterRegistry>,
    sink: S,
}

impl<S: RecordSink> FilteringListener<S> {
    pub fn new(registry: Arc<PayloadFilterRegistry>, sink: S) -> Self {
        Self { registry, sink }
    }
}

impl<S: RecordSink> Listener for FilteringListener<S> {
    fn on_event(&self, event: &Event) -> Result<(), BoxError> {
        self.sink.store(Record::from_event(event, &self.registry))
    }
}

/// Writes every record as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl RecordSink for LogSink {
    fn store(&self, record: Record) -> Result<(), BoxError> {
        let payload = serde_json::to_string(&record.payload)?;
        match &record.failure {
            None => tracing::info!(
                target: "instrumentation",
                event = %record.name,
                instrumenter_id = %record.instrumenter_id,
                duration_us = record.duration_us,
                payload = %payload,
                "Event recorded"
            ),
            Some(failure) => tracing::warn!(
                target: "instrumentation",
                event = %record.name,
                instrumenter_id = %record.instrumenter_id,
                duration_us = record.duration_us,
                payload = %payload,
                failure = %failure,
                "Failed event recorded"
            ),
        }
        Ok(())
    }
}

/// Keeps the most recent records in memory.
#[derive(Debug)]
pub struct MemorySink {
    records: Mutex<VecDeque<Record>>,
    capacity: usize,
}

impl MemorySink {
    /// A sink holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records oldest first.
    pub fn records(&self) -> Vec<Record> {
        self.lock().iter().cloned().collect()
    }

    /// Records belonging to one request, in publish order.
    pub fn for_instrumenter(&self, id: InstrumenterId) -> Vec<Record> {
        self.lock()
            .iter()
            .filter(|r| r.instrumenter_id == id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordSink for MemorySink {
    fn store(&self, record: Record) -> Result<(), BoxError> {
        let mut records = self.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }
}
