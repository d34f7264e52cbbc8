//! Instrumentation event definitions.

use std::any::Any;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::notifications::instrumenter::InstrumenterId;

/// Structured event data, keyed by field name.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Information about a failed instrumented body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Error type name, or `"panic"` for an unwinding body.
    pub kind: String,
    /// Rendered error message.
    pub message: String,
}

impl Failure {
    /// Capture an error returned by an instrumented body.
    pub fn from_error<E: fmt::Display>(error: &E) -> Self {
        Self {
            kind: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
        }
    }

    /// Capture the payload of a panicking body.
    pub fn from_panic(panic: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Self {
            kind: "panic".to_string(),
            message,
        }
    }

    /// An asynchronous body whose future was dropped before completing.
    pub fn cancelled() -> Self {
        Self {
            kind: "cancelled".to_string(),
            message: "dropped before completion".to_string(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// One recorded instrumentation occurrence.
///
/// Events are built by [`NotificationBus::instrument`] and handed to
/// listeners by reference; nothing can modify them once published.
///
/// [`NotificationBus::instrument`]: crate::notifications::NotificationBus::instrument
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    payload: Payload,
    started_at: SystemTime,
    finished_at: SystemTime,
    duration: Duration,
    instrumenter_id: InstrumenterId,
    failure: Option<Failure>,
}

impl Event {
    pub(crate) fn new(
        name: impl Into<String>,
        payload: Payload,
        timing: Timing,
        instrumenter_id: InstrumenterId,
        failure: Option<Failure>,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            started_at: timing.started_at,
            finished_at: timing.finished_at,
            duration: timing.duration,
            instrumenter_id,
            failure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unfiltered payload as given to `instrument`.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn finished_at(&self) -> SystemTime {
        self.finished_at
    }

    /// Monotonic duration of the body.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn instrumenter_id(&self) -> InstrumenterId {
        self.instrumenter_id
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Wall-clock start/end plus monotonic duration of one body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Timing {
    started_at: SystemTime,
    finished_at: SystemTime,
    duration: Duration,
}

/// Running stopwatch for an instrumented body.
pub(crate) struct Clock {
    started_at: SystemTime,
    start: std::time::Instant,
}

impl Clock {
    pub(crate) fn start() -> Self {
        Self {
            started_at: SystemTime::now(),
            start: std::time::Instant::now(),
        }
    }

    pub(crate) fn finish(self) -> Timing {
        let duration = self.start.elapsed();
        Timing {
            started_at: self.started_at,
            // Derived from the monotonic clock so finished_at >= started_at.
            finished_at: self.started_at + duration,
            duration,
        }
    }
}

/// Milliseconds since the Unix epoch, saturating at zero.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_from_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let failure = Failure::from_error(&err);
        assert!(failure.kind.starts_with("std::io::"));
        assert_eq!(failure.message, "disk on fire");
    }

    #[test]
    fn test_failure_from_panic() {
        let panic = std::panic::catch_unwind(|| panic!("boom {}", 42)).unwrap_err();
        let failure = Failure::from_panic(panic.as_ref());
        assert_eq!(failure.kind, "panic");
        assert_eq!(failure.message, "boom 42");

        let panic = std::panic::catch_unwind(|| std::panic::panic_any(7u32)).unwrap_err();
        assert_eq!(
            Failure::from_panic(panic.as_ref()).message,
            "non-string panic payload"
        );
    }

    #[test]
    fn test_clock_ordering() {
        let timing = Clock::start().finish();
        assert!(timing.finished_at >= timing.started_at);
        assert_eq!(
            timing.finished_at.duration_since(timing.started_at).unwrap(),
            timing.duration
        );
    }

    #[test]
    fn test_epoch_millis_clamps_before_epoch() {
        assert_eq!(epoch_millis(UNIX_EPOCH), 0);
        assert_eq!(epoch_millis(UNIX_EPOCH - Duration::from_secs(1)), 0);
        assert_eq!(epoch_millis(UNIX_EPOCH + Duration::from_millis(1500)), 1500);
    }
}
