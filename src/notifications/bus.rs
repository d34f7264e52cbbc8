//! In-process publish/subscribe bus.
//!
//! # Responsibilities
//! - Register listeners per event name (or for every event)
//! - Run instrumented bodies, time them and publish exactly one Event each
//! - Deliver events synchronously, isolating listener failures
//!
//! # Design Decisions
//! - Listeners are snapshotted before delivery so a listener may
//!   subscribe/unsubscribe without deadlocking the bus
//! - Panics in bodies are recorded then resumed, never swallowed
//! - Panics in listeners are caught and treated like returned errors

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;

use crate::notifications::event::{Clock, Event, Failure, Payload};
use crate::notifications::instrumenter::InstrumenterId;
use crate::observability::metrics;

/// Boxed error returned by listeners, sinks and transforms.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A consumer of published events.
pub trait Listener: Send + Sync + 'static {
    /// Called once for each matching event, on the publisher's stack.
    fn on_event(&self, event: &Event) -> Result<(), BoxError>;
}

/// Adapter that wraps an infallible closure into a [`Listener`].
struct FnListener<F>(F);

impl<F: Fn(&Event) + Send + Sync + 'static> Listener for FnListener<F> {
    fn on_event(&self, event: &Event) -> Result<(), BoxError> {
        (self.0)(event);
        Ok(())
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Topic {
    Name(String),
    All,
}

impl Topic {
    fn matches(&self, name: &str) -> bool {
        match self {
            Topic::Name(n) => n == name,
            Topic::All => true,
        }
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    listener: Arc<dyn Listener>,
}

/// Synchronous notification bus.
///
/// Shared across the application via `Arc<NotificationBus>`.
#[derive(Default)]
pub struct NotificationBus {
    /// Subscriptions in registration order.
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("subscriptions", &self.subscriber_count())
            .finish()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for events named `name`.
    pub fn subscribe<L: Listener>(&self, name: impl Into<String>, listener: L) -> SubscriptionId {
        self.add(Topic::Name(name.into()), Arc::new(listener))
    }

    /// Register `listener` for every event, whatever its name.
    pub fn subscribe_all<L: Listener>(&self, listener: L) -> SubscriptionId {
        self.add(Topic::All, Arc::new(listener))
    }

    /// Register a closure for events named `name`.
    pub fn subscribe_fn<F>(&self, name: impl Into<String>, f: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe(name, FnListener(f))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn add(&self, topic: Topic, listener: Arc<dyn Listener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                topic,
                listener,
            });
        id
    }

    /// Deliver `event` to every matching listener, in registration order.
    ///
    /// Listener errors and panics are logged and counted; they never stop
    /// delivery to the remaining listeners and never reach the caller.
    pub fn publish(&self, event: &Event) {
        let targets: Vec<Subscription> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.topic.matches(event.name()))
            .cloned()
            .collect();

        metrics::record_event_published(event.name(), event.is_failure());

        for sub in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| sub.listener.on_event(event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => Failure::from_panic(panic.as_ref()).to_string(),
            };
            tracing::warn!(
                event = %event.name(),
                subscription = sub.id.0,
                error = %error,
                "Listener failed"
            );
            metrics::record_listener_failure(event.name());
        }
    }

    /// Run `body`, then publish one event describing it.
    ///
    /// The body's result is returned unchanged. A panicking body is
    /// recorded as a failure and the panic resumed after publishing.
    pub fn instrument<T, E, F>(&self, name: &str, payload: Payload, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let id = InstrumenterId::current_or_new();
        let span = tracing::debug_span!("instrument", event = %name, instrumenter_id = %id);
        let _enter = span.enter();

        let clock = Clock::start();
        let outcome = panic::catch_unwind(AssertUnwindSafe(body));
        self.finish(name, payload, clock, id, &outcome);

        match outcome {
            Ok(result) => result,
            Err(panic) => panic::resume_unwind(panic),
        }
    }

    /// Asynchronous counterpart of [`instrument`](Self::instrument).
    pub async fn instrument_async<T, E, F>(&self, name: &str, payload: Payload, body: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let id = InstrumenterId::current_or_new();
        let span = tracing::debug_span!("instrument", event = %name, instrumenter_id = %id);

        let mut pending = PendingEvent {
            bus: self,
            name,
            id,
            started: Some((payload, Clock::start())),
        };
        // Fully qualified: `Instrument` in scope would shadow `Self::instrument`.
        let outcome =
            tracing::Instrument::instrument(AssertUnwindSafe(body).catch_unwind(), span.clone())
                .await;
        if let Some((payload, clock)) = pending.started.take() {
            span.in_scope(|| self.finish(name, payload, clock, id, &outcome));
        }

        match outcome {
            Ok(result) => result,
            Err(panic) => panic::resume_unwind(panic),
        }
    }

    fn finish<T, E: fmt::Display>(
        &self,
        name: &str,
        payload: Payload,
        clock: Clock,
        id: InstrumenterId,
        outcome: &std::thread::Result<Result<T, E>>,
    ) {
        let timing = clock.finish();
        let failure = match outcome {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => Some(Failure::from_error(e)),
            Err(panic) => Some(Failure::from_panic(panic.as_ref())),
        };
        self.publish(&Event::new(name, payload, timing, id, failure));
    }
}

/// Publishes a `cancelled` event when an `instrument_async` future is
/// dropped before its body completes.
struct PendingEvent<'a> {
    bus: &'a NotificationBus,
    name: &'a str,
    id: InstrumenterId,
    /// Taken once the body finishes and the real event is published.
    started: Option<(Payload, Clock)>,
}

impl Drop for PendingEvent<'_> {
    fn drop(&mut self) {
        if let Some((payload, clock)) = self.started.take() {
            tracing::debug!(event = %self.name, instrumenter_id = %self.id, "Instrumented future dropped");
            let event = Event::new(
                self.name,
                payload,
                clock.finish(),
                self.id,
                Some(Failure::cancelled()),
            );
            self.bus.publish(&event);
        }
    }
}
