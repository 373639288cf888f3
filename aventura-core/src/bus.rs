//! Typed in-process publish/subscribe bus.
//!
//! Delivery is synchronous and in source order: `emit` dispatches to every
//! current subscriber of the event's kind before returning. Handlers that
//! emit during delivery are queued behind the event being dispatched, so
//! causal order is preserved. Handlers report failure by returning `Err`;
//! the failure becomes a [`CoreEvent::Error`] and never halts delivery to
//! the remaining subscribers.
//!
//! A bounded ring buffer retains the last K delivered events for debug
//! inspection; it has no functional effect.

use crate::events::{CoreEvent, EventKind};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Default ring-buffer capacity.
const DEFAULT_HISTORY: usize = 64;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    kind: EventKind,
    id: u64,
}

/// A delivered event as recorded in the debug ring buffer.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    /// Monotone delivery sequence.
    pub seq: u64,
    /// Delivery timestamp, milliseconds since the Unix epoch.
    pub at_ms: i64,
    pub event: CoreEvent,
}

type Handler = Arc<dyn Fn(&CoreEvent) -> Result<(), String> + Send + Sync>;

#[derive(Default)]
struct BusInner {
    subscribers: HashMap<EventKind, Vec<(u64, Handler)>>,
    next_subscriber: u64,
    queue: VecDeque<CoreEvent>,
    dispatching: bool,
    history: VecDeque<RecordedEvent>,
    history_capacity: usize,
    next_seq: u64,
}

/// The event bus.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY)
    }

    /// Create a bus retaining the last `capacity` events for inspection.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(BusInner {
                history_capacity: capacity,
                ..BusInner::default()
            }),
        }
    }

    /// Subscribe to one event kind.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&CoreEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner
            .subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        SubscriptionId { kind, id }
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscription: SubscriptionId) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if let Some(handlers) = inner.subscribers.get_mut(&subscription.kind) {
            handlers.retain(|(id, _)| *id != subscription.id);
        }
    }

    /// Publish an event.
    ///
    /// If called from inside a handler the event is queued and delivered
    /// after the current dispatch completes.
    pub fn emit(&self, event: CoreEvent) {
        {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            inner.queue.push_back(event);
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }

        loop {
            // Take the next queued event and a snapshot of its handlers,
            // then release the lock so handlers may re-enter emit.
            let (event, handlers) = {
                let mut inner = self.inner.lock().expect("bus lock poisoned");
                match inner.queue.pop_front() {
                    Some(event) => {
                        let seq = inner.next_seq;
                        inner.next_seq += 1;
                        let recorded = RecordedEvent {
                            seq,
                            at_ms: Utc::now().timestamp_millis(),
                            event: event.clone(),
                        };
                        inner.history.push_back(recorded);
                        while inner.history.len() > inner.history_capacity {
                            inner.history.pop_front();
                        }
                        let handlers: Vec<Handler> = inner
                            .subscribers
                            .get(&event.kind())
                            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
                            .unwrap_or_default();
                        (event, handlers)
                    }
                    None => {
                        inner.dispatching = false;
                        return;
                    }
                }
            };

            for handler in handlers {
                if let Err(message) = handler(&event) {
                    if event.kind() == EventKind::Error {
                        // Do not loop error events through failing handlers.
                        tracing::error!(%message, "error-event handler failed");
                        continue;
                    }
                    tracing::warn!(kind = ?event.kind(), %message, "event handler failed");
                    let mut inner = self.inner.lock().expect("bus lock poisoned");
                    inner.queue.push_back(CoreEvent::Error {
                        source: format!("{:?}", event.kind()),
                        message,
                    });
                }
            }
        }
    }

    /// Snapshot of the debug ring buffer, oldest first.
    pub fn recent_events(&self) -> Vec<RecordedEvent> {
        let inner = self.inner.lock().expect("bus lock poisoned");
        inner.history.iter().cloned().collect()
    }
}
