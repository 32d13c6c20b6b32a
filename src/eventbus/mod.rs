//! A synchronous, single-subscriber event bus.
//!
//! The teacher workspace's event bus (`application::events::event_bus`) is
//! an async `tokio::broadcast`-backed, multi-subscriber design meant for
//! fanning notifications out to many independent listeners (a REST API, a
//! metrics exporter, websocket push). That shape is wrong here: §4.4 and §9
//! require that event-bus emission order equal CSV write order and that the
//! writer never run concurrently with dispatch. A broadcast channel gives
//! neither guarantee — delivery to subscribers is not ordered relative to
//! the publisher's own continued execution, and a multi-subscriber design
//! invites a second consumer racing the CSV writer. So this bus is a plain
//! synchronous callback list invoked inline on the publisher's task.

use std::sync::{Arc, Mutex};

use crate::domain::events::Event;

pub type EventHook = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
pub struct EventBus {
    hooks: Arc<Mutex<Vec<EventHook>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a callback invoked synchronously, in registration order, for
    /// every published event. Intended for the scenario engine's CSV
    /// writers; a UI wanting live events should install its own
    /// non-blocking hook (e.g. pushing into a bounded channel) rather than
    /// relying on the bus to buffer for it.
    pub fn subscribe<F>(&self, hook: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap().push(Box::new(hook));
    }

    /// Publish synchronously. Returns only after every hook has run, which
    /// is what makes the CSV write-ordering guarantee possible.
    pub fn publish(&self, event: Event) {
        let hooks = self.hooks.lock().unwrap();
        for hook in hooks.iter() {
            hook(&event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{Event, HeartbeatEvent};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_run_in_registration_order_synchronously() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.subscribe(move |_| o2.lock().unwrap().push(2));

        bus.publish(Event::Heartbeat(HeartbeatEvent {
            cp_id: "CP_001".into(),
            timestamp: Utc::now(),
        }));

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn publish_returns_after_all_hooks_observed_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..5 {
            bus.publish(Event::Heartbeat(HeartbeatEvent {
                cp_id: "CP_001".into(),
                timestamp: Utc::now(),
            }));
        }

        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
