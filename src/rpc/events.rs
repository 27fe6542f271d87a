// ABOUTME: Server-initiated event representation and subscriber dispatch
// ABOUTME: The reader task spawns one delivery per subscriber so it never blocks on handler work

use std::sync::{Arc, RwLock};

use crate::htsmsg::Value;

/// A server-initiated message: has `method` but no `seq`. Carries the
/// decoded fields Map verbatim; typed accessors on [`Value`] pull out the
/// bits each subscriber cares about (`channelAdd.channelId`, `dvrEntryAdd.id`,
/// and so on).
#[derive(Debug, Clone)]
pub struct HtspEvent {
    pub method: String,
    pub fields: Value,
}

impl HtspEvent {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// A server-event subscriber. Kept synchronous: handlers do their own
/// dispatch to whatever async work they need, the reader only guarantees
/// the call happens off its own task.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &HtspEvent);
}

/// Thread-safe subscriber list. `subscribe`/`unsubscribe` identify a
/// handler by pointer equality on the `Arc`, mirroring how the original
/// hook broker's `register`/`unregister` pair keyed on the handler object.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.subscribers.write().unwrap().push(handler);
    }

    pub fn unsubscribe(&self, handler: &Arc<dyn EventHandler>) {
        self.subscribers
            .write()
            .unwrap()
            .retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Dispatches `event` to every current subscriber on its own task.
    /// A handler that panics takes down only its own task; the reader
    /// loop and the other subscribers are unaffected.
    pub fn dispatch(&self, event: HtspEvent) {
        let subscribers: Vec<_> = self.subscribers.read().unwrap().clone();
        for handler in subscribers {
            let event = event.clone();
            tokio::spawn(async move {
                handler.handle(&event);
            });
        }
    }
}
