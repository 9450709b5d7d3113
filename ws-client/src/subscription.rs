//! Subscriber registry with set semantics and RAII deregistration.
//!
//! A callback registered twice for the same kind is stored once. Dropping
//! the returned [`Subscription`] (or calling `unsubscribe`) removes it;
//! both are idempotent.

use crate::client::ClientEvent;
use log::*;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// The channels a consumer can subscribe to: the data-bearing server
/// events plus the locally synthesized lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SaleUpdate,
    InventoryUpdate,
    Notification,
    ActiveUsersUpdate,
    ConnectionStatus,
    ConnectionError,
    Reconnecting,
    Reconnected,
}

pub type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
struct Registrations {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(u64, Callback)>>,
}

#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    inner: Arc<Mutex<Registrations>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for one event kind. Registering the same
    /// `Arc` twice returns a handle to the existing registration instead
    /// of storing a duplicate.
    pub fn subscribe(&self, kind: EventKind, callback: Callback) -> Subscription {
        let mut inner = crate::lock(&self.inner);

        let existing = inner.by_kind.get(&kind).and_then(|entries| {
            entries
                .iter()
                .find(|(_, registered)| Arc::ptr_eq(registered, &callback))
                .map(|(id, _)| *id)
        });
        if let Some(id) = existing {
            return Subscription::new(kind, id, Arc::downgrade(&self.inner));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_kind.entry(kind).or_default().push((id, callback));
        Subscription::new(kind, id, Arc::downgrade(&self.inner))
    }

    /// Delivers one event to every subscriber of its kind. A panicking
    /// subscriber is logged and skipped so the rest still receive the
    /// event.
    pub fn dispatch(&self, event: &ClientEvent) {
        let callbacks: Vec<Callback> = {
            let inner = crate::lock(&self.inner);
            inner
                .by_kind
                .get(&event.kind())
                .map(|entries| entries.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(
                    "Subscriber for {:?} panicked; continuing with the rest",
                    event.kind()
                );
            }
        }
    }

    /// Drops every registration. Outstanding `Subscription` handles become
    /// harmless no-ops.
    pub fn clear(&self) {
        let mut inner = crate::lock(&self.inner);
        inner.by_kind.clear();
    }

    #[cfg(test)]
    pub fn count(&self, kind: EventKind) -> usize {
        crate::lock(&self.inner)
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Handle to one registration. Dropping it unsubscribes.
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registry: Weak<Mutex<Registrations>>,
    active: AtomicBool,
}

impl Subscription {
    fn new(kind: EventKind, id: u64, registry: Weak<Mutex<Registrations>>) -> Self {
        Self {
            kind,
            id,
            registry,
            active: AtomicBool::new(true),
        }
    }

    /// Removes the registration. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let mut inner = crate::lock(&registry);
        let now_empty = match inner.by_kind.get_mut(&self.kind) {
            Some(entries) => {
                entries.retain(|(id, _)| *id != self.id);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            inner.by_kind.remove(&self.kind);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
