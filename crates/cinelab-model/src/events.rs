//! Change notifications.
//!
//! Handlers connect to a package for one [`EventKind`] and receive every
//! matching [`PackageEvent`] raised by the package or its elements. They run
//! on the mutating thread, inside the package's critical section, once the
//! change is applied in memory. A handler may call back into the package.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::element::{Element, ElementKind};
use crate::meta::MetaValue;
use crate::sync::lock;

/// Events emitted by a package when it or its elements change.
#[derive(Debug, Clone, PartialEq)]
pub enum PackageEvent {
    Created(Element),
    /// A kind-specific field changed (`url`, `begin`, `uri`, ...).
    Changed {
        element: Element,
        attribute: &'static str,
    },
    /// `element` is `None` for package metadata. `value` is `None` when the
    /// key was deleted.
    ChangedMeta {
        element: Option<Element>,
        key: String,
        value: Option<MetaValue>,
    },
    ChangedItems(Element),
    ChangedContent(Element),
    Deleted {
        id: String,
        kind: ElementKind,
    },
    /// The package is already closed when this is emitted.
    Closed {
        url: String,
        uri: String,
    },
}

impl PackageEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PackageEvent::Created(_) => EventKind::Created,
            PackageEvent::Changed { .. } => EventKind::Changed,
            PackageEvent::ChangedMeta { .. } => EventKind::ChangedMeta,
            PackageEvent::ChangedItems(_) => EventKind::ChangedItems,
            PackageEvent::ChangedContent(_) => EventKind::ChangedContent,
            PackageEvent::Deleted { .. } => EventKind::Deleted,
            PackageEvent::Closed { .. } => EventKind::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Changed,
    ChangedMeta,
    ChangedItems,
    ChangedContent,
    Deleted,
    Closed,
}

/// Identifies a connected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type Handler = Arc<dyn Fn(&PackageEvent) + Send + Sync>;

struct Slot {
    id: HandlerId,
    kind: EventKind,
    blocked: bool,
    handler: Handler,
}

/// Handler registry of one package.
#[derive(Default)]
pub(crate) struct EventHub {
    next_id: AtomicU64,
    slots: Mutex<Vec<Slot>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("handlers", &lock(&self.slots).len())
            .finish()
    }
}

impl EventHub {
    pub fn connect(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.slots).push(Slot {
            id,
            kind,
            blocked: false,
            handler,
        });
        id
    }

    pub fn disconnect(&self, id: HandlerId) -> bool {
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    pub fn has_handler(&self, id: HandlerId) -> bool {
        lock(&self.slots).iter().any(|slot| slot.id == id)
    }

    pub fn set_blocked(&self, id: HandlerId, blocked: bool) -> bool {
        match lock(&self.slots).iter_mut().find(|slot| slot.id == id) {
            Some(slot) => {
                slot.blocked = blocked;
                true
            }
            None => false,
        }
    }

    /// Run the unblocked handlers of the event's kind, in connection order.
    pub fn emit(&self, event: &PackageEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = lock(&self.slots)
            .iter()
            .filter(|slot| slot.kind == kind && !slot.blocked)
            .map(|slot| Arc::clone(&slot.handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closed() -> PackageEvent {
        PackageEvent::Closed {
            url: "sqlite::memory:".to_string(),
            uri: String::new(),
        }
    }

    fn counter(hub: &EventHub, kind: EventKind) -> (HandlerId, Arc<AtomicU64>) {
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let id = hub.connect(
            kind,
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (id, count)
    }

    #[test]
    fn test_handlers_only_see_their_kind() {
        let hub = EventHub::default();
        let (_, closed_count) = counter(&hub, EventKind::Closed);
        let (_, deleted_count) = counter(&hub, EventKind::Deleted);
        hub.emit(&closed());
        assert_eq!(closed_count.load(Ordering::SeqCst), 1);
        assert_eq!(deleted_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_block_and_disconnect() {
        let hub = EventHub::default();
        let (id, count) = counter(&hub, EventKind::Closed);
        assert!(hub.set_blocked(id, true));
        hub.emit(&closed());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(hub.set_blocked(id, false));
        hub.emit(&closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(hub.disconnect(id));
        assert!(!hub.has_handler(id));
        assert!(!hub.disconnect(id));
        assert!(!hub.set_blocked(id, true));
        hub.emit(&closed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_ids_are_distinct() {
        let hub = EventHub::default();
        let (a, _) = counter(&hub, EventKind::Created);
        let (b, _) = counter(&hub, EventKind::Created);
        assert_ne!(a, b);
        assert!(hub.has_handler(a) && hub.has_handler(b));
    }
}
