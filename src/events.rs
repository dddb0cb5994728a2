// src/events.rs
//! Typed publish/subscribe bus.
//!
//! Handlers are keyed by the event's `TypeId`. `publish` runs against a
//! snapshot of the subscriber list, so a handler may subscribe or
//! unsubscribe without deadlocking the bus.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;

use crate::registry::PartId;

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Returned by `subscribe`, pass to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    type_id: TypeId,
    id: u64,
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E, F>(&self, handler: F) -> Subscription
    where
        E: Any,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<E>();
        let erased: Handler = Arc::new(move |event: &dyn Any| {
            if let Some(e) = event.downcast_ref::<E>() {
                handler(e);
            }
        });
        self.handlers.write().entry(type_id).or_default().push((id, erased));
        Subscription { type_id, id }
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&sub.type_id) else { return false };
        let before = list.len();
        list.retain(|(id, _)| *id != sub.id);
        before != list.len()
    }

    /// Deliver `event` to every handler of its type. Returns the handler count.
    pub fn publish<E: Any>(&self, event: E) -> usize {
        let snapshot: Vec<Handler> = match self.handlers.read().get(&TypeId::of::<E>()) {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };
        for handler in &snapshot {
            handler(&event);
        }
        snapshot.len()
    }

    pub fn subscriber_count<E: Any>(&self) -> usize {
        self.handlers.read().get(&TypeId::of::<E>()).map_or(0, |l| l.len())
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Events                                   */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Rigid,
    Wheel,
}

impl JoinKind {
    pub fn word(self) -> &'static str {
        match self {
            JoinKind::Rigid => "rigid",
            JoinKind::Wheel => "wheel",
        }
    }
}

/// One pairing formed by the attachment resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentFormed {
    pub kind: JoinKind,
    /// The part being resolved.
    pub part: PartId,
    pub other: PartId,
    pub socket_type: String,
    pub anchor: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartPlaced {
    pub part: PartId,
    pub part_id: String,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartRemoved {
    pub part: PartId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioStateChanged {
    pub pin: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub detail: String,
}

/// Any line of program output, after telemetry parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStarted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStopped;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Build,
    Drive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChanged {
    pub from: Mode,
    pub to: Mode,
}
