//! Typed in-process event bus.
//!
//! Delivery is synchronous: `publish` runs every handler for the event type
//! on the caller's stack, in subscription order, and stops at the first error.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{QuestError, Result};
use crate::task::TaskType;

/// Marker for values that travel over the bus
pub trait Event: Any + Send + Sync + std::fmt::Debug {}

impl<T: Any + Send + Sync + std::fmt::Debug> Event for T {}

type Handler = Arc<dyn Fn(&dyn Any) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    type_id: TypeId,
    serial: u64,
}

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<(u64, Handler)>>>,
    next_serial: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E, F>(&self, handler: F) -> SubscriptionId
    where
        E: Event,
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<E>();
        let erased: Handler = Arc::new(move |event: &dyn Any| match event.downcast_ref::<E>() {
            Some(event) => handler(event),
            None => Ok(()),
        });
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.entry(type_id).or_default().push((serial, erased));
        }
        SubscriptionId { type_id, serial }
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut handlers) = self.handlers.write() else {
            return false;
        };
        let Some(list) = handlers.get_mut(&id.type_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|(serial, _)| *serial != id.serial);
        before != list.len()
    }

    pub fn publish<E: Event>(&self, event: &E) -> Result<()> {
        // Snapshot so handlers may publish or subscribe without deadlocking
        let handlers: Vec<Handler> = {
            let map = self
                .handlers
                .read()
                .map_err(|_| QuestError::Persistence("event bus lock poisoned".into()))?;
            match map.get(&TypeId::of::<E>()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return Ok(()),
            }
        };
        for handler in handlers {
            handler(event as &dyn Any)?;
        }
        Ok(())
    }

    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.handlers
            .read()
            .map(|map| map.get(&TypeId::of::<E>()).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types = self.handlers.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("event_types", &types).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: i64,
    pub task_type: TaskType,
    pub difficulty: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgressed {
    pub task_id: i64,
    pub value: i64,
    pub goal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChanged {
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinsChanged {
    pub coins: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrideChanged {
    pub pride: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementUnlocked {
    pub achievement_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementProgressChanged {
    pub achievement_id: i64,
    pub value: i64,
    pub goal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPurchased {
    pub item_id: i64,
    pub item_name: String,
    pub quantity: u32,
    pub total_cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerendipityTriggered {
    pub owner: String,
    pub description: String,
}
