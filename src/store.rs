/// Concurrent point store for live simulator values
///
/// This module provides the single source of truth for runtime point values,
/// shared between the protocol engine, the generator loops and host-side
/// observers. Every mutation emits a change event after the store is
/// consistent; subscribers may be notified from any worker thread and must
/// not call back into the store on the notifying path.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::point::{PointDefinition, Value, ValueKind, ValueSource};

/// Capacity of the change-event channel; laggards lose oldest events
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// One runtime value slot
#[derive(Debug, Clone, PartialEq)]
pub struct PointSlot {
    pub value: Value,
    /// Fixed at initialization; writes of the wrong kind are rejected
    pub expected_kind: ValueKind,
    pub source: ValueSource,
    pub last_updated: DateTime<Utc>,
    pub display_value: Option<String>,
    pub override_status: Option<String>,
}

impl PointSlot {
    fn seeded(kind: ValueKind) -> Self {
        Self {
            value: kind.zero(),
            expected_kind: kind,
            source: ValueSource::Manual,
            last_updated: Utc::now(),
            display_value: None,
            override_status: None,
        }
    }
}

/// Change notification: a snapshot of the slot after the mutation
#[derive(Debug, Clone)]
pub struct PointChange {
    pub device_id: Uuid,
    pub key: String,
    pub slot: PointSlot,
}

/// Thread-safe `(device, key) -> slot` store
///
/// Slot updates are atomic with respect to observers: a reader never sees a
/// half-written slot, and events carry the post-write snapshot.
pub struct PointStore {
    devices: DashMap<Uuid, DashMap<String, PointSlot>>,
    events: broadcast::Sender<PointChange>,
}

impl PointStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { devices: DashMap::new(), events }
    }

    /// Subscribe to change events
    pub fn subscribe(&self) -> broadcast::Receiver<PointChange> {
        self.events.subscribe()
    }

    /// Seed slots for a device from its definitions
    ///
    /// Bool points start as `false`, numeric points as `0.0`. Any prior
    /// state for the device is discarded.
    pub fn initialize(&self, device_id: Uuid, definitions: &[PointDefinition]) {
        let slots = DashMap::new();
        for def in definitions {
            slots.insert(def.key.clone(), PointSlot::seeded(def.semantic_type.kind()));
        }
        self.devices.insert(device_id, slots);
    }

    /// Type-guarded write
    ///
    /// A value of the wrong kind is dropped silently (logged at debug), with
    /// one coercion: a numeric written into a bool slot is converted via
    /// truthiness. Writes to keys that were never seeded by `initialize` are
    /// dropped the same way. Returns whether the write was applied.
    pub fn set(
        &self,
        device_id: Uuid,
        key: &str,
        value: Value,
        source: ValueSource,
        display_value: Option<String>,
    ) -> bool {
        let Some(slots) = self.devices.get(&device_id) else {
            debug!("store: write to unknown device {}", device_id);
            return false;
        };

        let snapshot = {
            let mut entry = match slots.get_mut(key) {
                Some(entry) => entry,
                None => {
                    debug!("store: write to unknown point '{}' of {}", key, device_id);
                    return false;
                }
            };

            let accepted = match (value, entry.expected_kind) {
                (v, kind) if v.kind() == kind => Some(v),
                (Value::Numeric(n), ValueKind::Bool) => Some(Value::Bool(n != 0.0)),
                _ => None,
            };

            let Some(accepted) = accepted else {
                debug!(
                    "store: rejected {:?} write into {:?} slot '{}' of {}",
                    value.kind(),
                    entry.expected_kind,
                    key,
                    device_id
                );
                return false;
            };

            entry.value = accepted;
            entry.source = source;
            entry.last_updated = Utc::now();
            entry.display_value = display_value;
            entry.clone()
        };

        self.publish(device_id, key, snapshot);
        true
    }

    /// Snapshot read; a missing entry reads as a zero-initialized numeric slot
    pub fn get(&self, device_id: Uuid, key: &str) -> PointSlot {
        self.try_get(device_id, key)
            .unwrap_or_else(|| PointSlot::seeded(ValueKind::Numeric))
    }

    /// Snapshot read signalling absence
    pub fn try_get(&self, device_id: Uuid, key: &str) -> Option<PointSlot> {
        self.devices
            .get(&device_id)
            .and_then(|slots| slots.get(key).map(|slot| slot.clone()))
    }

    /// Touch only the override status of a slot
    pub fn update_override_status(&self, device_id: Uuid, key: &str, status: Option<String>) {
        let Some(slots) = self.devices.get(&device_id) else {
            return;
        };
        let snapshot = {
            let Some(mut entry) = slots.get_mut(key) else {
                return;
            };
            entry.override_status = status;
            entry.clone()
        };
        self.publish(device_id, key, snapshot);
    }

    /// Drop a device's subspace
    pub fn remove_device(&self, device_id: Uuid) {
        self.devices.remove(&device_id);
    }

    /// Number of slots held for a device
    pub fn point_count(&self, device_id: Uuid) -> usize {
        self.devices.get(&device_id).map(|slots| slots.len()).unwrap_or(0)
    }

    fn publish(&self, device_id: Uuid, key: &str, slot: PointSlot) {
        // No receivers is fine; the UI may not be attached.
        let _ = self.events.send(PointChange { device_id, key: key.to_string(), slot });
    }
}

impl Default for PointStore {
    fn default() -> Self {
        Self::new()
    }
}
