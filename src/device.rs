/// Device model: configuration, lifecycle state and shared runtime
///
/// A device is one simulated Modbus/TCP slave owning one port. Its
/// configuration (identity, endpoint, point definitions) is editable only
/// while the device is stopped; the runtime bundle below is rebuilt on every
/// start and shared by the listener, the generator ticker and the override
/// timers.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::address_map::AddressMap;
use crate::point::{GeneratorConfig, GeneratorKind, PointDefinition};
use crate::store::PointStore;

fn default_bind_ip() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn new_device_id() -> Uuid {
    Uuid::new_v4()
}

/// A configured simulated slave
///
/// Runtime fields (state, last error) are deliberately absent: they are
/// re-initialized on load and tracked by the device manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(default = "new_device_id")]
    pub id: Uuid,
    pub name: String,
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub points: Vec<PointDefinition>,
}

impl DeviceConfig {
    /// New device with a fresh id
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            id: new_device_id(),
            name: name.into(),
            bind_ip: default_bind_ip(),
            port,
            points: Vec::new(),
        }
    }

    /// Builder-style point registration
    pub fn with_point(mut self, point: PointDefinition) -> Self {
        self.points.push(point);
        self
    }
}

/// Device lifecycle state machine
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`, with `Faulted`
/// reachable from any state on error. Transitions are serialized per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Faulted,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Stopped => "Stopped",
            DeviceState::Starting => "Starting",
            DeviceState::Running => "Running",
            DeviceState::Stopping => "Stopping",
            DeviceState::Faulted => "Faulted",
        };
        write!(f, "{}", name)
    }
}

/// Read-only view of a device published with lifecycle events
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub id: Uuid,
    pub name: String,
    pub bind_ip: IpAddr,
    pub port: u16,
    pub state: DeviceState,
    pub last_error: Option<String>,
    pub point_count: usize,
}

/// Events published by the device manager
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    DeviceUpdated(DeviceSnapshot),
    DeviceRemoved(Uuid),
    Error { title: String, message: String },
}

/// Runtime generator state for one point
///
/// The definition's generator config is copied here at start; the override
/// controller flips `config.kind` and memoizes the pre-override kind in
/// `original_kind` for HoldForSeconds restoration.
#[derive(Debug, Clone)]
pub struct GeneratorState {
    pub config: GeneratorConfig,
    pub original_kind: Option<GeneratorKind>,
}

/// Handle on an active HoldForSeconds timer
///
/// The generation lets an expiring timer verify it is still the active hold
/// before it restores the generator; a restarted hold bumps the generation.
#[derive(Debug, Clone)]
pub struct HoldHandle {
    pub token: CancellationToken,
    pub generation: u64,
}

/// Shared per-device runtime, rebuilt on every start
pub struct DeviceRuntime {
    pub device_id: Uuid,
    pub address_map: Arc<AddressMap>,
    pub store: Arc<PointStore>,
    /// point key -> live generator state
    pub generators: DashMap<String, GeneratorState>,
    /// point key -> active HoldForSeconds timer
    pub holds: DashMap<String, HoldHandle>,
    hold_generation: AtomicU64,
    /// Root token; children drive the accept loop, ticker and hold timers
    pub cancel: CancellationToken,
}

impl DeviceRuntime {
    /// Build the runtime bundle from a freshly built address map
    pub fn new(device_id: Uuid, address_map: Arc<AddressMap>, store: Arc<PointStore>) -> Self {
        let generators = DashMap::new();
        for def in address_map.definitions() {
            generators.insert(
                def.key.clone(),
                GeneratorState { config: def.generator.clone(), original_kind: None },
            );
        }
        Self {
            device_id,
            address_map,
            store,
            generators,
            holds: DashMap::new(),
            hold_generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Next hold generation (monotonic per runtime)
    pub fn next_hold_generation(&self) -> u64 {
        self.hold_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current runtime generator kind of a point
    pub fn generator_kind(&self, key: &str) -> Option<GeneratorKind> {
        self.generators.get(key).map(|state| state.config.kind)
    }

    /// Operator-initiated generator change
    ///
    /// Cancels any hold on the point, forgets the memoized pre-override kind
    /// and clears the override status; the hold task must not restore over a
    /// manual choice.
    pub fn set_generator_kind(&self, key: &str, kind: GeneratorKind) {
        if let Some((_, handle)) = self.holds.remove(key) {
            handle.token.cancel();
        }
        if let Some(mut state) = self.generators.get_mut(key) {
            state.config.kind = kind;
            state.original_kind = None;
        }
        self.store.update_override_status(self.device_id, key, None);
    }

    /// Cancel every in-flight hold timer and clear its status (device stop)
    pub fn cancel_holds(&self) {
        let keys: Vec<String> = self.holds.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.holds.remove(&key) {
                handle.token.cancel();
            }
            self.store.update_override_status(self.device_id, &key, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{Access, ModbusMapping, RegisterRegion, SemanticType};

    fn config() -> DeviceConfig {
        DeviceConfig::new("pump-1", 1502).with_point(PointDefinition::new(
            "speed",
            SemanticType::Uint16,
            Access::ReadWrite,
            ModbusMapping {
                region: RegisterRegion::HoldingRegister,
                address: 0,
                scale: 1.0,
                bit_field: None,
            },
        ))
    }

    #[test]
    fn test_config_json_round_trip_without_runtime_fields() {
        let device = config();
        let json = serde_json::to_string(&device).unwrap();
        assert!(!json.contains("state"));
        assert!(!json.contains("lastError"));

        let back: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, device);
    }

    #[test]
    fn test_runtime_seeds_generators() {
        let device = config();
        let map = Arc::new(AddressMap::build(device.points.clone()).unwrap());
        let store = Arc::new(PointStore::new());
        store.initialize(device.id, &device.points);

        let runtime = DeviceRuntime::new(device.id, map, store);
        assert_eq!(runtime.generator_kind("speed"), Some(GeneratorKind::Static));

        runtime.set_generator_kind("speed", GeneratorKind::Sine);
        assert_eq!(runtime.generator_kind("speed"), Some(GeneratorKind::Sine));
    }
}
