/// Device manager: one authoritative lifecycle per device
///
/// Owns device configurations, their runtime bundles and the
/// `Stopped -> Starting -> Running -> Stopping -> Stopped` state machine,
/// with `Faulted` reachable from any state on error. Start, stop and remove
/// are serialized per device by a per-device mutex; lifecycle faults never
/// kill the process, they fault the device only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

use crate::address_map::AddressMap;
use crate::device::{DeviceConfig, DeviceEvent, DeviceRuntime, DeviceSnapshot, DeviceState};
use crate::error::{SimulatorError, SimulatorResult};
use crate::generator;
use crate::logging::CallbackLogger;
use crate::point::GeneratorKind;
use crate::server::DeviceServer;
use crate::store::PointStore;

/// Capacity of the device-event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Grace period for the listener task after cancellation
const STOP_GRACE: Duration = Duration::from_secs(3);

struct DeviceEntry {
    config: DeviceConfig,
    state: DeviceState,
    last_error: Option<String>,
    runtime: Option<Arc<DeviceRuntime>>,
    listener_task: Option<JoinHandle<()>>,
    ticker_task: Option<JoinHandle<()>>,
    lock: Arc<Mutex<()>>,
}

impl DeviceEntry {
    fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            state: DeviceState::Stopped,
            last_error: None,
            runtime: None,
            listener_task: None,
            ticker_task: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            id: self.config.id,
            name: self.config.name.clone(),
            bind_ip: self.config.bind_ip,
            port: self.config.port,
            state: self.state,
            last_error: self.last_error.clone(),
            point_count: self.config.points.len(),
        }
    }
}

/// Owner of all simulated devices
pub struct DeviceManager {
    devices: DashMap<Uuid, DeviceEntry>,
    store: Arc<PointStore>,
    events: broadcast::Sender<DeviceEvent>,
    tick_interval: Duration,
    traffic_logger: Option<CallbackLogger>,
}

impl DeviceManager {
    /// Create a manager over a shared point store
    pub fn new(store: Arc<PointStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: DashMap::new(),
            store,
            events,
            tick_interval: Duration::from_millis(crate::DEFAULT_TICK_INTERVAL_MS),
            traffic_logger: None,
        }
    }

    /// Override the generator tick cadence (tests use short ticks)
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    /// Attach a traffic logger handed to every device server
    pub fn with_traffic_logger(mut self, logger: CallbackLogger) -> Self {
        self.traffic_logger = Some(logger);
        self
    }

    /// The shared point store
    pub fn store(&self) -> Arc<PointStore> {
        self.store.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Register a new device and seed its store subspace
    pub fn add_device(&self, config: DeviceConfig) -> SimulatorResult<()> {
        if self.devices.contains_key(&config.id) {
            return Err(SimulatorError::invalid_state(format!(
                "device {} already registered",
                config.id
            )));
        }
        self.store.initialize(config.id, &config.points);
        let entry = DeviceEntry::new(config);
        let snapshot = entry.snapshot();
        self.devices.insert(snapshot.id, entry);
        info!("registered device '{}' on port {}", snapshot.name, snapshot.port);
        self.publish(DeviceEvent::DeviceUpdated(snapshot));
        Ok(())
    }

    /// Replace a stopped device's configuration
    pub fn update_device(&self, config: DeviceConfig) -> SimulatorResult<()> {
        let snapshot = {
            let mut entry = self
                .devices
                .get_mut(&config.id)
                .ok_or_else(|| SimulatorError::device_not_found(config.id))?;
            if entry.state == DeviceState::Running || entry.state == DeviceState::Starting {
                return Err(SimulatorError::invalid_state(format!(
                    "device '{}' must be stopped before editing",
                    entry.config.name
                )));
            }
            entry.config = config;
            entry.snapshot()
        };
        self.store.initialize(snapshot.id, &self.config_points(snapshot.id)?);
        self.publish(DeviceEvent::DeviceUpdated(snapshot));
        Ok(())
    }

    /// Stop (if needed) and forget a device
    pub async fn remove_device(&self, id: Uuid) -> SimulatorResult<()> {
        let lock = self.device_lock(id)?;
        let _guard = lock.lock().await;

        self.stop_locked(id).await;
        self.devices.remove(&id);
        self.store.remove_device(id);
        info!("removed device {}", id);
        self.publish(DeviceEvent::DeviceRemoved(id));
        Ok(())
    }

    /// Start a device; a running device is a no-op
    pub async fn start(&self, id: Uuid) -> SimulatorResult<()> {
        let lock = self.device_lock(id)?;
        let _guard = lock.lock().await;

        let config = {
            let entry = self.devices.get(&id).ok_or_else(|| SimulatorError::device_not_found(id))?;
            if entry.state == DeviceState::Running {
                return Ok(());
            }
            entry.config.clone()
        };

        let bind_addr = SocketAddr::new(config.bind_ip, config.port);

        // Port guard: probe before committing to the start sequence, so a
        // collision faults the device without tearing anything down.
        if let Err(e) = std::net::TcpListener::bind(bind_addr) {
            let message = bind_error_message(config.port, &e);
            self.fault(id, message.clone());
            return Err(SimulatorError::bind(config.port, message));
        }

        let address_map = match AddressMap::build(config.points.clone()) {
            Ok(map) => Arc::new(map),
            Err(e) => {
                let message = format!("invalid point map: {}", e);
                self.fault(id, message.clone());
                return Err(SimulatorError::configuration(message));
            }
        };

        self.store.initialize(id, &config.points);
        self.set_state(id, DeviceState::Starting);

        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                let message = bind_error_message(config.port, &e);
                self.fault(id, message.clone());
                return Err(SimulatorError::bind(config.port, message));
            }
        };

        // Port 0 requests an ephemeral port; record what the OS handed out.
        let bound_addr = listener.local_addr().map(|a| a.to_string()).unwrap_or_default();
        if config.port == 0 {
            if let (Ok(local), Some(mut entry)) = (listener.local_addr(), self.devices.get_mut(&id)) {
                entry.config.port = local.port();
            }
        }

        let runtime = Arc::new(DeviceRuntime::new(id, address_map, self.store.clone()));
        let server = DeviceServer::new(runtime.clone(), self.traffic_logger.clone());
        let listener_task = server.spawn(listener);
        let ticker_task = generator::spawn_generator_loop(runtime.clone(), self.tick_interval);

        if let Some(mut entry) = self.devices.get_mut(&id) {
            entry.runtime = Some(runtime);
            entry.listener_task = Some(listener_task);
            entry.ticker_task = Some(ticker_task);
            entry.last_error = None;
        }
        self.set_state(id, DeviceState::Running);
        info!("device '{}' running on {}", config.name, bound_addr);
        Ok(())
    }

    /// Stop a device; stopped and faulted devices settle to Stopped
    pub async fn stop(&self, id: Uuid) -> SimulatorResult<()> {
        let lock = self.device_lock(id)?;
        let _guard = lock.lock().await;
        self.stop_locked(id).await;
        Ok(())
    }

    /// Stop every device (host shutdown)
    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self.devices.iter().map(|e| *e.key()).collect();
        let stops = ids.into_iter().map(|id| self.stop(id));
        for result in join_all(stops).await {
            if let Err(e) = result {
                error!("stop failed during shutdown: {}", e);
            }
        }
    }

    /// Current device snapshots
    pub fn list(&self) -> Vec<DeviceSnapshot> {
        self.devices.iter().map(|entry| entry.snapshot()).collect()
    }

    /// Snapshot of one device
    pub fn snapshot(&self, id: Uuid) -> SimulatorResult<DeviceSnapshot> {
        self.devices
            .get(&id)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| SimulatorError::device_not_found(id))
    }

    /// Operator-initiated generator change
    ///
    /// Running devices change the live runtime state (cancelling any hold on
    /// the point); stopped devices edit the definition itself.
    pub fn set_generator_kind(&self, id: Uuid, key: &str, kind: GeneratorKind) -> SimulatorResult<()> {
        let mut entry = self.devices.get_mut(&id).ok_or_else(|| SimulatorError::device_not_found(id))?;
        if let Some(runtime) = &entry.runtime {
            if entry.state == DeviceState::Running {
                runtime.set_generator_kind(key, kind);
                return Ok(());
            }
        }
        let point = entry
            .config
            .points
            .iter_mut()
            .find(|p| p.key == key)
            .ok_or_else(|| SimulatorError::invalid_data(format!("unknown point '{}'", key)))?;
        point.generator.kind = kind;
        Ok(())
    }

    // ----- internals -----

    /// Tear down a device's workers; caller holds the per-device lock
    async fn stop_locked(&self, id: Uuid) {
        let (runtime, listener_task, ticker_task, prior_state) = {
            let Some(mut entry) = self.devices.get_mut(&id) else {
                return;
            };
            match entry.state {
                DeviceState::Stopped => return,
                DeviceState::Faulted => {
                    entry.state = DeviceState::Stopped;
                    let snapshot = entry.snapshot();
                    drop(entry);
                    self.publish(DeviceEvent::DeviceUpdated(snapshot));
                    return;
                }
                _ => {}
            }
            let runtime = entry.runtime.take();
            let listener = entry.listener_task.take();
            let ticker = entry.ticker_task.take();
            let prior = entry.state;
            (runtime, listener, ticker, prior)
        };

        if prior_state == DeviceState::Running {
            self.set_state(id, DeviceState::Stopping);
        }

        if let Some(runtime) = runtime {
            runtime.cancel_holds();
            runtime.cancel.cancel();
        }
        if let Some(task) = listener_task {
            if timeout(STOP_GRACE, task).await.is_err() {
                warn!("listener for {} did not stop within {:?}; abandoning", id, STOP_GRACE);
            }
        }
        if let Some(task) = ticker_task {
            let _ = timeout(STOP_GRACE, task).await;
        }

        self.set_state(id, DeviceState::Stopped);
        info!("device {} stopped", id);
    }

    fn device_lock(&self, id: Uuid) -> SimulatorResult<Arc<Mutex<()>>> {
        self.devices
            .get(&id)
            .map(|entry| entry.lock.clone())
            .ok_or_else(|| SimulatorError::device_not_found(id))
    }

    fn config_points(&self, id: Uuid) -> SimulatorResult<Vec<crate::point::PointDefinition>> {
        self.devices
            .get(&id)
            .map(|entry| entry.config.points.clone())
            .ok_or_else(|| SimulatorError::device_not_found(id))
    }

    fn set_state(&self, id: Uuid, state: DeviceState) {
        let snapshot = {
            let Some(mut entry) = self.devices.get_mut(&id) else {
                return;
            };
            entry.state = state;
            entry.snapshot()
        };
        self.publish(DeviceEvent::DeviceUpdated(snapshot));
    }

    fn fault(&self, id: Uuid, message: String) {
        error!("device {} faulted: {}", id, message);
        let snapshot = {
            let Some(mut entry) = self.devices.get_mut(&id) else {
                return;
            };
            entry.state = DeviceState::Faulted;
            entry.last_error = Some(message.clone());
            entry.snapshot()
        };
        let title = format!("Device '{}' failed to start", snapshot.name);
        self.publish(DeviceEvent::DeviceUpdated(snapshot));
        self.publish(DeviceEvent::Error { title, message });
    }

    fn publish(&self, event: DeviceEvent) {
        let _ = self.events.send(event);
    }
}

/// Actionable message for a bind failure
fn bind_error_message(port: u16, error: &std::io::Error) -> String {
    match error.kind() {
        std::io::ErrorKind::AddrInUse => {
            format!("Port {} is already in use by another listener", port)
        }
        std::io::ErrorKind::PermissionDenied => {
            format!("Port {} requires elevated privileges; try a port above 1024", port)
        }
        _ => format!("Cannot bind port {}: {}", port, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{
        Access, ModbusMapping, PointDefinition, RegisterRegion, SemanticType,
    };

    fn test_config(port: u16) -> DeviceConfig {
        DeviceConfig::new("unit-under-test", port).with_point(PointDefinition::new(
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

    fn localhost(config: DeviceConfig) -> DeviceConfig {
        DeviceConfig { bind_ip: [127, 0, 0, 1].into(), ..config }
    }

    #[tokio::test]
    async fn test_lifecycle_round_trip() {
        let manager = DeviceManager::new(Arc::new(PointStore::new()));
        let config = localhost(test_config(0));
        let id = config.id;

        manager.add_device(config).unwrap();
        assert_eq!(manager.snapshot(id).unwrap().state, DeviceState::Stopped);

        manager.start(id).await.unwrap();
        assert_eq!(manager.snapshot(id).unwrap().state, DeviceState::Running);

        // Starting again is a no-op
        manager.start(id).await.unwrap();

        manager.stop(id).await.unwrap();
        assert_eq!(manager.snapshot(id).unwrap().state, DeviceState::Stopped);
    }

    #[tokio::test]
    async fn test_port_collision_faults_device() {
        // Occupy a port, then ask a device to bind it
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let manager = DeviceManager::new(Arc::new(PointStore::new()));
        let mut events = manager.subscribe();
        let config = localhost(test_config(port));
        let id = config.id;
        manager.add_device(config).unwrap();

        let err = manager.start(id).await.unwrap_err();
        assert!(matches!(err, SimulatorError::Bind { .. }));

        let snapshot = manager.snapshot(id).unwrap();
        assert_eq!(snapshot.state, DeviceState::Faulted);
        assert!(snapshot.last_error.unwrap().contains("already in use"));

        // An Error event was published alongside the state change
        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, DeviceEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);

        // Stop settles a faulted device back to Stopped
        manager.stop(id).await.unwrap();
        assert_eq!(manager.snapshot(id).unwrap().state, DeviceState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_point_map_faults_device() {
        let manager = DeviceManager::new(Arc::new(PointStore::new()));
        let mut config = localhost(test_config(0));
        let mut duplicate = config.points[0].clone();
        duplicate.mapping.address = 5;
        config.points.push(duplicate);
        let id = config.id;
        manager.add_device(config).unwrap();

        let err = manager.start(id).await.unwrap_err();
        assert!(err.is_configuration_error());
        assert_eq!(manager.snapshot(id).unwrap().state, DeviceState::Faulted);
    }

    #[tokio::test]
    async fn test_running_device_rejects_edit() {
        let manager = DeviceManager::new(Arc::new(PointStore::new()));
        let config = localhost(test_config(0));
        let id = config.id;
        manager.add_device(config.clone()).unwrap();
        manager.start(id).await.unwrap();

        let err = manager.update_device(config).unwrap_err();
        assert!(matches!(err, SimulatorError::InvalidState { .. }));

        manager.stop(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_stops_and_forgets() {
        let manager = DeviceManager::new(Arc::new(PointStore::new()));
        let config = localhost(test_config(0));
        let id = config.id;
        manager.add_device(config).unwrap();
        manager.start(id).await.unwrap();

        manager.remove_device(id).await.unwrap();
        assert!(manager.snapshot(id).is_err());
        assert_eq!(manager.store().point_count(id), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let manager = DeviceManager::new(Arc::new(PointStore::new()));
        let config = localhost(test_config(0));
        manager.add_device(config.clone()).unwrap();
        assert!(manager.add_device(config).is_err());
    }
}
