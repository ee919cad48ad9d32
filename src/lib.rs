//! # Voltage DevSim - Multi-Device Modbus TCP Slave Simulator
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.3.0
//! **License:** MIT
//!
//! A multi-device Modbus TCP slave simulator in pure Rust. Each simulated
//! device listens on its own TCP port, serves the standard function codes
//! against a configurable point map, and drives those points with
//! deterministic signal generators. External Modbus writes interact with the
//! generators through a configurable override policy.
//!
//! ## Features
//!
//! - **Multi-Device**: any number of simulated slaves, one port each
//! - **Typed Point Map**: bool/int16/uint16/int32/uint32/float points with
//!   scaling, 32-bit register pairs and packed bitfield registers
//! - **Signal Generators**: sine, ramp, random and static waveforms per point
//! - **Write Overrides**: remote writes can pin a generator permanently or
//!   for a bounded hold duration
//! - **Live Observation**: point store change events and per-device traffic
//!   logging for host UIs
//! - **Async Throughout**: Tokio-based listeners, tickers and timers
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Served |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ |
//! | 0x03 | Read Holding Registers | ✅ |
//! | 0x04 | Read Input Registers | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ |
//!
//! Any other function code receives exception 1 (Illegal Function).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voltage_devsim::{
//!     Access, DeviceConfig, DeviceManager, ModbusMapping, PointDefinition,
//!     PointStore, RegisterRegion, SemanticType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(PointStore::new());
//!     let manager = DeviceManager::new(store.clone());
//!
//!     let device = DeviceConfig::new("pump-1", 1502).with_point(PointDefinition::new(
//!         "speed",
//!         SemanticType::Uint16,
//!         Access::ReadWrite,
//!         ModbusMapping {
//!             region: RegisterRegion::HoldingRegister,
//!             address: 0,
//!             scale: 1.0,
//!             bit_field: None,
//!         },
//!     ));
//!     let id = device.id;
//!
//!     manager.add_device(device)?;
//!     manager.start(id).await?;
//!
//!     // Device is now serving Modbus TCP on port 1502...
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │  Modbus Client  │    │    Host / UI    │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Protocol Engine │    │ Device Manager  │
//! │ (per device)    │    │ (lifecycle)     │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │  Address Map    │    │ Generator Loop  │
//! │  (wire codec)   │    │ + Overrides     │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//!          └──────────┬────────────┘
//!                     ▼
//!            ┌─────────────────┐
//!            │   Point Store   │
//!            │ (change events) │
//!            └─────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus protocol definitions and frame handling
pub mod protocol;

/// Point model: definitions, mappings, generators, override policy
pub mod point;

/// Concurrent point store with change events
pub mod store;

/// Address map and wire-value codec
pub mod address_map;

/// Per-device Modbus TCP protocol engine
pub mod server;

/// Signal generator loop
pub mod generator;

/// External-write override controller
pub mod overrides;

/// Device model and shared runtime
pub mod device;

/// Device manager and lifecycle state machine
pub mod manager;

/// Device template persistence
pub mod config;

/// Callback logging for traffic observation
pub mod logging;

/// Bundled Modbus TCP master
pub mod client;

// Re-export main types for convenience
pub use address_map::{AddressMap, CodecError};
pub use client::{ModbusClient, ModbusTcpClient};
pub use config::{devices_from_json, load_devices, save_devices};
pub use device::{DeviceConfig, DeviceEvent, DeviceRuntime, DeviceSnapshot, DeviceState};
pub use error::{SimulatorError, SimulatorResult};
pub use generator::{sample, spawn_generator_loop};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};
pub use manager::DeviceManager;
pub use point::{
    display_address, validate_points, Access, BitField, GeneratorConfig, GeneratorKind,
    ModbusMapping, OverrideMode, PointDefinition, RegisterRegion, SemanticType, Value, ValueKind,
    ValueSource,
};
pub use protocol::{MbapHeader, ModbusException, ModbusFunction, ModbusRequest, ModbusResponse, UnitId};
pub use server::{DeviceServer, ServerStats, ServerStatsSnapshot};
pub use store::{PointChange, PointSlot, PointStore};

/// Maximum number of coils that can be read/written in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read/written in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus TCP frame size (MBAP header + PDU)
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Default generator tick cadence in milliseconds
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 500;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage DevSim v{} - Multi-device Modbus TCP slave simulator by Evan Liu", VERSION)
}
