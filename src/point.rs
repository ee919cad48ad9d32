/// Point model: definitions, Modbus mappings, generators and override policy
///
/// A point is one logical value a simulated device exposes. Its definition is
/// immutable while the device runs; the runtime value lives in the point
/// store and the runtime generator state lives with the device.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SimulatorError, SimulatorResult};

/// A live point value: a tagged scalar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum Value {
    Bool(bool),
    Numeric(f64),
}

impl Value {
    /// Kind tag for type guarding
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Numeric(_) => ValueKind::Numeric,
        }
    }

    /// Numeric view; booleans map to 0.0 / 1.0
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Numeric(n) => *n,
        }
    }

    /// Boolean view via truthiness (non-zero numeric is true)
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Numeric(n) => *n != 0.0,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Numeric(n) => write!(f, "{}", n),
        }
    }
}

/// Kind a slot accepts; fixed at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    Bool,
    Numeric,
}

impl ValueKind {
    /// Type-appropriate zero used when seeding slots
    pub fn zero(&self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Numeric => Value::Numeric(0.0),
        }
    }
}

/// Origin of a store write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueSource {
    /// Operator edit through the host UI
    Manual,
    /// Generator tick
    Simulation,
    /// Protocol-originated write from an external Modbus client
    RemoteWrite,
}

/// Semantic type of a point as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SemanticType {
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
}

impl SemanticType {
    /// The slot kind this semantic type stores as
    pub fn kind(&self) -> ValueKind {
        match self {
            SemanticType::Bool => ValueKind::Bool,
            _ => ValueKind::Numeric,
        }
    }

    /// 32-bit types occupy two consecutive register addresses
    pub fn is_double_wide(&self) -> bool {
        matches!(self, SemanticType::Int32 | SemanticType::Uint32 | SemanticType::Float)
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Bool => "bool",
            SemanticType::Int16 => "int16",
            SemanticType::Uint16 => "uint16",
            SemanticType::Int32 => "int32",
            SemanticType::Uint32 => "uint32",
            SemanticType::Float => "float",
        };
        write!(f, "{}", name)
    }
}

/// Access mode for external Modbus clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    /// Whether an external write is permitted
    pub fn allows_write(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Modbus data region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegisterRegion {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
}

impl RegisterRegion {
    /// Single-bit regions (coils, discrete inputs)
    pub fn is_bit_region(&self) -> bool {
        matches!(self, RegisterRegion::Coil | RegisterRegion::DiscreteInput)
    }

    /// Regions writable through standard function codes
    pub fn is_writable_region(&self) -> bool {
        matches!(self, RegisterRegion::Coil | RegisterRegion::HoldingRegister)
    }
}

impl fmt::Display for RegisterRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegisterRegion::Coil => "Coil",
            RegisterRegion::DiscreteInput => "Discrete Input",
            RegisterRegion::HoldingRegister => "Holding Register",
            RegisterRegion::InputRegister => "Input Register",
        };
        write!(f, "{}", name)
    }
}

/// Contiguous bit window inside a single 16-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitField {
    pub start_bit: u8,
    pub bit_length: u8,
}

impl BitField {
    /// Create a bitfield window; validated against the 16-bit register width
    pub fn new(start_bit: u8, bit_length: u8) -> SimulatorResult<Self> {
        let bf = Self { start_bit, bit_length };
        bf.validate()?;
        Ok(bf)
    }

    /// Check window bounds: start in 0..=15, length in 1..=16, start+length <= 16
    pub fn validate(&self) -> SimulatorResult<()> {
        if self.start_bit > 15 {
            return Err(SimulatorError::configuration(format!(
                "bitfield start bit {} out of range 0..=15",
                self.start_bit
            )));
        }
        if self.bit_length == 0 || self.bit_length > 16 {
            return Err(SimulatorError::configuration(format!(
                "bitfield length {} out of range 1..=16",
                self.bit_length
            )));
        }
        if self.start_bit as u16 + self.bit_length as u16 > 16 {
            return Err(SimulatorError::configuration(format!(
                "bitfield {}+{} exceeds the 16-bit register",
                self.start_bit, self.bit_length
            )));
        }
        Ok(())
    }

    /// Value mask before shifting
    pub fn mask(&self) -> u16 {
        if self.bit_length >= 16 {
            0xFFFF
        } else {
            (1u16 << self.bit_length) - 1
        }
    }

    /// Register-positioned mask (mask shifted to the window)
    pub fn register_mask(&self) -> u16 {
        self.mask() << self.start_bit
    }

    /// Extract this window from a raw register value
    pub fn extract(&self, register: u16) -> u16 {
        (register >> self.start_bit) & self.mask()
    }

    /// Place a value into this window of a register image
    pub fn insert(&self, value: u16) -> u16 {
        (value & self.mask()) << self.start_bit
    }

    fn overlaps(&self, other: &BitField) -> bool {
        self.register_mask() & other.register_mask() != 0
    }
}

/// How a point appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusMapping {
    pub region: RegisterRegion,
    /// 0-based raw address within the region
    pub address: u16,
    /// Applied as `register = value * scale` on reads; never zero
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_field: Option<BitField>,
}

fn default_scale() -> f64 {
    1.0
}

/// Waveform family driving a point between external writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeneratorKind {
    Static,
    Sine,
    Ramp,
    Random,
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeneratorKind::Static => "static",
            GeneratorKind::Sine => "sine",
            GeneratorKind::Ramp => "ramp",
            GeneratorKind::Random => "random",
        };
        write!(f, "{}", name)
    }
}

/// Deterministic signal configuration for one point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default = "default_period")]
    pub period_seconds: f64,
    #[serde(default = "default_step")]
    pub step: f64,
}

fn default_max() -> f64 {
    100.0
}

fn default_period() -> f64 {
    60.0
}

fn default_step() -> f64 {
    0.0
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::Static,
            min: 0.0,
            max: default_max(),
            period_seconds: default_period(),
            step: default_step(),
        }
    }
}

/// Policy for reconciling external Modbus writes with an active generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideMode {
    /// Remote writes do not touch the generator
    None,
    /// First remote write flips the generator to static permanently
    ForceStatic,
    /// Remote writes hold the generator static for a bounded duration
    HoldForSeconds,
}

impl Default for OverrideMode {
    fn default() -> Self {
        OverrideMode::None
    }
}

/// Immutable (post-start) description of one logical point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointDefinition {
    /// Unique key within the owning device
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub semantic_type: SemanticType,
    pub access: Access,
    pub mapping: ModbusMapping,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub override_mode: OverrideMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_duration_seconds: Option<u64>,
    /// Optional enum display mapping: nearest integer value resolves to a label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_labels: Option<BTreeMap<i64, String>>,
}

impl PointDefinition {
    /// Minimal definition with defaults for generator and override policy
    pub fn new(
        key: impl Into<String>,
        semantic_type: SemanticType,
        access: Access,
        mapping: ModbusMapping,
    ) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            semantic_type,
            access,
            mapping,
            generator: GeneratorConfig::default(),
            override_mode: OverrideMode::None,
            override_duration_seconds: None,
            enum_labels: None,
        }
    }

    /// Register addresses this definition occupies in its region
    pub fn occupied_addresses(&self) -> Vec<u16> {
        if self.semantic_type.is_double_wide() {
            vec![self.mapping.address, self.mapping.address.wrapping_add(1)]
        } else {
            vec![self.mapping.address]
        }
    }

    /// Render a value for display: enum label of the nearest integer when a
    /// mapping exists, otherwise booleans as-is and numerics with two
    /// fraction digits
    pub fn format_display(&self, value: &Value) -> String {
        match value {
            Value::Bool(b) => b.to_string(),
            Value::Numeric(n) => {
                if let Some(labels) = &self.enum_labels {
                    let nearest = n.round() as i64;
                    if let Some(label) = labels.get(&nearest) {
                        return label.clone();
                    }
                }
                format!("{:.2}", n)
            }
        }
    }
}

/// Niagara-style 5-digit display address (UI convention; the wire stays 0-based)
pub fn display_address(region: RegisterRegion, address: u16) -> u32 {
    let base = match region {
        RegisterRegion::Coil => 0,
        RegisterRegion::DiscreteInput => 10_000,
        RegisterRegion::InputRegister => 30_000,
        RegisterRegion::HoldingRegister => 40_000,
    };
    base + address as u32 + 1
}

/// Validate a device's point definitions before start
///
/// Checks key uniqueness, scale, bitfield windows, region/type compatibility
/// and address sharing rules. A device refuses to start on any violation.
pub fn validate_points(points: &[PointDefinition]) -> SimulatorResult<()> {
    let mut seen_keys = HashMap::new();
    for def in points {
        if def.key.trim().is_empty() {
            return Err(SimulatorError::configuration("empty point key"));
        }
        if seen_keys.insert(def.key.as_str(), ()).is_some() {
            return Err(SimulatorError::configuration(format!(
                "duplicate point key '{}'",
                def.key
            )));
        }

        if def.mapping.scale == 0.0 || !def.mapping.scale.is_finite() {
            return Err(SimulatorError::configuration(format!(
                "point '{}' has invalid scale {}",
                def.key, def.mapping.scale
            )));
        }

        if let Some(bf) = &def.mapping.bit_field {
            bf.validate()
                .map_err(|e| SimulatorError::configuration(format!("point '{}': {}", def.key, e)))?;
            if def.mapping.region.is_bit_region() {
                return Err(SimulatorError::configuration(format!(
                    "point '{}' declares a bitfield in a bit region",
                    def.key
                )));
            }
            if def.semantic_type.is_double_wide() {
                return Err(SimulatorError::configuration(format!(
                    "point '{}' combines a bitfield with 32-bit type {}",
                    def.key, def.semantic_type
                )));
            }
        }

        if def.mapping.region.is_bit_region() && def.semantic_type != SemanticType::Bool {
            return Err(SimulatorError::configuration(format!(
                "point '{}' maps {} into {}",
                def.key, def.semantic_type, def.mapping.region
            )));
        }

        if def.semantic_type.is_double_wide() && def.mapping.address == u16::MAX {
            return Err(SimulatorError::configuration(format!(
                "point '{}' has no room for its second register word",
                def.key
            )));
        }
    }

    // Address sharing: a register may be shared only by non-overlapping bitfields.
    let mut occupancy: HashMap<(RegisterRegion, u16), Vec<&PointDefinition>> = HashMap::new();
    for def in points {
        for addr in def.occupied_addresses() {
            occupancy.entry((def.mapping.region, addr)).or_default().push(def);
        }
    }
    for ((region, addr), defs) in occupancy {
        if defs.len() < 2 {
            continue;
        }
        if defs.iter().any(|d| d.mapping.bit_field.is_none()) {
            return Err(SimulatorError::configuration(format!(
                "{} address {} is claimed by multiple points without bitfields: {}",
                region,
                addr,
                defs.iter().map(|d| d.key.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }
        for (i, a) in defs.iter().enumerate() {
            for b in defs.iter().skip(i + 1) {
                let (bfa, bfb) = (a.mapping.bit_field.unwrap(), b.mapping.bit_field.unwrap());
                if bfa.overlaps(&bfb) {
                    return Err(SimulatorError::configuration(format!(
                        "bitfields of '{}' and '{}' overlap at {} address {}",
                        a.key, b.key, region, addr
                    )));
                }
            }
        }
    }

    Ok(())
}
