/// Address map and wire-value codec
///
/// Built once at device start, the address map translates between wire-level
/// Modbus addresses and logical points: each occupied address in each region
/// carries the indices of the definitions contributing to it. A single
/// register address may host several bitfield points (a mosaic); a 32-bit
/// point occupies its base address and the one above it.
///
/// The codec half turns stored values into register/bit images and decodes
/// incoming writes, applying scale factors, two's-complement reinterpretation
/// for signed types, and ABCD (high word at the low address) order for
/// 32-bit pairs.

use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::error::SimulatorResult;
use crate::point::{
    validate_points, PointDefinition, RegisterRegion, SemanticType, Value, ValueSource,
};
use crate::protocol::{data_utils, ModbusException};
use crate::store::PointStore;

/// Why a wire access could not be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Address not present in the region map
    NotMapped,
    /// Every definition addressed by a write is read-only
    ReadOnly,
}

impl CodecError {
    /// Modbus exception code for this failure
    pub fn exception(&self) -> ModbusException {
        match self {
            CodecError::NotMapped => ModbusException::IllegalDataAddress,
            CodecError::ReadOnly => ModbusException::IllegalDataValue,
        }
    }
}

/// Per-device derived index: region -> address -> contributing definitions
pub struct AddressMap {
    definitions: Vec<PointDefinition>,
    regions: HashMap<RegisterRegion, HashMap<u16, Vec<usize>>>,
}

impl AddressMap {
    /// Build the map from a device's definitions, validating them first
    pub fn build(definitions: Vec<PointDefinition>) -> SimulatorResult<Self> {
        validate_points(&definitions)?;

        let mut regions: HashMap<RegisterRegion, HashMap<u16, Vec<usize>>> = HashMap::new();
        for (index, def) in definitions.iter().enumerate() {
            let region_map = regions.entry(def.mapping.region).or_default();
            for addr in def.occupied_addresses() {
                region_map.entry(addr).or_default().push(index);
            }
        }

        Ok(Self { definitions, regions })
    }

    /// Assemble a map from pre-built parts, bypassing validation
    ///
    /// Tests use this to reach fault paths that valid configurations cannot.
    #[cfg(test)]
    pub(crate) fn from_parts(
        definitions: Vec<PointDefinition>,
        regions: HashMap<RegisterRegion, HashMap<u16, Vec<usize>>>,
    ) -> Self {
        Self { definitions, regions }
    }

    /// The definitions backing this map
    pub fn definitions(&self) -> &[PointDefinition] {
        &self.definitions
    }

    /// Definition by arena index
    pub fn definition(&self, index: usize) -> &PointDefinition {
        &self.definitions[index]
    }

    /// Whether an address is occupied in a region
    pub fn is_mapped(&self, region: RegisterRegion, address: u16) -> bool {
        self.defs_at(region, address).is_some()
    }

    fn defs_at(&self, region: RegisterRegion, address: u16) -> Option<&Vec<usize>> {
        self.regions.get(&region).and_then(|m| m.get(&address))
    }

    // ----- read path -----

    /// Read a run of bits (FC 01 / 02); unmapped addresses read as `false`
    pub fn read_bits(
        &self,
        store: &PointStore,
        device_id: Uuid,
        region: RegisterRegion,
        address: u16,
        quantity: u16,
    ) -> Vec<bool> {
        (0..quantity)
            .map(|i| {
                let addr = address.wrapping_add(i);
                match self.defs_at(region, addr) {
                    Some(idxs) => {
                        let def = &self.definitions[idxs[0]];
                        store.get(device_id, &def.key).value.as_bool()
                    }
                    None => false,
                }
            })
            .collect()
    }

    /// Read a run of registers (FC 03 / 04); every address must be mapped
    pub fn read_registers(
        &self,
        store: &PointStore,
        device_id: Uuid,
        region: RegisterRegion,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, CodecError> {
        (0..quantity)
            .map(|i| self.encode_register(store, device_id, region, address.wrapping_add(i)))
            .collect()
    }

    fn encode_register(
        &self,
        store: &PointStore,
        device_id: Uuid,
        region: RegisterRegion,
        address: u16,
    ) -> Result<u16, CodecError> {
        let idxs = self.defs_at(region, address).ok_or(CodecError::NotMapped)?;
        let first = &self.definitions[idxs[0]];

        if first.semantic_type.is_double_wide() {
            let slot = store.get(device_id, &first.key);
            let words = encode_wide(first, slot.value.as_f64());
            let word_index = (address - first.mapping.address) as usize;
            return Ok(words[word_index]);
        }

        if first.mapping.bit_field.is_some() {
            // Mosaic: OR every contributing point into its window.
            let mut register = 0u16;
            for &i in idxs {
                let def = &self.definitions[i];
                let bf = def.mapping.bit_field.expect("mosaic member has a bitfield");
                let stored = store.get(device_id, &def.key).value.as_f64();
                register |= bf.insert(stored.round() as i64 as u16);
            }
            return Ok(register);
        }

        let slot = store.get(device_id, &first.key);
        Ok(encode_scaled_16(first, slot.value.as_f64()))
    }

    // ----- write path -----

    /// Write a single coil (FC 05); returns the indices of written points
    pub fn write_coil(
        &self,
        store: &PointStore,
        device_id: Uuid,
        address: u16,
        value: bool,
    ) -> Result<Vec<usize>, CodecError> {
        self.write_coils(store, device_id, address, &[value])
    }

    /// Write a run of coils (FC 15); validated before any write is applied
    pub fn write_coils(
        &self,
        store: &PointStore,
        device_id: Uuid,
        address: u16,
        values: &[bool],
    ) -> Result<Vec<usize>, CodecError> {
        let mut targets = Vec::with_capacity(values.len());
        for i in 0..values.len() {
            let addr = address.wrapping_add(i as u16);
            let idxs = self
                .defs_at(RegisterRegion::Coil, addr)
                .ok_or(CodecError::NotMapped)?;
            let index = idxs[0];
            if !self.definitions[index].access.allows_write() {
                return Err(CodecError::ReadOnly);
            }
            targets.push(index);
        }

        for (i, &index) in targets.iter().enumerate() {
            let def = &self.definitions[index];
            let value = Value::Bool(values[i]);
            let display = def.format_display(&value);
            store.set(device_id, &def.key, value, ValueSource::RemoteWrite, Some(display));
        }
        Ok(targets)
    }

    /// Write a single holding register (FC 06)
    pub fn write_register(
        &self,
        store: &PointStore,
        device_id: Uuid,
        address: u16,
        raw: u16,
    ) -> Result<Vec<usize>, CodecError> {
        self.write_registers(store, device_id, address, &[raw])
    }

    /// Write a run of holding registers (FC 16)
    ///
    /// Validation covers the whole range before any write lands. When both
    /// words of a 32-bit pair arrive in the request they are applied
    /// together; a lone word of a pair is merged into the current value.
    pub fn write_registers(
        &self,
        store: &PointStore,
        device_id: Uuid,
        address: u16,
        values: &[u16],
    ) -> Result<Vec<usize>, CodecError> {
        let region = RegisterRegion::HoldingRegister;
        let quantity = values.len() as u16;

        for i in 0..quantity {
            let addr = address.wrapping_add(i);
            let idxs = self.defs_at(region, addr).ok_or(CodecError::NotMapped)?;
            // A mosaic register is writable when any member is; read-only
            // members are skipped at apply time.
            if !idxs.iter().any(|&idx| self.definitions[idx].access.allows_write()) {
                return Err(CodecError::ReadOnly);
            }
        }

        let mut written = Vec::new();
        let mut applied_wide: Vec<usize> = Vec::new();

        for i in 0..quantity {
            let addr = address.wrapping_add(i);
            let raw = values[i as usize];
            let idxs = self.defs_at(region, addr).expect("range validated above");
            let first_index = idxs[0];
            let first = &self.definitions[first_index];

            if first.semantic_type.is_double_wide() {
                if applied_wide.contains(&first_index) {
                    continue;
                }
                applied_wide.push(first_index);
                self.apply_wide_write(store, device_id, first, address, values);
                written.push(first_index);
                continue;
            }

            if first.mapping.bit_field.is_some() {
                for &index in idxs {
                    let def = &self.definitions[index];
                    if !def.access.allows_write() {
                        debug!("skipping read-only mosaic member '{}'", def.key);
                        continue;
                    }
                    let bf = def.mapping.bit_field.expect("mosaic member has a bitfield");
                    let extracted = Value::Numeric(bf.extract(raw) as f64);
                    let display = def.format_display(&extracted);
                    store.set(device_id, &def.key, extracted, ValueSource::RemoteWrite, Some(display));
                    written.push(index);
                }
                continue;
            }

            let value = decode_scaled_16(first, raw);
            let display = first.format_display(&value);
            store.set(device_id, &first.key, value, ValueSource::RemoteWrite, Some(display));
            written.push(first_index);
        }

        Ok(written)
    }

    /// Merge incoming words of a register pair with the stored value
    fn apply_wide_write(
        &self,
        store: &PointStore,
        device_id: Uuid,
        def: &PointDefinition,
        request_address: u16,
        request_values: &[u16],
    ) {
        let base = def.mapping.address;
        let current = store.get(device_id, &def.key).value.as_f64();
        let mut words = encode_wide(def, current);

        let request_end = request_address as u32 + request_values.len() as u32;
        for (word_index, word_addr) in [base, base.wrapping_add(1)].into_iter().enumerate() {
            let addr = word_addr as u32;
            if addr >= request_address as u32 && addr < request_end {
                words[word_index] = request_values[(addr - request_address as u32) as usize];
            }
        }

        let value = decode_wide(def, words);
        let display = def.format_display(&value);
        store.set(device_id, &def.key, value, ValueSource::RemoteWrite, Some(display));
    }
}

/// Encode `scale * value` into one 16-bit register
fn encode_scaled_16(def: &PointDefinition, value: f64) -> u16 {
    let scaled = (value * def.mapping.scale).round();
    match def.semantic_type {
        SemanticType::Int16 => scaled as i16 as u16,
        _ => scaled as u16,
    }
}

/// Decode a 16-bit register into a store value (inverse scaling)
fn decode_scaled_16(def: &PointDefinition, raw: u16) -> Value {
    match def.semantic_type {
        SemanticType::Bool => Value::Numeric(raw as f64),
        SemanticType::Int16 => Value::Numeric(raw as i16 as f64 / def.mapping.scale),
        _ => Value::Numeric(raw as f64 / def.mapping.scale),
    }
}

/// Encode `scale * value` into a big-endian register pair (high word first)
fn encode_wide(def: &PointDefinition, value: f64) -> [u16; 2] {
    let scaled = value * def.mapping.scale;
    match def.semantic_type {
        SemanticType::Float => data_utils::f32_to_registers(scaled as f32),
        SemanticType::Int32 => data_utils::u32_to_registers(scaled.round() as i32 as u32),
        _ => data_utils::u32_to_registers(scaled.round() as u32),
    }
}

/// Decode a register pair into a store value (inverse scaling)
fn decode_wide(def: &PointDefinition, words: [u16; 2]) -> Value {
    let bits = ((words[0] as u32) << 16) | words[1] as u32;
    let raw = match def.semantic_type {
        SemanticType::Float => f32::from_bits(bits) as f64,
        SemanticType::Int32 => bits as i32 as f64,
        _ => bits as f64,
    };
    Value::Numeric(raw / def.mapping.scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::{Access, BitField, ModbusMapping};

    fn mapping(region: RegisterRegion, address: u16) -> ModbusMapping {
        ModbusMapping { region, address, scale: 1.0, bit_field: None }
    }

    fn fixture() -> (AddressMap, PointStore, Uuid) {
        let points = vec![
            PointDefinition::new(
                "run",
                SemanticType::Bool,
                Access::ReadWrite,
                mapping(RegisterRegion::Coil, 100),
            ),
            PointDefinition::new(
                "speed",
                SemanticType::Uint16,
                Access::ReadWrite,
                ModbusMapping { scale: 10.0, ..mapping(RegisterRegion::HoldingRegister, 0) },
            ),
            PointDefinition::new(
                "offset",
                SemanticType::Int16,
                Access::ReadWrite,
                mapping(RegisterRegion::HoldingRegister, 1),
            ),
            PointDefinition::new(
                "energy",
                SemanticType::Float,
                Access::ReadWrite,
                mapping(RegisterRegion::HoldingRegister, 2),
            ),
            PointDefinition::new(
                "temperature",
                SemanticType::Uint16,
                Access::Read,
                mapping(RegisterRegion::InputRegister, 0),
            ),
        ];
        let map = AddressMap::build(points.clone()).unwrap();
        let store = PointStore::new();
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        (map, store, device)
    }

    fn mosaic_fixture() -> (AddressMap, PointStore, Uuid) {
        let bf = |start: u8| ModbusMapping {
            region: RegisterRegion::HoldingRegister,
            address: 10,
            scale: 1.0,
            bit_field: Some(BitField { start_bit: start, bit_length: 1 }),
        };
        let points = vec![
            PointDefinition::new("a", SemanticType::Bool, Access::ReadWrite, bf(0)),
            PointDefinition::new("b", SemanticType::Bool, Access::ReadWrite, bf(1)),
            PointDefinition::new("c", SemanticType::Bool, Access::ReadWrite, bf(2)),
        ];
        let map = AddressMap::build(points.clone()).unwrap();
        let store = PointStore::new();
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        (map, store, device)
    }

    #[test]
    fn test_wide_points_occupy_two_addresses() {
        let (map, _, _) = fixture();
        assert!(map.is_mapped(RegisterRegion::HoldingRegister, 2));
        assert!(map.is_mapped(RegisterRegion::HoldingRegister, 3));
        assert!(!map.is_mapped(RegisterRegion::HoldingRegister, 4));
    }

    #[test]
    fn test_scaled_register_round_trip() {
        let (map, store, device) = fixture();

        // raw 123 at scale 10 stores 12.3 and reads back as 123
        map.write_register(&store, device, 0, 123).unwrap();
        assert_eq!(store.get(device, "speed").value, Value::Numeric(12.3));
        let regs = map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 0, 1)
            .unwrap();
        assert_eq!(regs, vec![123]);
    }

    #[test]
    fn test_signed_register_two_complement() {
        let (map, store, device) = fixture();

        map.write_register(&store, device, 1, (-25i16) as u16).unwrap();
        assert_eq!(store.get(device, "offset").value, Value::Numeric(-25.0));
        let regs = map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 1, 1)
            .unwrap();
        assert_eq!(regs[0] as i16, -25);
    }

    #[test]
    fn test_float_pair_abcd_word_order() {
        let (map, store, device) = fixture();

        store.set(device, "energy", Value::Numeric(123.45), ValueSource::Manual, None);
        let regs = map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 2, 2)
            .unwrap();
        let expected = data_utils::f32_to_registers(123.45);
        // High word at the lower address
        assert_eq!(regs, expected.to_vec());

        // Whole-pair write in one request restores the value exactly
        map.write_registers(&store, device, 2, &expected).unwrap();
        let stored = store.get(device, "energy").value.as_f64();
        assert!((stored - 123.45).abs() < 1e-4);
    }

    #[test]
    fn test_single_word_write_merges_with_pair() {
        let (map, store, device) = fixture();

        store.set(device, "energy", Value::Numeric(123.45), ValueSource::Manual, None);
        let words = data_utils::f32_to_registers(567.25);

        // Writing only the high word keeps the stored low word
        map.write_register(&store, device, 2, words[0]).unwrap();
        let merged = store.get(device, "energy").value.as_f64();
        let current = data_utils::f32_to_registers(123.45);
        let expected = data_utils::registers_to_f32(&[words[0], current[1]]).unwrap() as f64;
        assert!((merged - expected).abs() < 1e-6);
    }

    #[test]
    fn test_unmapped_register_access() {
        let (map, store, device) = fixture();

        let err = map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 9999, 1)
            .unwrap_err();
        assert_eq!(err, CodecError::NotMapped);
        assert_eq!(err.exception(), ModbusException::IllegalDataAddress);

        // A range touching one unmapped address fails as a whole
        assert!(map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 0, 5)
            .is_err());

        let err = map.write_register(&store, device, 20, 999).unwrap_err();
        assert_eq!(err, CodecError::NotMapped);
    }

    #[test]
    fn test_read_only_write_rejected() {
        let points = vec![PointDefinition::new(
            "ro",
            SemanticType::Uint16,
            Access::Read,
            mapping(RegisterRegion::HoldingRegister, 20),
        )];
        let map = AddressMap::build(points.clone()).unwrap();
        let store = PointStore::new();
        let device = Uuid::new_v4();
        store.initialize(device, &points);

        let err = map.write_register(&store, device, 20, 999).unwrap_err();
        assert_eq!(err, CodecError::ReadOnly);
        assert_eq!(err.exception(), ModbusException::IllegalDataValue);
        assert_eq!(store.get(device, "ro").value, Value::Numeric(0.0));
    }

    #[test]
    fn test_sparse_coil_scan() {
        let (map, store, device) = fixture();

        store.set(device, "run", Value::Bool(true), ValueSource::Manual, None);
        let bits = map.read_bits(&store, device, RegisterRegion::Coil, 96, 24);
        assert_eq!(bits.len(), 24);
        assert!(bits[4]); // address 100
        assert_eq!(bits.iter().filter(|b| **b).count(), 1);
    }

    #[test]
    fn test_mosaic_register_read() {
        let (map, store, device) = mosaic_fixture();

        store.set(device, "a", Value::Bool(true), ValueSource::Manual, None);
        store.set(device, "b", Value::Bool(false), ValueSource::Manual, None);
        store.set(device, "c", Value::Bool(true), ValueSource::Manual, None);

        let regs = map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 10, 1)
            .unwrap();
        assert_eq!(regs, vec![0b101]);
    }

    #[test]
    fn test_mosaic_register_write_isolates_members() {
        let (map, store, device) = mosaic_fixture();

        let written = map.write_register(&store, device, 10, 0b010).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(store.get(device, "a").value, Value::Bool(false));
        assert_eq!(store.get(device, "b").value, Value::Bool(true));
        assert_eq!(store.get(device, "c").value, Value::Bool(false));
    }

    #[test]
    fn test_multi_register_write() {
        let (map, store, device) = fixture();

        let written = map.write_registers(&store, device, 0, &[120, 7]).unwrap();
        assert_eq!(written.len(), 2);
        let regs = map
            .read_registers(&store, device, RegisterRegion::HoldingRegister, 0, 2)
            .unwrap();
        assert_eq!(regs, vec![120, 7]);
    }
}
