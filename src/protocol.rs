/// Modbus protocol definitions and frame handling
///
/// This module contains the core Modbus/TCP protocol definitions: function
/// codes, exception codes, the MBAP header, server-side PDU decoding and
/// response encoding, plus the request/response structures used by the
/// bundled client.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SimulatorError, SimulatorResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus register value (16-bit)
pub type ModbusValue = u16;

/// MBAP unit identifier; accepted with any value, never routed on
pub type UnitId = u8;

/// MBAP header size in bytes (transaction + protocol + length)
pub const MBAP_HEADER_SIZE: usize = 6;

/// Modbus function codes supported by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> SimulatorResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(SimulatorError::protocol(format!("invalid function code 0x{:02X}", value))),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    /// Check if this is a write function
    pub fn is_write_function(self) -> bool {
        !self.is_read_function()
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "The function code is not an allowable action for the server",
            ModbusException::IllegalDataAddress => "The data address is not an allowable address for the server",
            ModbusException::IllegalDataValue => "A value in the request is not an allowable value for the server",
            ModbusException::ServerDeviceFailure => "An unrecoverable error occurred while handling the request",
            ModbusException::Acknowledge => "The request was accepted but needs a long time to process",
            ModbusException::ServerDeviceBusy => "The server is busy processing a long-duration command",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus Exception 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// MBAP header: transactionId, protocolId, length, unitId
///
/// `length` counts the unit id plus the PDU. Responses echo the transaction
/// id and unit id of the request; `protocol_id` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: UnitId,
}

impl MbapHeader {
    /// Parse the fixed six-byte prefix (before the unit id)
    ///
    /// The unit id travels as the first byte of the `length`-counted body and
    /// is filled in by the caller once the body has been read.
    pub fn parse_prefix(bytes: &[u8]) -> SimulatorResult<Self> {
        if bytes.len() < MBAP_HEADER_SIZE {
            return Err(SimulatorError::frame("MBAP header truncated"));
        }
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: 0,
        };
        if header.protocol_id != 0 {
            return Err(SimulatorError::frame(format!(
                "invalid protocol id {}",
                header.protocol_id
            )));
        }
        // length covers unit id + function code at minimum, PDU max 253
        if header.length < 2 || header.length > 254 {
            return Err(SimulatorError::frame(format!("invalid MBAP length {}", header.length)));
        }
        Ok(header)
    }
}

/// A decoded server-side request PDU
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPdu {
    /// FC 01 / 02
    ReadBits { function: ModbusFunction, address: u16, quantity: u16 },
    /// FC 03 / 04
    ReadRegisters { function: ModbusFunction, address: u16, quantity: u16 },
    /// FC 05; `raw` is the on-wire value (0xFF00 / 0x0000)
    WriteSingleCoil { address: u16, raw: u16 },
    /// FC 06
    WriteSingleRegister { address: u16, value: u16 },
    /// FC 15
    WriteMultipleCoils { address: u16, bits: Vec<bool> },
    /// FC 16
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

/// Why a PDU could not be decoded into a request
#[derive(Debug, Clone, PartialEq)]
pub enum PduDecodeError {
    /// Unsupported function code; answered with exception 1
    IllegalFunction(u8),
    /// Out-of-range quantity or value; answered with exception 3
    IllegalValue(&'static str),
    /// Truncated or inconsistent PDU; the connection is closed
    Malformed(&'static str),
}

/// Decode a request PDU (function byte + data)
pub fn decode_request_pdu(pdu: &[u8]) -> Result<RequestPdu, PduDecodeError> {
    if pdu.is_empty() {
        return Err(PduDecodeError::Malformed("empty PDU"));
    }
    let function = match ModbusFunction::from_u8(pdu[0]) {
        Ok(f) => f,
        Err(_) => return Err(PduDecodeError::IllegalFunction(pdu[0])),
    };
    let data = &pdu[1..];

    match function {
        ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
            if data.len() < 4 {
                return Err(PduDecodeError::Malformed("short bit-read request"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let quantity = u16::from_be_bytes([data[2], data[3]]);
            if quantity == 0 || quantity > crate::MAX_COILS_PER_REQUEST {
                return Err(PduDecodeError::IllegalValue("bit quantity out of range"));
            }
            Ok(RequestPdu::ReadBits { function, address, quantity })
        }
        ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
            if data.len() < 4 {
                return Err(PduDecodeError::Malformed("short register-read request"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let quantity = u16::from_be_bytes([data[2], data[3]]);
            if quantity == 0 || quantity > crate::MAX_REGISTERS_PER_REQUEST {
                return Err(PduDecodeError::IllegalValue("register quantity out of range"));
            }
            Ok(RequestPdu::ReadRegisters { function, address, quantity })
        }
        ModbusFunction::WriteSingleCoil => {
            if data.len() < 4 {
                return Err(PduDecodeError::Malformed("short coil-write request"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let raw = u16::from_be_bytes([data[2], data[3]]);
            if raw != 0x0000 && raw != 0xFF00 {
                return Err(PduDecodeError::IllegalValue("coil value must be 0x0000 or 0xFF00"));
            }
            Ok(RequestPdu::WriteSingleCoil { address, raw })
        }
        ModbusFunction::WriteSingleRegister => {
            if data.len() < 4 {
                return Err(PduDecodeError::Malformed("short register-write request"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let value = u16::from_be_bytes([data[2], data[3]]);
            Ok(RequestPdu::WriteSingleRegister { address, value })
        }
        ModbusFunction::WriteMultipleCoils => {
            if data.len() < 5 {
                return Err(PduDecodeError::Malformed("short multi-coil write"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let quantity = u16::from_be_bytes([data[2], data[3]]);
            let byte_count = data[4] as usize;
            if quantity == 0 || quantity > crate::MAX_COILS_PER_REQUEST {
                return Err(PduDecodeError::IllegalValue("coil quantity out of range"));
            }
            if byte_count != (quantity as usize + 7) / 8 || data.len() < 5 + byte_count {
                return Err(PduDecodeError::Malformed("multi-coil byte count mismatch"));
            }
            let bits = data_utils::unpack_bits(&data[5..5 + byte_count], quantity as usize);
            Ok(RequestPdu::WriteMultipleCoils { address, bits })
        }
        ModbusFunction::WriteMultipleRegisters => {
            if data.len() < 5 {
                return Err(PduDecodeError::Malformed("short multi-register write"));
            }
            let address = u16::from_be_bytes([data[0], data[1]]);
            let quantity = u16::from_be_bytes([data[2], data[3]]);
            let byte_count = data[4] as usize;
            if quantity == 0 || quantity > crate::MAX_REGISTERS_PER_REQUEST {
                return Err(PduDecodeError::IllegalValue("register quantity out of range"));
            }
            if byte_count != quantity as usize * 2 || data.len() < 5 + byte_count {
                return Err(PduDecodeError::Malformed("multi-register byte count mismatch"));
            }
            let values = data_utils::bytes_to_registers(&data[5..5 + byte_count])
                .map_err(|_| PduDecodeError::Malformed("odd register payload"))?;
            Ok(RequestPdu::WriteMultipleRegisters { address, values })
        }
    }
}

/// Assemble a success response ADU from the request header and a PDU body
///
/// `pdu` starts with the function byte. The MBAP length is recomputed as
/// `1 + pdu.len()` (unit id plus PDU).
pub fn encode_response(header: &MbapHeader, pdu: &[u8]) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_SIZE + 1 + pdu.len());
    frame.put_u16(header.transaction_id);
    frame.put_u16(0);
    frame.put_u16(1 + pdu.len() as u16);
    frame.put_u8(header.unit_id);
    frame.put_slice(pdu);
    frame
}

/// Assemble an exception response (`fc | 0x80`, exception code)
pub fn encode_exception(header: &MbapHeader, function_byte: u8, exception: ModbusException) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_SIZE + 3);
    frame.put_u16(header.transaction_id);
    frame.put_u16(0);
    frame.put_u16(3);
    frame.put_u8(header.unit_id);
    frame.put_u8(function_byte | 0x80);
    frame.put_u8(exception.to_u8());
    frame
}

/// Modbus request structure (bundled client)
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a new read request
    pub fn new_read(unit_id: UnitId, function: ModbusFunction, address: ModbusAddress, quantity: u16) -> Self {
        Self { unit_id, function, address, quantity, data: Vec::new() }
    }

    /// Create a new write request
    pub fn new_write(unit_id: UnitId, function: ModbusFunction, address: ModbusAddress, data: Vec<u8>) -> Self {
        let quantity = match function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
            ModbusFunction::WriteMultipleCoils => data.len() as u16 * 8,
            ModbusFunction::WriteMultipleRegisters => data.len() as u16 / 2,
            _ => 0,
        };
        Self { unit_id, function, address, quantity, data }
    }

    /// Validate quantities against protocol limits
    pub fn validate(&self) -> SimulatorResult<()> {
        if self.function.is_read_function() {
            if self.quantity == 0 {
                return Err(SimulatorError::invalid_data("quantity cannot be zero"));
            }
            match self.function {
                ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                    if self.quantity > crate::MAX_COILS_PER_REQUEST {
                        return Err(SimulatorError::invalid_data(format!(
                            "too many coils requested: {}",
                            self.quantity
                        )));
                    }
                }
                ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                    if self.quantity > crate::MAX_REGISTERS_PER_REQUEST {
                        return Err(SimulatorError::invalid_data(format!(
                            "too many registers requested: {}",
                            self.quantity
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Modbus response structure (bundled client)
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    pub exception: Option<ModbusException>,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new_success(unit_id: UnitId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self { unit_id, function, data, exception: None }
    }

    /// Create an exception response
    pub fn new_exception(unit_id: UnitId, function: ModbusFunction, exception_code: u8) -> Self {
        Self {
            unit_id,
            function,
            data: Vec::new(),
            exception: ModbusException::from_u8(exception_code),
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Get exception error if present
    pub fn get_exception(&self) -> Option<SimulatorError> {
        self.exception
            .map(|exc| SimulatorError::exception(self.function.to_u8(), exc.to_u8()))
    }

    /// Parse response data as registers (u16 values)
    pub fn parse_registers(&self) -> SimulatorResult<Vec<u16>> {
        if let Some(err) = self.get_exception() {
            return Err(err);
        }
        if self.data.is_empty() {
            return Err(SimulatorError::frame("empty response data"));
        }
        let byte_count = self.data[0] as usize;
        if self.data.len() < 1 + byte_count || byte_count % 2 != 0 {
            return Err(SimulatorError::frame("invalid register data length"));
        }
        data_utils::bytes_to_registers(&self.data[1..1 + byte_count])
    }

    /// Parse response data as bits (bool values)
    pub fn parse_bits(&self) -> SimulatorResult<Vec<bool>> {
        if let Some(err) = self.get_exception() {
            return Err(err);
        }
        if self.data.is_empty() {
            return Err(SimulatorError::frame("empty response data"));
        }
        let byte_count = self.data[0] as usize;
        if self.data.len() < 1 + byte_count {
            return Err(SimulatorError::frame("incomplete bit data"));
        }
        Ok(data_utils::unpack_bits(&self.data[1..1 + byte_count], byte_count * 8))
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> SimulatorResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(SimulatorError::invalid_data("byte array length must be even"));
        }
        Ok(bytes
            .chunks(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Pack boolean values into bytes, LSB first
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];
        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        bytes
    }

    /// Unpack bytes into boolean values
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        let mut bits = Vec::with_capacity(bit_count);
        for i in 0..bit_count {
            let byte_index = i / 8;
            if byte_index < bytes.len() {
                bits.push((bytes[byte_index] & (1 << (i % 8))) != 0);
            } else {
                bits.push(false);
            }
        }
        bits
    }

    /// Convert u32 to two u16 registers (high word first, ABCD)
    pub fn u32_to_registers(value: u32) -> [u16; 2] {
        [(value >> 16) as u16, value as u16]
    }

    /// Convert two u16 registers to u32 (high word first, ABCD)
    pub fn registers_to_u32(registers: &[u16]) -> SimulatorResult<u32> {
        if registers.len() < 2 {
            return Err(SimulatorError::invalid_data("need at least 2 registers for u32"));
        }
        Ok(((registers[0] as u32) << 16) | (registers[1] as u32))
    }

    /// Convert f32 to two u16 registers (IEEE 754, ABCD)
    pub fn f32_to_registers(value: f32) -> [u16; 2] {
        u32_to_registers(value.to_bits())
    }

    /// Convert two u16 registers to f32 (IEEE 754, ABCD)
    pub fn registers_to_f32(registers: &[u16]) -> SimulatorResult<f32> {
        Ok(f32::from_bits(registers_to_u32(registers)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_conversion() {
        assert_eq!(ModbusFunction::from_u8(0x03).unwrap(), ModbusFunction::ReadHoldingRegisters);
        assert_eq!(ModbusFunction::ReadHoldingRegisters.to_u8(), 0x03);
        assert!(ModbusFunction::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_mbap_prefix_validation() {
        let good = [0x00, 0x2A, 0x00, 0x00, 0x00, 0x06];
        let header = MbapHeader::parse_prefix(&good).unwrap();
        assert_eq!(header.transaction_id, 0x2A);
        assert_eq!(header.length, 6);

        // Non-zero protocol id is a framing error
        let bad_proto = [0x00, 0x2A, 0x00, 0x01, 0x00, 0x06];
        assert!(MbapHeader::parse_prefix(&bad_proto).is_err());

        // Length below unit-id + function is impossible
        let bad_len = [0x00, 0x2A, 0x00, 0x00, 0x00, 0x01];
        assert!(MbapHeader::parse_prefix(&bad_len).is_err());
    }

    #[test]
    fn test_request_pdu_decoding() {
        // FC 03 at address 10, count 2
        let pdu = [0x03, 0x00, 0x0A, 0x00, 0x02];
        assert_eq!(
            decode_request_pdu(&pdu).unwrap(),
            RequestPdu::ReadRegisters {
                function: ModbusFunction::ReadHoldingRegisters,
                address: 10,
                quantity: 2
            }
        );

        // FC 05 accepts only 0x0000 / 0xFF00
        let pdu = [0x05, 0x00, 0x64, 0xFF, 0x00];
        assert!(matches!(
            decode_request_pdu(&pdu).unwrap(),
            RequestPdu::WriteSingleCoil { address: 100, raw: 0xFF00 }
        ));
        let pdu = [0x05, 0x00, 0x64, 0x12, 0x34];
        assert!(matches!(decode_request_pdu(&pdu), Err(PduDecodeError::IllegalValue(_))));

        // Unsupported function
        let pdu = [0x2B, 0x00, 0x00];
        assert!(matches!(decode_request_pdu(&pdu), Err(PduDecodeError::IllegalFunction(0x2B))));

        // FC 16 byte-count mismatch is malformed
        let pdu = [0x10, 0x00, 0x0A, 0x00, 0x02, 0x03, 0x00, 0x7B, 0x01];
        assert!(matches!(decode_request_pdu(&pdu), Err(PduDecodeError::Malformed(_))));
    }

    #[test]
    fn test_exception_encoding() {
        let header = MbapHeader { transaction_id: 7, protocol_id: 0, length: 6, unit_id: 1 };
        let frame = encode_exception(&header, 0x03, ModbusException::IllegalDataAddress);
        assert_eq!(&frame[..], &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02]);
    }

    #[test]
    fn test_response_encoding() {
        let header = MbapHeader { transaction_id: 1, protocol_id: 0, length: 6, unit_id: 9 };
        let pdu = [0x03, 0x02, 0x12, 0x34];
        let frame = encode_response(&header, &pdu);
        assert_eq!(&frame[..], &[0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x09, 0x03, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn test_data_utils() {
        let registers = vec![0x1234, 0x5678];
        let bytes = data_utils::registers_to_bytes(&registers);
        assert_eq!(bytes, vec![0x12, 0x34, 0x56, 0x78]);
        assert_eq!(data_utils::bytes_to_registers(&bytes).unwrap(), registers);

        let bits = vec![true, false, true, true, false, false, false, false];
        let packed = data_utils::pack_bits(&bits);
        assert_eq!(packed, vec![0b0000_1101]);
        assert_eq!(data_utils::unpack_bits(&packed, bits.len()), bits);

        assert_eq!(data_utils::u32_to_registers(0x1234_5678), [0x1234, 0x5678]);
        assert_eq!(data_utils::registers_to_u32(&[0x1234, 0x5678]).unwrap(), 0x1234_5678);

        let regs = data_utils::f32_to_registers(123.45);
        assert!((data_utils::registers_to_f32(&regs).unwrap() - 123.45).abs() < 1e-4);
    }

    #[test]
    fn test_response_parsing() {
        let register_data = vec![4, 0x12, 0x34, 0x56, 0x78];
        let response = ModbusResponse::new_success(1, ModbusFunction::ReadHoldingRegisters, register_data);
        assert_eq!(response.parse_registers().unwrap(), vec![0x1234, 0x5678]);

        let bit_data = vec![1, 0b1010_1010];
        let response = ModbusResponse::new_success(1, ModbusFunction::ReadCoils, bit_data);
        let bits = response.parse_bits().unwrap();
        assert!(!bits[0]);
        assert!(bits[1]);

        let response = ModbusResponse::new_exception(1, ModbusFunction::ReadHoldingRegisters, 0x02);
        assert!(response.is_exception());
        assert!(response.parse_registers().is_err());
    }
}
