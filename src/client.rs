/// Bundled Modbus TCP master
///
/// A compact client used by the integration tests, the demo binary and host
/// tooling that wants to poke a simulated device. TCP only; the application
/// layer mirrors the function codes the simulator serves.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{SimulatorError, SimulatorResult};
use crate::protocol::{
    data_utils, ModbusFunction, ModbusRequest, ModbusResponse, UnitId, MBAP_HEADER_SIZE,
};

/// Trait defining the interface for Modbus client operations
///
/// Async methods for all standard function codes the simulator serves, with
/// function-code numbers in the names for quick cross-reference.
#[async_trait]
pub trait ModbusClient: Send + Sync {
    /// Read coils (function code 0x01)
    async fn read_01(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02)
    async fn read_02(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<bool>>;

    /// Read holding registers (function code 0x03)
    async fn read_03(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<u16>>;

    /// Read input registers (function code 0x04)
    async fn read_04(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<u16>>;

    /// Write single coil (function code 0x05)
    async fn write_05(&mut self, unit_id: UnitId, address: u16, value: bool) -> SimulatorResult<()>;

    /// Write single register (function code 0x06)
    async fn write_06(&mut self, unit_id: UnitId, address: u16, value: u16) -> SimulatorResult<()>;

    /// Write multiple coils (function code 0x0F)
    async fn write_0f(&mut self, unit_id: UnitId, address: u16, values: &[bool]) -> SimulatorResult<()>;

    /// Write multiple registers (function code 0x10)
    async fn write_10(&mut self, unit_id: UnitId, address: u16, values: &[u16]) -> SimulatorResult<()>;

    /// Check if client is connected
    fn is_connected(&self) -> bool;

    /// Close the client connection
    async fn close(&mut self) -> SimulatorResult<()>;
}

/// Modbus TCP client implementation
pub struct ModbusTcpClient {
    stream: Option<TcpStream>,
    address: SocketAddr,
    timeout: Duration,
    transaction_id: u16,
}

impl ModbusTcpClient {
    /// Connect to a server by string address
    pub async fn from_address(address: &str, timeout: Duration) -> SimulatorResult<Self> {
        let address: SocketAddr = address
            .parse()
            .map_err(|e| SimulatorError::invalid_data(format!("invalid address: {}", e)))?;
        Self::connect(address, timeout).await
    }

    /// Connect to a server
    pub async fn connect(address: SocketAddr, timeout_dur: Duration) -> SimulatorResult<Self> {
        let stream = timeout(timeout_dur, TcpStream::connect(address))
            .await
            .map_err(|_| SimulatorError::timeout("connect", timeout_dur.as_millis() as u64))?
            .map_err(|e| SimulatorError::connection(format!("failed to connect to {}: {}", address, e)))?;
        Ok(Self { stream: Some(stream), address, timeout: timeout_dur, transaction_id: 0 })
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// Encode a request into a Modbus/TCP ADU
    fn encode_request(&mut self, request: &ModbusRequest) -> Vec<u8> {
        let transaction_id = self.next_transaction_id();

        let pdu_length = 1 + 1 + match request.function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters
            | ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteSingleRegister => 4,
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                5 + request.data.len()
            }
        };

        let mut frame = Vec::with_capacity(MBAP_HEADER_SIZE + pdu_length);
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&0u16.to_be_bytes());
        frame.extend_from_slice(&(pdu_length as u16).to_be_bytes());
        frame.push(request.unit_id);
        frame.push(request.function.to_u8());
        frame.extend_from_slice(&request.address.to_be_bytes());

        match request.function {
            ModbusFunction::ReadCoils
            | ModbusFunction::ReadDiscreteInputs
            | ModbusFunction::ReadHoldingRegisters
            | ModbusFunction::ReadInputRegisters => {
                frame.extend_from_slice(&request.quantity.to_be_bytes());
            }
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => {
                if request.data.len() >= 2 {
                    frame.extend_from_slice(&request.data[0..2]);
                } else {
                    frame.extend_from_slice(&[0, 0]);
                }
            }
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
                frame.extend_from_slice(&request.quantity.to_be_bytes());
                frame.push(request.data.len() as u8);
                frame.extend_from_slice(&request.data);
            }
        }

        frame
    }

    /// Decode a response ADU
    fn decode_response(&self, frame: &[u8]) -> SimulatorResult<ModbusResponse> {
        if frame.len() < MBAP_HEADER_SIZE + 2 {
            return Err(SimulatorError::frame("response frame too short"));
        }
        let length = u16::from_be_bytes([frame[4], frame[5]]);
        let unit_id = frame[6];
        let function_code = frame[7];

        if frame.len() < MBAP_HEADER_SIZE + length as usize {
            return Err(SimulatorError::frame("incomplete response frame"));
        }

        if function_code & 0x80 != 0 {
            if frame.len() < MBAP_HEADER_SIZE + 3 {
                return Err(SimulatorError::frame("invalid exception response"));
            }
            let original = ModbusFunction::from_u8(function_code & 0x7F)?;
            return Ok(ModbusResponse::new_exception(unit_id, original, frame[8]));
        }

        let function = ModbusFunction::from_u8(function_code)?;
        let data = frame[MBAP_HEADER_SIZE + 2..MBAP_HEADER_SIZE + length as usize].to_vec();
        Ok(ModbusResponse::new_success(unit_id, function, data))
    }

    /// Execute a request; exception responses surface as errors
    pub async fn execute(&mut self, request: ModbusRequest) -> SimulatorResult<ModbusResponse> {
        request.validate()?;

        let frame = self.encode_request(&request);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SimulatorError::connection("client is closed"))?;

        timeout(self.timeout, stream.write_all(&frame))
            .await
            .map_err(|_| SimulatorError::timeout("send request", self.timeout.as_millis() as u64))??;

        // MBAP prefix plus the unit id and function code
        let mut head = [0u8; MBAP_HEADER_SIZE + 2];
        timeout(self.timeout, stream.read_exact(&mut head))
            .await
            .map_err(|_| SimulatorError::timeout("read response header", self.timeout.as_millis() as u64))??;

        let length = u16::from_be_bytes([head[4], head[5]]) as usize;
        if length < 2 || length > 254 {
            return Err(SimulatorError::frame(format!("bad response length {}", length)));
        }

        let mut frame = vec![0u8; MBAP_HEADER_SIZE + length];
        frame[..head.len()].copy_from_slice(&head);
        if length > 2 {
            timeout(self.timeout, stream.read_exact(&mut frame[head.len()..]))
                .await
                .map_err(|_| SimulatorError::timeout("read response body", self.timeout.as_millis() as u64))??;
        }

        let response = self.decode_response(&frame)?;
        if let Some(error) = response.get_exception() {
            return Err(error);
        }
        Ok(response)
    }

    /// Remote endpoint
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

#[async_trait]
impl ModbusClient for ModbusTcpClient {
    async fn read_01(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<bool>> {
        let request = ModbusRequest::new_read(unit_id, ModbusFunction::ReadCoils, address, quantity);
        let response = self.execute(request).await?;
        Ok(response.parse_bits()?.into_iter().take(quantity as usize).collect())
    }

    async fn read_02(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<bool>> {
        let request = ModbusRequest::new_read(unit_id, ModbusFunction::ReadDiscreteInputs, address, quantity);
        let response = self.execute(request).await?;
        Ok(response.parse_bits()?.into_iter().take(quantity as usize).collect())
    }

    async fn read_03(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<u16>> {
        let request = ModbusRequest::new_read(unit_id, ModbusFunction::ReadHoldingRegisters, address, quantity);
        self.execute(request).await?.parse_registers()
    }

    async fn read_04(&mut self, unit_id: UnitId, address: u16, quantity: u16) -> SimulatorResult<Vec<u16>> {
        let request = ModbusRequest::new_read(unit_id, ModbusFunction::ReadInputRegisters, address, quantity);
        self.execute(request).await?.parse_registers()
    }

    async fn write_05(&mut self, unit_id: UnitId, address: u16, value: bool) -> SimulatorResult<()> {
        let data = if value { vec![0xFF, 0x00] } else { vec![0x00, 0x00] };
        let request = ModbusRequest::new_write(unit_id, ModbusFunction::WriteSingleCoil, address, data);
        self.execute(request).await?;
        Ok(())
    }

    async fn write_06(&mut self, unit_id: UnitId, address: u16, value: u16) -> SimulatorResult<()> {
        let request = ModbusRequest::new_write(
            unit_id,
            ModbusFunction::WriteSingleRegister,
            address,
            value.to_be_bytes().to_vec(),
        );
        self.execute(request).await?;
        Ok(())
    }

    async fn write_0f(&mut self, unit_id: UnitId, address: u16, values: &[bool]) -> SimulatorResult<()> {
        let mut request = ModbusRequest::new_write(
            unit_id,
            ModbusFunction::WriteMultipleCoils,
            address,
            data_utils::pack_bits(values),
        );
        request.quantity = values.len() as u16;
        self.execute(request).await?;
        Ok(())
    }

    async fn write_10(&mut self, unit_id: UnitId, address: u16, values: &[u16]) -> SimulatorResult<()> {
        let mut request = ModbusRequest::new_write(
            unit_id,
            ModbusFunction::WriteMultipleRegisters,
            address,
            data_utils::registers_to_bytes(values),
        );
        request.quantity = values.len() as u16;
        self.execute(request).await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> SimulatorResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_encoding() {
        // No server needed; exercise the encoder through a disconnected client
        let mut client = ModbusTcpClient {
            stream: None,
            address: "127.0.0.1:502".parse().unwrap(),
            timeout: Duration::from_secs(1),
            transaction_id: 0,
        };

        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 10, 2);
        let frame = client.encode_request(&request);
        assert_eq!(frame, vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x02]);

        let request = ModbusRequest::new_write(1, ModbusFunction::WriteSingleCoil, 100, vec![0xFF, 0x00]);
        let frame = client.encode_request(&request);
        assert_eq!(frame[6..], [0x01, 0x05, 0x00, 0x64, 0xFF, 0x00]);
    }

    #[tokio::test]
    async fn test_exception_response_decoding() {
        let client = ModbusTcpClient {
            stream: None,
            address: "127.0.0.1:502".parse().unwrap(),
            timeout: Duration::from_secs(1),
            transaction_id: 0,
        };

        let frame = [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02];
        let response = client.decode_response(&frame).unwrap();
        assert!(response.is_exception());
        match response.get_exception().unwrap() {
            SimulatorError::Exception { function, code, .. } => {
                assert_eq!(function, 0x03);
                assert_eq!(code, 0x02);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
