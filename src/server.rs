/// Per-device Modbus/TCP protocol engine
///
/// One listener per device. Each accepted connection gets its own handler
/// task that owns the socket; requests are self-contained and there is no
/// per-connection session state. The point store is the only cross-handler
/// coupling.
///
/// Framing reads exactly one MBAP prefix, then the `length`-counted body.
/// Malformed frames close the connection without a response; well-formed
/// requests always produce exactly one response frame, possibly an exception.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::address_map::CodecError;
use crate::device::DeviceRuntime;
use crate::logging::CallbackLogger;
use crate::overrides;
use crate::point::{OverrideMode, RegisterRegion};
use crate::protocol::{
    self, data_utils, MbapHeader, ModbusException, PduDecodeError, RequestPdu, MBAP_HEADER_SIZE,
};

/// Idle window after which a silent connection is closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Server statistics, shared with the device manager
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections: AtomicU64,
    pub requests: AtomicU64,
    pub exception_responses: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

impl ServerStats {
    /// Plain-value snapshot for display
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            exception_responses: self.exception_responses.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Copyable view of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStatsSnapshot {
    pub connections: u64,
    pub requests: u64,
    pub exception_responses: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Modbus/TCP engine for one device
pub struct DeviceServer {
    runtime: Arc<DeviceRuntime>,
    stats: Arc<ServerStats>,
    logger: Option<CallbackLogger>,
}

impl DeviceServer {
    /// Create the engine over a device's runtime
    pub fn new(runtime: Arc<DeviceRuntime>, logger: Option<CallbackLogger>) -> Self {
        Self { runtime, stats: Arc::new(ServerStats::default()), logger }
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Run the accept loop on an already-bound listener
    ///
    /// Binding happens in the device manager so bind failures can fault the
    /// device with an actionable message before anything is spawned.
    pub fn spawn(self, listener: TcpListener) -> JoinHandle<()> {
        let cancel = self.runtime.cancel.child_token();
        tokio::spawn(async move {
            let local = listener.local_addr().map(|a| a.to_string()).unwrap_or_default();
            info!("device {} listening on {}", self.runtime.device_id, local);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("listener for {} cancelled", self.runtime.device_id);
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("accepted connection from {}", peer);
                                self.stats.connections.fetch_add(1, Ordering::Relaxed);
                                let runtime = self.runtime.clone();
                                let stats = self.stats.clone();
                                let logger = self.logger.clone();
                                let conn_cancel = cancel.child_token();
                                tokio::spawn(async move {
                                    handle_connection(stream, runtime, stats, logger, conn_cancel).await;
                                });
                            }
                            Err(e) => {
                                error!("accept failed on {}: {}", local, e);
                            }
                        }
                    }
                }
            }
            info!("device {} listener on {} stopped", self.runtime.device_id, local);
        })
    }
}

/// Serve one connection until EOF, idle timeout, cancellation or a framing error
async fn handle_connection(
    mut stream: TcpStream,
    runtime: Arc<DeviceRuntime>,
    stats: Arc<ServerStats>,
    logger: Option<CallbackLogger>,
    cancel: CancellationToken,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!("client {} connected to device {}", peer, runtime.device_id);

    loop {
        let mut prefix = [0u8; MBAP_HEADER_SIZE];
        tokio::select! {
            _ = cancel.cancelled() => break,
            read = timeout(IDLE_TIMEOUT, stream.read_exact(&mut prefix)) => {
                match read {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        if e.kind() != std::io::ErrorKind::UnexpectedEof {
                            debug!("read error from {}: {}", peer, e);
                        }
                        break;
                    }
                    Err(_) => {
                        debug!("closing idle connection from {}", peer);
                        break;
                    }
                }
            }
        }

        let mut header = match MbapHeader::parse_prefix(&prefix) {
            Ok(header) => header,
            Err(e) => {
                warn!("malformed frame from {}: {}", peer, e);
                break;
            }
        };

        let mut body = vec![0u8; header.length as usize];
        let read = timeout(IDLE_TIMEOUT, stream.read_exact(&mut body)).await;
        match read {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!("read error from {}: {}", peer, e);
                break;
            }
            Err(_) => {
                debug!("closing idle connection from {} mid-frame", peer);
                break;
            }
        }
        header.unit_id = body[0];
        let pdu = &body[1..];

        stats.requests.fetch_add(1, Ordering::Relaxed);
        stats
            .bytes_received
            .fetch_add((MBAP_HEADER_SIZE + body.len()) as u64, Ordering::Relaxed);
        if let Some(ref logger) = logger {
            logger.log_request(&peer, &header, pdu);
        }

        let response = match build_response(&runtime, &header, pdu) {
            Some(frame) => frame,
            None => {
                // Undecodable beyond repair; drop the connection.
                warn!("closing {}: malformed PDU", peer);
                break;
            }
        };

        if response[7] & 0x80 != 0 {
            stats.exception_responses.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(ref logger) = logger {
            logger.log_response(&peer, &response);
        }
        if let Err(e) = stream.write_all(&response).await {
            debug!("write error to {}: {}", peer, e);
            break;
        }
        stats.bytes_sent.fetch_add(response.len() as u64, Ordering::Relaxed);
    }

    debug!("client {} disconnected from device {}", peer, runtime.device_id);
}

/// Produce the response ADU for one request, or None to close the connection
fn build_response(runtime: &Arc<DeviceRuntime>, header: &MbapHeader, pdu: &[u8]) -> Option<Vec<u8>> {
    let function_byte = pdu.first().copied().unwrap_or(0);

    let request = match protocol::decode_request_pdu(pdu) {
        Ok(request) => request,
        Err(PduDecodeError::IllegalFunction(fc)) => {
            return Some(protocol::encode_exception(header, fc, ModbusException::IllegalFunction).to_vec());
        }
        Err(PduDecodeError::IllegalValue(reason)) => {
            debug!("request rejected: {}", reason);
            return Some(
                protocol::encode_exception(header, function_byte, ModbusException::IllegalDataValue)
                    .to_vec(),
            );
        }
        Err(PduDecodeError::Malformed(reason)) => {
            debug!("malformed PDU: {}", reason);
            return None;
        }
    };

    // Unhandled failures in the handler answer as exception 4; they must not
    // kill the connection.
    let outcome = catch_unwind(AssertUnwindSafe(|| execute_request(runtime, &request)));
    let frame = match outcome {
        Ok(Ok(response_pdu)) => protocol::encode_response(header, &response_pdu),
        Ok(Err(exception)) => protocol::encode_exception(header, function_byte, exception),
        Err(_) => {
            error!(
                "request handler for {} panicked on function 0x{:02X}; answering exception 4",
                runtime.device_id, function_byte
            );
            protocol::encode_exception(header, function_byte, ModbusException::ServerDeviceFailure)
        }
    };
    Some(frame.to_vec())
}

/// Execute a decoded request against the address map and the point store
fn execute_request(runtime: &Arc<DeviceRuntime>, request: &RequestPdu) -> Result<Vec<u8>, ModbusException> {
    let map = &runtime.address_map;
    let store = runtime.store.as_ref();
    let device_id = runtime.device_id;

    match request {
        RequestPdu::ReadBits { function, address, quantity } => {
            let region = if *function == protocol::ModbusFunction::ReadCoils {
                RegisterRegion::Coil
            } else {
                RegisterRegion::DiscreteInput
            };
            let bits = map.read_bits(store, device_id, region, *address, *quantity);
            let packed = data_utils::pack_bits(&bits);
            let mut pdu = Vec::with_capacity(2 + packed.len());
            pdu.push(function.to_u8());
            pdu.push(packed.len() as u8);
            pdu.extend_from_slice(&packed);
            Ok(pdu)
        }
        RequestPdu::ReadRegisters { function, address, quantity } => {
            let region = if *function == protocol::ModbusFunction::ReadHoldingRegisters {
                RegisterRegion::HoldingRegister
            } else {
                RegisterRegion::InputRegister
            };
            let registers = map
                .read_registers(store, device_id, region, *address, *quantity)
                .map_err(|e| e.exception())?;
            let bytes = data_utils::registers_to_bytes(&registers);
            let mut pdu = Vec::with_capacity(2 + bytes.len());
            pdu.push(function.to_u8());
            pdu.push(bytes.len() as u8);
            pdu.extend_from_slice(&bytes);
            Ok(pdu)
        }
        RequestPdu::WriteSingleCoil { address, raw } => {
            let written = map
                .write_coil(store, device_id, *address, *raw == 0xFF00)
                .map_err(codec_exception)?;
            apply_overrides(runtime, &written);
            let mut pdu = Vec::with_capacity(5);
            pdu.push(protocol::ModbusFunction::WriteSingleCoil.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&raw.to_be_bytes());
            Ok(pdu)
        }
        RequestPdu::WriteSingleRegister { address, value } => {
            let written = map
                .write_register(store, device_id, *address, *value)
                .map_err(codec_exception)?;
            apply_overrides(runtime, &written);
            let mut pdu = Vec::with_capacity(5);
            pdu.push(protocol::ModbusFunction::WriteSingleRegister.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&value.to_be_bytes());
            Ok(pdu)
        }
        RequestPdu::WriteMultipleCoils { address, bits } => {
            let written = map
                .write_coils(store, device_id, *address, bits)
                .map_err(codec_exception)?;
            apply_overrides(runtime, &written);
            let mut pdu = Vec::with_capacity(5);
            pdu.push(protocol::ModbusFunction::WriteMultipleCoils.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&(bits.len() as u16).to_be_bytes());
            Ok(pdu)
        }
        RequestPdu::WriteMultipleRegisters { address, values } => {
            let written = map
                .write_registers(store, device_id, *address, values)
                .map_err(codec_exception)?;
            apply_overrides(runtime, &written);
            let mut pdu = Vec::with_capacity(5);
            pdu.push(protocol::ModbusFunction::WriteMultipleRegisters.to_u8());
            pdu.extend_from_slice(&address.to_be_bytes());
            pdu.extend_from_slice(&(values.len() as u16).to_be_bytes());
            Ok(pdu)
        }
    }
}

fn codec_exception(error: CodecError) -> ModbusException {
    error.exception()
}

/// Run the override policy for every point a write touched
fn apply_overrides(runtime: &Arc<DeviceRuntime>, written: &[usize]) {
    for &index in written {
        let def = runtime.address_map.definition(index);
        if def.override_mode != OverrideMode::None {
            overrides::on_remote_write(runtime, def);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_map::AddressMap;
    use crate::point::{
        Access, ModbusMapping, PointDefinition, SemanticType, Value, ValueSource,
    };
    use crate::store::PointStore;
    use uuid::Uuid;

    fn runtime() -> Arc<DeviceRuntime> {
        let points = vec![
            PointDefinition::new(
                "coil",
                SemanticType::Bool,
                Access::ReadWrite,
                ModbusMapping {
                    region: RegisterRegion::Coil,
                    address: 100,
                    scale: 1.0,
                    bit_field: None,
                },
            ),
            PointDefinition::new(
                "hr10",
                SemanticType::Uint16,
                Access::ReadWrite,
                ModbusMapping {
                    region: RegisterRegion::HoldingRegister,
                    address: 10,
                    scale: 1.0,
                    bit_field: None,
                },
            ),
            PointDefinition::new(
                "hr11",
                SemanticType::Uint16,
                Access::ReadWrite,
                ModbusMapping {
                    region: RegisterRegion::HoldingRegister,
                    address: 11,
                    scale: 1.0,
                    bit_field: None,
                },
            ),
            PointDefinition::new(
                "ro20",
                SemanticType::Uint16,
                Access::Read,
                ModbusMapping {
                    region: RegisterRegion::HoldingRegister,
                    address: 20,
                    scale: 1.0,
                    bit_field: None,
                },
            ),
        ];
        let map = Arc::new(AddressMap::build(points.clone()).unwrap());
        let store = Arc::new(PointStore::new());
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        Arc::new(DeviceRuntime::new(device, map, store))
    }

    fn header() -> MbapHeader {
        MbapHeader { transaction_id: 1, protocol_id: 0, length: 6, unit_id: 1 }
    }

    #[test]
    fn test_read_request_round_trip() {
        let runtime = runtime();
        runtime
            .store
            .set(runtime.device_id, "hr10", Value::Numeric(123.0), ValueSource::Manual, None);

        let frame = build_response(&runtime, &header(), &[0x03, 0x00, 0x0A, 0x00, 0x01]).unwrap();
        // unit id echoed, FC 03, byte count 2, value 123
        assert_eq!(&frame[6..], &[0x01, 0x03, 0x02, 0x00, 0x7B]);
    }

    #[test]
    fn test_unmapped_read_is_exception_2() {
        let runtime = runtime();
        let frame = build_response(&runtime, &header(), &[0x03, 0x27, 0x0F, 0x00, 0x01]).unwrap();
        assert_eq!(&frame[7..], &[0x83, 0x02]);
    }

    #[test]
    fn test_read_only_write_is_exception_3() {
        let runtime = runtime();
        let frame = build_response(&runtime, &header(), &[0x06, 0x00, 0x14, 0x03, 0xE7]).unwrap();
        assert_eq!(&frame[7..], &[0x86, 0x03]);
        // Store value untouched
        let slot = runtime.store.get(runtime.device_id, "ro20");
        assert_eq!(slot.value, Value::Numeric(0.0));
    }

    #[test]
    fn test_internal_failure_answers_exception_4() {
        use crate::point::BitField;
        use std::collections::HashMap;

        // A register that indexes a bitfield point alongside a plain point is
        // impossible through validation; assembling it by hand makes the
        // mosaic read path panic so the exception-4 boundary is exercised.
        let points = vec![
            PointDefinition::new(
                "mosaic_bit",
                SemanticType::Bool,
                Access::ReadWrite,
                ModbusMapping {
                    region: RegisterRegion::HoldingRegister,
                    address: 10,
                    scale: 1.0,
                    bit_field: Some(BitField { start_bit: 0, bit_length: 1 }),
                },
            ),
            PointDefinition::new(
                "plain",
                SemanticType::Uint16,
                Access::ReadWrite,
                ModbusMapping {
                    region: RegisterRegion::HoldingRegister,
                    address: 10,
                    scale: 1.0,
                    bit_field: None,
                },
            ),
        ];
        let mut holding = HashMap::new();
        holding.insert(10u16, vec![0usize, 1]);
        let mut regions = HashMap::new();
        regions.insert(RegisterRegion::HoldingRegister, holding);

        let map = Arc::new(AddressMap::from_parts(points.clone(), regions));
        let store = Arc::new(PointStore::new());
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        let runtime = Arc::new(DeviceRuntime::new(device, map, store));

        let frame = build_response(&runtime, &header(), &[0x03, 0x00, 0x0A, 0x00, 0x01]).unwrap();
        assert_eq!(&frame[7..], &[0x83, 0x04]);
    }

    #[test]
    fn test_unsupported_function_is_exception_1() {
        let runtime = runtime();
        let frame = build_response(&runtime, &header(), &[0x2B, 0x0E, 0x01]).unwrap();
        assert_eq!(&frame[7..], &[0xAB, 0x01]);
    }

    #[test]
    fn test_malformed_pdu_closes_connection() {
        let runtime = runtime();
        assert!(build_response(&runtime, &header(), &[0x03, 0x00]).is_none());
    }

    #[test]
    fn test_coil_write_echoes_request() {
        let runtime = runtime();
        let frame = build_response(&runtime, &header(), &[0x05, 0x00, 0x64, 0xFF, 0x00]).unwrap();
        assert_eq!(&frame[7..], &[0x05, 0x00, 0x64, 0xFF, 0x00]);
        assert_eq!(runtime.store.get(runtime.device_id, "coil").value, Value::Bool(true));
        assert_eq!(
            runtime.store.get(runtime.device_id, "coil").source,
            ValueSource::RemoteWrite
        );
    }

    #[test]
    fn test_multi_register_write_and_ack() {
        let runtime = runtime();
        let frame = build_response(
            &runtime,
            &header(),
            &[0x10, 0x00, 0x0A, 0x00, 0x02, 0x04, 0x00, 0x7B, 0x01, 0xC8],
        )
        .unwrap();
        assert_eq!(&frame[7..], &[0x10, 0x00, 0x0A, 0x00, 0x02]);
        assert_eq!(runtime.store.get(runtime.device_id, "hr10").value, Value::Numeric(123.0));
        assert_eq!(runtime.store.get(runtime.device_id, "hr11").value, Value::Numeric(456.0));
    }

    #[test]
    fn test_sparse_coil_scan_succeeds() {
        let runtime = runtime();
        runtime
            .store
            .set(runtime.device_id, "coil", Value::Bool(true), ValueSource::Manual, None);

        // 24 bits from 96: only the bit for address 100 is set
        let frame = build_response(&runtime, &header(), &[0x01, 0x00, 0x60, 0x00, 0x18]).unwrap();
        assert_eq!(frame[7], 0x01);
        assert_eq!(frame[8], 3); // byte count
        assert_eq!(frame[9], 0b0001_0000);
        assert_eq!(frame[10], 0);
        assert_eq!(frame[11], 0);
    }
}
