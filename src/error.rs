//! # Simulator Error Handling
//!
//! This module provides comprehensive error handling for the Voltage DevSim
//! library, covering configuration validation, Modbus frame processing, device
//! lifecycle faults, and client-side communication errors.
//!
//! ## Error Categories
//!
//! ### Configuration Errors
//! - **Configuration**: invalid point maps rejected before a device starts
//!   (duplicate keys, overlapping bitfields, zero scale factors)
//!
//! ### Protocol Errors
//! - **Frame Errors**: malformed MBAP headers and truncated PDUs
//! - **Protocol Errors**: Modbus specification violations
//! - **Exception Responses**: standard Modbus exception codes surfaced by the
//!   bundled client when a server answers with `fc | 0x80`
//!
//! ### Lifecycle Errors
//! - **Bind Errors**: port collisions and bind permission failures; these
//!   fault the affected device only, never the process
//! - **Device Errors**: unknown device ids, operations in the wrong state
//!
//! ### Transport Errors
//! - **I/O Errors**: socket failures
//! - **Timeout Errors**: operation timeouts with context
//!
//! ## Propagation Policy
//!
//! Application-level Modbus failures (bad address, read-only write) never
//! appear as `SimulatorError` on the server path; they are encoded as Modbus
//! exception responses and the connection stays open. `SimulatorError` is for
//! host-facing APIs: configuration, lifecycle, and the bundled client.

use thiserror::Error;

/// Result type alias for simulator operations
pub type SimulatorResult<T> = Result<T, SimulatorError>;

/// Comprehensive simulator error types
///
/// Each variant provides context about the specific failure, making it easier
/// to diagnose issues and surface actionable messages to a host UI.
#[derive(Error, Debug, Clone)]
pub enum SimulatorError {
    /// I/O related errors (sockets)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors (bundled client)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// Occurs when operations exceed their configured timeout limits.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Protocol-level errors
    ///
    /// General Modbus protocol specification violations that don't fit into
    /// more specific categories.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Frame parsing errors
    ///
    /// MBAP header violations, truncated PDUs, or frames whose declared
    /// length disagrees with the bytes on the wire.
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Configuration errors
    ///
    /// Point-map validation failures that prevent a device from starting:
    /// duplicate point keys, overlapping bitfields, zero scale, region/type
    /// mismatches.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Invalid data value
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Modbus exception response
    ///
    /// Raised by the bundled client when the server answers a request with a
    /// standard exception frame.
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Server Device Failure
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Listener bind failure
    ///
    /// Port collisions and privilege errors fault the owning device with an
    /// actionable message; they never terminate the process.
    #[error("Bind failure on port {port}: {message}")]
    Bind { port: u16, message: String },

    /// Unknown device id
    #[error("Device not found: {id}")]
    DeviceNotFound { id: String },

    /// Operation attempted in an incompatible lifecycle state
    #[error("Invalid device state: {message}")]
    InvalidState { message: String },

    /// Internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SimulatorError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a Modbus exception error
    ///
    /// Automatically maps standard exception codes to human-readable messages.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Server Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Server Device Busy",
            _ => "Unknown Exception",
        }
        .to_string();

        Self::Exception { function, code, message }
    }

    /// Create a bind failure error
    pub fn bind<S: Into<String>>(port: u16, message: S) -> Self {
        Self::Bind { port, message: message.into() }
    }

    /// Create a device-not-found error
    pub fn device_not_found(id: impl std::fmt::Display) -> Self {
        Self::DeviceNotFound { id: id.to_string() }
    }

    /// Create an invalid-state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io { .. } => true,
            Self::Connection { .. } => true,
            Self::Timeout { .. } => true,
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Connection { .. } | Self::Timeout { .. })
    }

    /// Check if the error is a protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::Frame { .. } | Self::Exception { .. }
        )
    }

    /// Check if the error is a configuration/validation issue
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::InvalidData { .. })
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for SimulatorError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
impl From<tokio::time::error::Elapsed> for SimulatorError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for SimulatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_data(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SimulatorError::timeout("read frame", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());

        let err = SimulatorError::exception(0x03, 0x02);
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());

        let err = SimulatorError::configuration("duplicate point key 'voltage'");
        assert!(err.is_configuration_error());
        assert!(!err.is_transport_error());
    }

    #[test]
    fn test_error_display() {
        let err = SimulatorError::bind(502, "Port 502 requires elevated privileges");
        let msg = format!("{}", err);
        assert!(msg.contains("502"));
        assert!(msg.contains("elevated"));

        let err = SimulatorError::exception(0x06, 0x03);
        let msg = format!("{}", err);
        assert!(msg.contains("Illegal Data Value"));
    }
}
