/// Callback logging for Modbus traffic observation
///
/// A host UI typically wants a live view of the frames a simulated device
/// exchanges. The callback logger forwards request/response summaries to an
/// arbitrary sink without coupling the server to any particular transport;
/// the `log` crate remains the ambient diagnostic channel.

use std::sync::Arc;

use crate::protocol::{MbapHeader, ModbusFunction};

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Error messages
    Error,
    /// Warning messages
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Traffic rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show raw frame bytes only
    Raw,
    /// Show interpreted frames with function names
    Interpreted,
    /// Show both raw and interpreted output
    Both,
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string.
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible traffic logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode: LoggingMode::Interpreted,
        }
    }

    /// Create a new callback logger with a specific rendering mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with default console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error => eprintln!("[{}] ERROR: {}", timestamp, message),
                LogLevel::Warn => eprintln!("[{}] WARN: {}", timestamp, message),
                LogLevel::Info => println!("[{}] INFO: {}", timestamp, message),
                LogLevel::Debug => println!("[{}] DEBUG: {}", timestamp, message),
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Set rendering mode
    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    /// Get current rendering mode
    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    /// Log an incoming request frame
    pub fn log_request(&self, peer: &str, header: &MbapHeader, pdu: &[u8]) {
        if !self.should_log(LogLevel::Info) {
            return;
        }
        if matches!(self.mode, LoggingMode::Raw | LoggingMode::Both) {
            self.log(LogLevel::Info, &format!("{} -> RX {}", peer, hex_dump(pdu)));
        }
        if matches!(self.mode, LoggingMode::Interpreted | LoggingMode::Both) {
            let description = interpret_pdu(pdu);
            self.log(
                LogLevel::Info,
                &format!("{} -> TID={} unit={} {}", peer, header.transaction_id, header.unit_id, description),
            );
        }
    }

    /// Log an outgoing response frame (full ADU)
    pub fn log_response(&self, peer: &str, frame: &[u8]) {
        if !self.should_log(LogLevel::Info) {
            return;
        }
        let pdu = if frame.len() > 7 { &frame[7..] } else { &[][..] };
        if matches!(self.mode, LoggingMode::Raw | LoggingMode::Both) {
            self.log(LogLevel::Info, &format!("{} <- TX {}", peer, hex_dump(frame)));
        }
        if matches!(self.mode, LoggingMode::Interpreted | LoggingMode::Both) {
            self.log(LogLevel::Info, &format!("{} <- {}", peer, interpret_pdu(pdu)));
        }
    }

    /// Log an error message
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// Log a warning message
    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Log an info message
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Log a debug message
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level <= self.min_level
    }
}

/// Render a PDU in one line: function name, or exception code
fn interpret_pdu(pdu: &[u8]) -> String {
    let Some(&fc) = pdu.first() else {
        return "empty PDU".to_string();
    };
    if fc & 0x80 != 0 {
        let code = pdu.get(1).copied().unwrap_or(0);
        return format!("Exception 0x{:02X} code {}", fc, code);
    }
    match ModbusFunction::from_u8(fc) {
        Ok(function) => format!("{} ({} bytes)", function, pdu.len()),
        Err(_) => format!("Unknown function 0x{:02X}", fc),
    }
}

fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_level_filtering() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: LogCallback = Box::new(move |level, msg| {
            sink.lock().unwrap().push(format!("{} {}", level.as_str(), msg));
        });
        let logger = CallbackLogger::new(Some(callback), LogLevel::Warn);

        logger.error("boom");
        logger.warn("careful");
        logger.info("ignored");
        logger.debug("ignored");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].starts_with("ERROR"));
    }

    #[test]
    fn test_interpreted_request_rendering() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: LogCallback = Box::new(move |_, msg| {
            sink.lock().unwrap().push(msg.to_string());
        });
        let logger = CallbackLogger::new(Some(callback), LogLevel::Info);

        let header = MbapHeader { transaction_id: 5, protocol_id: 0, length: 6, unit_id: 1 };
        logger.log_request("127.0.0.1:5000", &header, &[0x03, 0x00, 0x0A, 0x00, 0x02]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("Read Holding Registers"));
        assert!(seen[0].contains("TID=5"));
    }

    #[test]
    fn test_exception_rendering() {
        assert!(interpret_pdu(&[0x83, 0x02]).contains("code 2"));
        assert_eq!(hex_dump(&[0xAB, 0x01]), "AB 01");
    }
}
