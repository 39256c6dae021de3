use serde::{Deserialize, Serialize};
use std::fmt;

use crate::state::WalletStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    // Driver errors
    DriverUnavailable,
    DriverCallFailed(String),
    Protocol(String),

    // State machine errors
    InvalidTransition { from: WalletStatus, to: WalletStatus },

    // Secret entry errors
    ConcurrentRequest,
    SecretEntryCancelled,
    NoPendingRequest,

    // Validation errors
    ValidationFailed(String),

    // Configuration & storage errors
    Config(String),
    Storage(String),
    FileNotFound(String),
    PermissionDenied(String),
}

impl EngineError {
    /// Errors that mean "no device" rather than a failed exchange.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::DriverUnavailable)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineError::DriverUnavailable => write!(f, "Device not available"),
            EngineError::DriverCallFailed(msg) => write!(f, "Device call failed: {}", msg),
            EngineError::Protocol(msg) => write!(f, "Protocol error: {}", msg),

            EngineError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition from {:?} to {:?}", from, to)
            }

            EngineError::ConcurrentRequest => write!(f, "A PIN request is already pending"),
            EngineError::SecretEntryCancelled => write!(f, "PIN entry cancelled"),
            EngineError::NoPendingRequest => write!(f, "No PIN request is pending"),

            EngineError::ValidationFailed(msg) => write!(f, "Validation error: {}", msg),

            EngineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EngineError::Storage(msg) => write!(f, "Storage error: {}", msg),
            EngineError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            EngineError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

pub type EngineResult<T> = Result<T, EngineError>;

// Conversion helpers
impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => EngineError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                EngineError::PermissionDenied(error.to_string())
            }
            _ => EngineError::Storage(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Config(format!("JSON error: {}", error))
    }
}

impl From<serialport::Error> for EngineError {
    fn from(error: serialport::Error) -> Self {
        match error.kind() {
            serialport::ErrorKind::NoDevice => EngineError::DriverUnavailable,
            _ => EngineError::DriverCallFailed(error.to_string()),
        }
    }
}
