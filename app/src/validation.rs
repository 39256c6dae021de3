use crate::errors::{EngineError, EngineResult};
use once_cell::sync::OnceCell;
use regex::Regex;

/// Number of digits in a device PIN.
pub const PIN_LENGTH: usize = 6;

/// Input validation utilities for values that cross from the UI into the engine
pub struct InputValidator {
    // Compiled regex patterns for performance
    pin_pattern: Regex,
    port_pattern: Regex,
}

static SHARED_VALIDATOR: OnceCell<InputValidator> = OnceCell::new();

impl InputValidator {
    pub fn new() -> EngineResult<Self> {
        let pin_pattern = Regex::new(&format!(r"^[0-9]{{{}}}$", PIN_LENGTH))
            .map_err(|e| EngineError::ValidationFailed(format!("Invalid PIN regex: {}", e)))?;

        let port_pattern = Regex::new(r"^[A-Za-z0-9_./\\:\-]{1,128}$")
            .map_err(|e| EngineError::ValidationFailed(format!("Invalid port regex: {}", e)))?;

        Ok(InputValidator {
            pin_pattern,
            port_pattern,
        })
    }

    /// Process-wide validator, compiled on first use.
    pub fn shared() -> EngineResult<&'static InputValidator> {
        SHARED_VALIDATOR.get_or_try_init(InputValidator::new)
    }

    /// Validate a PIN submission. The value itself never appears in the error.
    pub fn validate_pin(&self, pin: &str) -> EngineResult<()> {
        if pin.len() != PIN_LENGTH {
            return Err(EngineError::ValidationFailed(format!(
                "PIN must be exactly {} digits",
                PIN_LENGTH
            )));
        }

        if !self.pin_pattern.is_match(pin) {
            return Err(EngineError::ValidationFailed(
                "PIN may only contain digits".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a serial port name supplied through configuration
    pub fn validate_port_name(&self, port: &str) -> EngineResult<()> {
        self.check_control_characters(port)?;

        if !self.port_pattern.is_match(port) {
            return Err(EngineError::ValidationFailed(format!(
                "Port name '{}' contains unsupported characters",
                port
            )));
        }

        Ok(())
    }

    /// Reject values carrying newlines or other control characters
    pub fn check_control_characters(&self, input: &str) -> EngineResult<()> {
        if input.chars().any(|c| c.is_control()) {
            return Err(EngineError::ValidationFailed(
                "Input contains control characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new().expect("Failed to create InputValidator")
    }
}
