//! Command surface of the signing device.
//!
//! The engine only talks to hardware through [`DeviceDriver`]. Implementations are
//! expected to fail fast; the engine adds no timeout of its own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{EngineError, EngineResult};
use crate::secret_entry::Pin;
use crate::state::{FirmwareInfo, WalletStatus};

#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Whether a responsive device is attached.
    async fn check_connection(&self) -> EngineResult<bool>;

    async fn get_wallet_status(&self) -> EngineResult<WalletStatus>;

    async fn get_firmware_version(&self) -> EngineResult<Option<FirmwareInfo>>;

    /// `Ok(false)` means the device rejected the PIN.
    async fn unlock(&self, pin: &Pin) -> EngineResult<bool>;

    async fn lock(&self) -> EngineResult<()>;

    /// `Ok(false)` means the device refused to create the wallet.
    async fn create_wallet(&self, pin: &Pin) -> EngineResult<bool>;

    async fn get_address(&self, account_index: u32) -> EngineResult<Option<String>>;
}

pub type SharedDriver = Arc<dyn DeviceDriver>;

/// Fallback used when no device driver is configured: never connected.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedDriver;

#[async_trait]
impl DeviceDriver for DisconnectedDriver {
    async fn check_connection(&self) -> EngineResult<bool> {
        Ok(false)
    }

    async fn get_wallet_status(&self) -> EngineResult<WalletStatus> {
        Ok(WalletStatus::Disconnected)
    }

    async fn get_firmware_version(&self) -> EngineResult<Option<FirmwareInfo>> {
        Ok(None)
    }

    async fn unlock(&self, _pin: &Pin) -> EngineResult<bool> {
        Err(EngineError::DriverUnavailable)
    }

    async fn lock(&self) -> EngineResult<()> {
        Err(EngineError::DriverUnavailable)
    }

    async fn create_wallet(&self, _pin: &Pin) -> EngineResult<bool> {
        Err(EngineError::DriverUnavailable)
    }

    async fn get_address(&self, _account_index: u32) -> EngineResult<Option<String>> {
        Ok(None)
    }
}
