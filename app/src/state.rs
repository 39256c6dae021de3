use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::errors::{EngineError, EngineResult};

/// Lock status of the wallet held by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum WalletStatus {
    #[default]
    Disconnected,
    Uninitialized,
    Locked,
    Unlocked,
}

impl WalletStatus {
    pub fn label(&self) -> &'static str {
        match self {
            WalletStatus::Disconnected => "Disconnected",
            WalletStatus::Uninitialized => "No wallet",
            WalletStatus::Locked => "Locked",
            WalletStatus::Unlocked => "Unlocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareInfo {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    #[serde(default)]
    pub crypto_version: Option<String>,
}

impl FirmwareInfo {
    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            crypto_version: None,
        }
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(label) = &self.crypto_version {
            write!(f, " ({})", label)?;
        }
        Ok(())
    }
}

/// Decimal amount stored as integer base units with eight decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance(u64);

impl Balance {
    pub const DECIMALS: u32 = 8;
    const SCALE: u64 = 10_u64.pow(Self::DECIMALS);

    pub const fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn base_units(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, other: Balance) -> Balance {
        Balance(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{:0width$}",
            self.0 / Self::SCALE,
            self.0 % Self::SCALE,
            width = Self::DECIMALS as usize
        )
    }
}

impl std::iter::Sum for Balance {
    fn sum<I: Iterator<Item = Balance>>(iter: I) -> Self {
        iter.fold(Balance::default(), Balance::saturating_add)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub index: u32,
    pub balance: Balance,
    #[serde(default)]
    pub address: Option<String>,
}

impl AccountSummary {
    pub fn new(index: u32, address: Option<String>) -> Self {
        Self {
            index,
            balance: Balance::default(),
            address,
        }
    }
}

/// Consistent view of everything the engine knows about the device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    pub connected: bool,
    pub status: WalletStatus,
    pub firmware: Option<FirmwareInfo>,
    pub accounts: Vec<AccountSummary>,
}

impl DeviceSnapshot {
    fn clear_device_data(&mut self) {
        self.firmware = None;
        self.accounts.clear();
    }
}

/// Owner of connection and lock state. Every write goes through [`StateMachine::commit`].
#[derive(Debug)]
pub struct StateMachine {
    state: RwLock<DeviceSnapshot>,
    publisher: watch::Sender<DeviceSnapshot>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(DeviceSnapshot::default());
        Self {
            state: RwLock::new(DeviceSnapshot::default()),
            publisher,
        }
    }

    /// Connectivity change. Losing the device clears status, firmware and accounts together.
    pub fn set_connected(&self, connected: bool) {
        let result = self.commit(|state| {
            state.connected = connected;
            if !connected {
                state.status = WalletStatus::Disconnected;
                state.clear_device_data();
            }
            Ok(())
        });
        debug_assert!(result.is_ok());
    }

    /// Lock status change; only legal while a device is connected.
    pub fn set_status(&self, status: WalletStatus) -> EngineResult<()> {
        self.commit(|state| {
            if !state.connected {
                return Err(EngineError::InvalidTransition {
                    from: state.status,
                    to: status,
                });
            }
            state.status = status;
            if status != WalletStatus::Unlocked {
                state.accounts.clear();
            }
            Ok(())
        })
    }

    pub fn set_firmware(&self, firmware: Option<FirmwareInfo>) -> EngineResult<()> {
        self.commit(|state| {
            if firmware.is_some() && !state.connected {
                return Err(EngineError::InvalidTransition {
                    from: state.status,
                    to: WalletStatus::Disconnected,
                });
            }
            state.firmware = firmware;
            Ok(())
        })
    }

    pub fn set_accounts(&self, accounts: Vec<AccountSummary>) -> EngineResult<()> {
        self.commit(|state| {
            if !accounts.is_empty() && state.status != WalletStatus::Unlocked {
                return Err(EngineError::InvalidTransition {
                    from: state.status,
                    to: WalletStatus::Unlocked,
                });
            }
            state.accounts = accounts;
            Ok(())
        })
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.state.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    pub fn status(&self) -> WalletStatus {
        self.state.read().status
    }

    pub fn firmware(&self) -> Option<FirmwareInfo> {
        self.state.read().firmware.clone()
    }

    pub fn accounts(&self) -> Vec<AccountSummary> {
        self.state.read().accounts.clone()
    }

    /// Receive every committed snapshot; the current one is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.publisher.subscribe()
    }

    /// Single update entry point. The operation either applies fully or returns an
    /// error without having touched the state; publication happens under the same lock.
    fn commit<F>(&self, operation: F) -> EngineResult<()>
    where
        F: FnOnce(&mut DeviceSnapshot) -> EngineResult<()>,
    {
        let mut state = self.state.write();
        let mut next = state.clone();
        operation(&mut next)?;
        if next == *state {
            return Ok(());
        }

        if next.connected != state.connected || next.status != state.status {
            log::debug!(
                "Device state {:?}/{} -> {:?}/{}",
                state.status,
                state.connected,
                next.status,
                next.connected
            );
        }
        *state = next;
        self.publisher.send_replace(state.clone());
        Ok(())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
