//! Scripted driver double shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::driver::DeviceDriver;
use crate::errors::{EngineError, EngineResult};
use crate::secret_entry::Pin;
use crate::state::{FirmwareInfo, WalletStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    CheckConnection,
    GetWalletStatus,
    GetFirmwareVersion,
    Unlock,
    Lock,
    CreateWallet,
    GetAddress(u32),
}

struct Script {
    connected: EngineResult<bool>,
    status: EngineResult<WalletStatus>,
    firmware: EngineResult<Option<FirmwareInfo>>,
    unlock: EngineResult<bool>,
    lock: EngineResult<()>,
    create: EngineResult<bool>,
    address: EngineResult<Option<String>>,
    calls: Vec<DriverCall>,
    pins_seen: usize,
}

/// Behaves like an attached device whose answers can be changed mid-test.
/// Successful unlock/lock/create calls move the scripted wallet status the way
/// the firmware would.
pub struct ScriptedDriver {
    script: Mutex<Script>,
}

impl ScriptedDriver {
    pub fn connected(status: WalletStatus) -> Self {
        Self {
            script: Mutex::new(Script {
                connected: Ok(true),
                status: Ok(status),
                firmware: Ok(Some(FirmwareInfo::new(1, 2, 0))),
                unlock: Ok(true),
                lock: Ok(()),
                create: Ok(true),
                address: Ok(Some("lc1qdefaultaccount".to_string())),
                calls: Vec::new(),
                pins_seen: 0,
            }),
        }
    }

    pub fn unplugged() -> Self {
        let driver = Self::connected(WalletStatus::Disconnected);
        driver.set_connected(Ok(false));
        driver
    }

    pub fn set_connected(&self, connected: EngineResult<bool>) {
        self.script.lock().connected = connected;
    }

    pub fn set_status(&self, status: EngineResult<WalletStatus>) {
        self.script.lock().status = status;
    }

    pub fn set_firmware(&self, firmware: EngineResult<Option<FirmwareInfo>>) {
        self.script.lock().firmware = firmware;
    }

    pub fn set_unlock(&self, result: EngineResult<bool>) {
        self.script.lock().unlock = result;
    }

    pub fn set_lock(&self, result: EngineResult<()>) {
        self.script.lock().lock = result;
    }

    pub fn set_create(&self, result: EngineResult<bool>) {
        self.script.lock().create = result;
    }

    pub fn set_address(&self, result: EngineResult<Option<String>>) {
        self.script.lock().address = result;
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.script.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script.lock().calls.clear();
    }

    pub fn pins_seen(&self) -> usize {
        self.script.lock().pins_seen
    }
}

fn failed(message: &str) -> EngineError {
    EngineError::DriverCallFailed(message.to_string())
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn check_connection(&self) -> EngineResult<bool> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::CheckConnection);
        script.connected.clone()
    }

    async fn get_wallet_status(&self) -> EngineResult<WalletStatus> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::GetWalletStatus);
        script.status.clone()
    }

    async fn get_firmware_version(&self) -> EngineResult<Option<FirmwareInfo>> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::GetFirmwareVersion);
        script.firmware.clone()
    }

    async fn unlock(&self, pin: &Pin) -> EngineResult<bool> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::Unlock);
        script.pins_seen += 1;
        if pin.expose().len() != 6 {
            return Err(failed("malformed pin reached the driver"));
        }
        let result = script.unlock.clone();
        if matches!(result, Ok(true)) {
            script.status = Ok(WalletStatus::Unlocked);
        }
        result
    }

    async fn lock(&self) -> EngineResult<()> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::Lock);
        let result = script.lock.clone();
        if result.is_ok() {
            script.status = Ok(WalletStatus::Locked);
        }
        result
    }

    async fn create_wallet(&self, pin: &Pin) -> EngineResult<bool> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::CreateWallet);
        script.pins_seen += 1;
        if pin.expose().len() != 6 {
            return Err(failed("malformed pin reached the driver"));
        }
        let result = script.create.clone();
        if matches!(result, Ok(true)) {
            script.status = Ok(WalletStatus::Unlocked);
        }
        result
    }

    async fn get_address(&self, account_index: u32) -> EngineResult<Option<String>> {
        let mut script = self.script.lock();
        script.calls.push(DriverCall::GetAddress(account_index));
        script.address.clone()
    }
}

/// Wraps a [`ScriptedDriver`] and holds every `check_connection` until the test
/// hands out a permit, so a pass can be parked inside the driver.
pub struct GatedDriver {
    pub inner: ScriptedDriver,
    entered: Notify,
    entries: AtomicUsize,
    permits: Semaphore,
}

impl GatedDriver {
    pub fn new(inner: ScriptedDriver) -> Self {
        Self {
            inner,
            entered: Notify::new(),
            entries: AtomicUsize::new(0),
            permits: Semaphore::new(0),
        }
    }

    /// Resolves once a pass is parked on the connection check.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Connection checks that reached the driver, parked or not.
    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn release(&self, passes: usize) {
        self.permits.add_permits(passes);
    }
}

#[async_trait]
impl DeviceDriver for GatedDriver {
    async fn check_connection(&self) -> EngineResult<bool> {
        self.entries.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.permits
            .acquire()
            .await
            .map_err(|_| failed("gate closed"))?
            .forget();
        self.inner.check_connection().await
    }

    async fn get_wallet_status(&self) -> EngineResult<WalletStatus> {
        self.inner.get_wallet_status().await
    }

    async fn get_firmware_version(&self) -> EngineResult<Option<FirmwareInfo>> {
        self.inner.get_firmware_version().await
    }

    async fn unlock(&self, pin: &Pin) -> EngineResult<bool> {
        self.inner.unlock(pin).await
    }

    async fn lock(&self) -> EngineResult<()> {
        self.inner.lock().await
    }

    async fn create_wallet(&self, pin: &Pin) -> EngineResult<bool> {
        self.inner.create_wallet(pin).await
    }

    async fn get_address(&self, account_index: u32) -> EngineResult<Option<String>> {
        self.inner.get_address(account_index).await
    }
}
