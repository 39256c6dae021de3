//! Periodic reconciliation of the engine's view with the attached device.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::driver::SharedDriver;
use crate::errors::EngineError;
use crate::notifications::NotificationQueue;
use crate::state::{AccountSummary, StateMachine, WalletStatus};

pub const DISCONNECTED_MESSAGE: &str = "Device disconnected";

/// Result of a single pass, mostly useful to callers that want to react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Disconnected,
    Synced(WalletStatus),
    /// The state machine refused an update; the engine was reset to disconnected.
    Faulted,
}

/// Proof that the caller holds the run gate. Passes are never interleaved with
/// each other or with command driver calls that hold it.
pub struct RunGuard<'a> {
    _gate: MutexGuard<'a, ()>,
}

/// Brings the state machine in line with the device, one pass at a time.
///
/// Only connectivity changes reach the user: losing the device queues a single
/// warning. Firmware and address query failures degrade the pass (no firmware,
/// account without address) and are logged at warn without a notification; the
/// next pass retries them. A failed status query counts as a disconnect.
pub struct Reconciler {
    driver: SharedDriver,
    state: Arc<StateMachine>,
    notifications: NotificationQueue,
    run_gate: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(
        driver: SharedDriver,
        state: Arc<StateMachine>,
        notifications: NotificationQueue,
    ) -> Self {
        Self {
            driver,
            state,
            notifications,
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn driver(&self) -> &SharedDriver {
        &self.driver
    }

    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    /// Wait until no pass is running and keep others out while the guard lives.
    pub async fn exclusive(&self) -> RunGuard<'_> {
        RunGuard {
            _gate: self.run_gate.lock().await,
        }
    }

    pub async fn run_once(&self) -> RunOutcome {
        let guard = self.exclusive().await;
        self.run_guarded(&guard).await
    }

    /// One pass for a caller that already holds the gate.
    pub async fn run_guarded(&self, _guard: &RunGuard<'_>) -> RunOutcome {
        let was_connected = self.state.is_connected();

        let connected = match self.driver.check_connection().await {
            Ok(connected) => connected,
            Err(err) => {
                log::warn!("Connection check failed: {}", err);
                false
            }
        };
        if !connected {
            return self.mark_disconnected(was_connected);
        }
        self.state.set_connected(true);

        let firmware = match self.driver.get_firmware_version().await {
            Ok(firmware) => firmware,
            Err(err) => {
                log::warn!("Firmware query failed: {}", err);
                None
            }
        };
        if let Err(err) = self.state.set_firmware(firmware) {
            return self.fault(err);
        }

        let status = match self.driver.get_wallet_status().await {
            Ok(WalletStatus::Disconnected) => {
                log::warn!("Device reported no usable wallet status");
                return self.mark_disconnected(was_connected);
            }
            Ok(status) => status,
            Err(err) => {
                log::warn!("Wallet status query failed: {}", err);
                return self.mark_disconnected(was_connected);
            }
        };
        if let Err(err) = self.state.set_status(status) {
            return self.fault(err);
        }

        if status == WalletStatus::Unlocked {
            let address = match self.driver.get_address(0).await {
                Ok(address) => address,
                Err(err) => {
                    log::warn!("Address query for account 0 failed: {}", err);
                    None
                }
            };
            let mut account = AccountSummary::new(0, address);
            if let Some(previous) = self.state.accounts().into_iter().find(|a| a.index == 0) {
                account.balance = previous.balance;
            }
            if let Err(err) = self.state.set_accounts(vec![account]) {
                return self.fault(err);
            }
        }

        RunOutcome::Synced(status)
    }

    fn mark_disconnected(&self, was_connected: bool) -> RunOutcome {
        self.state.set_connected(false);
        if was_connected {
            log::info!("Device disconnected");
            self.notifications.warning(DISCONNECTED_MESSAGE);
        }
        RunOutcome::Disconnected
    }

    fn fault(&self, err: EngineError) -> RunOutcome {
        log::error!("Reconciliation rejected by state machine: {}", err);
        debug_assert!(false, "reconciliation hit an invalid transition: {}", err);
        self.state.set_connected(false);
        RunOutcome::Faulted
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Self-scheduling background task: the next pass is timed from the end of the
/// previous one, so passes never overlap.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    period: Duration,
    worker: Mutex<Option<Worker>>,
}

impl ReconciliationLoop {
    pub fn new(reconciler: Arc<Reconciler>, period: Duration) -> Self {
        Self {
            reconciler,
            period,
            worker: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start polling; the first pass runs immediately. Restarting replaces a
    /// previous worker after cancelling it.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if let Some(previous) = worker.take() {
            previous.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let reconciler = Arc::clone(&self.reconciler);
        let period = self.period;
        let handle = tokio::spawn(async move {
            log::debug!("Reconciliation loop started ({} ms)", period.as_millis());
            loop {
                if token.is_cancelled() {
                    break;
                }
                let outcome = reconciler.run_once().await;
                log::trace!("Reconciliation pass finished: {:?}", outcome);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {}
                }
            }
            log::debug!("Reconciliation loop stopped");
        });

        *worker = Some(Worker { cancel, handle });
    }

    /// Prevent further passes. A pass already in flight completes.
    pub fn stop(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.cancel.cancel();
        }
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(err) = worker.handle.await {
                log::warn!("Reconciliation task ended abnormally: {}", err);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|worker| !worker.cancel.is_cancelled() && !worker.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ReconciliationLoop {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}
