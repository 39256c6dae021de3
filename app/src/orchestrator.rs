//! User-triggered commands: connect, lock/unlock, wallet creation and refresh.
//!
//! Commands never return errors to the caller. Every failure ends up in the
//! notification queue and the returned [`CommandOutcome`] says how it went.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::driver::SharedDriver;
use crate::errors::EngineError;
use crate::notifications::NotificationQueue;
use crate::reconcile::{Reconciler, RunOutcome};
use crate::secret_entry::{Pin, SecretEntryCoordinator, SecretPurpose};
use crate::state::{StateMachine, WalletStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandOutcome {
    Completed,
    /// Nothing to do, e.g. connecting while already connected.
    NoOp,
    /// The same command, or another PIN prompt, is still pending.
    Busy,
    Cancelled,
    /// Not allowed in the current state.
    Refused,
    Failed,
}

/// Marks one operation kind as pending for as long as it lives.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CommandOrchestrator {
    driver: SharedDriver,
    state: Arc<StateMachine>,
    notifications: NotificationQueue,
    secrets: Arc<SecretEntryCoordinator>,
    reconciler: Arc<Reconciler>,
    connecting: AtomicBool,
    toggling: AtomicBool,
    creating: AtomicBool,
    refreshing: AtomicBool,
}

impl CommandOrchestrator {
    pub fn new(
        reconciler: Arc<Reconciler>,
        notifications: NotificationQueue,
        secrets: Arc<SecretEntryCoordinator>,
    ) -> Self {
        Self {
            driver: Arc::clone(reconciler.driver()),
            state: Arc::clone(reconciler.state()),
            notifications,
            secrets,
            reconciler,
            connecting: AtomicBool::new(false),
            toggling: AtomicBool::new(false),
            creating: AtomicBool::new(false),
            refreshing: AtomicBool::new(false),
        }
    }

    pub async fn connect(&self) -> CommandOutcome {
        let Some(_pending) = InFlight::acquire(&self.connecting) else {
            log::debug!("Connect already in progress");
            return CommandOutcome::Busy;
        };

        if self.state.is_connected() {
            return CommandOutcome::NoOp;
        }

        self.notifications.info("Connecting to device...");
        let guard = self.reconciler.exclusive().await;
        match self.driver.check_connection().await {
            Ok(true) => {
                self.state.set_connected(true);
                match self.reconciler.run_guarded(&guard).await {
                    RunOutcome::Synced(status) => {
                        log::info!("Device connected ({:?})", status);
                        self.notifications.success("Device connected");
                        CommandOutcome::Completed
                    }
                    // The pass already reported what went wrong.
                    RunOutcome::Disconnected | RunOutcome::Faulted => CommandOutcome::Failed,
                }
            }
            Ok(false) => {
                self.notifications.error("No device found");
                CommandOutcome::Failed
            }
            Err(err) => {
                log::warn!("Connection attempt failed: {}", err);
                self.notifications.error(format!("Error: {}", err));
                CommandOutcome::Failed
            }
        }
    }

    /// Unlock when locked, lock when unlocked, connect when disconnected.
    pub async fn toggle_lock(&self) -> CommandOutcome {
        let Some(_pending) = InFlight::acquire(&self.toggling) else {
            log::debug!("Lock toggle already in progress");
            return CommandOutcome::Busy;
        };

        match self.state.status() {
            WalletStatus::Disconnected => self.connect().await,
            WalletStatus::Uninitialized => {
                self.notifications.warning("Create a wallet first");
                CommandOutcome::Refused
            }
            WalletStatus::Locked => self.unlock().await,
            WalletStatus::Unlocked => self.lock().await,
        }
    }

    pub async fn create_wallet(&self) -> CommandOutcome {
        let Some(_pending) = InFlight::acquire(&self.creating) else {
            log::debug!("Wallet creation already in progress");
            return CommandOutcome::Busy;
        };

        if !self.state.is_connected() {
            self.notifications.warning("Connect the device first");
            return CommandOutcome::Refused;
        }

        let pin = match self.obtain_pin(SecretPurpose::CreateWallet).await {
            Ok(pin) => pin,
            Err(outcome) => return outcome,
        };

        let _guard = self.reconciler.exclusive().await;
        if !self.state.is_connected() {
            self.notifications.warning("Connect the device first");
            return CommandOutcome::Refused;
        }
        let result = self.driver.create_wallet(&pin).await;
        drop(pin);

        match result {
            Ok(true) => self.enter_unlocked("Wallet created"),
            Ok(false) => {
                log::warn!("Device refused to create a wallet");
                self.notifications.error("Wallet creation failed");
                CommandOutcome::Failed
            }
            Err(err) => {
                log::warn!("Wallet creation failed: {}", err);
                self.notifications.error(format!("Error: {}", err));
                CommandOutcome::Failed
            }
        }
    }

    /// Run a reconciliation pass now instead of waiting for the next tick.
    pub async fn refresh(&self) -> CommandOutcome {
        let Some(_pending) = InFlight::acquire(&self.refreshing) else {
            return CommandOutcome::Busy;
        };

        match self.reconciler.run_once().await {
            RunOutcome::Synced(_) => CommandOutcome::Completed,
            RunOutcome::Disconnected => CommandOutcome::NoOp,
            RunOutcome::Faulted => CommandOutcome::Failed,
        }
    }

    async fn unlock(&self) -> CommandOutcome {
        let pin = match self.obtain_pin(SecretPurpose::Unlock).await {
            Ok(pin) => pin,
            Err(outcome) => return outcome,
        };

        let _guard = self.reconciler.exclusive().await;
        if self.state.status() != WalletStatus::Locked {
            log::info!(
                "Wallet left the locked state during PIN entry ({:?})",
                self.state.status()
            );
            return CommandOutcome::Cancelled;
        }
        let result = self.driver.unlock(&pin).await;
        drop(pin);

        match result {
            Ok(true) => self.enter_unlocked("Wallet unlocked"),
            Ok(false) => {
                log::info!("Device rejected the PIN");
                self.notifications.error("Incorrect PIN");
                CommandOutcome::Failed
            }
            Err(err) => {
                log::warn!("Unlock failed: {}", err);
                self.notifications.error(format!("Error: {}", err));
                CommandOutcome::Failed
            }
        }
    }

    /// The local state goes to `Locked` whatever the device answers; a failed
    /// driver call is still reported.
    async fn lock(&self) -> CommandOutcome {
        let _guard = self.reconciler.exclusive().await;
        if self.state.status() != WalletStatus::Unlocked {
            log::info!(
                "Wallet left the unlocked state before locking ({:?})",
                self.state.status()
            );
            return CommandOutcome::Cancelled;
        }
        let result = self.driver.lock().await;

        if let Err(err) = self.state.set_status(WalletStatus::Locked) {
            log::error!("Could not record lock: {}", err);
            self.notifications.error(format!("Error: {}", err));
            return CommandOutcome::Failed;
        }

        match result {
            Ok(()) => {
                self.notifications.info("Wallet locked");
                CommandOutcome::Completed
            }
            Err(err) => {
                log::warn!("Lock command failed: {}", err);
                self.notifications.error(format!("Error: {}", err));
                CommandOutcome::Failed
            }
        }
    }

    async fn obtain_pin(&self, purpose: SecretPurpose) -> Result<Pin, CommandOutcome> {
        match self.secrets.request_secret(purpose).await {
            Ok(pin) => Ok(pin),
            Err(EngineError::ConcurrentRequest) => {
                log::debug!("PIN prompt already open, {:?} not started", purpose);
                Err(CommandOutcome::Busy)
            }
            Err(EngineError::SecretEntryCancelled) => {
                log::debug!("PIN entry for {:?} cancelled", purpose);
                Err(CommandOutcome::Cancelled)
            }
            Err(err) => {
                log::warn!("PIN entry failed: {}", err);
                self.notifications.error(format!("Error: {}", err));
                Err(CommandOutcome::Failed)
            }
        }
    }

    fn enter_unlocked(&self, message: &str) -> CommandOutcome {
        match self.state.set_status(WalletStatus::Unlocked) {
            Ok(()) => {
                log::info!("{}", message);
                self.notifications.success(message);
                CommandOutcome::Completed
            }
            Err(err) => {
                log::error!("Could not record unlocked wallet: {}", err);
                self.notifications.error(format!("Error: {}", err));
                CommandOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::Severity;
    use crate::test_support::{DriverCall, ScriptedDriver};

    struct Harness {
        driver: Arc<ScriptedDriver>,
        state: Arc<StateMachine>,
        notifications: NotificationQueue,
        secrets: Arc<SecretEntryCoordinator>,
        reconciler: Arc<Reconciler>,
        orchestrator: Arc<CommandOrchestrator>,
    }

    fn harness(driver: ScriptedDriver) -> Harness {
        let driver = Arc::new(driver);
        let state = Arc::new(StateMachine::new());
        let notifications = NotificationQueue::with_defaults();
        let secrets = Arc::new(SecretEntryCoordinator::new());
        let reconciler = Arc::new(Reconciler::new(
            driver.clone(),
            state.clone(),
            notifications.clone(),
        ));
        let orchestrator = Arc::new(CommandOrchestrator::new(
            reconciler.clone(),
            notifications.clone(),
            secrets.clone(),
        ));
        Harness {
            driver,
            state,
            notifications,
            secrets,
            reconciler,
            orchestrator,
        }
    }

    fn last(notifications: &NotificationQueue) -> (String, Severity) {
        let events = notifications.active();
        let event = events.last().expect("a notification");
        (event.message.clone(), event.severity)
    }

    async fn connected_harness(status: WalletStatus) -> Harness {
        let h = harness(ScriptedDriver::connected(status));
        assert_eq!(h.orchestrator.connect().await, CommandOutcome::Completed);
        h.driver.clear_calls();
        h
    }

    #[tokio::test]
    async fn connect_reports_success_and_syncs() {
        let h = harness(ScriptedDriver::connected(WalletStatus::Locked));

        assert_eq!(h.orchestrator.connect().await, CommandOutcome::Completed);
        assert_eq!(h.state.status(), WalletStatus::Locked);
        let messages: Vec<_> = h
            .notifications
            .active()
            .into_iter()
            .map(|event| (event.message, event.severity))
            .collect();
        assert_eq!(
            messages,
            vec![
                ("Connecting to device...".to_string(), Severity::Info),
                ("Device connected".to_string(), Severity::Success),
            ]
        );

        assert_eq!(h.orchestrator.connect().await, CommandOutcome::NoOp);
    }

    #[tokio::test]
    async fn connect_without_device() {
        let h = harness(ScriptedDriver::unplugged());

        assert_eq!(h.orchestrator.connect().await, CommandOutcome::Failed);
        assert_eq!(
            last(&h.notifications),
            ("No device found".to_string(), Severity::Error)
        );
        assert!(!h.state.is_connected());
    }

    #[tokio::test]
    async fn unlock_with_correct_pin() {
        let h = connected_harness(WalletStatus::Locked).await;

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.toggle_lock().await });
        let prompt = h.secrets.wait_for_prompt().await.unwrap();
        assert_eq!(prompt.purpose, SecretPurpose::Unlock);
        h.secrets.submit("123456").unwrap();

        assert_eq!(task.await.unwrap(), CommandOutcome::Completed);
        assert_eq!(h.state.status(), WalletStatus::Unlocked);
        assert_eq!(
            last(&h.notifications),
            ("Wallet unlocked".to_string(), Severity::Success)
        );
        assert!(!h.secrets.is_active());
        assert!(h.secrets.prompt().is_none());
        assert_eq!(h.driver.pins_seen(), 1);

        assert!(h.state.accounts().is_empty());
        assert_eq!(h.orchestrator.refresh().await, CommandOutcome::Completed);
        assert_eq!(h.state.accounts().len(), 1);
    }

    #[tokio::test]
    async fn unlock_with_wrong_pin_stays_locked() {
        let h = connected_harness(WalletStatus::Locked).await;
        h.driver.set_unlock(Ok(false));

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.toggle_lock().await });
        h.secrets.wait_for_prompt().await.unwrap();
        h.secrets.submit("654321").unwrap();

        assert_eq!(task.await.unwrap(), CommandOutcome::Failed);
        assert_eq!(h.state.status(), WalletStatus::Locked);
        assert_eq!(
            last(&h.notifications),
            ("Incorrect PIN".to_string(), Severity::Error)
        );
        assert!(!h.secrets.is_active());
    }

    #[tokio::test]
    async fn cancelled_pin_entry_makes_no_driver_call() {
        let h = connected_harness(WalletStatus::Locked).await;

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.toggle_lock().await });
        h.secrets.wait_for_prompt().await.unwrap();
        assert!(h.secrets.cancel());

        assert_eq!(task.await.unwrap(), CommandOutcome::Cancelled);
        assert!(h.driver.calls().is_empty());
        assert_eq!(h.state.status(), WalletStatus::Locked);
    }

    #[tokio::test]
    async fn lock_is_optimistic() {
        let h = connected_harness(WalletStatus::Unlocked).await;
        h.driver
            .set_lock(Err(EngineError::DriverCallFailed("no response".into())));

        assert_eq!(h.orchestrator.toggle_lock().await, CommandOutcome::Failed);
        assert_eq!(h.state.status(), WalletStatus::Locked);
        assert!(h.state.accounts().is_empty());
        assert_eq!(last(&h.notifications).1, Severity::Error);
    }

    #[tokio::test]
    async fn lock_succeeds() {
        let h = connected_harness(WalletStatus::Unlocked).await;

        assert_eq!(h.orchestrator.toggle_lock().await, CommandOutcome::Completed);
        assert_eq!(h.state.status(), WalletStatus::Locked);
        assert_eq!(h.driver.calls(), vec![DriverCall::Lock]);
        assert_eq!(
            last(&h.notifications),
            ("Wallet locked".to_string(), Severity::Info)
        );
    }

    #[tokio::test]
    async fn lock_skips_device_lost_while_waiting() {
        let h = connected_harness(WalletStatus::Unlocked).await;
        let before = h.notifications.len();

        let gate = h.reconciler.exclusive().await;
        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.toggle_lock().await });
        // let the command reach the gate
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        h.state.set_connected(false);
        drop(gate);

        assert_eq!(task.await.unwrap(), CommandOutcome::Cancelled);
        assert_eq!(h.state.status(), WalletStatus::Disconnected);
        assert!(h.driver.calls().is_empty());
        assert_eq!(h.notifications.len(), before);
    }

    #[tokio::test]
    async fn toggle_without_wallet_is_refused() {
        let h = connected_harness(WalletStatus::Uninitialized).await;

        assert_eq!(h.orchestrator.toggle_lock().await, CommandOutcome::Refused);
        assert!(h.driver.calls().is_empty());
        assert_eq!(
            last(&h.notifications),
            ("Create a wallet first".to_string(), Severity::Warning)
        );
    }

    #[tokio::test]
    async fn toggle_while_disconnected_connects() {
        let h = harness(ScriptedDriver::connected(WalletStatus::Locked));

        assert_eq!(h.orchestrator.toggle_lock().await, CommandOutcome::Completed);
        assert!(h.state.is_connected());
        assert!(!h.secrets.is_active());
    }

    #[tokio::test]
    async fn create_wallet_requires_connection() {
        let h = harness(ScriptedDriver::unplugged());

        assert_eq!(h.orchestrator.create_wallet().await, CommandOutcome::Refused);
        assert!(h.driver.calls().is_empty());
        assert!(!h.secrets.is_active());
        assert_eq!(
            last(&h.notifications),
            ("Connect the device first".to_string(), Severity::Warning)
        );
        assert_eq!(h.state.snapshot(), Default::default());
    }

    #[tokio::test]
    async fn create_wallet_unlocks() {
        let h = connected_harness(WalletStatus::Uninitialized).await;

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.create_wallet().await });
        let prompt = h.secrets.wait_for_prompt().await.unwrap();
        assert_eq!(prompt.purpose, SecretPurpose::CreateWallet);
        h.secrets.submit("246810").unwrap();

        assert_eq!(task.await.unwrap(), CommandOutcome::Completed);
        assert_eq!(h.state.status(), WalletStatus::Unlocked);
        assert_eq!(h.driver.calls(), vec![DriverCall::CreateWallet]);
        assert_eq!(
            last(&h.notifications),
            ("Wallet created".to_string(), Severity::Success)
        );
    }

    #[tokio::test]
    async fn create_wallet_failure_is_reported() {
        let h = connected_harness(WalletStatus::Uninitialized).await;
        h.driver.set_create(Ok(false));

        let orchestrator = h.orchestrator.clone();
        let task = tokio::spawn(async move { orchestrator.create_wallet().await });
        h.secrets.wait_for_prompt().await.unwrap();
        h.secrets.submit("246810").unwrap();

        assert_eq!(task.await.unwrap(), CommandOutcome::Failed);
        assert_eq!(h.state.status(), WalletStatus::Uninitialized);
        assert_eq!(last(&h.notifications).1, Severity::Error);
    }

    #[tokio::test]
    async fn pending_operations_report_busy() {
        let h = connected_harness(WalletStatus::Locked).await;

        let orchestrator = h.orchestrator.clone();
        let unlock = tokio::spawn(async move { orchestrator.toggle_lock().await });
        let prompt = h.secrets.wait_for_prompt().await.unwrap();
        let before = h.notifications.len();

        assert_eq!(h.orchestrator.toggle_lock().await, CommandOutcome::Busy);
        assert_eq!(h.orchestrator.create_wallet().await, CommandOutcome::Busy);
        assert_eq!(h.notifications.len(), before);
        assert_eq!(h.secrets.prompt(), Some(prompt));

        h.secrets.submit("123456").unwrap();
        assert_eq!(unlock.await.unwrap(), CommandOutcome::Completed);
        assert_eq!(h.driver.calls(), vec![DriverCall::Unlock]);
    }
}
