use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::api::types::{DeviceView, EngineView};
use crate::config_store::{ConfigStore, EngineConfig};
use crate::driver::{DisconnectedDriver, SharedDriver};
use crate::errors::EngineResult;
use crate::notifications::NotificationQueue;
use crate::orchestrator::{CommandOrchestrator, CommandOutcome};
use crate::reconcile::{ReconciliationLoop, Reconciler};
use crate::secret_entry::SecretEntryCoordinator;
use crate::serial::FramedDriver;
use crate::state::StateMachine;

const ENV_ENVIRONMENT: &str = "LIBRECRYPT_ENV";
const ENV_DRIVER: &str = "LIBRECRYPT_DRIVER";

/// Which device driver the context talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Serial,
    /// Never connects; lets the engine run without hardware.
    Disabled,
}

impl DriverKind {
    pub fn from_env() -> Self {
        match std::env::var(ENV_DRIVER) {
            Ok(value) if value.trim().eq_ignore_ascii_case("none") => DriverKind::Disabled,
            _ => DriverKind::Serial,
        }
    }

    pub fn build(self, config: &EngineConfig) -> SharedDriver {
        match self {
            DriverKind::Serial => Arc::new(FramedDriver::serial(&config.device)),
            DriverKind::Disabled => Arc::new(DisconnectedDriver),
        }
    }
}

/// Owns every engine component and wires them together.
pub struct CompanionContext {
    root_dir: PathBuf,
    config_store: ConfigStore,
    config: EngineConfig,
    environment: String,
    state: Arc<StateMachine>,
    notifications: NotificationQueue,
    secrets: Arc<SecretEntryCoordinator>,
    polling: ReconciliationLoop,
    orchestrator: Arc<CommandOrchestrator>,
}

impl CompanionContext {
    /// Load (or create) the configuration under `root_dir` and build the engine
    /// with the driver selected by `LIBRECRYPT_DRIVER`.
    pub fn initialize(root_dir: PathBuf) -> EngineResult<Self> {
        let environment =
            std::env::var(ENV_ENVIRONMENT).unwrap_or_else(|_| "development".to_string());
        let config_store = ConfigStore::in_dir(&root_dir);
        let mut config = config_store.load_or_default(environment.clone())?;
        config.apply_env_overrides()?;

        let driver = DriverKind::from_env().build(&config);
        Ok(Self::assemble(
            root_dir,
            config_store,
            config,
            environment,
            driver,
        ))
    }

    /// Build the engine around an explicit driver, reading configuration from `root_dir`.
    pub fn with_driver(root_dir: PathBuf, driver: SharedDriver) -> EngineResult<Self> {
        let environment =
            std::env::var(ENV_ENVIRONMENT).unwrap_or_else(|_| "development".to_string());
        let config_store = ConfigStore::in_dir(&root_dir);
        let config = config_store.load_or_default(environment.clone())?;
        Ok(Self::assemble(
            root_dir,
            config_store,
            config,
            environment,
            driver,
        ))
    }

    fn assemble(
        root_dir: PathBuf,
        config_store: ConfigStore,
        config: EngineConfig,
        environment: String,
        driver: SharedDriver,
    ) -> Self {
        let state = Arc::new(StateMachine::new());
        let notifications = NotificationQueue::new(config.notification_duration());
        let secrets = Arc::new(SecretEntryCoordinator::new());
        let reconciler = Arc::new(Reconciler::new(
            driver,
            Arc::clone(&state),
            notifications.clone(),
        ));
        let polling = ReconciliationLoop::new(Arc::clone(&reconciler), config.poll_interval());
        let orchestrator = Arc::new(CommandOrchestrator::new(
            reconciler,
            notifications.clone(),
            Arc::clone(&secrets),
        ));

        log::info!(
            "Companion engine ready (environment: {}, polling every {} ms, toasts for {} ms)",
            environment,
            polling.period().as_millis(),
            notifications.display_duration().as_millis()
        );

        Self {
            root_dir,
            config_store,
            config,
            environment,
            state,
            notifications,
            secrets,
            polling,
            orchestrator,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn state(&self) -> &Arc<StateMachine> {
        &self.state
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn secrets(&self) -> &Arc<SecretEntryCoordinator> {
        &self.secrets
    }

    pub fn orchestrator(&self) -> &Arc<CommandOrchestrator> {
        &self.orchestrator
    }

    pub fn start_polling(&self) {
        self.polling.start();
    }

    pub fn stop_polling(&self) {
        self.polling.stop();
    }

    pub fn poll_period(&self) -> Duration {
        self.polling.period()
    }

    pub fn is_polling(&self) -> bool {
        self.polling.is_running()
    }

    pub async fn connect(&self) -> CommandOutcome {
        self.orchestrator.connect().await
    }

    pub async fn toggle_lock(&self) -> CommandOutcome {
        self.orchestrator.toggle_lock().await
    }

    pub async fn create_wallet(&self) -> CommandOutcome {
        self.orchestrator.create_wallet().await
    }

    pub async fn refresh(&self) -> CommandOutcome {
        self.orchestrator.refresh().await
    }

    pub fn submit_pin(&self, raw: impl Into<String>) -> EngineResult<()> {
        self.secrets.submit(raw)
    }

    pub fn cancel_pin(&self) -> bool {
        self.secrets.cancel()
    }

    pub fn dismiss_notification(&self, id: Uuid) -> bool {
        self.notifications.dismiss(id)
    }

    pub fn view(&self) -> EngineView {
        EngineView {
            device: DeviceView::from(self.state.snapshot()),
            notifications: self.notifications.active(),
            secret_prompt: self.secrets.prompt(),
        }
    }

    /// Stop polling, abandon any open PIN prompt and wait for the poller to exit.
    pub async fn shutdown(&self) {
        self.secrets.cancel();
        self.polling.shutdown().await;
        log::info!("Companion engine stopped");
    }
}

/// Handle shared between the host loop and command tasks.
#[derive(Clone)]
pub struct SharedCompanionContext(pub Arc<CompanionContext>);

impl SharedCompanionContext {
    pub fn new(inner: CompanionContext) -> Self {
        Self(Arc::new(inner))
    }
}

impl std::ops::Deref for SharedCompanionContext {
    type Target = CompanionContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
