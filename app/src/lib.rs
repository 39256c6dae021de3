// lib.rs - Device/wallet state synchronization engine for the LibreCrypt companion

pub mod api;
pub mod app_state;
pub mod config_store;
pub mod driver;
pub mod errors;
pub mod notifications;
pub mod orchestrator;
pub mod protocol;
pub mod reconcile;
pub mod secret_entry;
pub mod serial;
pub mod state;
pub mod validation;

#[cfg(test)]
mod test_support;

// Re-export common types
pub use api::types::{AccountView, DeviceView, EngineView};
pub use app_state::{CompanionContext, DriverKind, SharedCompanionContext};
pub use config_store::{ConfigStore, DeviceConfig, EngineConfig, NotificationConfig, PollingConfig};
pub use driver::{DeviceDriver, DisconnectedDriver, SharedDriver};
pub use errors::{EngineError, EngineResult};
pub use notifications::{NotificationEvent, NotificationQueue, Severity};
pub use orchestrator::{CommandOrchestrator, CommandOutcome};
pub use reconcile::{ReconciliationLoop, Reconciler, RunOutcome};
pub use secret_entry::{Pin, SecretEntryCoordinator, SecretPrompt, SecretPurpose};
pub use serial::{DeviceLink, FramedDriver, LinkProvider, SerialLinkProvider};
pub use state::{AccountSummary, Balance, DeviceSnapshot, FirmwareInfo, StateMachine, WalletStatus};
pub use validation::InputValidator;
