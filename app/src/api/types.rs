use serde::{Deserialize, Serialize};

use crate::notifications::NotificationEvent;
use crate::secret_entry::SecretPrompt;
use crate::state::{AccountSummary, Balance, DeviceSnapshot, WalletStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub index: u32,
    #[serde(default)]
    pub address: Option<String>,
    pub balance: String,
}

impl From<&AccountSummary> for AccountView {
    fn from(account: &AccountSummary) -> Self {
        Self {
            index: account.index,
            address: account.address.clone(),
            balance: account.balance.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub connected: bool,
    pub status: WalletStatus,
    pub status_label: String,
    #[serde(default)]
    pub firmware: Option<String>,
    pub accounts: Vec<AccountView>,
    pub account_count: usize,
    pub total_balance: String,
}

impl From<&DeviceSnapshot> for DeviceView {
    fn from(snapshot: &DeviceSnapshot) -> Self {
        let total: Balance = snapshot.accounts.iter().map(|account| account.balance).sum();
        Self {
            connected: snapshot.connected,
            status: snapshot.status,
            status_label: snapshot.status.label().to_string(),
            firmware: snapshot.firmware.as_ref().map(ToString::to_string),
            accounts: snapshot.accounts.iter().map(AccountView::from).collect(),
            account_count: snapshot.accounts.len(),
            total_balance: total.to_string(),
        }
    }
}

impl From<DeviceSnapshot> for DeviceView {
    fn from(snapshot: DeviceSnapshot) -> Self {
        DeviceView::from(&snapshot)
    }
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineView {
    pub device: DeviceView,
    pub notifications: Vec<NotificationEvent>,
    #[serde(default)]
    pub secret_prompt: Option<SecretPrompt>,
}
