use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};
use crate::validation::InputValidator;

const CONFIG_VERSION: u16 = 1;
pub const CONFIG_FILENAME: &str = "companion.config";

const ENV_POLL_INTERVAL: &str = "LIBRECRYPT_POLL_INTERVAL_MS";
const ENV_NOTIFICATION_MS: &str = "LIBRECRYPT_NOTIFICATION_MS";
const ENV_PORT: &str = "LIBRECRYPT_PORT";
const ENV_BAUD_RATE: &str = "LIBRECRYPT_BAUD_RATE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationConfig {
    pub display_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { display_ms: 3000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Fixed port; when absent the first port matching `port_keywords` is used.
    #[serde(default)]
    pub port: Option<String>,
    pub port_keywords: Vec<String>,
    pub baud_rate: u32,
    pub timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            port_keywords: vec!["COM".to_string(), "ttyACM".to_string()],
            baud_rate: 115_200,
            timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub polling: PollingConfig,
    pub notifications: NotificationConfig,
    pub device: DeviceConfig,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl EngineConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            polling: PollingConfig::default(),
            notifications: NotificationConfig::default(),
            device: DeviceConfig::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn notification_duration(&self) -> Duration {
        Duration::from_millis(self.notifications.display_ms)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.polling.interval_ms < 100 {
            return Err(EngineError::Config(format!(
                "Polling interval of {}ms is too short",
                self.polling.interval_ms
            )));
        }
        if self.notifications.display_ms == 0 {
            return Err(EngineError::Config(
                "Notification display time must be positive".to_string(),
            ));
        }
        if !(1200..=4_000_000).contains(&self.device.baud_rate) {
            return Err(EngineError::Config(format!(
                "Unsupported baud rate {}",
                self.device.baud_rate
            )));
        }
        if self.device.timeout_ms == 0 {
            return Err(EngineError::Config(
                "Device timeout must be positive".to_string(),
            ));
        }
        if self.device.port.is_none() && self.device.port_keywords.is_empty() {
            return Err(EngineError::Config(
                "Either a port or at least one port keyword is required".to_string(),
            ));
        }
        if let Some(port) = &self.device.port {
            InputValidator::shared()?.validate_port_name(port)?;
        }
        Ok(())
    }

    /// Apply `LIBRECRYPT_*` environment overrides, then validate.
    pub fn apply_env_overrides(&mut self) -> EngineResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> EngineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let validator = InputValidator::shared()?;
        let read = |key: &str| -> Option<String> {
            let value = lookup(key)?;
            // Basic hygiene: empty values and control characters are ignored
            if value.trim().is_empty() {
                log::warn!("Environment variable {} is empty", key);
                return None;
            }
            if validator.check_control_characters(&value).is_err() {
                log::warn!(
                    "Environment variable {} contains control characters, ignoring",
                    key
                );
                return None;
            }
            log::debug!("Loaded configuration override from {}", key);
            Some(value.trim().to_string())
        };

        if let Some(value) = read(ENV_POLL_INTERVAL) {
            self.polling.interval_ms = parse_number(&value, ENV_POLL_INTERVAL)?;
        }
        if let Some(value) = read(ENV_NOTIFICATION_MS) {
            self.notifications.display_ms = parse_number(&value, ENV_NOTIFICATION_MS)?;
        }
        if let Some(value) = read(ENV_BAUD_RATE) {
            self.device.baud_rate = parse_number(&value, ENV_BAUD_RATE)?;
        }
        if let Some(value) = read(ENV_PORT) {
            self.device.port = Some(value);
        }

        self.validate()
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> EngineResult<T> {
    value.parse::<T>().map_err(|_| {
        EngineError::Config(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: EngineConfig,
    modified_at_unix: i64,
}

/// Handles persistence of engine configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Store rooted in a data directory, using the default file name.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        Self::new(root.as_ref().join(CONFIG_FILENAME))
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> EngineResult<EngineConfig> {
        if !self.path.exists() {
            let config = EngineConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(EngineError::Config(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(EngineError::Config(
                "Config integrity verification failed".to_string(),
            ));
        }

        envelope.payload.validate()?;
        Ok(envelope.payload)
    }

    pub fn save(&self, config: &EngineConfig) -> EngineResult<()> {
        config.validate()?;
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| EngineError::Storage(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> EngineResult<EngineConfig>
    where
        F: FnOnce(&mut EngineConfig) -> EngineResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &EngineConfig) -> EngineResult<[u8; 32]> {
    let encoded = serde_json::to_vec(config)?;
    let mut hasher = Blake3::new();
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}
