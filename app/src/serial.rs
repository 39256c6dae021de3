//! [`DeviceDriver`] over the LibreCrypt framing on a serial (USB CDC) link.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::{ClearBuffer, SerialPort};
use zeroize::Zeroizing;

use crate::config_store::DeviceConfig;
use crate::driver::DeviceDriver;
use crate::errors::{EngineError, EngineResult};
use crate::protocol::{self, Command, Response, ResponseStatus, HEADER_SIZE};
use crate::secret_entry::Pin;
use crate::state::{FirmwareInfo, WalletStatus};

/// A byte link that carries one request frame and one response frame at a time.
pub trait DeviceLink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> EngineResult<()>;

    fn read_frame(&mut self) -> EngineResult<Vec<u8>>;
}

/// Finds and opens links to the device.
pub trait LinkProvider: Send + Sync + 'static {
    fn discover(&self) -> Option<String>;

    fn open(&self, port: &str) -> EngineResult<Box<dyn DeviceLink>>;
}

fn link_error(err: std::io::Error) -> EngineError {
    EngineError::DriverCallFailed(format!("link I/O failed: {}", err))
}

pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl DeviceLink for SerialLink {
    fn write_frame(&mut self, frame: &[u8]) -> EngineResult<()> {
        // Stale bytes from an earlier timed-out exchange would desynchronize framing.
        if let Err(err) = self.port.clear(ClearBuffer::Input) {
            log::debug!("Could not clear serial input buffer: {}", err);
        }
        self.port.write_all(frame).map_err(link_error)?;
        self.port.flush().map_err(link_error)
    }

    fn read_frame(&mut self) -> EngineResult<Vec<u8>> {
        let mut header = [0u8; HEADER_SIZE];
        self.port.read_exact(&mut header).map_err(link_error)?;
        let remaining = protocol::remaining_after_header(header)?;

        let mut frame = vec![0u8; HEADER_SIZE + remaining];
        frame[..HEADER_SIZE].copy_from_slice(&header);
        self.port
            .read_exact(&mut frame[HEADER_SIZE..])
            .map_err(link_error)?;
        Ok(frame)
    }
}

/// Opens serial ports whose name matches one of the configured keywords.
#[derive(Debug, Clone)]
pub struct SerialLinkProvider {
    explicit_port: Option<String>,
    keywords: Vec<String>,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialLinkProvider {
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            explicit_port: config.port.clone(),
            keywords: config.port_keywords.clone(),
            baud_rate: config.baud_rate,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl LinkProvider for SerialLinkProvider {
    fn discover(&self) -> Option<String> {
        if let Some(port) = &self.explicit_port {
            return Some(port.clone());
        }

        let ports = match serialport::available_ports() {
            Ok(ports) => ports,
            Err(err) => {
                log::debug!("Serial port enumeration failed: {}", err);
                return None;
            }
        };
        ports
            .into_iter()
            .map(|info| info.port_name)
            .find(|name| self.keywords.iter().any(|keyword| name.contains(keyword)))
    }

    fn open(&self, port: &str) -> EngineResult<Box<dyn DeviceLink>> {
        let port = serialport::new(port, self.baud_rate)
            .timeout(self.timeout)
            .open()?;
        Ok(Box::new(SerialLink { port }))
    }
}

struct OpenLink {
    port: String,
    link: Box<dyn DeviceLink>,
}

/// Drives the device command set over whatever links `P` provides.
/// The open link is cached and dropped after any failed exchange.
pub struct FramedDriver<P: LinkProvider> {
    provider: Arc<P>,
    link: Arc<Mutex<Option<OpenLink>>>,
}

impl FramedDriver<SerialLinkProvider> {
    pub fn serial(config: &DeviceConfig) -> Self {
        Self::new(SerialLinkProvider::from_config(config))
    }
}

impl<P: LinkProvider> FramedDriver<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
            link: Arc::new(Mutex::new(None)),
        }
    }

    /// Name of the currently open port, if any.
    pub fn port_name(&self) -> Option<String> {
        self.link.lock().as_ref().map(|open| open.port.clone())
    }

    async fn exchange(&self, command: Command, payload: Zeroizing<Vec<u8>>) -> EngineResult<Response> {
        let provider = Arc::clone(&self.provider);
        let link = Arc::clone(&self.link);
        tokio::task::spawn_blocking(move || exchange_blocking(&*provider, &link, command, &payload))
            .await
            .map_err(|err| EngineError::DriverCallFailed(format!("device task failed: {}", err)))?
    }

    async fn exchange_ok(&self, command: Command, payload: &[u8]) -> EngineResult<Vec<u8>> {
        self.exchange(command, Zeroizing::new(payload.to_vec()))
            .await?
            .into_ok_payload()
    }

    /// PIN-bearing commands: a rejected PIN is `Ok(false)`, not an error.
    async fn exchange_with_pin(&self, command: Command, pin: &Pin) -> EngineResult<bool> {
        let payload = Zeroizing::new(pin.expose().as_bytes().to_vec());
        let response = self.exchange(command, payload).await?;
        match response.status {
            ResponseStatus::Ok => Ok(true),
            ResponseStatus::InvalidPin | ResponseStatus::Error => Ok(false),
            status => Err(EngineError::DriverCallFailed(format!(
                "device returned status {:?}",
                status
            ))),
        }
    }
}

fn exchange_blocking<P: LinkProvider>(
    provider: &P,
    slot: &Mutex<Option<OpenLink>>,
    command: Command,
    payload: &[u8],
) -> EngineResult<Response> {
    let mut slot = slot.lock();
    if slot.is_none() {
        let port = provider.discover().ok_or(EngineError::DriverUnavailable)?;
        let link = provider.open(&port)?;
        log::info!("Opened device link on {}", port);
        *slot = Some(OpenLink { port, link });
    }
    let Some(open) = slot.as_mut() else {
        return Err(EngineError::DriverUnavailable);
    };

    let frame = Zeroizing::new(protocol::encode_request(command, payload)?);
    log::trace!("-> {:?} ({} payload bytes)", command, payload.len());
    let result = open
        .link
        .write_frame(&frame)
        .and_then(|_| open.link.read_frame())
        .and_then(|raw| protocol::decode_response(&raw));

    match result {
        Ok(response) => {
            log::trace!("<- {:?} for {:?}", response.status, command);
            Ok(response)
        }
        Err(err) => {
            log::debug!("Dropping link on {} after failed {:?}: {}", open.port, command, err);
            *slot = None;
            Err(err)
        }
    }
}

fn ping_blocking<P: LinkProvider>(provider: &P, slot: &Mutex<Option<OpenLink>>) -> EngineResult<bool> {
    match exchange_blocking(provider, slot, Command::Ping, &[]) {
        Ok(response) => Ok(response.status == ResponseStatus::Ok),
        Err(err) if err.is_unavailable() => Ok(false),
        Err(first) => {
            // A cached link may have gone stale across a replug; retry once on a fresh one.
            log::debug!("Ping failed ({}), reopening link", first);
            match exchange_blocking(provider, slot, Command::Ping, &[]) {
                Ok(response) => Ok(response.status == ResponseStatus::Ok),
                Err(err) => {
                    log::debug!("Device not responding: {}", err);
                    Ok(false)
                }
            }
        }
    }
}

#[async_trait]
impl<P: LinkProvider> DeviceDriver for FramedDriver<P> {
    async fn check_connection(&self) -> EngineResult<bool> {
        let provider = Arc::clone(&self.provider);
        let link = Arc::clone(&self.link);
        tokio::task::spawn_blocking(move || ping_blocking(&*provider, &link))
            .await
            .map_err(|err| EngineError::DriverCallFailed(format!("device task failed: {}", err)))?
    }

    async fn get_wallet_status(&self) -> EngineResult<WalletStatus> {
        let payload = self.exchange_ok(Command::GetStatus, &[]).await?;
        protocol::decode_wallet_status(&payload)
    }

    async fn get_firmware_version(&self) -> EngineResult<Option<FirmwareInfo>> {
        let payload = self.exchange_ok(Command::GetVersion, &[]).await?;
        protocol::decode_version(&payload).map(Some)
    }

    async fn unlock(&self, pin: &Pin) -> EngineResult<bool> {
        self.exchange_with_pin(Command::Unlock, pin).await
    }

    async fn lock(&self) -> EngineResult<()> {
        self.exchange_ok(Command::Lock, &[]).await.map(|_| ())
    }

    async fn create_wallet(&self, pin: &Pin) -> EngineResult<bool> {
        self.exchange_with_pin(Command::CreateWallet, pin).await
    }

    async fn get_address(&self, account_index: u32) -> EngineResult<Option<String>> {
        let request = protocol::encode_address_request(account_index);
        let response = self.exchange(Command::GetAddress, Zeroizing::new(request.to_vec())).await?;
        match response.status {
            ResponseStatus::Ok => protocol::decode_address(&response.payload),
            ResponseStatus::Error => Ok(None),
            status => Err(EngineError::DriverCallFailed(format!(
                "device returned status {:?}",
                status
            ))),
        }
    }
}
