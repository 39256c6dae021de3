//! In-memory device that speaks the LibreCrypt framing.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use librecrypt_companion_lib::protocol::{self, Command, ResponseStatus};
use librecrypt_companion_lib::{DeviceLink, EngineError, EngineResult, LinkProvider};

pub const PORT_NAME: &str = "/dev/ttyACM0";

#[derive(Debug, Default)]
struct Firmware {
    plugged: bool,
    pin: Option<String>,
    unlocked: bool,
    address: String,
    commands: Vec<Command>,
    opened: usize,
}

impl Firmware {
    fn handle(&mut self, command: Command, payload: &[u8]) -> (ResponseStatus, Vec<u8>) {
        self.commands.push(command);
        match command {
            Command::Ping => (ResponseStatus::Ok, b"PONG".to_vec()),
            Command::GetVersion => {
                let mut payload = vec![1, 4, 2];
                payload.extend_from_slice(b"librecipher-2\0");
                (ResponseStatus::Ok, payload)
            }
            Command::GetStatus => {
                let status = match (&self.pin, self.unlocked) {
                    (None, _) => 0,
                    (Some(_), false) => 1,
                    (Some(_), true) => 2,
                };
                (ResponseStatus::Ok, vec![status])
            }
            Command::CreateWallet => {
                if self.pin.is_some() || payload.len() != 6 {
                    return (ResponseStatus::Error, Vec::new());
                }
                self.pin = Some(String::from_utf8_lossy(payload).into_owned());
                self.unlocked = true;
                (ResponseStatus::Ok, Vec::new())
            }
            Command::Unlock => match &self.pin {
                Some(pin) if pin.as_bytes() == payload => {
                    self.unlocked = true;
                    (ResponseStatus::Ok, Vec::new())
                }
                Some(_) => (ResponseStatus::InvalidPin, Vec::new()),
                None => (ResponseStatus::Error, Vec::new()),
            },
            Command::Lock => {
                self.unlocked = false;
                (ResponseStatus::Ok, Vec::new())
            }
            Command::GetAddress => {
                if !self.unlocked || payload != [0, 0, 0, 0] {
                    return (ResponseStatus::Error, Vec::new());
                }
                (ResponseStatus::Ok, self.address.as_bytes().to_vec())
            }
        }
    }
}

/// Handle used by tests to plug, unplug and inspect the fake device.
#[derive(Clone)]
pub struct FakeDevice {
    firmware: Arc<Mutex<Firmware>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            firmware: Arc::new(Mutex::new(Firmware {
                plugged: true,
                address: "lc1qintegrationaccount".to_string(),
                ..Firmware::default()
            })),
        }
    }

    pub fn with_wallet(pin: &str) -> Self {
        let device = Self::new();
        device.firmware.lock().pin = Some(pin.to_string());
        device
    }

    pub fn set_plugged(&self, plugged: bool) {
        self.firmware.lock().plugged = plugged;
    }

    pub fn is_unlocked(&self) -> bool {
        self.firmware.lock().unlocked
    }

    pub fn commands(&self) -> Vec<Command> {
        self.firmware.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.firmware.lock().commands.clear();
    }

    pub fn times_opened(&self) -> usize {
        self.firmware.lock().opened
    }

    pub fn provider(&self) -> FakeProvider {
        FakeProvider {
            device: self.clone(),
        }
    }
}

pub struct FakeProvider {
    device: FakeDevice,
}

impl LinkProvider for FakeProvider {
    fn discover(&self) -> Option<String> {
        self.device
            .firmware
            .lock()
            .plugged
            .then(|| PORT_NAME.to_string())
    }

    fn open(&self, port: &str) -> EngineResult<Box<dyn DeviceLink>> {
        let mut firmware = self.device.firmware.lock();
        if !firmware.plugged || port != PORT_NAME {
            return Err(EngineError::DriverUnavailable);
        }
        firmware.opened += 1;
        Ok(Box::new(FakeLink {
            device: self.device.clone(),
            pending: None,
        }))
    }
}

struct FakeLink {
    device: FakeDevice,
    pending: Option<Vec<u8>>,
}

impl DeviceLink for FakeLink {
    fn write_frame(&mut self, frame: &[u8]) -> EngineResult<()> {
        let mut firmware = self.device.firmware.lock();
        if !firmware.plugged {
            return Err(EngineError::DriverCallFailed("broken pipe".to_string()));
        }
        let (command, payload) = protocol::decode_request(frame)?;
        let (status, response) = firmware.handle(command, &payload);
        self.pending = Some(protocol::encode_response(status, &response)?);
        Ok(())
    }

    fn read_frame(&mut self) -> EngineResult<Vec<u8>> {
        self.pending
            .take()
            .ok_or_else(|| EngineError::DriverCallFailed("read timed out".to_string()))
    }
}
