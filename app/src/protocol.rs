//! LibreCrypt USB wire framing.
//!
//! `[SOF][LEN][CMD or STATUS][DATA...][CRC lo][CRC hi]` where `LEN` counts the
//! command/status byte plus data and the CRC-16/Modbus covers `LEN` through `DATA`.

use crate::errors::{EngineError, EngineResult};
use crate::state::{FirmwareInfo, WalletStatus};

pub const SOF: u8 = 0xAA;
pub const MAX_FRAME_SIZE: usize = 256;
/// SOF and LEN.
pub const HEADER_SIZE: usize = 2;
pub const CRC_SIZE: usize = 2;
const MAX_BODY_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE - CRC_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Ping = 0x01,
    GetVersion = 0x02,
    GetStatus = 0x03,
    CreateWallet = 0x10,
    Unlock = 0x11,
    Lock = 0x12,
    GetAddress = 0x20,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Ping),
            0x02 => Some(Command::GetVersion),
            0x03 => Some(Command::GetStatus),
            0x10 => Some(Command::CreateWallet),
            0x11 => Some(Command::Unlock),
            0x12 => Some(Command::Lock),
            0x20 => Some(Command::GetAddress),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    Ok = 0x00,
    Error = 0x01,
    InvalidCommand = 0x02,
    Locked = 0x03,
    NeedConfirm = 0x04,
    InvalidPin = 0x05,
    InvalidSignature = 0x06,
    SessionExpired = 0x07,
}

impl ResponseStatus {
    /// Unknown codes are reported as a generic device error.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => ResponseStatus::Ok,
            0x02 => ResponseStatus::InvalidCommand,
            0x03 => ResponseStatus::Locked,
            0x04 => ResponseStatus::NeedConfirm,
            0x05 => ResponseStatus::InvalidPin,
            0x06 => ResponseStatus::InvalidSignature,
            0x07 => ResponseStatus::SessionExpired,
            _ => ResponseStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: ResponseStatus,
    pub payload: Vec<u8>,
}

impl Response {
    /// Payload of a successful response, or the device status as an error.
    pub fn into_ok_payload(self) -> EngineResult<Vec<u8>> {
        match self.status {
            ResponseStatus::Ok => Ok(self.payload),
            status => Err(EngineError::DriverCallFailed(format!(
                "device returned status {:?}",
                status
            ))),
        }
    }
}

/// CRC-16/Modbus: init 0xFFFF, reflected polynomial 0xA001.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF_u16, |crc, byte| {
        (0..8).fold(crc ^ u16::from(*byte), |crc, _| {
            if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            }
        })
    })
}

fn encode_frame(code: u8, payload: &[u8]) -> EngineResult<Vec<u8>> {
    if payload.len() + 1 > MAX_BODY_SIZE {
        return Err(EngineError::Protocol(format!(
            "payload of {} bytes exceeds frame capacity",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + 1 + payload.len() + CRC_SIZE);
    frame.push(SOF);
    frame.push((payload.len() + 1) as u8);
    frame.push(code);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

pub fn encode_request(command: Command, payload: &[u8]) -> EngineResult<Vec<u8>> {
    encode_frame(command as u8, payload)
}

/// Device-side encoding, used by link doubles and diagnostics.
pub fn encode_response(status: ResponseStatus, payload: &[u8]) -> EngineResult<Vec<u8>> {
    encode_frame(status as u8, payload)
}

/// Bytes still to read after the two header bytes.
pub fn remaining_after_header(header: [u8; HEADER_SIZE]) -> EngineResult<usize> {
    if header[0] != SOF {
        return Err(EngineError::Protocol(format!(
            "invalid start of frame 0x{:02x}",
            header[0]
        )));
    }
    let body = usize::from(header[1]);
    if body == 0 || body > MAX_BODY_SIZE {
        return Err(EngineError::Protocol(format!("invalid frame length {}", body)));
    }
    Ok(body + CRC_SIZE)
}

/// Validate framing and CRC; returns the command/status byte and the data.
fn decode_frame(frame: &[u8]) -> EngineResult<(u8, Vec<u8>)> {
    if frame.len() < HEADER_SIZE + 1 + CRC_SIZE {
        return Err(EngineError::Protocol("frame too short".to_string()));
    }
    let remaining = remaining_after_header([frame[0], frame[1]])?;
    let expected = HEADER_SIZE + remaining;
    if frame.len() < expected {
        return Err(EngineError::Protocol("incomplete frame".to_string()));
    }

    let crc_offset = expected - CRC_SIZE;
    let received = u16::from_le_bytes([frame[crc_offset], frame[crc_offset + 1]]);
    if received != crc16(&frame[1..crc_offset]) {
        return Err(EngineError::Protocol("CRC mismatch".to_string()));
    }

    Ok((frame[HEADER_SIZE], frame[HEADER_SIZE + 1..crc_offset].to_vec()))
}

pub fn decode_response(frame: &[u8]) -> EngineResult<Response> {
    let (status, payload) = decode_frame(frame)?;
    Ok(Response {
        status: ResponseStatus::from_byte(status),
        payload,
    })
}

/// Device-side decoding of a host request.
pub fn decode_request(frame: &[u8]) -> EngineResult<(Command, Vec<u8>)> {
    let (code, payload) = decode_frame(frame)?;
    let command = Command::from_byte(code)
        .ok_or_else(|| EngineError::Protocol(format!("unknown command 0x{:02x}", code)))?;
    Ok((command, payload))
}

/// `major, minor, patch` followed by an optional UTF-8 crypto library label.
pub fn decode_version(payload: &[u8]) -> EngineResult<FirmwareInfo> {
    let [major, minor, patch, rest @ ..] = payload else {
        return Err(EngineError::Protocol("invalid version data".to_string()));
    };
    let label = String::from_utf8_lossy(rest)
        .trim_end_matches('\0')
        .trim()
        .to_string();

    Ok(FirmwareInfo {
        major: *major,
        minor: *minor,
        patch: *patch,
        crypto_version: (!label.is_empty()).then_some(label),
    })
}

pub fn decode_wallet_status(payload: &[u8]) -> EngineResult<WalletStatus> {
    match payload.first() {
        Some(0) => Ok(WalletStatus::Uninitialized),
        Some(1) => Ok(WalletStatus::Locked),
        Some(2) => Ok(WalletStatus::Unlocked),
        Some(other) => {
            log::debug!("Unknown wallet status byte 0x{:02x}", other);
            Ok(WalletStatus::Disconnected)
        }
        None => Err(EngineError::Protocol("no status data".to_string())),
    }
}

pub fn encode_address_request(account_index: u32) -> [u8; 4] {
    account_index.to_le_bytes()
}

pub fn decode_address(payload: &[u8]) -> EngineResult<Option<String>> {
    let address = std::str::from_utf8(payload)
        .map_err(|_| EngineError::Protocol("invalid address encoding".to_string()))?
        .trim_end_matches('\0')
        .trim();
    Ok((!address.is_empty()).then(|| address.to_string()))
}
