//! Radio protocol constants, command codes and fixed-size payload records.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire::FrameError;

/// Current protocol version. Frames carrying any other version are discarded.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest frame the radio carries in one transmission.
pub const MTU: usize = 250;

/// `version | source | destination | sequence | command | length`.
pub const HEADER_SIZE: usize = 12;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD: usize = MTU - HEADER_SIZE;

/// Fixed width of a weapon name on the wire (NUL padded).
pub const GUN_NAME_SIZE: usize = 32;

/// Wire size of `WeaponConfig`.
pub const GUN_PARAMS_SIZE: usize = 8;

/// Command codes. Each has a registered payload size (see `Command::accepts_length`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Discovery probe (empty) or probe reply (one byte).
    Scan = 0x0001,
    /// Coordinator -> player devices: `PlayerHp`.
    PlayerHp = 0x0010,
    /// Coordinator -> transmitter: `WeaponConfig`.
    GunParams = 0x0011,
    /// Coordinator -> transmitter: the token its infrared shots carry.
    FireCode = 0x0012,
    /// Session state byte.
    GameStatus = 0x0013,
    /// Highlight the addressed device.
    Mark = 0x0014,
    /// Clear the highlight.
    Demark = 0x0015,
    /// Coordinator -> transmitter: weapon display name.
    GunName = 0x0016,
    /// Receiver -> coordinator: token decoded from an infrared hit.
    Fire = 0x0017,
}

impl Command {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => Command::Scan,
            0x0010 => Command::PlayerHp,
            0x0011 => Command::GunParams,
            0x0012 => Command::FireCode,
            0x0013 => Command::GameStatus,
            0x0014 => Command::Mark,
            0x0015 => Command::Demark,
            0x0016 => Command::GunName,
            0x0017 => Command::Fire,
            _ => return None,
        })
    }

    /// Registered payload sizes. SCAN is the one command with two forms.
    pub fn payload_sizes(self) -> &'static [usize] {
        match self {
            Command::Scan => &[0, 1],
            Command::PlayerHp => &[4],
            Command::GunParams => &[GUN_PARAMS_SIZE],
            Command::FireCode => &[4],
            Command::GameStatus => &[1],
            Command::Mark | Command::Demark => &[0],
            Command::GunName => &[GUN_NAME_SIZE],
            Command::Fire => &[4],
        }
    }

    pub fn accepts_length(self, len: usize) -> bool {
        self.payload_sizes().contains(&len)
    }
}

/// Remaining health of one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerHp {
    pub player_id: u16,
    pub health: u16,
}

/// Per-weapon tuning pushed to a transmitter. Also the shooter's damage source
/// during hit validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaponConfig {
    pub damage: u16,
    pub fire_interval_ms: u16,
    pub magazine: u16,
    pub reload_ms: u16,
}

impl Default for WeaponConfig {
    fn default() -> Self {
        Self {
            damage: 10,
            fire_interval_ms: 250,
            magazine: 30,
            reload_ms: 2000,
        }
    }
}

/// Weapon display name, truncated or NUL padded to `GUN_NAME_SIZE` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GunName(pub [u8; GUN_NAME_SIZE]);

impl GunName {
    pub fn new(name: &str) -> Self {
        let mut buf = [0u8; GUN_NAME_SIZE];
        let bytes = name.as_bytes();
        let n = bytes.len().min(GUN_NAME_SIZE);
        buf[..n].copy_from_slice(&bytes[..n]);
        GunName(buf)
    }

    /// Name up to the first NUL; invalid UTF-8 is replaced.
    pub fn as_string(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(GUN_NAME_SIZE);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

/// Serialize a record as the payload of `command`; the encoded size must match the table.
pub fn encode_payload<T: Serialize>(command: Command, record: &T) -> Result<Vec<u8>, FrameError> {
    let bytes = bincode::serialize(record)?;
    if !command.accepts_length(bytes.len()) {
        return Err(FrameError::LengthMismatch {
            command: command.code(),
            length: bytes.len(),
        });
    }
    Ok(bytes)
}

/// Deserialize a record from the payload of a frame already validated by `decode_frame`.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FrameError> {
    Ok(bincode::deserialize(payload)?)
}
