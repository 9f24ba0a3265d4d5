//! Node addressing: project, role group mask and device id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Group bit for the match coordinator.
pub const GROUP_COORDINATOR: u8 = 0x01;
/// Group bit for player-worn infrared transmitters (guns).
pub const GROUP_TRANSMITTER: u8 = 0x02;
/// Group bit for player-worn infrared receivers (vests).
pub const GROUP_RECEIVER: u8 = 0x04;
/// Every group.
pub const GROUP_ALL: u8 = 0xFF;

/// Device id addressing every device in the matched groups.
pub const BROADCAST_DEVICE: u8 = 0xFF;

/// Wire size of an encoded address.
pub const ADDRESS_SIZE: usize = 3;

/// Address of one node, or of a set of nodes when `group_mask` has several bits
/// set or `device_id` is `BROADCAST_DEVICE`. Equal iff all three fields match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub project_id: u8,
    pub group_mask: u8,
    pub device_id: u8,
}

impl Address {
    pub const fn new(project_id: u8, group_mask: u8, device_id: u8) -> Self {
        Self {
            project_id,
            group_mask,
            device_id,
        }
    }

    /// Every device in every group of `project_id`.
    pub const fn broadcast(project_id: u8) -> Self {
        Self::new(project_id, GROUP_ALL, BROADCAST_DEVICE)
    }

    /// Any coordinator of `project_id`.
    pub const fn coordinator(project_id: u8) -> Self {
        Self::new(project_id, GROUP_COORDINATOR, BROADCAST_DEVICE)
    }

    pub fn is_coordinator(&self) -> bool {
        self.group_mask & GROUP_COORDINATOR != 0
    }

    /// Whether a frame sent to `destination` is meant for the node at `self`.
    pub fn accepts(&self, destination: &Address) -> bool {
        destination.project_id == self.project_id
            && destination.group_mask & self.group_mask != 0
            && (destination.device_id == self.device_id
                || destination.device_id == BROADCAST_DEVICE)
    }

    pub fn to_bytes(self) -> [u8; ADDRESS_SIZE] {
        [self.project_id, self.group_mask, self.device_id]
    }

    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}",
            self.project_id, self.group_mask, self.device_id
        )
    }
}

/// Link-layer address of the broadcast medium (MAC-sized). Only used as a
/// sender hint and as the all-ones broadcast target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LinkAddress(pub [u8; 6]);

impl LinkAddress {
    pub const BROADCAST: LinkAddress = LinkAddress([0xFF; 6]);
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}
