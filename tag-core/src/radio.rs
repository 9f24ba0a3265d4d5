//! Seam to the physical broadcast radio. The host supplies the driver.

use crate::address::LinkAddress;

/// Connectionless broadcast medium. `send` hands one frame to the driver and
/// must not block; delivery is not guaranteed.
pub trait Radio {
    fn send(&mut self, link: LinkAddress, frame: &[u8]) -> Result<(), RadioError>;
}

/// Driver refused or failed to transmit a frame.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio busy")]
    Busy,
    #[error("radio i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory radio: records every transmitted frame. Used to wire several
/// nodes together in simulations and tests.
#[derive(Debug, Default)]
pub struct MemoryRadio {
    pub link: LinkAddress,
    sent: Vec<(LinkAddress, Vec<u8>)>,
    /// When set, every send fails with `Busy`.
    pub jammed: bool,
}

impl MemoryRadio {
    pub fn new(link: LinkAddress) -> Self {
        Self {
            link,
            sent: Vec::new(),
            jammed: false,
        }
    }

    /// Frames transmitted since the last call, oldest first.
    pub fn take_sent(&mut self) -> Vec<(LinkAddress, Vec<u8>)> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent(&self) -> &[(LinkAddress, Vec<u8>)] {
        &self.sent
    }
}

impl Radio for MemoryRadio {
    fn send(&mut self, link: LinkAddress, frame: &[u8]) -> Result<(), RadioError> {
        if self.jammed {
            return Err(RadioError::Busy);
        }
        self.sent.push((link, frame.to_vec()));
        Ok(())
    }
}
