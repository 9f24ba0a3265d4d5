//! Transport adapter over the broadcast radio.
//!
//! Outbound frames wait in an unbounded FIFO drained one per tick. Inbound
//! frames arrive through `RxProducer`, which the radio's receive context calls;
//! it filters by destination, copies into a fixed-size slot and pushes into a
//! bounded SPSC channel that drops the newest frame when full. The tick loop is
//! the only consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::address::{Address, LinkAddress};
use crate::protocol::MTU;
use crate::radio::{Radio, RadioError};
use crate::wire::peek_destination;

/// Default inbound buffer capacity in frames.
pub const DEFAULT_INBOUND_CAPACITY: usize = 64;

/// One received frame, copied out of the driver's buffer without allocating.
#[derive(Clone, Copy)]
pub struct RawFrame {
    len: u8,
    bytes: [u8; MTU],
}

impl RawFrame {
    /// `None` if `bytes` exceeds the MTU.
    pub fn copy_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MTU {
            return None;
        }
        let mut frame = RawFrame {
            len: bytes.len() as u8,
            bytes: [0u8; MTU],
        };
        frame.bytes[..bytes.len()].copy_from_slice(bytes);
        Some(frame)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Buffered frame with the link address it arrived from.
#[derive(Clone, Copy)]
pub struct InboundFrame {
    pub link: LinkAddress,
    pub frame: RawFrame,
}

/// Counters written by the receive context, read by the tick loop.
#[derive(Debug, Default)]
struct RxCounters {
    accepted: AtomicU64,
    dropped_full: AtomicU64,
}

/// Producer half of the inbound buffer. Cheap to clone; safe to call from the
/// radio receive callback (no allocation, no blocking).
#[derive(Clone)]
pub struct RxProducer {
    tx: Sender<InboundFrame>,
    local: Address,
    counters: Arc<RxCounters>,
}

impl RxProducer {
    /// Offer a received frame. Returns true if it was buffered. Frames not
    /// addressed to this node are discarded without being counted.
    pub fn on_receive(&self, link: LinkAddress, bytes: &[u8]) -> bool {
        let Some(destination) = peek_destination(bytes) else {
            return false;
        };
        if !self.local.accepts(&destination) {
            return false;
        }
        let Some(frame) = RawFrame::copy_from(bytes) else {
            return false;
        };
        match self.tx.try_send(InboundFrame { link, frame }) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped_full.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

/// Transport statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames handed to the radio.
    pub sent: u64,
    /// Frames the radio failed to transmit.
    pub send_failures: u64,
    /// Frames accepted into the inbound buffer.
    pub received: u64,
    /// Frames dropped because the inbound buffer was full.
    pub dropped_full: u64,
}

pub struct Transport<R> {
    radio: R,
    outbound: VecDeque<Vec<u8>>,
    rx: Receiver<InboundFrame>,
    producer: RxProducer,
    sent: u64,
    send_failures: u64,
}

impl<R: Radio> Transport<R> {
    /// Transport for the node at `local` with an inbound buffer of `capacity` frames.
    pub fn new(radio: R, local: Address, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            radio,
            outbound: VecDeque::new(),
            rx,
            producer: RxProducer {
                tx,
                local,
                counters: Arc::new(RxCounters::default()),
            },
            sent: 0,
            send_failures: 0,
        }
    }

    /// Handle for the receive context.
    pub fn producer(&self) -> RxProducer {
        self.producer.clone()
    }

    /// Queue a frame for broadcast. Fails immediately, queuing nothing, if it exceeds the MTU.
    pub fn try_send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        if frame.len() > MTU {
            return Err(TransportError::TooLarge(frame.len()));
        }
        self.outbound.push_back(frame);
        Ok(())
    }

    /// Transmit the oldest queued frame. Ok(false) when the queue is empty.
    /// A frame the radio rejects is not retried.
    pub fn flush_one(&mut self) -> Result<bool, TransportError> {
        let Some(frame) = self.outbound.pop_front() else {
            return Ok(false);
        };
        match self.radio.send(LinkAddress::BROADCAST, &frame) {
            Ok(()) => {
                self.sent += 1;
                Ok(true)
            }
            Err(e) => {
                self.send_failures += 1;
                Err(TransportError::SendFailed(e))
            }
        }
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Frames waiting in the inbound buffer.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Oldest buffered inbound frame.
    pub fn dequeue(&mut self) -> Option<InboundFrame> {
        self.rx.try_recv().ok()
    }

    /// Oldest buffered inbound frame as (sender hint, bytes).
    pub fn poll_received(&mut self) -> Option<(LinkAddress, Vec<u8>)> {
        self.dequeue()
            .map(|f| (f.link, f.frame.as_bytes().to_vec()))
    }

    pub fn stats(&self) -> TransportStats {
        let counters = &self.producer.counters;
        TransportStats {
            sent: self.sent,
            send_failures: self.send_failures,
            received: counters.accepted.load(Ordering::Relaxed),
            dropped_full: counters.dropped_full.load(Ordering::Relaxed),
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("frame of {0} bytes exceeds MTU")]
    TooLarge(usize),
    #[error("send failed: {0}")]
    SendFailed(#[from] RadioError),
}
