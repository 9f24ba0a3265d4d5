//! IR tag radio protocol.
//! Host-driven: no I/O; the host feeds received frames in, ticks the node and
//! receives events. The radio driver sits behind the `Radio` trait.

pub mod address;
pub mod protocol;
pub mod wire;

pub use address::{Address, LinkAddress};
pub use protocol::{Command, WeaponConfig, MTU, PROTOCOL_VERSION};
pub use wire::{decode_frame, encode_frame, FrameError, Packet};
pub use crate::core::{Event, Node, NodeConfig};

pub mod core;
pub mod discovery;
pub mod radio;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use radio::{MemoryRadio, Radio, RadioError};
pub use session::{SessionError, SessionState};
pub use transport::{RxProducer, TransportError};
