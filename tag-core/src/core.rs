//! Host-driven node: the host feeds radio frames through `RxProducer`, calls
//! `tick` from its main loop, and receives events for presentation.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::discovery::{Discovery, DiscoveryConfig, DiscoveryState, PeerRecord};
use crate::protocol::{Command, WeaponConfig};
use crate::radio::Radio;
use crate::scheduler::Scheduler;
use crate::session::{Session, SessionConfig, SessionError, SessionState};
use crate::transport::{RxProducer, Transport, TransportStats, DEFAULT_INBOUND_CAPACITY};
use crate::wire::{self, Packet};

/// Notification for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A scan reply arrived during the current round.
    PeerSeen(Address),
    PeerJoined(Address),
    PeerLeft(Address),
    ScanComplete,
    SessionPhaseChanged(SessionState),
    /// The coordinator validated a hit.
    HitApplied { player: u8, health: u16 },
    /// A player device learned its new health from the coordinator.
    HealthChanged { player: u8, health: u16 },
    FireCodeAssigned(u32),
    LoadoutChanged(WeaponConfig),
    GunNameChanged(String),
    Marked(bool),
}

/// Timers owned by the protocol layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    ScanWindow,
    PeriodicScan,
    Countdown,
    Run,
    Verdict,
}

impl Timer {
    /// Timers dropped by a session reset.
    pub fn is_session(self) -> bool {
        matches!(self, Timer::Countdown | Timer::Run | Timer::Verdict)
    }
}

/// Per-call view of node state handed to the protocol layers: clock, timers,
/// outgoing packets and emitted events.
pub struct Context<'a> {
    pub now: u32,
    pub local: Address,
    pub timers: &'a mut Scheduler<Timer>,
    outbox: &'a mut Vec<Packet>,
    events: &'a mut Vec<Event>,
    sequence: &'a mut u16,
}

impl<'a> Context<'a> {
    pub fn new(
        now: u32,
        local: Address,
        timers: &'a mut Scheduler<Timer>,
        outbox: &'a mut Vec<Packet>,
        events: &'a mut Vec<Event>,
        sequence: &'a mut u16,
    ) -> Self {
        Self {
            now,
            local,
            timers,
            outbox,
            events,
            sequence,
        }
    }

    /// Queue a packet from this node with the next outgoing sequence number.
    pub fn send(&mut self, destination: Address, command: Command, payload: Vec<u8>) {
        *self.sequence = self.sequence.wrapping_add(1);
        let packet = Packet::new(self.local, destination, *self.sequence, command, payload);
        self.outbox.push(packet);
    }

    /// Queue a packet whose sequence the caller already chose.
    pub fn send_packet(&mut self, packet: Packet) {
        self.outbox.push(packet);
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn schedule(&mut self, delay: u32, timer: Timer) {
        self.timers.add_event(self.now, delay, timer);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub address: Address,
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Seed for scan sequence numbers; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_inbound_capacity() -> usize {
    DEFAULT_INBOUND_CAPACITY
}

impl NodeConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
            seed: None,
        }
    }
}

/// One node: owns every piece of protocol state. Several can coexist.
pub struct Node<R> {
    address: Address,
    scheduler: Scheduler<Timer>,
    transport: Transport<R>,
    discovery: Discovery,
    session: Session,
    outbox: Vec<Packet>,
    events: Vec<Event>,
    sequence: u16,
    last_sequence: HashMap<Address, u16>,
    started: bool,
}

/// Borrow the node's fields as a `Context`, leaving the protocol layers free.
macro_rules! ctx {
    ($node:ident, $now:expr) => {
        Context::new(
            $now,
            $node.address,
            &mut $node.scheduler,
            &mut $node.outbox,
            &mut $node.events,
            &mut $node.sequence,
        )
    };
}

impl<R: Radio> Node<R> {
    pub fn new(config: NodeConfig, radio: R) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let address = config.address;
        Self {
            address,
            scheduler: Scheduler::new(),
            transport: Transport::new(radio, address, config.inbound_capacity),
            discovery: Discovery::new(config.discovery, rng),
            session: Session::new(config.session, address.is_coordinator()),
            outbox: Vec::new(),
            events: Vec::new(),
            sequence: 0,
            last_sequence: HashMap::new(),
            started: false,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Handle for the radio receive context.
    pub fn producer(&self) -> RxProducer {
        self.transport.producer()
    }

    /// One pass of the main loop: timers, transport, discovery, session.
    /// Returns the events emitted since the previous call.
    pub fn tick(&mut self, now: u32) -> Vec<Event> {
        if !self.started {
            self.started = true;
            let mut ctx = ctx!(self, now);
            self.discovery.start(&mut ctx);
        }

        for timer in self.scheduler.tick(now) {
            self.dispatch_timer(timer, now);
        }

        if let Err(e) = self.transport.flush_one() {
            tracing::warn!(error = %e, "outbound frame dropped");
        }
        let mut inbound = Vec::new();
        while let Some(frame) = self.transport.dequeue() {
            match wire::decode_frame(frame.frame.as_bytes()) {
                Ok(packet) => {
                    if self.is_fresh(&packet) {
                        inbound.push((frame.link, packet));
                    }
                }
                Err(e) => tracing::debug!(error = %e, link = %frame.link, "frame discarded"),
            }
        }

        for (link, packet) in inbound.iter().filter(|(_, p)| p.command == Command::Scan) {
            let mut ctx = ctx!(self, now);
            self.discovery.on_scan_packet(packet, *link, &mut ctx);
        }
        for (_, packet) in inbound.iter().filter(|(_, p)| p.command != Command::Scan) {
            let mut ctx = ctx!(self, now);
            self.session.on_packet(packet, &mut ctx);
        }

        self.queue_outbox();
        std::mem::take(&mut self.events)
    }

    fn dispatch_timer(&mut self, timer: Timer, now: u32) {
        let mut ctx = ctx!(self, now);
        match timer {
            Timer::ScanWindow => self.discovery.on_scan_window(&mut ctx),
            Timer::PeriodicScan => self.discovery.on_periodic(&mut ctx),
            Timer::Countdown => self.session.on_countdown(&mut ctx),
            Timer::Run => {
                if let Err(e) = self.session.run(&mut ctx) {
                    tracing::debug!(error = %e, "scheduled run skipped");
                }
            }
            Timer::Verdict => self.session.on_verdict(&mut ctx),
        }
    }

    /// Drop our own echoed frames and back-to-back duplicates from one source.
    fn is_fresh(&mut self, packet: &Packet) -> bool {
        if packet.source == self.address {
            return false;
        }
        if self.last_sequence.insert(packet.source, packet.sequence) == Some(packet.sequence) {
            tracing::trace!(from = %packet.source, sequence = packet.sequence, "duplicate frame");
            return false;
        }
        true
    }

    fn queue_outbox(&mut self) {
        for packet in self.outbox.drain(..) {
            let frame = match wire::encode_frame(&packet) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(command = ?packet.command, error = %e, "packet not encoded");
                    continue;
                }
            };
            if let Err(e) = self.transport.try_send(frame) {
                tracing::warn!(command = ?packet.command, error = %e, "packet not sent");
            }
        }
    }

    /// Start a discovery round now. False if one is already running.
    pub fn scan(&mut self, now: u32) -> bool {
        let mut ctx = ctx!(self, now);
        let started = self.discovery.scan(&mut ctx);
        self.queue_outbox();
        started
    }

    pub fn set_probe_filter<F>(&mut self, filter: F)
    where
        F: Fn(&Address) -> bool + Send + 'static,
    {
        self.discovery.set_probe_filter(filter);
    }

    pub fn reset(&mut self, now: u32) -> Result<(), SessionError> {
        let mut ctx = ctx!(self, now);
        let r = self.session.reset(&mut ctx);
        self.queue_outbox();
        r
    }

    pub fn start(&mut self, now: u32) -> Result<(), SessionError> {
        let mut ctx = ctx!(self, now);
        let r = self.session.start(&mut ctx);
        self.queue_outbox();
        r
    }

    pub fn run(&mut self, now: u32) -> Result<(), SessionError> {
        let mut ctx = ctx!(self, now);
        let r = self.session.run(&mut ctx);
        self.queue_outbox();
        r
    }

    pub fn end(&mut self, now: u32) -> Result<(), SessionError> {
        let mut ctx = ctx!(self, now);
        let r = self.session.end(&mut ctx);
        self.queue_outbox();
        r
    }

    /// Highlight (or clear) another device. Coordinator only.
    pub fn mark(&mut self, now: u32, target: Address, on: bool) -> Result<(), SessionError> {
        let mut ctx = ctx!(self, now);
        let r = self.session.mark(target, on, &mut ctx);
        self.queue_outbox();
        r
    }

    /// Report a token decoded by this node's infrared receiver.
    pub fn report_hit(&mut self, now: u32, code: u32) {
        let mut ctx = ctx!(self, now);
        self.session.report_hit(code, &mut ctx);
        self.queue_outbox();
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    pub fn known_peers(&self) -> &[PeerRecord] {
        self.discovery.known_peers()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    pub fn outbound_len(&self) -> usize {
        self.transport.outbound_len()
    }

    /// Milliseconds until the next timer is due, for hosts that sleep between ticks.
    pub fn next_due(&self, now: u32) -> Option<u32> {
        self.scheduler.next_due(now)
    }

    pub fn radio_mut(&mut self) -> &mut R {
        self.transport.radio_mut()
    }
}

/// Stand-alone state for driving one protocol layer in unit tests.
#[cfg(test)]
pub(crate) struct Harness {
    pub local: Address,
    pub scheduler: Scheduler<Timer>,
    pub outbox: Vec<Packet>,
    pub events: Vec<Event>,
    pub sequence: u16,
}

#[cfg(test)]
impl Harness {
    pub fn new(local: Address) -> Self {
        Self {
            local,
            scheduler: Scheduler::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            sequence: 0,
        }
    }

    pub fn ctx(&mut self, now: u32) -> Context<'_> {
        Context::new(
            now,
            self.local,
            &mut self.scheduler,
            &mut self.outbox,
            &mut self.events,
            &mut self.sequence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{LinkAddress, GROUP_COORDINATOR, GROUP_RECEIVER, GROUP_TRANSMITTER};
    use crate::radio::MemoryRadio;

    const PROJECT: u8 = 0x2A;

    fn node(group: u8, device: u8, seed: u64) -> Node<MemoryRadio> {
        let mut config = NodeConfig::new(Address::new(PROJECT, group, device));
        config.discovery.scan_interval_ms = 0;
        config.discovery.scan_window_ms = 200;
        config.seed = Some(seed);
        Node::new(config, MemoryRadio::new(LinkAddress([device; 6])))
    }

    /// Coordinator plus two players, each with a gun and a vest.
    struct Field {
        nodes: Vec<Node<MemoryRadio>>,
        now: u32,
        events: Vec<Vec<Event>>,
    }

    impl Field {
        fn new() -> Self {
            let nodes = vec![
                node(GROUP_COORDINATOR, 0, 1),
                node(GROUP_TRANSMITTER, 1, 2),
                node(GROUP_RECEIVER, 2, 3),
                node(GROUP_TRANSMITTER, 3, 4),
                node(GROUP_RECEIVER, 4, 5),
            ];
            let events = vec![Vec::new(); nodes.len()];
            Self {
                nodes,
                now: 0,
                events,
            }
        }

        /// Tick every node once and deliver whatever the radios sent.
        fn step(&mut self, dt: u32) {
            self.now += dt;
            for (i, n) in self.nodes.iter_mut().enumerate() {
                let evs = n.tick(self.now);
                self.events[i].extend(evs);
            }
            let mut air = Vec::new();
            for n in &mut self.nodes {
                let link = n.radio_mut().link;
                for (_, frame) in n.radio_mut().take_sent() {
                    air.push((link, frame));
                }
            }
            for (link, frame) in &air {
                for n in &self.nodes {
                    n.producer().on_receive(*link, frame);
                }
            }
        }

        fn settle(&mut self, steps: usize) {
            for _ in 0..steps {
                self.step(10);
            }
        }

        fn coordinator(&mut self) -> &mut Node<MemoryRadio> {
            &mut self.nodes[0]
        }
    }

    #[test]
    fn discovery_finds_all_players() {
        let mut f = Field::new();
        let now = f.now;
        assert!(f.coordinator().scan(now));
        f.settle(30);
        let mut peers: Vec<u8> = f.nodes[0]
            .known_peers()
            .iter()
            .map(|p| p.address.device_id)
            .collect();
        peers.sort();
        assert_eq!(peers, vec![1, 2, 3, 4]);
        let joined = f.events[0]
            .iter()
            .filter(|e| matches!(e, Event::PeerJoined(_)))
            .count();
        assert_eq!(joined, 4);
        assert!(f.events[0].contains(&Event::ScanComplete));

        // Second round, same topology: nothing joins or leaves.
        f.events[0].clear();
        let now = f.now;
        f.coordinator().scan(now);
        f.settle(30);
        assert!(!f.events[0]
            .iter()
            .any(|e| matches!(e, Event::PeerJoined(_) | Event::PeerLeft(_))));
    }

    #[test]
    fn full_match_over_the_air() {
        let mut f = Field::new();
        let now = f.now;
        f.coordinator().reset(now).unwrap();
        f.coordinator().start(now).unwrap();
        f.settle(50);

        // Guns learned their codes.
        let code1 = f.nodes[1].session().loadout().fire_code.unwrap();
        let code2 = f.nodes[3].session().loadout().fire_code.unwrap();
        assert_ne!(code1, code2);

        // Countdown plus the run step: 5 seconds.
        for _ in 0..60 {
            f.step(100);
        }
        for n in &f.nodes {
            assert_eq!(n.session_state(), SessionState::Running);
        }

        // Player 1 shoots player 2 until the match ends.
        for _ in 0..10 {
            let now = f.now;
            f.nodes[4].report_hit(now, code1);
            f.settle(20);
        }
        assert_eq!(f.coordinator().session().winner(), Some(1));
        assert_eq!(f.nodes[4].session().loadout().health, Some(0));

        for _ in 0..40 {
            f.step(100);
        }
        assert_eq!(f.nodes[1].session_state(), SessionState::Won);
        assert_eq!(f.nodes[2].session_state(), SessionState::Won);
        assert_eq!(f.nodes[3].session_state(), SessionState::Lost);
        assert_eq!(f.nodes[4].session_state(), SessionState::Lost);
        assert_eq!(f.coordinator().session_state(), SessionState::Over);
    }

    #[test]
    fn own_and_duplicate_frames_ignored() {
        let mut n = node(GROUP_TRANSMITTER, 1, 9);
        let rx = n.producer();
        let coord = Address::new(PROJECT, GROUP_COORDINATOR, 0);
        let status = Packet::new(coord, Address::broadcast(PROJECT), 77, Command::GameStatus, vec![6]);
        let frame = wire::encode_frame(&status).unwrap();
        rx.on_receive(LinkAddress::default(), &frame);
        rx.on_receive(LinkAddress::default(), &frame);
        let events = n.tick(0);
        assert_eq!(events, vec![Event::SessionPhaseChanged(SessionState::Running)]);

        let own = Packet::new(n.address(), Address::broadcast(PROJECT), 1, Command::Scan, vec![]);
        rx.on_receive(LinkAddress::default(), &wire::encode_frame(&own).unwrap());
        n.tick(1);
        assert_eq!(n.outbound_len(), 0);
    }

    #[test]
    fn malformed_frames_have_no_effect() {
        let mut n = node(GROUP_RECEIVER, 2, 9);
        let rx = n.producer();
        let coord = Address::new(PROJECT, GROUP_COORDINATOR, 0);
        let status = Packet::new(coord, Address::broadcast(PROJECT), 1, Command::GameStatus, vec![6]);
        let mut frame = wire::encode_frame(&status).unwrap();
        frame[0] = 0x7F;
        rx.on_receive(LinkAddress::default(), &frame);
        assert!(n.tick(0).is_empty());
        assert_eq!(n.session_state(), SessionState::Waiting);
    }

    #[test]
    fn player_cannot_drive_session() {
        let mut n = node(GROUP_RECEIVER, 2, 9);
        assert!(matches!(n.start(0), Err(SessionError::NotCoordinator)));
        assert!(matches!(
            n.mark(0, Address::broadcast(PROJECT), true),
            Err(SessionError::NotCoordinator)
        ));
    }

    #[test]
    fn mark_reaches_target() {
        let mut f = Field::new();
        let now = f.now;
        let gun = Address::new(PROJECT, GROUP_TRANSMITTER, 3);
        f.coordinator().mark(now, gun, true).unwrap();
        f.settle(5);
        assert!(f.events[3].contains(&Event::Marked(true)));
        assert!(!f.events[1].contains(&Event::Marked(true)));
        assert!(f.nodes[3].session().loadout().marked);
    }
}
