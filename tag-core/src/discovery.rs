//! Peer discovery: broadcast SCAN probes, collect derived-sequence replies
//! during a scan window, then diff the results against the known-peer set.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::address::{Address, LinkAddress};
use crate::core::{Context, Event, Timer};
use crate::protocol::Command;
use crate::wire::Packet;

/// Discovery timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long replies are collected after a probe (ms).
    pub scan_window_ms: u32,
    /// Period of automatic scans (ms). 0 disables them.
    pub scan_interval_ms: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_window_ms: 1_000,
            scan_interval_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Scanning,
    Reconciling,
}

/// A remote node seen in a scan. Only `last_seen` and `link` change after insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: Address,
    pub link: LinkAddress,
    pub last_seen: u32,
}

/// Decides whether to answer another node's probe.
pub type ProbeFilter = Box<dyn Fn(&Address) -> bool + Send>;

/// Sequence a reply must carry for a probe sent with `probe`.
fn reply_sequence(probe: u16) -> u16 {
    probe.wrapping_add(1)
}

pub struct Discovery {
    config: DiscoveryConfig,
    state: DiscoveryState,
    sequence: u16,
    scan_results: Vec<PeerRecord>,
    known: Vec<PeerRecord>,
    filter: ProbeFilter,
    rng: StdRng,
}

impl Discovery {
    pub fn new(config: DiscoveryConfig, rng: StdRng) -> Self {
        Self {
            config,
            state: DiscoveryState::Idle,
            sequence: 0,
            scan_results: Vec::new(),
            known: Vec::new(),
            filter: Box::new(|_| true),
            rng,
        }
    }

    /// Replace the predicate that decides which probers get a reply (default: all).
    pub fn set_probe_filter<F>(&mut self, filter: F)
    where
        F: Fn(&Address) -> bool + Send + 'static,
    {
        self.filter = Box::new(filter);
    }

    /// Arm the periodic scan timer, if enabled.
    pub fn start(&mut self, ctx: &mut Context<'_>) {
        if self.config.scan_interval_ms > 0 {
            ctx.schedule(self.config.scan_interval_ms, Timer::PeriodicScan);
        }
    }

    /// Begin a scan round. Returns false if one is already in flight.
    pub fn scan(&mut self, ctx: &mut Context<'_>) -> bool {
        if self.state != DiscoveryState::Idle {
            return false;
        }
        self.sequence = self.rng.gen();
        self.scan_results.clear();
        self.state = DiscoveryState::Scanning;
        let probe = Packet::new(
            ctx.local,
            Address::broadcast(ctx.local.project_id),
            self.sequence,
            Command::Scan,
            Vec::new(),
        );
        ctx.send_packet(probe);
        ctx.schedule(self.config.scan_window_ms, Timer::ScanWindow);
        tracing::debug!(sequence = self.sequence, "scan started");
        true
    }

    pub fn on_periodic(&mut self, ctx: &mut Context<'_>) {
        self.scan(ctx);
        self.start(ctx);
    }

    /// Handle a SCAN frame from another node.
    pub fn on_scan_packet(&mut self, packet: &Packet, link: LinkAddress, ctx: &mut Context<'_>) {
        match packet.payload.as_slice() {
            [] => self.answer_probe(packet, ctx),
            [ack] => self.record_reply(packet, *ack, link, ctx),
            _ => {}
        }
    }

    fn answer_probe(&mut self, probe: &Packet, ctx: &mut Context<'_>) {
        if !(self.filter)(&probe.source) {
            tracing::trace!(prober = %probe.source, "probe filtered");
            return;
        }
        let sequence = reply_sequence(probe.sequence);
        let reply = Packet::new(
            ctx.local,
            probe.source,
            sequence,
            Command::Scan,
            vec![sequence as u8],
        );
        ctx.send_packet(reply);
    }

    fn record_reply(&mut self, reply: &Packet, ack: u8, link: LinkAddress, ctx: &mut Context<'_>) {
        if self.state != DiscoveryState::Scanning {
            return;
        }
        let expected = reply_sequence(self.sequence);
        if reply.sequence != expected || ack != expected as u8 {
            tracing::trace!(from = %reply.source, sequence = reply.sequence, "stale scan reply");
            return;
        }
        if self.scan_results.iter().any(|p| p.address == reply.source) {
            return;
        }
        self.scan_results.push(PeerRecord {
            address: reply.source,
            link,
            last_seen: ctx.now,
        });
        ctx.emit(Event::PeerSeen(reply.source));
    }

    /// Scan window elapsed: diff results against known peers, then go idle.
    pub fn on_scan_window(&mut self, ctx: &mut Context<'_>) {
        if self.state != DiscoveryState::Scanning {
            return;
        }
        self.state = DiscoveryState::Reconciling;
        let results = std::mem::take(&mut self.scan_results);

        let known = std::mem::take(&mut self.known);
        for peer in known {
            if results.iter().any(|r| r.address == peer.address) {
                self.known.push(peer);
            } else {
                tracing::info!(peer = %peer.address, "peer left");
                ctx.emit(Event::PeerLeft(peer.address));
            }
        }
        for seen in &results {
            match self.known.iter_mut().find(|k| k.address == seen.address) {
                Some(existing) => {
                    existing.last_seen = seen.last_seen;
                    existing.link = seen.link;
                }
                None => {
                    tracing::info!(peer = %seen.address, "peer joined");
                    self.known.push(*seen);
                    ctx.emit(Event::PeerJoined(seen.address));
                }
            }
        }
        ctx.emit(Event::ScanComplete);
        self.state = DiscoveryState::Idle;
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn known_peers(&self) -> &[PeerRecord] {
        &self.known
    }

    /// Sequence of the current (or last) probe.
    pub fn scan_sequence(&self) -> u16 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::address::{GROUP_COORDINATOR, GROUP_RECEIVER, GROUP_TRANSMITTER};
    use crate::core::Harness;

    const ME: Address = Address::new(5, GROUP_COORDINATOR, 0);
    const GUN: Address = Address::new(5, GROUP_TRANSMITTER, 1);
    const VEST: Address = Address::new(5, GROUP_RECEIVER, 2);

    fn discovery(interval: u32) -> Discovery {
        Discovery::new(
            DiscoveryConfig {
                scan_window_ms: 100,
                scan_interval_ms: interval,
            },
            StdRng::seed_from_u64(7),
        )
    }

    fn reply_from(d: &Discovery, source: Address) -> Packet {
        let sequence = reply_sequence(d.scan_sequence());
        Packet::new(source, ME, sequence, Command::Scan, vec![sequence as u8])
    }

    #[test]
    fn scan_broadcasts_empty_probe() {
        let mut h = Harness::new(ME);
        let mut d = discovery(0);
        assert!(d.scan(&mut h.ctx(0)));
        assert_eq!(d.state(), DiscoveryState::Scanning);
        assert!(!d.scan(&mut h.ctx(0)), "second scan while scanning");
        assert_eq!(h.outbox.len(), 1);
        let probe = &h.outbox[0];
        assert_eq!(probe.command, Command::Scan);
        assert!(probe.payload.is_empty());
        assert_eq!(probe.sequence, d.scan_sequence());
        assert_eq!(probe.destination, Address::broadcast(5));
        assert_eq!(h.scheduler.len(), 1);
    }

    #[test]
    fn probe_answered_with_incremented_sequence() {
        let mut h = Harness::new(GUN);
        let mut d = discovery(0);
        let probe = Packet::new(ME, Address::broadcast(5), 0x12FF, Command::Scan, vec![]);
        d.on_scan_packet(&probe, LinkAddress::default(), &mut h.ctx(0));
        let reply = &h.outbox[0];
        assert_eq!(reply.destination, ME);
        assert_eq!(reply.sequence, 0x1300);
        assert_eq!(reply.payload, vec![0x00]);
    }

    #[test]
    fn probe_filter_suppresses_reply() {
        let mut h = Harness::new(GUN);
        let mut d = discovery(0);
        d.set_probe_filter(|a| a.is_coordinator());
        let from_vest = Packet::new(VEST, Address::broadcast(5), 1, Command::Scan, vec![]);
        d.on_scan_packet(&from_vest, LinkAddress::default(), &mut h.ctx(0));
        assert!(h.outbox.is_empty());
        let from_coord = Packet::new(ME, Address::broadcast(5), 1, Command::Scan, vec![]);
        d.on_scan_packet(&from_coord, LinkAddress::default(), &mut h.ctx(0));
        assert_eq!(h.outbox.len(), 1);
    }

    #[test]
    fn reconcile_reports_joins_then_leaves() {
        let mut h = Harness::new(ME);
        let mut d = discovery(0);

        d.scan(&mut h.ctx(0));
        let link = LinkAddress([1; 6]);
        d.on_scan_packet(&reply_from(&d, GUN), link, &mut h.ctx(10));
        d.on_scan_packet(&reply_from(&d, GUN), link, &mut h.ctx(11));
        d.on_scan_packet(&reply_from(&d, VEST), link, &mut h.ctx(12));
        d.on_scan_window(&mut h.ctx(100));
        assert_eq!(
            h.events,
            vec![
                Event::PeerSeen(GUN),
                Event::PeerSeen(VEST),
                Event::PeerJoined(GUN),
                Event::PeerJoined(VEST),
                Event::ScanComplete,
            ]
        );
        assert_eq!(d.state(), DiscoveryState::Idle);
        assert_eq!(d.known_peers().len(), 2);

        h.events.clear();
        d.scan(&mut h.ctx(200));
        d.on_scan_packet(&reply_from(&d, VEST), link, &mut h.ctx(210));
        d.on_scan_window(&mut h.ctx(300));
        assert_eq!(
            h.events,
            vec![Event::PeerSeen(VEST), Event::PeerLeft(GUN), Event::ScanComplete]
        );
        assert_eq!(d.known_peers()[0].address, VEST);
        assert_eq!(d.known_peers()[0].last_seen, 210);
    }

    #[test]
    fn unchanged_topology_is_idempotent() {
        let mut h = Harness::new(ME);
        let mut d = discovery(0);
        for round in 0..2u32 {
            h.events.clear();
            d.scan(&mut h.ctx(round * 1000));
            d.on_scan_packet(&reply_from(&d, GUN), LinkAddress::default(), &mut h.ctx(round * 1000 + 5));
            d.on_scan_window(&mut h.ctx(round * 1000 + 100));
        }
        assert!(!h
            .events
            .iter()
            .any(|e| matches!(e, Event::PeerJoined(_) | Event::PeerLeft(_))));
        assert!(h.events.contains(&Event::ScanComplete));
    }

    #[test]
    fn foreign_sequence_rejected() {
        let mut h = Harness::new(ME);
        let mut d = discovery(0);
        d.scan(&mut h.ctx(0));
        let wrong = reply_sequence(d.scan_sequence()).wrapping_add(7);
        let stale = Packet::new(GUN, ME, wrong, Command::Scan, vec![wrong as u8]);
        d.on_scan_packet(&stale, LinkAddress::default(), &mut h.ctx(1));
        let mut mismatched_ack = reply_from(&d, VEST);
        mismatched_ack.payload[0] = mismatched_ack.payload[0].wrapping_add(1);
        d.on_scan_packet(&mismatched_ack, LinkAddress::default(), &mut h.ctx(2));
        d.on_scan_window(&mut h.ctx(100));
        assert!(d.known_peers().is_empty());
        assert_eq!(h.events, vec![Event::ScanComplete]);
    }

    #[test]
    fn replies_outside_scan_ignored() {
        let mut h = Harness::new(ME);
        let mut d = discovery(0);
        d.on_scan_packet(&reply_from(&d, GUN), LinkAddress::default(), &mut h.ctx(0));
        assert!(h.events.is_empty());
    }

    #[test]
    fn periodic_scan_rearms() {
        let mut h = Harness::new(ME);
        let mut d = discovery(500);
        d.start(&mut h.ctx(0));
        assert_eq!(h.scheduler.tick(500), vec![Timer::PeriodicScan]);
        d.on_periodic(&mut h.ctx(500));
        assert_eq!(d.state(), DiscoveryState::Scanning);
        assert_eq!(h.scheduler.tick(600), vec![Timer::ScanWindow]);
        assert_eq!(h.scheduler.tick(1000), vec![Timer::PeriodicScan]);
    }
}
