//! Line commands on stdin and event output on stdout.

use anyhow::{anyhow, bail, Context as _};
use tag_core::address::GROUP_ALL;
use tag_core::{Address, Event, Node, Radio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Scan,
    Reset,
    Start,
    Run,
    End,
    /// Report an infrared hit carrying this code.
    Hit(u32),
    Mark { device: u8, on: bool },
    Status,
    Peers,
    Help,
}

pub const HELP: &str = "commands: scan | reset | start | run | end | hit <code> | mark <device> [off] | status | peers | help";

pub fn parse(line: &str) -> anyhow::Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let cmd = match head {
        "scan" => Command::Scan,
        "reset" => Command::Reset,
        "start" => Command::Start,
        "run" => Command::Run,
        "end" => Command::End,
        "status" => Command::Status,
        "peers" => Command::Peers,
        "help" | "?" => Command::Help,
        "hit" => {
            let code = words.next().ok_or_else(|| anyhow!("hit needs a code"))?;
            Command::Hit(parse_number(code).context("bad fire code")?)
        }
        "mark" => {
            let device = words.next().ok_or_else(|| anyhow!("mark needs a device id"))?;
            let device = u8::try_from(parse_number(device)?).context("device id out of range")?;
            let on = !matches!(words.next(), Some("off"));
            Command::Mark { device, on }
        }
        other => bail!("unknown command {other:?}"),
    };
    Ok(Some(cmd))
}

/// Decimal or 0x-prefixed hex.
fn parse_number(s: &str) -> anyhow::Result<u32> {
    let n = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(n)
}

pub fn execute<R: Radio>(node: &mut Node<R>, now: u32, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Scan => {
            if !node.scan(now) {
                println!("scan already in progress");
            }
        }
        Command::Reset => node.reset(now)?,
        Command::Start => node.start(now)?,
        Command::Run => node.run(now)?,
        Command::End => node.end(now)?,
        Command::Hit(code) => node.report_hit(now, code),
        Command::Mark { device, on } => {
            let target = Address::new(node.address().project_id, GROUP_ALL, device);
            node.mark(now, target, on)?;
        }
        Command::Status => {
            let stats = node.transport_stats();
            println!(
                "node {} phase {:?} discovery {:?} peers {} sent {} failed {} received {} dropped {}",
                node.address(),
                node.session_state(),
                node.discovery_state(),
                node.known_peers().len(),
                stats.sent,
                stats.send_failures,
                stats.received,
                stats.dropped_full
            );
            let loadout = node.session().loadout();
            if let Some(code) = loadout.fire_code {
                println!("fire code {code:#x}");
            }
            if let Some(health) = loadout.health {
                println!("health {health}");
            }
        }
        Command::Peers => {
            for p in node.known_peers() {
                println!("{} via {} last seen {} ms", p.address, p.link, p.last_seen);
            }
        }
        Command::Help => println!("{HELP}"),
    }
    Ok(())
}

/// Presentation of protocol events.
pub fn report(event: &Event) {
    match event {
        Event::PeerSeen(a) => println!("seen {a}"),
        Event::PeerJoined(a) => println!("peer joined {a}"),
        Event::PeerLeft(a) => println!("peer left {a}"),
        Event::ScanComplete => println!("scan complete"),
        Event::SessionPhaseChanged(s) => println!("phase {s:?}"),
        Event::HitApplied { player, health } => println!("hit: player {player} health {health}"),
        Event::HealthChanged { player, health } => println!("player {player} health {health}"),
        Event::FireCodeAssigned(code) => println!("fire code {code:#x}"),
        Event::LoadoutChanged(w) => println!(
            "weapon damage {} interval {} ms magazine {} reload {} ms",
            w.damage, w.fire_interval_ms, w.magazine, w.reload_ms
        ),
        Event::GunNameChanged(name) => println!("weapon {name}"),
        Event::Marked(true) => println!("** marked **"),
        Event::Marked(false) => println!("mark cleared"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tag_core::{MemoryRadio, NodeConfig, SessionState};

    #[test]
    fn parses_commands() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("  scan ").unwrap(), Some(Command::Scan));
        assert_eq!(parse("hit 0x2a").unwrap(), Some(Command::Hit(42)));
        assert_eq!(parse("hit 7").unwrap(), Some(Command::Hit(7)));
        assert_eq!(
            parse("mark 3 off").unwrap(),
            Some(Command::Mark { device: 3, on: false })
        );
        assert_eq!(
            parse("mark 3").unwrap(),
            Some(Command::Mark { device: 3, on: true })
        );
        assert!(parse("hit").is_err());
        assert!(parse("mark 300").is_err());
        assert!(parse("launch").is_err());
    }

    #[test]
    fn executes_against_node() {
        let address = Address::new(1, tag_core::address::GROUP_COORDINATOR, 0);
        let mut node = Node::new(NodeConfig::new(address), MemoryRadio::default());
        execute(&mut node, 0, Command::Start).unwrap();
        assert_eq!(node.session_state(), SessionState::Starting);
        assert!(execute(&mut node, 0, Command::Run).is_err());
        execute(&mut node, 0, Command::Reset).unwrap();
        assert_eq!(node.session_state(), SessionState::Waiting);
    }
}
