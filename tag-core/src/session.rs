//! Replicated game session.
//!
//! The coordinator owns the authoritative phase and broadcasts every transition
//! as a one-byte GAME_STATUS frame; every other node mirrors whatever it last
//! heard. Hits are reported by receivers as FIRE frames carrying the infrared
//! token they decoded, and only the coordinator validates them.
//!
//! Fire codes are derived from the low byte of a free-running millisecond
//! timer. A match never reuses a code from the match before it, but with
//! about 256 values, older matches or a second coordinator on the same
//! project id can collide.

use serde::{Deserialize, Serialize};

use crate::address::{Address, GROUP_RECEIVER, GROUP_TRANSMITTER};
use crate::core::{Context, Event, Timer};
use crate::protocol::{
    decode_payload, encode_payload, Command, GunName, PlayerHp, WeaponConfig,
};
use crate::wire::Packet;

/// Session phase. The wire form is the discriminant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    Waiting = 0,
    Starting = 1,
    Count3 = 2,
    Count2 = 3,
    Count1 = 4,
    Go = 5,
    Running = 6,
    Over = 7,
    Won = 8,
    Lost = 9,
}

impl SessionState {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SessionState::Waiting,
            1 => SessionState::Starting,
            2 => SessionState::Count3,
            3 => SessionState::Count2,
            4 => SessionState::Count1,
            5 => SessionState::Go,
            6 => SessionState::Running,
            7 => SessionState::Over,
            8 => SessionState::Won,
            9 => SessionState::Lost,
            _ => return None,
        })
    }

    /// Next countdown step, `None` outside the countdown.
    fn next_countdown(self) -> Option<Self> {
        match self {
            SessionState::Starting => Some(SessionState::Count3),
            SessionState::Count3 => Some(SessionState::Count2),
            SessionState::Count2 => Some(SessionState::Count1),
            SessionState::Count1 => Some(SessionState::Go),
            _ => None,
        }
    }
}

/// One competing player: the ids of their transmitter and receiver devices and
/// their default loadout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub id: u8,
    pub transmitter: u8,
    pub receiver: u8,
    #[serde(default)]
    pub weapon: WeaponConfig,
    #[serde(default = "default_weapon_name")]
    pub weapon_name: String,
}

fn default_weapon_name() -> String {
    "Phaser".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub players: [PlayerConfig; 2],
    pub max_health: u16,
    /// Cadence of the countdown (ms).
    pub countdown_step_ms: u32,
    /// Delay between OVER and the per-player WON/LOST notifications (ms).
    pub verdict_delay_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            players: [
                PlayerConfig {
                    id: 1,
                    transmitter: 1,
                    receiver: 2,
                    weapon: WeaponConfig::default(),
                    weapon_name: default_weapon_name(),
                },
                PlayerConfig {
                    id: 2,
                    transmitter: 3,
                    receiver: 4,
                    weapon: WeaponConfig::default(),
                    weapon_name: default_weapon_name(),
                },
            ],
            max_health: 100,
            countdown_step_ms: 1_000,
            verdict_delay_ms: 2_000,
        }
    }
}

/// Coordinator-side state of one player for the current match.
#[derive(Debug, Clone)]
pub struct Player {
    pub config: PlayerConfig,
    pub weapon: WeaponConfig,
    pub health: u16,
    pub fire_code: u32,
}

impl Player {
    fn new(config: PlayerConfig, health: u16) -> Self {
        Self {
            weapon: config.weapon,
            config,
            health,
            fire_code: 0,
        }
    }
}

/// What a player device has been told by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loadout {
    pub fire_code: Option<u32>,
    pub weapon: Option<WeaponConfig>,
    pub weapon_name: Option<String>,
    pub health: Option<u16>,
    pub marked: bool,
}

pub struct Session {
    config: SessionConfig,
    coordinator: bool,
    state: SessionState,
    players: [Player; 2],
    last_code_base: Option<u8>,
    loadout: Loadout,
}

impl Session {
    /// Session for a node; `coordinator` selects the authoritative role.
    pub fn new(config: SessionConfig, coordinator: bool) -> Self {
        let max = config.max_health;
        let players = [
            Player::new(config.players[0].clone(), max),
            Player::new(config.players[1].clone(), max),
        ];
        Self {
            config,
            coordinator,
            state: SessionState::Waiting,
            players,
            last_code_base: None,
            loadout: Loadout::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator
    }

    pub fn players(&self) -> &[Player; 2] {
        &self.players
    }

    pub fn loadout(&self) -> &Loadout {
        &self.loadout
    }

    fn require_coordinator(&self) -> Result<(), SessionError> {
        if self.coordinator {
            Ok(())
        } else {
            Err(SessionError::NotCoordinator)
        }
    }

    fn require_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidPhase {
                expected,
                actual: self.state,
            })
        }
    }

    /// Set the authoritative phase and broadcast it.
    fn transition(&mut self, next: SessionState, ctx: &mut Context<'_>) {
        tracing::info!(from = ?self.state, to = ?next, "session phase");
        self.state = next;
        ctx.send(
            Address::broadcast(ctx.local.project_id),
            Command::GameStatus,
            vec![next.as_byte()],
        );
        ctx.emit(Event::SessionPhaseChanged(next));
    }

    /// Back to WAITING with default loadouts. Pending countdown and verdict timers are dropped.
    pub fn reset(&mut self, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        self.require_coordinator()?;
        ctx.timers.retain(|t| !t.is_session());
        let max = self.config.max_health;
        for p in &mut self.players {
            p.weapon = p.config.weapon;
            p.health = max;
        }
        self.transition(SessionState::Waiting, ctx);
        Ok(())
    }

    /// WAITING -> STARTING: restore health, deal fresh fire codes, push loadouts
    /// and begin the countdown.
    pub fn start(&mut self, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        self.require_coordinator()?;
        self.require_state(SessionState::Waiting)?;
        let max = self.config.max_health;
        for p in &mut self.players {
            p.health = max;
        }
        let (a, b) = self.next_fire_codes(ctx.now);
        self.players[0].fire_code = a;
        self.players[1].fire_code = b;
        self.transition(SessionState::Starting, ctx);
        for i in 0..self.players.len() {
            self.push_loadout(i, ctx)?;
        }
        ctx.schedule(self.config.countdown_step_ms, Timer::Countdown);
        Ok(())
    }

    /// Two distinct codes from the timer's low byte, sharing neither code with the previous match.
    fn next_fire_codes(&mut self, timer_sample: u32) -> (u32, u32) {
        let mut base = timer_sample as u8;
        if let Some(prev) = self.last_code_base {
            // {base, base + 1} overlaps {prev, prev + 1} when base is within one of prev.
            while base.wrapping_sub(prev).wrapping_add(1) <= 2 {
                base = base.wrapping_add(2);
            }
        }
        self.last_code_base = Some(base);
        (u32::from(base), u32::from(base.wrapping_add(1)))
    }

    fn push_loadout(&self, index: usize, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        let player = &self.players[index];
        let project = ctx.local.project_id;
        let gun = Address::new(project, GROUP_TRANSMITTER, player.config.transmitter);
        ctx.send(gun, Command::FireCode, player.fire_code.to_le_bytes().to_vec());
        ctx.send(gun, Command::GunParams, encode_payload(Command::GunParams, &player.weapon)?);
        let name = GunName::new(&player.config.weapon_name);
        ctx.send(gun, Command::GunName, encode_payload(Command::GunName, &name)?);
        self.send_health(index, ctx)
    }

    fn send_health(&self, index: usize, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        let player = &self.players[index];
        let hp = PlayerHp {
            player_id: u16::from(player.config.id),
            health: player.health,
        };
        let payload = encode_payload(Command::PlayerHp, &hp)?;
        for device in self.devices_of(index, ctx.local.project_id) {
            ctx.send(device, Command::PlayerHp, payload.clone());
        }
        Ok(())
    }

    fn devices_of(&self, index: usize, project: u8) -> [Address; 2] {
        let c = &self.players[index].config;
        [
            Address::new(project, GROUP_TRANSMITTER, c.transmitter),
            Address::new(project, GROUP_RECEIVER, c.receiver),
        ]
    }

    /// Countdown timer fired.
    pub fn on_countdown(&mut self, ctx: &mut Context<'_>) {
        let Some(next) = self.state.next_countdown() else {
            return;
        };
        self.transition(next, ctx);
        let follow_up = if next == SessionState::Go {
            Timer::Run
        } else {
            Timer::Countdown
        };
        ctx.schedule(self.config.countdown_step_ms, follow_up);
    }

    /// GO -> RUNNING.
    pub fn run(&mut self, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        self.require_coordinator()?;
        self.require_state(SessionState::Go)?;
        self.transition(SessionState::Running, ctx);
        Ok(())
    }

    /// Validate a hit reported by receiver `reporter` carrying `code`. Returns
    /// the damaged player's id and new health; anything unrecognised is ignored.
    pub fn on_fire(&mut self, reporter: u8, code: u32, ctx: &mut Context<'_>) -> Option<(u8, u16)> {
        if !self.coordinator || self.state != SessionState::Running {
            return None;
        }
        let target = self
            .players
            .iter()
            .position(|p| p.config.receiver == reporter)?;
        let shooter = 1 - target;
        if self.players[shooter].fire_code != code {
            tracing::debug!(reporter, code, "fire code rejected");
            return None;
        }
        let damage = self.players[shooter].weapon.damage;
        let victim = &mut self.players[target];
        victim.health = victim.health.saturating_sub(damage);
        let (id, health) = (victim.config.id, victim.health);
        tracing::info!(player = id, health, "hit applied");
        ctx.emit(Event::HitApplied { player: id, health });
        if let Err(e) = self.send_health(target, ctx) {
            tracing::warn!(error = %e, "failed to encode health update");
        }
        if self.should_end() {
            if let Err(e) = self.end(ctx) {
                tracing::warn!(error = %e, "match not ended");
            }
        }
        Some((id, health))
    }

    /// True once either player's health has reached zero.
    pub fn should_end(&self) -> bool {
        self.players.iter().any(|p| p.health == 0)
    }

    /// RUNNING -> OVER; per-player verdicts follow after the grace delay.
    pub fn end(&mut self, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        self.require_coordinator()?;
        self.require_state(SessionState::Running)?;
        self.transition(SessionState::Over, ctx);
        ctx.schedule(self.config.verdict_delay_ms, Timer::Verdict);
        Ok(())
    }

    /// Player with strictly more remaining health; `None` on a tie.
    pub fn winner(&self) -> Option<u8> {
        let [a, b] = &self.players;
        if a.health > b.health {
            Some(a.config.id)
        } else if b.health > a.health {
            Some(b.config.id)
        } else {
            None
        }
    }

    /// Grace delay elapsed: tell each player's devices whether they won.
    /// On a tie both players lose.
    pub fn on_verdict(&mut self, ctx: &mut Context<'_>) {
        if self.state != SessionState::Over {
            return;
        }
        let winner = self.winner();
        for i in 0..self.players.len() {
            let status = if winner == Some(self.players[i].config.id) {
                SessionState::Won
            } else {
                SessionState::Lost
            };
            for device in self.devices_of(i, ctx.local.project_id) {
                ctx.send(device, Command::GameStatus, vec![status.as_byte()]);
            }
        }
    }

    /// Highlight (or clear) a device.
    pub fn mark(&self, target: Address, on: bool, ctx: &mut Context<'_>) -> Result<(), SessionError> {
        self.require_coordinator()?;
        let command = if on { Command::Mark } else { Command::Demark };
        ctx.send(target, command, Vec::new());
        Ok(())
    }

    /// Forward a token decoded from an infrared hit to the coordinator.
    pub fn report_hit(&self, code: u32, ctx: &mut Context<'_>) {
        ctx.send(
            Address::coordinator(ctx.local.project_id),
            Command::Fire,
            code.to_le_bytes().to_vec(),
        );
    }

    /// Handle a decoded session frame.
    pub fn on_packet(&mut self, packet: &Packet, ctx: &mut Context<'_>) {
        match packet.command {
            Command::GameStatus => self.on_status(packet, ctx),
            Command::Fire => {
                if packet.source.group_mask & GROUP_RECEIVER == 0 {
                    tracing::debug!(from = %packet.source, "FIRE from a non-receiver ignored");
                    return;
                }
                if let Some(code) = read_u32(&packet.payload) {
                    self.on_fire(packet.source.device_id, code, ctx);
                }
            }
            Command::FireCode => {
                if let Some(code) = read_u32(&packet.payload) {
                    self.loadout.fire_code = Some(code);
                    ctx.emit(Event::FireCodeAssigned(code));
                }
            }
            Command::GunParams => match decode_payload::<WeaponConfig>(&packet.payload) {
                Ok(weapon) => {
                    self.loadout.weapon = Some(weapon);
                    ctx.emit(Event::LoadoutChanged(weapon));
                }
                Err(e) => tracing::debug!(error = %e, "bad GUN_PARAMS"),
            },
            Command::GunName => match decode_payload::<GunName>(&packet.payload) {
                Ok(name) => {
                    let name = name.as_string();
                    self.loadout.weapon_name = Some(name.clone());
                    ctx.emit(Event::GunNameChanged(name));
                }
                Err(e) => tracing::debug!(error = %e, "bad GUN_NAME"),
            },
            Command::PlayerHp => match decode_payload::<PlayerHp>(&packet.payload) {
                Ok(hp) => {
                    let Ok(player) = u8::try_from(hp.player_id) else {
                        tracing::debug!(player = hp.player_id, "PLAYER_HP for unknown player");
                        return;
                    };
                    if self.loadout.health != Some(hp.health) {
                        self.loadout.health = Some(hp.health);
                        ctx.emit(Event::HealthChanged {
                            player,
                            health: hp.health,
                        });
                    }
                }
                Err(e) => tracing::debug!(error = %e, "bad PLAYER_HP"),
            },
            Command::Mark | Command::Demark => {
                let on = packet.command == Command::Mark;
                self.loadout.marked = on;
                ctx.emit(Event::Marked(on));
            }
            Command::Scan => {}
        }
    }

    /// Mirror the coordinator's phase. Last writer wins.
    fn on_status(&mut self, packet: &Packet, ctx: &mut Context<'_>) {
        if self.coordinator || !packet.source.is_coordinator() {
            tracing::warn!(from = %packet.source, "GAME_STATUS from non-authoritative source");
            return;
        }
        let Some(state) = packet.payload.first().copied().and_then(SessionState::from_byte) else {
            return;
        };
        if state != self.state {
            self.state = state;
            ctx.emit(Event::SessionPhaseChanged(state));
        }
    }
}

fn read_u32(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = payload.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("only the coordinator may change the session phase")]
    NotCoordinator,
    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidPhase {
        expected: SessionState,
        actual: SessionState,
    },
    #[error("encode: {0}")]
    Frame(#[from] crate::wire::FrameError),
}
