//! Load config from file and environment.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tag_core::address::{GROUP_COORDINATOR, GROUP_RECEIVER, GROUP_TRANSMITTER};
use tag_core::discovery::DiscoveryConfig;
use tag_core::session::SessionConfig;
use tag_core::{Address, NodeConfig};

/// Which device this daemon plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coordinator,
    Transmitter,
    Receiver,
}

impl Role {
    pub fn group_mask(self) -> u8 {
        match self {
            Role::Coordinator => GROUP_COORDINATOR,
            Role::Transmitter => GROUP_TRANSMITTER,
            Role::Receiver => GROUP_RECEIVER,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "coordinator" => Some(Role::Coordinator),
            "transmitter" | "gun" => Some(Role::Transmitter),
            "receiver" | "vest" => Some(Role::Receiver),
            _ => None,
        }
    }
}

/// Daemon configuration. File: ~/.config/irtag/config.toml or /etc/irtag/config.toml.
/// Env overrides: IRTAG_PROJECT_ID, IRTAG_ROLE, IRTAG_DEVICE_ID, IRTAG_RADIO_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project id shared by every device of one installation (default 1).
    #[serde(default = "default_project_id")]
    pub project_id: u8,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub device_id: u8,
    /// UDP port of the emulated radio channel (default 47000).
    #[serde(default = "default_radio_port")]
    pub radio_port: u16,
    /// Main loop period in ms (default 10).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_project_id() -> u8 {
    1
}
fn default_role() -> Role {
    Role::Coordinator
}
fn default_radio_port() -> u16 {
    47000
}
fn default_tick_ms() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: default_project_id(),
            role: default_role(),
            device_id: 0,
            radio_port: default_radio_port(),
            tick_ms: default_tick_ms(),
            log_level: default_log_level(),
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn address(&self) -> Address {
        Address::new(self.project_id, self.role.group_mask(), self.device_id)
    }

    pub fn node_config(&self) -> NodeConfig {
        let mut node = NodeConfig::new(self.address());
        node.discovery = self.discovery;
        node.session = self.session.clone();
        node
    }
}

/// Load config: merge default, then config file (explicit path or the first
/// standard location present), then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = match explicit {
        Some(p) => read_file(p),
        None => load_file(),
    }
    .unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env<F: Fn(&str) -> Option<String>>(c: &mut Config, var: F) {
    if let Some(p) = var("IRTAG_PROJECT_ID").and_then(|s| s.parse::<u8>().ok()) {
        c.project_id = p;
    }
    if let Some(r) = var("IRTAG_ROLE").and_then(|s| Role::parse(&s)) {
        c.role = r;
    }
    if let Some(d) = var("IRTAG_DEVICE_ID").and_then(|s| s.parse::<u8>().ok()) {
        c.device_id = d;
    }
    if let Some(p) = var("IRTAG_RADIO_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.radio_port = p;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/irtag/config.toml"));
    }
    out.push(PathBuf::from("/etc/irtag/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    config_paths()
        .into_iter()
        .find(|p| p.exists())
        .and_then(|p| read_file(&p))
}

fn read_file(path: &Path) -> Option<Config> {
    let s = std::fs::read_to_string(path).ok()?;
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring invalid config");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let c: Config = toml::from_str(
            r#"
            project_id = 9
            role = "receiver"
            device_id = 4
            radio_port = 47100

            [discovery]
            scan_window_ms = 500

            [session]
            max_health = 50

            [[session.players]]
            id = 1
            transmitter = 1
            receiver = 2
            weapon = { damage = 20 }

            [[session.players]]
            id = 2
            transmitter = 3
            receiver = 4
            weapon_name = "Rail"
            "#,
        )
        .unwrap();
        assert_eq!(c.address(), Address::new(9, GROUP_RECEIVER, 4));
        assert_eq!(c.discovery.scan_window_ms, 500);
        assert_eq!(c.discovery.scan_interval_ms, 10_000);
        assert_eq!(c.session.max_health, 50);
        assert_eq!(c.session.players[0].weapon.damage, 20);
        assert_eq!(c.session.players[1].weapon_name, "Rail");
        assert_eq!(c.tick_ms, 10);
    }

    #[test]
    fn empty_file_is_default() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c.role, Role::Coordinator);
        assert_eq!(c.radio_port, 47000);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<Config>("colour = 3").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::default();
        apply_env(&mut c, |k| match k {
            "IRTAG_ROLE" => Some("gun".to_string()),
            "IRTAG_DEVICE_ID" => Some("3".to_string()),
            "IRTAG_RADIO_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(c.role, Role::Transmitter);
        assert_eq!(c.device_id, 3);
        assert_eq!(c.radio_port, 47000);
    }
}
