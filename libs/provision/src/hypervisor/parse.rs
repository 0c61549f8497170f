//! Parsers for virsh text output.

use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

/// Best-effort guest address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmAddress {
    Known(Ipv4Addr),
    /// No address yet; a normal transient state while the guest boots.
    Unknown,
}

impl VmAddress {
    pub fn ip(&self) -> Option<Ipv4Addr> {
        match self {
            VmAddress::Known(ip) => Some(*ip),
            VmAddress::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, VmAddress::Known(_))
    }
}

impl fmt::Display for VmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmAddress::Known(ip) => write!(f, "{ip}"),
            VmAddress::Unknown => f.write_str("unknown"),
        }
    }
}

/// Domain state as reported by `virsh domstate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Absent,
    Running,
    ShuttingDown,
    Paused,
    ShutOff,
    Crashed,
    Other(String),
}

impl VmState {
    pub fn parse(domstate: &str) -> Self {
        match domstate.trim() {
            "running" | "idle" => VmState::Running,
            "in shutdown" => VmState::ShuttingDown,
            "paused" | "pmsuspended" => VmState::Paused,
            "shut off" => VmState::ShutOff,
            "crashed" => VmState::Crashed,
            other => VmState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Absent => f.write_str("absent"),
            VmState::Running => f.write_str("running"),
            VmState::ShuttingDown => f.write_str("in shutdown"),
            VmState::Paused => f.write_str("paused"),
            VmState::ShutOff => f.write_str("shut off"),
            VmState::Crashed => f.write_str("crashed"),
            VmState::Other(s) => f.write_str(s),
        }
    }
}

/// First IPv4-looking token in `text`; a `/prefix` suffix is ignored.
pub fn first_ipv4(text: &str) -> Option<Ipv4Addr> {
    text.split_whitespace().find_map(|token| {
        let addr = token.split('/').next().unwrap_or(token);
        addr.parse::<Ipv4Addr>().ok()
    })
}

/// First MAC address in `text`, lowercased.
///
/// Works on both `domiflist` tables and `dumpxml` output
/// (`<mac address='52:54:00:..'/>`).
pub fn first_mac(text: &str) -> Option<String> {
    text.split(|c: char| !(c.is_ascii_hexdigit() || c == ':'))
        .find(|candidate| is_mac(candidate))
        .map(str::to_ascii_lowercase)
}

fn is_mac(candidate: &str) -> bool {
    let parts: Vec<&str> = candidate.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// IPv4 address leased to `mac` in a `net-dhcp-leases` table.
pub fn lease_for_mac(leases: &str, mac: &str) -> Option<Ipv4Addr> {
    let mac = mac.to_ascii_lowercase();
    leases
        .lines()
        .filter(|line| line.to_ascii_lowercase().contains(&mac))
        .find_map(first_ipv4)
}
