//! Scanner module: the probe engine and its supporting parts

pub mod classify;
pub mod engine;
pub mod group;
pub mod scheduler;
pub mod target;

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::config::ScanConfig;
use crate::network::{PortState, Protocol, ScanType};
use crate::scanner::target::{HostState, Target, WorkState};

pub use engine::ScanEngine;

/// How a host's scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOutcome {
    /// Every work item reached a terminal state
    Completed,
    /// The per-host time budget expired first
    TimedOut,
    /// The scan was cancelled or hit its global deadline before this host
    /// finished (or started)
    Cancelled,
}

/// Result for a single probed port (or protocol, for protocol scans)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PortReport {
    pub port: u16,
    pub protocol: Protocol,
    pub state: PortState,
}

/// Per-host scan result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostReport {
    pub addr: IpAddr,
    pub outcome: HostOutcome,
    pub ports: Vec<PortReport>,
    /// Smoothed RTT at scan end, when at least one clean sample arrived
    pub srtt: Option<Duration>,
}

impl HostReport {
    pub(crate) fn from_target(target: &Target) -> Self {
        let outcome = match target.state() {
            HostState::Completed => HostOutcome::Completed,
            HostState::HostTimedOut => HostOutcome::TimedOut,
            HostState::Pending | HostState::Active => HostOutcome::Cancelled,
        };
        let ports = target
            .items()
            .iter()
            .map(|item| PortReport {
                port: item.spec.result_port(),
                protocol: item.spec.protocol(),
                state: match item.state {
                    WorkState::Done(state) => state,
                    // Abandoned mid-flight: conservative default
                    _ => PortState::Unknown,
                },
            })
            .collect();
        Self {
            addr: target.addr(),
            outcome,
            ports,
            srtt: target.timing().srtt(),
        }
    }

    /// Look up the state recorded for a port
    pub fn port_state(&self, port: u16) -> Option<PortState> {
        self.ports.iter().find(|p| p.port == port).map(|p| p.state)
    }

    pub fn open_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|p| p.state == PortState::Open)
            .map(|p| p.port)
            .collect()
    }

    /// Ports still in an ambiguous or unknown state
    pub fn ambiguous_ports(&self) -> Vec<u16> {
        self.ports
            .iter()
            .filter(|p| p.state.is_ambiguous())
            .map(|p| p.port)
            .collect()
    }
}

/// Traffic statistics for one scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanStats {
    /// Probes handed to the transport, retransmissions included
    pub probes_sent: u64,
    /// Responses matched to an in-flight probe
    pub responses_received: u64,
    /// Probe deadlines that expired with no response
    pub timeouts: u64,
    /// Probes that were queued for another attempt
    pub retransmissions: u64,
    /// Responses that matched nothing and were discarded
    pub unmatched_responses: u64,
    /// Late responses that refined an already-recorded ambiguous state
    pub refinements: u64,
}

/// Complete scan result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_type: ScanType,
    pub hosts: Vec<HostReport>,
    pub stats: ScanStats,
    pub duration: Duration,
    /// True when the scan stopped before every host reached a terminal
    /// state (caller cancellation or global scan timeout)
    pub cancelled: bool,
    pub config: ScanConfig,
}

impl ScanReport {
    pub fn host(&self, addr: IpAddr) -> Option<&HostReport> {
        self.hosts.iter().find(|h| h.addr == addr)
    }

    pub fn completed_hosts(&self) -> usize {
        self.hosts
            .iter()
            .filter(|h| h.outcome == HostOutcome::Completed)
            .count()
    }
}
