//! Probe specifications and the ordered probe plan
//!
//! A `ProbeSpec` is pure data: what kind of packet to send next. The size
//! matters - a busy scan keeps tens of thousands of these alive inside
//! in-flight records, so the variant stays `Copy` with no heap payload.

use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::network::{Protocol, ScanType, SctpChunk};

/// Tagged descriptor of a single probe to send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeSpec {
    /// Raw TCP probe with explicit flag byte
    Tcp { dport: u16, flags: u8 },
    /// UDP probe (empty or protocol-specific payload is the transport's call)
    Udp { dport: u16 },
    /// SCTP probe carrying one chunk
    Sctp { dport: u16, chunk: SctpChunk },
    /// ICMP probe (echo, timestamp, netmask ...)
    Icmp { icmp_type: u8, code: u8 },
    /// ICMPv6 probe
    IcmpV6 { icmp_type: u8, code: u8 },
    /// Raw IP probe for protocol scans
    IpProto { proto: u8 },
    /// ARP request; addressing comes from the target itself
    Arp,
    /// IPv6 neighbor solicitation; addressing comes from the target
    NeighborDiscovery,
    /// Full TCP connect attempt via the host stack
    ConnectTcp { dport: u16 },
}

impl ProbeSpec {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProbeSpec::Tcp { .. } | ProbeSpec::ConnectTcp { .. } => Protocol::Tcp,
            ProbeSpec::Udp { .. } => Protocol::Udp,
            ProbeSpec::Sctp { .. } => Protocol::Sctp,
            ProbeSpec::Icmp { .. } => Protocol::Icmp,
            ProbeSpec::IcmpV6 { .. } | ProbeSpec::NeighborDiscovery => Protocol::IcmpV6,
            ProbeSpec::Arp => Protocol::Arp,
            ProbeSpec::IpProto { .. } => Protocol::Ip,
        }
    }

    /// Destination port, for the variants that have one
    pub fn dport(&self) -> Option<u16> {
        match self {
            ProbeSpec::Tcp { dport, .. }
            | ProbeSpec::Udp { dport }
            | ProbeSpec::Sctp { dport, .. }
            | ProbeSpec::ConnectTcp { dport } => Some(*dport),
            _ => None,
        }
    }

    /// The "port" recorded in results: destination port where there is one,
    /// protocol number for protocol scans, zero for host discovery probes.
    pub fn result_port(&self) -> u16 {
        match self {
            ProbeSpec::IpProto { proto } => u16::from(*proto),
            other => other.dport().unwrap_or(0),
        }
    }
}

/// Ordered list of probes to run against every target
///
/// Order is preserved exactly as the caller supplied it; the scheduler
/// issues first attempts in plan order so results are deterministic for a
/// given input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbePlan {
    specs: Vec<ProbeSpec>,
    scan_type: ScanType,
}

impl ProbePlan {
    pub fn new(scan_type: ScanType, specs: Vec<ProbeSpec>) -> crate::Result<Self> {
        if specs.is_empty() {
            return Err(ScanError::EmptyPlan);
        }
        Ok(Self { specs, scan_type })
    }

    /// Build a plan from a port list, emitting the probe variant the scan
    /// type calls for. Caller port order is kept as-is.
    pub fn for_ports(scan_type: ScanType, ports: &[u16]) -> crate::Result<Self> {
        let specs = ports
            .iter()
            .map(|&port| match scan_type {
                ScanType::Connect => ProbeSpec::ConnectTcp { dport: port },
                ScanType::Udp => ProbeSpec::Udp { dport: port },
                ScanType::SctpInit => ProbeSpec::Sctp {
                    dport: port,
                    chunk: SctpChunk::Init,
                },
                ScanType::SctpCookieEcho => ProbeSpec::Sctp {
                    dport: port,
                    chunk: SctpChunk::CookieEcho,
                },
                ScanType::IpProto => ProbeSpec::IpProto { proto: port as u8 },
                // Ping plans are usually built with `for_discovery`, but a
                // port list still works: echo request per entry.
                ScanType::Ping => ProbeSpec::Icmp {
                    icmp_type: 8,
                    code: 0,
                },
                tcp => ProbeSpec::Tcp {
                    dport: port,
                    flags: tcp.tcp_flags(),
                },
            })
            .collect();
        Self::new(scan_type, specs)
    }

    /// Build a host discovery plan: ICMP echo, ARP and neighbor discovery
    /// probes in the given order.
    pub fn for_discovery(specs: Vec<ProbeSpec>) -> crate::Result<Self> {
        Self::new(ScanType::Ping, specs)
    }

    pub fn scan_type(&self) -> ScanType {
        self.scan_type
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ProbeSpec> {
        self.specs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProbeSpec> {
        self.specs.iter()
    }
}
