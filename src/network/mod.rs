//! Probe model: scan types, protocols and port states

pub mod probe;
pub mod transport;

use serde::{Deserialize, Serialize};

/// TCP flag bits used when building probe specifications
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// Available scan types
///
/// One scan runs exactly one type; the type decides which probes the plan
/// builder emits and how the classifier reads responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanType {
    /// TCP SYN scan (half-open)
    Syn,
    /// TCP Connect scan (full connection)
    Connect,
    /// TCP FIN scan
    Fin,
    /// TCP NULL scan (no flags)
    Null,
    /// TCP XMAS scan (FIN, PSH, URG flags)
    Xmas,
    /// TCP Maimon scan (FIN/ACK)
    Maimon,
    /// TCP ACK scan
    Ack,
    /// TCP Window scan
    Window,
    /// UDP scan
    Udp,
    /// SCTP INIT scan
    SctpInit,
    /// SCTP COOKIE-ECHO scan
    SctpCookieEcho,
    /// IP protocol scan
    IpProto,
    /// Host discovery (echo/ARP/ND probes)
    Ping,
}

impl ScanType {
    pub fn name(&self) -> &'static str {
        match self {
            ScanType::Syn => "SYN",
            ScanType::Connect => "Connect",
            ScanType::Fin => "FIN",
            ScanType::Null => "NULL",
            ScanType::Xmas => "XMAS",
            ScanType::Maimon => "Maimon",
            ScanType::Ack => "ACK",
            ScanType::Window => "Window",
            ScanType::Udp => "UDP",
            ScanType::SctpInit => "SCTP INIT",
            ScanType::SctpCookieEcho => "SCTP COOKIE-ECHO",
            ScanType::IpProto => "IP protocol",
            ScanType::Ping => "Ping",
        }
    }

    /// Check if this scan type sends raw TCP probes
    pub fn is_raw_tcp(&self) -> bool {
        matches!(
            self,
            ScanType::Syn
                | ScanType::Fin
                | ScanType::Null
                | ScanType::Xmas
                | ScanType::Maimon
                | ScanType::Ack
                | ScanType::Window
        )
    }

    /// Get TCP flags for this scan type's probes
    pub fn tcp_flags(&self) -> u8 {
        use tcp_flags::*;
        match self {
            ScanType::Syn | ScanType::Connect => SYN,
            ScanType::Fin => FIN,
            ScanType::Null => 0x00,
            ScanType::Xmas => FIN | PSH | URG,
            ScanType::Maimon => FIN | ACK,
            ScanType::Ack | ScanType::Window => ACK,
            _ => 0x00,
        }
    }
}

/// Protocol enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
    Icmp,
    IcmpV6,
    Arp,
    /// Raw IP probe carrying an arbitrary protocol number
    Ip,
}

impl Protocol {
    pub fn number(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Sctp => 132,
            Protocol::Icmp => 1,
            Protocol::IcmpV6 => 58,
            // ARP and raw IP have no meaningful IP protocol number here
            Protocol::Arp | Protocol::Ip => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
            Protocol::Icmp => "icmp",
            Protocol::IcmpV6 => "icmpv6",
            Protocol::Arp => "arp",
            Protocol::Ip => "ip",
        }
    }
}

/// SCTP chunk types used by probe specifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SctpChunk {
    Init,
    InitAck,
    Abort,
    CookieEcho,
}

/// Port state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unfiltered,
    OpenFiltered,
    ClosedFiltered,
    /// Never resolved: host timed out or the scan was cancelled first
    Unknown,
}

impl PortState {
    /// Specificity rank used for state refinement.
    ///
    /// A recorded state may only ever be replaced by a strictly more
    /// specific one: `Unknown` (0) < ambiguous (1) < definite (2).
    pub fn specificity(&self) -> u8 {
        match self {
            PortState::Unknown => 0,
            PortState::OpenFiltered | PortState::ClosedFiltered => 1,
            _ => 2,
        }
    }

    /// Check if the state is one of the ambiguous combinations
    pub fn is_ambiguous(&self) -> bool {
        self.specificity() < 2
    }
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
            PortState::Unfiltered => write!(f, "unfiltered"),
            PortState::OpenFiltered => write!(f, "open|filtered"),
            PortState::ClosedFiltered => write!(f, "closed|filtered"),
            PortState::Unknown => write!(f, "unknown"),
        }
    }
}
