//! Transport boundary: the seam between the engine and the wire
//!
//! The engine never parses raw bytes. It hands a `ProbeSpec` plus an opaque
//! token to the transport and gets back already-decoded `Response`
//! descriptors. Raw-socket, pcap and connect() implementations all live on
//! the far side of this trait.

use async_trait::async_trait;
use std::net::IpAddr;
use tokio::time::Instant;

use crate::network::probe::ProbeSpec;
use crate::network::{Protocol, SctpChunk};

/// Opaque correlation token handed to the transport at send time.
///
/// Transports that can carry it through the wire exchange (connect scans,
/// ICMP id/seq encoding) return it with the response; raw packet transports
/// may not be able to, in which case the engine falls back to matching by
/// protocol fields. Echo-style transports put the token's low 16 bits in
/// the sequence field; the engine relies on that when it has to match an
/// `EchoReply` without a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeToken(pub u64);

/// ICMP destination-unreachable flavor, pre-decoded by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableKind {
    Network,
    Host,
    Protocol,
    Port,
    AdminProhibited,
    Other(u8),
}

impl UnreachableKind {
    /// Decode an ICMP type-3 code byte
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => UnreachableKind::Network,
            1 => UnreachableKind::Host,
            2 => UnreachableKind::Protocol,
            3 => UnreachableKind::Port,
            9 | 10 | 13 => UnreachableKind::AdminProhibited,
            other => UnreachableKind::Other(other),
        }
    }
}

/// A decoded response descriptor delivered by the transport
///
/// `sport` is the remote source port of the answering packet, i.e. the port
/// that was probed. ICMP errors instead carry the original probe's
/// destination port and protocol, recovered from the quoted header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Tcp {
        sport: u16,
        flags: u8,
        window: u16,
    },
    Udp {
        sport: u16,
    },
    Sctp {
        sport: u16,
        chunk: SctpChunk,
    },
    /// For protocol-scan probes the quoted header has no ports:
    /// `orig_proto` is `Protocol::Ip` and `orig_dport` carries the probed
    /// protocol number instead.
    IcmpUnreachable {
        kind: UnreachableKind,
        orig_proto: Protocol,
        orig_dport: u16,
    },
    EchoReply {
        seq: u16,
    },
    /// Reply to a raw IP protocol probe
    ProtoReply {
        proto: u8,
    },
    ArpReply,
    NeighborAdvert,
    /// Connect-scan outcomes, reported by the host stack
    ConnectOk {
        dport: u16,
    },
    ConnectRefused {
        dport: u16,
    },
}

impl Response {
    /// TCP convenience: SYN and ACK both set
    pub fn is_syn_ack(&self) -> bool {
        use crate::network::tcp_flags::{ACK, SYN};
        matches!(self, Response::Tcp { flags, .. } if flags & (SYN | ACK) == SYN | ACK)
    }

    /// TCP convenience: RST set
    pub fn is_rst(&self) -> bool {
        use crate::network::tcp_flags::RST;
        matches!(self, Response::Tcp { flags, .. } if flags & RST != 0)
    }
}

/// One event delivered by `ProbeTransport::poll`
#[derive(Debug, Clone, Copy)]
pub struct ProbeEvent {
    /// Host the response came from
    pub from: IpAddr,
    pub response: Response,
    /// Set when the transport could correlate the response itself
    pub token: Option<ProbeToken>,
}

/// The transport boundary consumed by the engine
///
/// `send` must not block on network round trips; `poll` blocks until at
/// least one response is available or `deadline` passes, whichever is
/// first, and may return early with an empty batch at the deadline.
#[async_trait]
pub trait ProbeTransport: Send {
    fn send(&mut self, target: IpAddr, spec: &ProbeSpec, token: ProbeToken) -> crate::Result<()>;

    async fn poll(&mut self, deadline: Instant) -> crate::Result<Vec<ProbeEvent>>;
}
