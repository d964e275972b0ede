//! Response classification: (scan type, probe, response-or-absence) -> state
//!
//! Pure mapping with no I/O and no timing dependency. "No response" here
//! means the probe exhausted its full retry budget without an answer; the
//! loop only consults this table at that point or on a real response.

use crate::network::probe::ProbeSpec;
use crate::network::transport::{Response, UnreachableKind};
use crate::network::{PortState, ScanType, SctpChunk};

/// A classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: PortState,
    /// Conclusive results are final; inconclusive ones may be refined by a
    /// later, more specific response for the same port.
    pub conclusive: bool,
}

impl Classification {
    fn conclusive(state: PortState) -> Self {
        Self {
            state,
            conclusive: true,
        }
    }

    fn refinable(state: PortState) -> Self {
        Self {
            state,
            conclusive: false,
        }
    }
}

/// Classify a response (or its absence) for one probe.
///
/// The engine guarantees `response` actually matched this probe's
/// identifying fields; spurious traffic never reaches this function.
pub fn classify(
    scan_type: ScanType,
    spec: &ProbeSpec,
    response: Option<&Response>,
) -> Classification {
    match response {
        Some(resp) => classify_response(scan_type, spec, resp),
        None => classify_no_response(scan_type),
    }
}

fn classify_response(scan_type: ScanType, _spec: &ProbeSpec, resp: &Response) -> Classification {
    // ICMP errors mean the same thing for every probe protocol; handle them
    // once up front.
    if let Response::IcmpUnreachable { kind, .. } = resp {
        return classify_unreachable(scan_type, *kind);
    }

    match scan_type {
        ScanType::Syn => match resp {
            r if r.is_syn_ack() => Classification::conclusive(PortState::Open),
            r if r.is_rst() => Classification::conclusive(PortState::Closed),
            _ => Classification::conclusive(PortState::Filtered),
        },
        ScanType::Connect => match resp {
            Response::ConnectOk { .. } => Classification::conclusive(PortState::Open),
            Response::ConnectRefused { .. } => Classification::conclusive(PortState::Closed),
            _ => Classification::conclusive(PortState::Filtered),
        },
        ScanType::Fin | ScanType::Null | ScanType::Xmas | ScanType::Maimon => match resp {
            r if r.is_rst() => Classification::conclusive(PortState::Closed),
            _ => Classification::refinable(PortState::OpenFiltered),
        },
        ScanType::Ack => match resp {
            r if r.is_rst() => Classification::conclusive(PortState::Unfiltered),
            _ => Classification::conclusive(PortState::Filtered),
        },
        ScanType::Window => match resp {
            Response::Tcp { flags, window, .. }
                if flags & crate::network::tcp_flags::RST != 0 =>
            {
                if *window > 0 {
                    Classification::conclusive(PortState::Open)
                } else {
                    Classification::conclusive(PortState::Closed)
                }
            }
            _ => Classification::conclusive(PortState::Filtered),
        },
        ScanType::Udp => match resp {
            Response::Udp { .. } => Classification::conclusive(PortState::Open),
            _ => Classification::refinable(PortState::OpenFiltered),
        },
        ScanType::SctpInit => match resp {
            Response::Sctp {
                chunk: SctpChunk::InitAck,
                ..
            } => Classification::conclusive(PortState::Open),
            Response::Sctp {
                chunk: SctpChunk::Abort,
                ..
            } => Classification::conclusive(PortState::Closed),
            _ => Classification::conclusive(PortState::Filtered),
        },
        ScanType::SctpCookieEcho => match resp {
            Response::Sctp {
                chunk: SctpChunk::Abort,
                ..
            } => Classification::conclusive(PortState::Closed),
            _ => Classification::refinable(PortState::OpenFiltered),
        },
        ScanType::IpProto => match resp {
            Response::ProtoReply { .. }
            | Response::Tcp { .. }
            | Response::Udp { .. }
            | Response::Sctp { .. }
            | Response::EchoReply { .. } => Classification::conclusive(PortState::Open),
            _ => Classification::refinable(PortState::OpenFiltered),
        },
        // Host discovery: anything that came back from the address proves a
        // responsive host.
        ScanType::Ping => Classification::conclusive(PortState::Open),
    }
}

fn classify_unreachable(scan_type: ScanType, kind: UnreachableKind) -> Classification {
    match (scan_type, kind) {
        // Port unreachable against UDP is an active "nothing listens here"
        (ScanType::Udp, UnreachableKind::Port) => Classification::conclusive(PortState::Closed),
        // Protocol unreachable against a raw protocol probe likewise
        (ScanType::IpProto, UnreachableKind::Protocol) => {
            Classification::conclusive(PortState::Closed)
        }
        // A host that actively refuses is still a responsive host
        (ScanType::Ping, _) => Classification::conclusive(PortState::Open),
        _ => Classification::conclusive(PortState::Filtered),
    }
}

fn classify_no_response(scan_type: ScanType) -> Classification {
    match scan_type {
        ScanType::Syn | ScanType::Connect | ScanType::Ack | ScanType::Window => {
            Classification::conclusive(PortState::Filtered)
        }
        ScanType::SctpInit => Classification::conclusive(PortState::Filtered),
        ScanType::Fin
        | ScanType::Null
        | ScanType::Xmas
        | ScanType::Maimon
        | ScanType::Udp
        | ScanType::SctpCookieEcho
        | ScanType::IpProto => Classification::refinable(PortState::OpenFiltered),
        ScanType::Ping => Classification::conclusive(PortState::Filtered),
    }
}
