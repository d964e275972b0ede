//! End-to-end engine tests over a scripted transport
//!
//! Time is tokio's paused clock, so multi-second timeout scenarios run
//! instantly and deterministically.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

use deimos::network::tcp_flags;
use deimos::scanner::HostOutcome;
use deimos::{
    PortState, ProbeEvent, ProbePlan, ProbeSpec, ProbeToken, ProbeTransport, Response, ScanConfig,
    ScanEngine, ScanType,
};

/// Scripted behavior for one (host, port): an optional delayed reply per
/// attempt; attempts beyond the script stay silent.
#[derive(Default, Clone)]
struct Script {
    replies: Vec<Option<(Duration, Response)>>,
}

impl Script {
    fn silent() -> Self {
        Self::default()
    }

    fn reply(response: Response) -> Self {
        Self {
            replies: vec![Some((Duration::from_millis(10), response))],
        }
    }

    fn reply_on_attempt(attempt: u32, response: Response) -> Self {
        let mut replies = vec![None; attempt as usize];
        replies[attempt as usize - 1] = Some((Duration::from_millis(10), response));
        Self { replies }
    }

    fn reply_each(response: Response, times: usize) -> Self {
        Self {
            replies: vec![Some((Duration::from_millis(10), response)); times],
        }
    }
}

struct MockTransport {
    scripts: HashMap<(IpAddr, u16), Script>,
    /// Unsolicited events delivered at a fixed offset from scan start
    injections: Vec<(Duration, IpAddr, Response)>,
    queue: Vec<(Instant, ProbeEvent)>,
    attempts: HashMap<(IpAddr, u16), u32>,
    started: Option<Instant>,
    /// Raw-socket-style transport: responses carry no correlation token
    strip_tokens: bool,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            injections: Vec::new(),
            queue: Vec::new(),
            attempts: HashMap::new(),
            started: None,
            strip_tokens: false,
        }
    }

    fn without_tokens(mut self) -> Self {
        self.strip_tokens = true;
        self
    }

    fn script(mut self, addr: IpAddr, port: u16, script: Script) -> Self {
        self.scripts.insert((addr, port), script);
        self
    }

    fn inject(mut self, after: Duration, from: IpAddr, response: Response) -> Self {
        self.injections.push((after, from, response));
        self
    }

    fn drain_due(&mut self, now: Instant) -> Vec<ProbeEvent> {
        let mut due = Vec::new();
        let mut remaining = Vec::new();
        for (at, event) in self.queue.drain(..) {
            if at <= now {
                due.push(event);
            } else {
                remaining.push((at, event));
            }
        }
        self.queue = remaining;
        due
    }
}

#[async_trait]
impl ProbeTransport for MockTransport {
    fn send(&mut self, target: IpAddr, spec: &ProbeSpec, token: ProbeToken) -> deimos::Result<()> {
        let now = Instant::now();
        if self.started.is_none() {
            self.started = Some(now);
            let injections = std::mem::take(&mut self.injections);
            for (after, from, response) in injections {
                self.queue.push((
                    now + after,
                    ProbeEvent {
                        from,
                        response,
                        token: None,
                    },
                ));
            }
        }

        let port = spec.result_port();
        let attempt = self.attempts.entry((target, port)).or_insert(0);
        *attempt += 1;

        if let Some(script) = self.scripts.get(&(target, port)) {
            if let Some(Some((delay, response))) = script.replies.get(*attempt as usize - 1) {
                let token = (!self.strip_tokens).then_some(token);
                self.queue.push((
                    now + *delay,
                    ProbeEvent {
                        from: target,
                        response: *response,
                        token,
                    },
                ));
            }
        }
        Ok(())
    }

    async fn poll(&mut self, deadline: Instant) -> deimos::Result<Vec<ProbeEvent>> {
        loop {
            let now = Instant::now();
            let due = self.drain_due(now);
            if !due.is_empty() {
                return Ok(due);
            }
            if now >= deadline {
                return Ok(Vec::new());
            }
            let next_event = self.queue.iter().map(|(at, _)| *at).min();
            let wake = match next_event {
                Some(at) if at < deadline => at,
                _ => deadline,
            };
            tokio::time::sleep_until(wake).await;
        }
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn addr(last: u8) -> IpAddr {
    format!("192.0.2.{last}").parse().unwrap()
}

fn tcp(sport: u16, flags: u8) -> Response {
    Response::Tcp {
        sport,
        flags,
        window: 4096,
    }
}

fn fast_timing(config: &mut ScanConfig) {
    config.timing.initial_rtt_timeout = Duration::from_millis(1000);
    config.timing.min_rtt_timeout = Duration::from_millis(100);
    config.timing.max_rtt_timeout = Duration::from_millis(2000);
}

#[tokio::test(start_paused = true)]
async fn syn_scan_classifies_open_closed_filtered() {
    init_logging();
    let host = addr(1);
    let transport = MockTransport::new()
        .script(host, 80, Script::reply(tcp(80, tcp_flags::SYN | tcp_flags::ACK)))
        .script(host, 81, Script::reply(tcp(81, tcp_flags::RST)))
        .script(host, 82, Script::silent());

    let mut config = ScanConfig::new(ScanType::Syn);
    fast_timing(&mut config);
    config.timing.max_retries = 2;

    let plan = ProbePlan::for_ports(ScanType::Syn, &[80, 81, 82]).unwrap();
    let mut engine = ScanEngine::new(config, vec![host], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    let host_report = report.host(host).unwrap();
    assert_eq!(host_report.outcome, HostOutcome::Completed);
    assert_eq!(host_report.port_state(80), Some(PortState::Open));
    assert_eq!(host_report.port_state(81), Some(PortState::Closed));
    assert_eq!(host_report.port_state(82), Some(PortState::Filtered));

    // Port 82 burned its whole retry budget: first attempt plus two
    // retransmissions, each ending in a timeout.
    assert_eq!(report.stats.retransmissions, 2);
    assert_eq!(report.stats.timeouts, 3);
    assert!(!report.cancelled);

    // Reports are plain data; consumers persist them as JSON
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"Open\""));
}

#[tokio::test(start_paused = true)]
async fn duplicate_plan_entries_each_get_their_response() {
    let host = addr(12);
    // Caller port order is law, duplicates included: the same port probed
    // twice means two live probes with identical identifying fields. A
    // token-less transport answers both; neither response may be dropped
    // and neither probe may fall through to the timeout path.
    let transport = MockTransport::new()
        .without_tokens()
        .script(host, 80, Script::reply_each(tcp(80, tcp_flags::RST), 2));

    let mut config = ScanConfig::new(ScanType::Syn);
    fast_timing(&mut config);
    config.timing.max_retries = 0;

    let plan = ProbePlan::for_ports(ScanType::Syn, &[80, 80]).unwrap();
    let mut engine = ScanEngine::new(config, vec![host], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    let host_report = report.host(host).unwrap();
    assert_eq!(host_report.outcome, HostOutcome::Completed);
    assert_eq!(host_report.ports.len(), 2);
    for port in &host_report.ports {
        assert_eq!(port.state, PortState::Closed);
    }
    assert_eq!(report.stats.responses_received, 2);
    assert_eq!(report.stats.timeouts, 0);
    assert_eq!(report.stats.unmatched_responses, 0);
}

#[tokio::test(start_paused = true)]
async fn fully_answering_host_has_no_ambiguity() {
    let host = addr(2);
    let ports: Vec<u16> = (8000..8040).collect();
    let mut transport = MockTransport::new();
    for &port in &ports {
        let response = if port % 2 == 0 {
            tcp(port, tcp_flags::SYN | tcp_flags::ACK)
        } else {
            tcp(port, tcp_flags::RST)
        };
        transport = transport.script(host, port, Script::reply(response));
    }

    let mut config = ScanConfig::new(ScanType::Syn);
    fast_timing(&mut config);
    let plan = ProbePlan::for_ports(ScanType::Syn, &ports).unwrap();
    let mut engine = ScanEngine::new(config, vec![host], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    let host_report = report.host(host).unwrap();
    assert_eq!(host_report.outcome, HostOutcome::Completed);
    assert!(host_report.ambiguous_ports().is_empty());
    assert_eq!(report.stats.timeouts, 0);
    assert_eq!(host_report.open_ports().len(), 20);
}

#[tokio::test(start_paused = true)]
async fn udp_silence_is_open_filtered_and_late_unreachable_refines() {
    init_logging();
    let scanned = addr(3);
    let straggler = addr(4);

    // Port 54 answers fast, pulling the scanned host's RTT (and therefore
    // its probe timeout) way down, so silent port 53 gets written off as
    // open|filtered quickly. The ICMP port-unreachable for 53 only shows up
    // at the 3 second mark, long after that, and must land as a refinement.
    // The silent second host keeps the scan running until then.
    let transport = MockTransport::new()
        .script(scanned, 54, Script::reply(Response::Udp { sport: 54 }))
        .script(scanned, 53, Script::silent())
        .inject(
            Duration::from_secs(3),
            scanned,
            Response::IcmpUnreachable {
                kind: deimos::network::transport::UnreachableKind::Port,
                orig_proto: deimos::Protocol::Udp,
                orig_dport: 53,
            },
        );

    let mut config = ScanConfig::new(ScanType::Udp);
    config.timing.initial_rtt_timeout = Duration::from_secs(5);
    config.timing.min_rtt_timeout = Duration::from_millis(100);
    config.timing.max_rtt_timeout = Duration::from_secs(10);
    config.timing.max_retries = 0;
    config.timing.initial_cwnd = 1.0;

    let plan = ProbePlan::for_ports(ScanType::Udp, &[54, 53]).unwrap();
    let mut engine = ScanEngine::new(config, vec![scanned, straggler], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    // Refined from open|filtered by the late, more specific response
    let host_report = report.host(scanned).unwrap();
    assert_eq!(host_report.port_state(54), Some(PortState::Open));
    assert_eq!(host_report.port_state(53), Some(PortState::Closed));
    assert_eq!(report.stats.refinements, 1);

    // The straggler resolved its silence the ambiguous way
    let other = report.host(straggler).unwrap();
    assert_eq!(other.port_state(53), Some(PortState::OpenFiltered));
}

#[tokio::test(start_paused = true)]
async fn udp_retry_can_resolve_to_closed_directly() {
    let host = addr(5);
    let transport = MockTransport::new().script(
        host,
        53,
        Script::reply_on_attempt(
            2,
            Response::IcmpUnreachable {
                kind: deimos::network::transport::UnreachableKind::Port,
                orig_proto: deimos::Protocol::Udp,
                orig_dport: 53,
            },
        ),
    );

    let mut config = ScanConfig::new(ScanType::Udp);
    fast_timing(&mut config);
    config.timing.max_retries = 1;

    let plan = ProbePlan::for_ports(ScanType::Udp, &[53]).unwrap();
    let mut engine = ScanEngine::new(config, vec![host], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    assert_eq!(
        report.host(host).unwrap().port_state(53),
        Some(PortState::Closed)
    );
    assert_eq!(report.stats.retransmissions, 1);
}

#[tokio::test(start_paused = true)]
async fn host_timeout_retires_host_without_blocking_group() {
    let dead = addr(6);
    let alive = addr(7);
    let transport = MockTransport::new()
        .script(dead, 80, Script::silent())
        .script(dead, 81, Script::silent())
        .script(alive, 80, Script::reply(tcp(80, tcp_flags::SYN | tcp_flags::ACK)))
        .script(alive, 81, Script::reply(tcp(81, tcp_flags::RST)));

    let mut config = ScanConfig::new(ScanType::Syn);
    config.timing.initial_rtt_timeout = Duration::from_secs(5);
    config.timing.min_rtt_timeout = Duration::from_secs(1);
    config.timing.max_rtt_timeout = Duration::from_secs(10);
    config.timing.max_retries = 10;
    config.host_timeout = Some(Duration::from_secs(2));

    let plan = ProbePlan::for_ports(ScanType::Syn, &[80, 81]).unwrap();
    let started = Instant::now();
    let mut engine = ScanEngine::new(config, vec![dead, alive], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    let dead_report = report.host(dead).unwrap();
    assert_eq!(dead_report.outcome, HostOutcome::TimedOut);
    assert_eq!(dead_report.port_state(80), Some(PortState::Unknown));
    assert_eq!(dead_report.port_state(81), Some(PortState::Unknown));

    let alive_report = report.host(alive).unwrap();
    assert_eq!(alive_report.outcome, HostOutcome::Completed);
    assert_eq!(alive_report.port_state(80), Some(PortState::Open));

    // The dead host's budget, not its 5s probe timeouts, bounded the scan
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn cancellation_reports_partial_results() {
    let answered = addr(8);
    let silent = addr(9);
    let transport = MockTransport::new()
        .script(answered, 80, Script::reply(tcp(80, tcp_flags::SYN | tcp_flags::ACK)))
        .script(silent, 80, Script::silent());

    let mut config = ScanConfig::new(ScanType::Syn);
    config.timing.initial_rtt_timeout = Duration::from_secs(5);
    config.timing.min_rtt_timeout = Duration::from_secs(1);
    config.timing.max_rtt_timeout = Duration::from_secs(10);
    config.timing.max_retries = 10;

    let plan = ProbePlan::for_ports(ScanType::Syn, &[80]).unwrap();
    let mut engine = ScanEngine::new(config, vec![answered, silent], plan, transport).unwrap();
    let token = engine.cancel_token();

    let canceller = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    };
    let (report, ()) = tokio::join!(engine.run(), canceller);
    let report = report.unwrap();

    assert!(report.cancelled);
    let done = report.host(answered).unwrap();
    assert_eq!(done.outcome, HostOutcome::Completed);
    assert_eq!(done.port_state(80), Some(PortState::Open));

    let cut_short = report.host(silent).unwrap();
    assert_eq!(cut_short.outcome, HostOutcome::Cancelled);
    assert_eq!(cut_short.port_state(80), Some(PortState::Unknown));
}

#[tokio::test(start_paused = true)]
async fn scan_timeout_truncates_like_cancellation() {
    let host = addr(10);
    let transport = MockTransport::new().script(host, 80, Script::silent());

    let mut config = ScanConfig::new(ScanType::Syn);
    config.timing.initial_rtt_timeout = Duration::from_secs(5);
    config.timing.min_rtt_timeout = Duration::from_secs(1);
    config.timing.max_rtt_timeout = Duration::from_secs(10);
    config.timing.max_retries = 10;
    config.scan_timeout = Some(Duration::from_secs(2));

    let plan = ProbePlan::for_ports(ScanType::Syn, &[80]).unwrap();
    let mut engine = ScanEngine::new(config, vec![host], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.host(host).unwrap().outcome, HostOutcome::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn ping_scan_short_circuits_on_first_reply() {
    let host = addr(11);
    // Echo replies carry the sequence the transport derived from the
    // token, which the mock echoes back verbatim via the token field.
    let transport = MockTransport::new().script(host, 0, Script::reply(Response::EchoReply { seq: 0 }));

    let mut config = ScanConfig::new(ScanType::Ping);
    fast_timing(&mut config);

    let plan = ProbePlan::for_discovery(vec![
        ProbeSpec::Icmp {
            icmp_type: 8,
            code: 0,
        },
        ProbeSpec::Arp,
        ProbeSpec::NeighborDiscovery,
    ])
    .unwrap();
    let mut engine = ScanEngine::new(config, vec![host], plan, transport).unwrap();
    let report = engine.run().await.unwrap();

    let host_report = report.host(host).unwrap();
    assert_eq!(host_report.outcome, HostOutcome::Completed);
    // The first probe proved the host up; the rest were never needed
    assert_eq!(host_report.ports[0].state, PortState::Open);
    assert!(report.stats.probes_sent < 3 || host_report.ports[1].state == PortState::Unknown);
}

#[test]
fn empty_inputs_fail_fast() {
    let plan = ProbePlan::for_ports(ScanType::Syn, &[80]).unwrap();
    let config = ScanConfig::new(ScanType::Syn);
    let result = ScanEngine::new(config, Vec::new(), plan, MockTransport::new());
    assert!(result.is_err());

    assert!(ProbePlan::for_ports(ScanType::Syn, &[]).is_err());
}
