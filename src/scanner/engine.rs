//! The transmission/reception loop
//!
//! Single cooperative event loop, no per-probe tasks: each pass transmits
//! whatever the schedulers allow, then blocks on the transport until either
//! a response arrives or the nearest deadline (probe, host or scan) passes.
//! All mutable scan state is owned by this loop; nothing here needs a lock.
//!
//! In-flight probes live in a flat slot arena with a free list. At full
//! window there are tens of thousands of live records, so they are small,
//! reused in place and never individually heap-allocated. Probe deadlines
//! sit in a min-heap with lazy invalidation via per-slot generation
//! counters.

use log::{debug, info, warn};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::network::probe::{ProbePlan, ProbeSpec};
use crate::network::transport::{ProbeEvent, ProbeToken, ProbeTransport, Response};
use crate::network::{PortState, Protocol};
use crate::scanner::classify::classify;
use crate::scanner::group::GroupManager;
use crate::scanner::scheduler::ProbeScheduler;
use crate::scanner::target::{HostState, Target};
use crate::scanner::{HostReport, ScanReport, ScanStats};
use crate::utils::timing::CongestionController;

/// Poll granularity when no deadline is pending
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Protocol-specific identifying fields of a probe, minus the host address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyKind {
    /// Port-addressed probes: TCP, UDP, SCTP, and protocol scans keyed on
    /// the protocol number
    Port(Protocol, u16),
    /// ICMP echo-style probes, keyed on the sequence number the transport
    /// derives from the token's low 16 bits
    Echo(u16),
    /// Link-level discovery (ARP, neighbor solicitation): at most one per
    /// host, the address is the whole identity
    Link,
}

type ProbeKey = (IpAddr, KeyKind);

fn probe_key(addr: IpAddr, spec: &ProbeSpec, token: ProbeToken) -> ProbeKey {
    let kind = match *spec {
        ProbeSpec::Tcp { dport, .. } | ProbeSpec::ConnectTcp { dport } => {
            KeyKind::Port(Protocol::Tcp, dport)
        }
        ProbeSpec::Udp { dport } => KeyKind::Port(Protocol::Udp, dport),
        ProbeSpec::Sctp { dport, .. } => KeyKind::Port(Protocol::Sctp, dport),
        ProbeSpec::IpProto { proto } => KeyKind::Port(Protocol::Ip, u16::from(proto)),
        ProbeSpec::Icmp { .. } | ProbeSpec::IcmpV6 { .. } => KeyKind::Echo(token.0 as u16),
        ProbeSpec::Arp | ProbeSpec::NeighborDiscovery => KeyKind::Link,
    };
    (addr, kind)
}

fn response_key(event: &ProbeEvent) -> ProbeKey {
    let kind = match event.response {
        Response::Tcp { sport, .. } => KeyKind::Port(Protocol::Tcp, sport),
        Response::ConnectOk { dport } | Response::ConnectRefused { dport } => {
            KeyKind::Port(Protocol::Tcp, dport)
        }
        Response::Udp { sport } => KeyKind::Port(Protocol::Udp, sport),
        Response::Sctp { sport, .. } => KeyKind::Port(Protocol::Sctp, sport),
        Response::IcmpUnreachable {
            orig_proto,
            orig_dport,
            ..
        } => KeyKind::Port(orig_proto, orig_dport),
        Response::EchoReply { seq } => KeyKind::Echo(seq),
        Response::ProtoReply { proto } => KeyKind::Port(Protocol::Ip, u16::from(proto)),
        Response::ArpReply | Response::NeighborAdvert => KeyKind::Link,
    };
    (event.from, kind)
}

/// One outstanding probe awaiting a response or its deadline
#[derive(Debug, Clone, Copy)]
struct InFlight {
    target_idx: usize,
    plan_index: usize,
    spec: ProbeSpec,
    key: ProbeKey,
    sent_at: Instant,
    /// Derived from the host's timing state at send time; never recomputed
    deadline: Instant,
    attempt: u32,
    generation: u32,
}

/// Slot arena for in-flight probes
#[derive(Debug)]
struct InFlightTable {
    slots: Vec<Option<InFlight>>,
    free: Vec<usize>,
    /// Plans may carry duplicate entries, so one key can have several live
    /// slots; matches consume the oldest first
    by_key: HashMap<ProbeKey, Vec<usize>>,
    deadlines: BinaryHeap<Reverse<(Instant, usize, u32)>>,
    next_gen: u32,
    /// XORed into the slot bits of every token so on-wire sequence numbers
    /// do not start at zero
    token_salt: u32,
    live: usize,
}

impl InFlightTable {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_key: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_gen: 0,
            token_salt: rand::random(),
            live: 0,
        }
    }

    fn encode(&self, slot: usize, generation: u32) -> ProbeToken {
        ProbeToken((u64::from(generation) << 32) | u64::from(slot as u32 ^ self.token_salt))
    }

    fn decode(&self, token: ProbeToken) -> (usize, u32) {
        let slot = (token.0 as u32 ^ self.token_salt) as usize;
        let generation = (token.0 >> 32) as u32;
        (slot, generation)
    }

    /// Reserve a slot and hand out its token; the entry itself lands with
    /// `commit` once the key is known.
    fn reserve(&mut self) -> ProbeToken {
        let slot = self.free.pop().unwrap_or_else(|| {
            self.slots.push(None);
            self.slots.len() - 1
        });
        let generation = self.next_gen;
        self.next_gen = self.next_gen.wrapping_add(1);
        self.encode(slot, generation)
    }

    fn commit(&mut self, token: ProbeToken, entry: InFlight) {
        let (slot, _) = self.decode(token);
        self.by_key.entry(entry.key).or_default().push(slot);
        self.deadlines
            .push(Reverse((entry.deadline, slot, entry.generation)));
        self.slots[slot] = Some(entry);
        self.live += 1;
    }

    fn slot_for_token(&self, token: ProbeToken) -> Option<usize> {
        let (slot, generation) = self.decode(token);
        match self.slots.get(slot) {
            Some(Some(entry)) if entry.generation == generation => Some(slot),
            _ => None,
        }
    }

    fn slot_for_key(&self, key: &ProbeKey) -> Option<usize> {
        self.by_key
            .get(key)?
            .iter()
            .copied()
            .find(|&slot| matches!(&self.slots[slot], Some(entry) if entry.key == *key))
    }

    fn remove(&mut self, slot: usize) -> Option<InFlight> {
        let entry = self.slots[slot].take()?;
        if let Some(slots) = self.by_key.get_mut(&entry.key) {
            slots.retain(|&s| s != slot);
            if slots.is_empty() {
                self.by_key.remove(&entry.key);
            }
        }
        self.free.push(slot);
        self.live -= 1;
        Some(entry)
    }

    /// Earliest live deadline, discarding stale heap entries on the way
    fn nearest_deadline(&mut self) -> Option<Instant> {
        while let Some(&Reverse((deadline, slot, generation))) = self.deadlines.peek() {
            match &self.slots[slot] {
                Some(entry) if entry.generation == generation => return Some(deadline),
                _ => {
                    self.deadlines.pop();
                }
            }
        }
        None
    }

    /// Remove and return one expired entry, if any
    fn pop_expired(&mut self, now: Instant) -> Option<InFlight> {
        while let Some(&Reverse((deadline, slot, generation))) = self.deadlines.peek() {
            let valid = matches!(&self.slots[slot], Some(entry) if entry.generation == generation);
            if !valid {
                self.deadlines.pop();
                continue;
            }
            if deadline > now {
                return None;
            }
            self.deadlines.pop();
            if let Some(entry) = self.remove(slot) {
                return Some(entry);
            }
        }
        None
    }

    /// Drop entries whose host left the active set (completed early, timed
    /// out or cancelled); their responses will no longer be waited for.
    fn retain_active(&mut self, targets: &[Target]) {
        let stale: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| {
                entry.as_ref().and_then(|f| {
                    (targets[f.target_idx].state() != HostState::Active).then_some(slot)
                })
            })
            .collect();
        for slot in stale {
            self.remove(slot);
        }
    }

    fn live(&self) -> usize {
        self.live
    }
}

/// The probe engine: schedules, transmits and classifies until every host
/// reaches a terminal state
pub struct ScanEngine<T: ProbeTransport> {
    config: ScanConfig,
    plan: ProbePlan,
    targets: Vec<Target>,
    targets_by_addr: HashMap<IpAddr, usize>,
    /// Plan index by identifying fields, for refining already-recorded
    /// states with late responses
    plan_key_index: HashMap<KeyKind, usize>,
    transport: T,
    scheduler: ProbeScheduler,
    group: GroupManager,
    /// Group-wide window over total outstanding probes, on top of the
    /// per-host windows; loss anywhere throttles the whole group
    group_congestion: CongestionController,
    inflight: InFlightTable,
    stats: ScanStats,
    cancel: CancellationToken,
}

impl<T: ProbeTransport> ScanEngine<T> {
    /// Build an engine for one scan. Fails fast on configuration errors;
    /// nothing touches the network until `run`.
    pub fn new(
        config: ScanConfig,
        addrs: Vec<IpAddr>,
        plan: ProbePlan,
        transport: T,
    ) -> crate::Result<Self> {
        config.validate()?;
        if addrs.is_empty() {
            return Err(ScanError::InvalidTarget("no targets supplied".to_string()));
        }
        if plan.is_empty() {
            return Err(ScanError::EmptyPlan);
        }
        if plan.scan_type() != config.scan_type {
            return Err(ScanError::ConfigError(format!(
                "plan built for {} but config requests {}",
                plan.scan_type().name(),
                config.scan_type.name()
            )));
        }

        let targets: Vec<Target> = addrs
            .iter()
            .map(|&addr| Target::new(addr, &plan, &config.timing))
            .collect();
        let targets_by_addr = addrs
            .iter()
            .enumerate()
            .map(|(i, &addr)| (addr, i))
            .collect();

        // Echo probes correlate by token, not by static fields, so only
        // port-addressed entries land in the refinement index. First entry
        // wins on duplicates, matching scheduler order.
        let mut plan_key_index = HashMap::new();
        for (index, spec) in plan.iter().enumerate() {
            let (_, kind) = probe_key(addrs[0], spec, ProbeToken(0));
            if matches!(kind, KeyKind::Port(..)) {
                plan_key_index.entry(kind).or_insert(index);
            }
        }

        let scheduler = ProbeScheduler::new(config.timing.max_retries);
        let group = GroupManager::new(config.group.clone(), targets.len());
        let group_congestion = CongestionController::new(&config.timing);

        Ok(Self {
            config,
            plan,
            targets,
            targets_by_addr,
            plan_key_index,
            transport,
            scheduler,
            group,
            group_congestion,
            inflight: InFlightTable::new(),
            stats: ScanStats::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Token for cooperative early termination. In-flight probes are
    /// abandoned, partial results are still reported.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive the scan to completion (or cancellation) and report.
    ///
    /// Errors only on fatal transport failures; host timeouts and probe
    /// loss are reflected in the report, never here.
    pub async fn run(&mut self) -> crate::Result<ScanReport> {
        let started = Instant::now();
        let scan_deadline = self.config.scan_timeout.map(|budget| started + budget);
        let cancel = self.cancel.clone();

        info!(
            "scan start: {} hosts x {} probes, {} scan",
            self.targets.len(),
            self.plan.len(),
            self.config.scan_type.name()
        );

        let mut cancelled = false;
        loop {
            let now = Instant::now();

            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if scan_deadline.is_some_and(|d| now >= d) {
                warn!("global scan budget exhausted, abandoning remaining hosts");
                cancelled = true;
                break;
            }

            // Lifecycle: retire over-budget hosts, reclaim their probe
            // slots, pull replacements into the group.
            if self.group.expire_host_timeouts(&mut self.targets, now) > 0 {
                self.inflight.retain_active(&self.targets);
            }
            self.group.admit(&mut self.targets, now, self.config.host_timeout);

            self.transmit(now)?;

            if self.group.all_done(&self.targets) {
                break;
            }

            let deadline = [
                self.inflight.nearest_deadline(),
                self.group.nearest_host_deadline(&self.targets),
                scan_deadline,
            ]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(now + IDLE_TICK);

            let events = tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                polled = self.transport.poll(deadline) => polled?,
            };

            let now = Instant::now();
            for event in events {
                self.handle_event(event, now);
            }
            self.expire_probes(now);
            self.inflight.retain_active(&self.targets);
        }

        let report = ScanReport {
            scan_type: self.config.scan_type,
            hosts: self.targets.iter().map(HostReport::from_target).collect(),
            stats: self.stats.clone(),
            duration: started.elapsed(),
            cancelled,
            config: self.config.clone(),
        };
        info!(
            "scan end: {}/{} hosts completed, {} probes sent, {} responses, {} timeouts{}",
            report.completed_hosts(),
            report.hosts.len(),
            report.stats.probes_sent,
            report.stats.responses_received,
            report.stats.timeouts,
            if cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Send every probe the windows allow this pass, gated on both the
    /// per-host and the group-wide congestion window
    fn transmit(&mut self, now: Instant) -> crate::Result<()> {
        let mut group_slack = self
            .group_congestion
            .window()
            .saturating_sub(self.inflight.live());
        for idx in 0..self.targets.len() {
            loop {
                if group_slack == 0 {
                    return Ok(());
                }
                let target = &mut self.targets[idx];
                if !target.has_selectable_work() {
                    break;
                }
                let Some(probe) = self.scheduler.next_probe(target) else {
                    break;
                };

                let addr = target.addr();
                let timeout = target.timing().probe_timeout();
                let token = self.inflight.reserve();
                let key = probe_key(addr, &probe.spec, token);
                self.inflight.commit(
                    token,
                    InFlight {
                        target_idx: idx,
                        plan_index: probe.plan_index,
                        spec: probe.spec,
                        key,
                        sent_at: now,
                        deadline: now + timeout,
                        attempt: probe.attempt,
                        generation: self.inflight.decode(token).1,
                    },
                );
                self.transport.send(addr, &probe.spec, token)?;
                self.stats.probes_sent += 1;
                group_slack -= 1;
                debug!(
                    "sent {:?} to {} (attempt {}, timeout {:?}, {} in flight)",
                    probe.spec,
                    addr,
                    probe.attempt,
                    timeout,
                    self.inflight.live()
                );
            }
        }
        Ok(())
    }

    /// Match one delivered response and apply it
    fn handle_event(&mut self, event: ProbeEvent, now: Instant) {
        let slot = event
            .token
            .and_then(|token| self.inflight.slot_for_token(token))
            .or_else(|| self.inflight.slot_for_key(&response_key(&event)));

        let Some(probe) = slot.and_then(|slot| self.inflight.remove(slot)) else {
            self.try_refine(event);
            return;
        };
        let target = &mut self.targets[probe.target_idx];
        if target.state() != HostState::Active {
            self.stats.unmatched_responses += 1;
            return;
        }

        // Karn's rule: a response to a retransmitted probe is a delivery
        // but not a usable RTT sample.
        let rtt = (probe.attempt == 1).then(|| now.duration_since(probe.sent_at));
        target.timing_mut().record_response(rtt);
        self.group_congestion.record_success();
        self.stats.responses_received += 1;

        let outcome = classify(self.config.scan_type, &probe.spec, Some(&event.response));
        target.resolve(probe.plan_index, outcome.state);
        debug!(
            "{} {:?} -> {} (srtt {:?}, cwnd {})",
            target.addr(),
            probe.spec,
            outcome.state,
            target.timing().srtt(),
            target.timing().window()
        );

        // Host discovery short-circuits: one proof of life answers the
        // whole work list.
        if self.config.scan_type == crate::network::ScanType::Ping
            && outcome.state == PortState::Open
            && target.state() == HostState::Active
        {
            target.abandon_remaining(HostState::Completed);
        }
    }

    /// A response with no in-flight match may still refine an
    /// already-recorded ambiguous state; anything else is spurious.
    fn try_refine(&mut self, event: ProbeEvent) {
        let (_, kind) = response_key(&event);
        if let Some(&target_idx) = self.targets_by_addr.get(&event.from) {
            if let Some(&plan_index) = self.plan_key_index.get(&kind) {
                let spec = self.targets[target_idx].item(plan_index).spec;
                let outcome = classify(self.config.scan_type, &spec, Some(&event.response));
                if outcome.conclusive && self.targets[target_idx].refine(plan_index, outcome.state)
                {
                    debug!(
                        "late response refined {}:{:?} -> {}",
                        event.from, spec, outcome.state
                    );
                    self.stats.refinements += 1;
                    return;
                }
            }
        }
        debug!("discarding unmatched response from {}", event.from);
        self.stats.unmatched_responses += 1;
    }

    /// Handle every probe whose deadline has passed
    fn expire_probes(&mut self, now: Instant) {
        while let Some(probe) = self.inflight.pop_expired(now) {
            let target = &mut self.targets[probe.target_idx];
            if target.state() != HostState::Active {
                continue;
            }

            target.timing_mut().record_drop();
            self.group_congestion.record_drop();
            self.stats.timeouts += 1;

            if self.scheduler.retry_budget_left(target, probe.plan_index) {
                target.queue_retransmit(probe.plan_index);
                self.stats.retransmissions += 1;
                debug!(
                    "{} {:?} timed out, retrying (cwnd {}, next timeout {:?})",
                    target.addr(),
                    probe.spec,
                    target.timing().window(),
                    target.timing().probe_timeout()
                );
            } else {
                let outcome = classify(self.config.scan_type, &probe.spec, None);
                target.resolve(probe.plan_index, outcome.state);
                debug!(
                    "{} {:?} exhausted retries -> {}",
                    target.addr(),
                    probe.spec,
                    outcome.state
                );
            }
        }
    }
}
