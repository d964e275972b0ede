//! Per-host scan state: the work list, port states and timing
//!
//! A `Target` is owned exclusively by the engine for the scan's duration.
//! Its work list mirrors the probe plan one-to-one; every item walks
//! `Pending -> InFlight -> Done(state)`, with ambiguous states subject to
//! refinement by later, more specific results.

use std::collections::VecDeque;
use std::net::IpAddr;
use tokio::time::Instant;

use crate::config::TimingConfig;
use crate::network::probe::{ProbePlan, ProbeSpec};
use crate::network::PortState;
use crate::utils::timing::HostTimingState;

/// Host lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Pending,
    Active,
    Completed,
    HostTimedOut,
}

/// State of one work item (one plan entry for one host)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Pending,
    InFlight,
    Done(PortState),
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub spec: ProbeSpec,
    pub state: WorkState,
    /// Attempts sent so far, including the first
    pub attempts: u32,
}

/// One scanned host
#[derive(Debug)]
pub struct Target {
    addr: IpAddr,
    items: Vec<WorkItem>,
    /// Plan indices queued for retransmission, oldest first
    retransmit: VecDeque<usize>,
    /// Cursor over items that never had a first attempt
    next_fresh: usize,
    /// Probes currently on the wire for this host
    outstanding: usize,
    unresolved: usize,
    timing: HostTimingState,
    state: HostState,
    /// Absolute per-host budget, armed on activation
    deadline: Option<Instant>,
}

impl Target {
    pub fn new(addr: IpAddr, plan: &ProbePlan, timing: &TimingConfig) -> Self {
        let items: Vec<WorkItem> = plan
            .iter()
            .map(|&spec| WorkItem {
                spec,
                state: WorkState::Pending,
                attempts: 0,
            })
            .collect();
        let unresolved = items.len();
        Self {
            addr,
            items,
            retransmit: VecDeque::new(),
            next_fresh: 0,
            outstanding: 0,
            unresolved,
            timing: HostTimingState::new(timing),
            state: HostState::Pending,
            deadline: None,
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn timing(&self) -> &HostTimingState {
        &self.timing
    }

    pub fn timing_mut(&mut self) -> &mut HostTimingState {
        &mut self.timing
    }

    pub fn item(&self, index: usize) -> &WorkItem {
        &self.items[index]
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn unresolved(&self) -> usize {
        self.unresolved
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Move the host into the active group
    pub fn activate(&mut self, now: Instant, host_timeout: Option<std::time::Duration>) {
        debug_assert_eq!(self.state, HostState::Pending);
        self.state = HostState::Active;
        self.deadline = host_timeout.map(|budget| now + budget);
    }

    /// Spare capacity under the congestion window
    pub fn window_slack(&self) -> usize {
        self.timing.window().saturating_sub(self.outstanding)
    }

    /// Whether the scheduler could produce another probe right now
    pub fn has_selectable_work(&self) -> bool {
        self.state == HostState::Active
            && self.window_slack() > 0
            && (!self.retransmit.is_empty() || self.next_fresh < self.items.len())
    }

    /// Pop the next unit of work: retransmissions first, then fresh plan
    /// entries in caller order. Returns the plan index. Never blocks.
    pub(crate) fn take_next_work(&mut self) -> Option<usize> {
        if let Some(index) = self.retransmit.pop_front() {
            return Some(index);
        }
        while self.next_fresh < self.items.len() {
            let index = self.next_fresh;
            self.next_fresh += 1;
            if self.items[index].state == WorkState::Pending {
                return Some(index);
            }
        }
        None
    }

    pub(crate) fn mark_sent(&mut self, index: usize) {
        let item = &mut self.items[index];
        item.state = WorkState::InFlight;
        item.attempts += 1;
        self.outstanding += 1;
        self.timing.record_sent();
    }

    /// Queue a timed-out probe for another attempt
    pub(crate) fn queue_retransmit(&mut self, index: usize) {
        debug_assert_eq!(self.items[index].state, WorkState::InFlight);
        self.items[index].state = WorkState::Pending;
        self.outstanding -= 1;
        self.retransmit.push_back(index);
    }

    /// Record a terminal (or refinable) state for an in-flight item
    pub(crate) fn resolve(&mut self, index: usize, state: PortState) {
        debug_assert_eq!(self.items[index].state, WorkState::InFlight);
        self.outstanding -= 1;
        self.unresolved -= 1;
        self.items[index].state = WorkState::Done(state);
        self.check_completion();
    }

    /// Refine an already-recorded state with a later result.
    ///
    /// A state is only replaced by a strictly more specific one; a specific
    /// state is never downgraded to an ambiguous one.
    pub(crate) fn refine(&mut self, index: usize, state: PortState) -> bool {
        match self.items[index].state {
            WorkState::Done(existing) if state.specificity() > existing.specificity() => {
                self.items[index].state = WorkState::Done(state);
                true
            }
            _ => false,
        }
    }

    /// Host timeout or cancellation: every unresolved port gets the
    /// conservative `Unknown`, in-flight probes are abandoned.
    pub(crate) fn abandon_remaining(&mut self, terminal: HostState) {
        for item in &mut self.items {
            if !matches!(item.state, WorkState::Done(_)) {
                item.state = WorkState::Done(PortState::Unknown);
            }
        }
        self.retransmit.clear();
        self.next_fresh = self.items.len();
        self.outstanding = 0;
        self.unresolved = 0;
        self.state = terminal;
    }

    fn check_completion(&mut self) {
        if self.unresolved == 0 && self.state == HostState::Active {
            self.state = HostState::Completed;
        }
    }

    /// Final per-port states, in plan order
    pub fn port_states(&self) -> Vec<(ProbeSpec, PortState)> {
        self.items
            .iter()
            .map(|item| {
                let state = match item.state {
                    WorkState::Done(state) => state,
                    _ => PortState::Unknown,
                };
                (item.spec, state)
            })
            .collect()
    }
}
