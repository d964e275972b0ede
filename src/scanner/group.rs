//! Host group sizing and lifecycle management
//!
//! The estimator balances efficiency (more hosts in parallel amortizes the
//! long timeout tail) against results latency and memory; it starts small
//! so the first results arrive early and ramps up as hosts complete.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::GroupSizeTunables;
use crate::scanner::target::{HostState, Target};

/// Ideal number of hosts to scan in parallel.
///
/// Pure and deterministic. The result always lies within
/// `[min(tunables.min, remaining), min(tunables.max, remaining)]` where
/// `remaining = total - completed`, and is zero only when nothing remains.
pub fn estimate_group_size(
    completed: usize,
    total: usize,
    tunables: &GroupSizeTunables,
) -> usize {
    let remaining = total.saturating_sub(completed);
    if remaining == 0 {
        return 0;
    }
    let ramped = tunables
        .min_group_size
        .saturating_add(completed / tunables.ramp_divisor);
    ramped
        .clamp(tunables.min_group_size, tunables.max_group_size)
        .min(remaining)
}

/// Tracks per-host lifecycle and keeps the active group filled
#[derive(Debug)]
pub struct GroupManager {
    tunables: GroupSizeTunables,
    total: usize,
}

impl GroupManager {
    pub fn new(tunables: GroupSizeTunables, total: usize) -> Self {
        Self { tunables, total }
    }

    /// Hosts in a terminal state
    pub fn completed(&self, targets: &[Target]) -> usize {
        targets
            .iter()
            .filter(|t| matches!(t.state(), HostState::Completed | HostState::HostTimedOut))
            .count()
    }

    /// Hosts currently being probed
    pub fn active(&self, targets: &[Target]) -> usize {
        targets
            .iter()
            .filter(|t| t.state() == HostState::Active)
            .count()
    }

    /// Promote pending hosts into the active group up to the estimator's
    /// current capacity. Returns how many were admitted.
    pub fn admit(
        &self,
        targets: &mut [Target],
        now: Instant,
        host_timeout: Option<Duration>,
    ) -> usize {
        let capacity = estimate_group_size(self.completed(targets), self.total, &self.tunables);
        let mut active = self.active(targets);
        let mut admitted = 0;

        for target in targets.iter_mut() {
            if active >= capacity {
                break;
            }
            if target.state() == HostState::Pending {
                target.activate(now, host_timeout);
                active += 1;
                admitted += 1;
            }
        }
        admitted
    }

    /// Retire any active host whose overall budget has expired. Unresolved
    /// ports get `Unknown`; the host is reported, not fatal.
    pub fn expire_host_timeouts(&self, targets: &mut [Target], now: Instant) -> usize {
        let mut expired = 0;
        for target in targets.iter_mut() {
            if target.state() == HostState::Active {
                if let Some(deadline) = target.deadline() {
                    if now >= deadline {
                        log::warn!(
                            "host {} exceeded its time budget, {} ports unresolved",
                            target.addr(),
                            target.unresolved()
                        );
                        target.abandon_remaining(HostState::HostTimedOut);
                        expired += 1;
                    }
                }
            }
        }
        expired
    }

    /// Whether every host has reached a terminal state
    pub fn all_done(&self, targets: &[Target]) -> bool {
        self.completed(targets) == targets.len()
    }

    /// Earliest host deadline among active hosts, for the loop's bounded wait
    pub fn nearest_host_deadline(&self, targets: &[Target]) -> Option<Instant> {
        targets
            .iter()
            .filter(|t| t.state() == HostState::Active)
            .filter_map(|t| t.deadline())
            .min()
    }
}
