//! Probe scheduler: picks the next probe for a runnable host
//!
//! Selection policy: retransmissions of dropped probes outrank first
//! attempts; first attempts go out in the order the caller supplied the
//! plan. Selection is gated on the host's congestion window and never
//! blocks.

use crate::network::probe::ProbeSpec;
use crate::scanner::target::Target;

/// One scheduling decision: which probe to put on the wire next
#[derive(Debug, Clone, Copy)]
pub struct ScheduledProbe {
    /// Index into the probe plan (and the target's work list)
    pub plan_index: usize,
    pub spec: ProbeSpec,
    /// 1 for the first attempt, 2+ for retransmissions
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct ProbeScheduler {
    max_retries: u32,
}

impl ProbeScheduler {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Select the next probe for `target`, consuming one window slot.
    ///
    /// Returns `None` when the window is full or no work is selectable.
    pub fn next_probe(&self, target: &mut Target) -> Option<ScheduledProbe> {
        if target.window_slack() == 0 {
            return None;
        }
        let plan_index = target.take_next_work()?;
        target.mark_sent(plan_index);
        let item = target.item(plan_index);
        Some(ScheduledProbe {
            plan_index,
            spec: item.spec,
            attempt: item.attempts,
        })
    }

    /// Whether a timed-out probe may be retransmitted.
    ///
    /// A probe fails permanently once it has burned its first attempt plus
    /// `max_retries` retransmissions.
    pub fn retry_budget_left(&self, target: &Target, plan_index: usize) -> bool {
        target.item(plan_index).attempts < 1 + self.max_retries
    }
}
