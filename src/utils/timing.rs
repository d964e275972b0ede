//! RTT estimation and congestion control
//!
//! One `HostTimingState` lives inside every target; the host group shares a
//! `CongestionController` for group-wide pacing on top of the per-host
//! windows. Only the transmission/reception loop mutates them: clean
//! responses feed the RTT estimator and grow the windows, drops shrink the
//! windows and back the timeout off. Nothing else may touch them.

use std::time::Duration;

use crate::config::TimingConfig;

/// Round-trip time estimator
///
/// Standard exponentially-weighted smoothing (RFC 6298 shape): recent
/// samples weigh more, variance damps single-sample noise, and the derived
/// timeout is always clamped to the configured bounds.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    alpha: f64,
    beta: f64,
    var_factor: f64,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: timing.initial_rtt_timeout.clamp(timing.min_rtt_timeout, timing.max_rtt_timeout),
            alpha: timing.rtt_alpha,
            beta: timing.rtt_beta,
            var_factor: timing.rtt_var_factor,
            min_rto: timing.min_rtt_timeout,
            max_rto: timing.max_rtt_timeout,
        }
    }

    /// Update the estimate with a new measurement
    pub fn update(&mut self, rtt: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let diff = if rtt > srtt { rtt - srtt } else { srtt - rtt };

                self.rttvar = Duration::from_secs_f64(
                    (1.0 - self.beta) * self.rttvar.as_secs_f64()
                        + self.beta * diff.as_secs_f64(),
                );
                self.srtt = Some(Duration::from_secs_f64(
                    (1.0 - self.alpha) * srtt.as_secs_f64() + self.alpha * rtt.as_secs_f64(),
                ));
            }
        }

        let srtt = self.srtt.unwrap_or(rtt);
        let raw = srtt + Duration::from_secs_f64(self.var_factor * self.rttvar.as_secs_f64());
        self.rto = raw.clamp(self.min_rto, self.max_rto);
    }

    /// Current retransmission timeout, always within configured bounds
    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }
}

/// Congestion controller for outstanding probe count
///
/// Fractional window with a slow-start threshold: below it each clean
/// response adds a full slot, above it growth slows to one slot per
/// window's worth of responses. Drops halve the window (configurable
/// factor) and pull the threshold down with it. The window never grows on
/// a loss and never shrinks on a clean response.
#[derive(Debug, Clone)]
pub struct CongestionController {
    cwnd: f64,
    ssthresh: f64,
    max_cwnd: f64,
    backoff: f64,
}

impl CongestionController {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            cwnd: timing.initial_cwnd,
            ssthresh: timing.max_cwnd,
            max_cwnd: timing.max_cwnd,
            backoff: timing.cwnd_backoff,
        }
    }

    /// Record a clean response
    pub fn record_success(&mut self) {
        if self.cwnd < self.ssthresh {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
        self.cwnd = self.cwnd.min(self.max_cwnd);
    }

    /// Record a dropped probe
    pub fn record_drop(&mut self) {
        self.cwnd = (self.cwnd * self.backoff).max(1.0);
        self.ssthresh = self.cwnd;
    }

    /// Number of probes allowed outstanding right now
    pub fn window(&self) -> usize {
        self.cwnd as usize
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }
}

/// Per-host timing state: RTT estimate, congestion window, loss backoff
/// and traffic counters
#[derive(Debug, Clone)]
pub struct HostTimingState {
    rtt: RttEstimator,
    congestion: CongestionController,
    max_rto: Duration,
    /// Consecutive drops since the last clean response
    drop_streak: u32,
    pub sent: u64,
    pub received: u64,
    pub timed_out: u64,
}

impl HostTimingState {
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            rtt: RttEstimator::new(timing),
            congestion: CongestionController::new(timing),
            max_rto: timing.max_rtt_timeout,
            drop_streak: 0,
            sent: 0,
            received: 0,
            timed_out: 0,
        }
    }

    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// A clean response: feed the estimator, grow the window, clear the
    /// loss backoff. `rtt` is `None` for responses matched to retransmitted
    /// probes, which must not poison the estimate (Karn's rule) but still
    /// count as deliveries.
    pub fn record_response(&mut self, rtt: Option<Duration>) {
        self.received += 1;
        self.drop_streak = 0;
        if let Some(sample) = rtt {
            self.rtt.update(sample);
        }
        self.congestion.record_success();
    }

    /// A probe deadline expired with no response
    pub fn record_drop(&mut self) {
        self.timed_out += 1;
        self.drop_streak = self.drop_streak.saturating_add(1);
        self.congestion.record_drop();
    }

    /// Probe timeout to apply to the next send: the estimator's RTO,
    /// doubled per consecutive drop, clamped to the configured maximum.
    pub fn probe_timeout(&self) -> Duration {
        let base = self.rtt.rto();
        let shift = self.drop_streak.min(16);
        let backed_off = base.saturating_mul(1u32 << shift);
        backed_off.min(self.max_rto)
    }

    /// Outstanding-probe budget for this host
    pub fn window(&self) -> usize {
        self.congestion.window()
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.rtt.srtt()
    }

    pub fn drops_in_a_row(&self) -> u32 {
        self.drop_streak
    }
}
