//! Configuration for the deimos engine

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ScanError;
use crate::network::ScanType;

/// Main configuration structure for a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scan type driving probe construction and classification
    pub scan_type: ScanType,

    /// RTT estimation and retransmission parameters
    pub timing: TimingConfig,

    /// Host group sizing parameters
    pub group: GroupSizeTunables,

    /// Overall per-host time budget; `None` means unbounded
    pub host_timeout: Option<Duration>,

    /// Global wall-clock budget for the whole scan; `None` means unbounded
    pub scan_timeout: Option<Duration>,
}

impl ScanConfig {
    pub fn new(scan_type: ScanType) -> Self {
        Self {
            scan_type,
            timing: TimingConfig::default(),
            group: GroupSizeTunables::default(),
            host_timeout: None,
            scan_timeout: None,
        }
    }

    /// Apply a timing template, keeping everything else
    pub fn with_template(mut self, template: TimingTemplate) -> Self {
        self.timing = template.timing();
        self
    }

    pub fn with_host_timeout(mut self, budget: Duration) -> Self {
        self.host_timeout = Some(budget);
        self
    }

    pub fn with_scan_timeout(mut self, budget: Duration) -> Self {
        self.scan_timeout = Some(budget);
        self
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ScanError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: ScanConfig = toml::from_str(&content)
            .map_err(|e| ScanError::ConfigError(format!("Failed to parse TOML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration; called before any probe is sent
    pub fn validate(&self) -> crate::Result<()> {
        self.timing.validate()?;
        self.group.validate()?;

        if let Some(budget) = self.host_timeout {
            if budget.is_zero() {
                return Err(ScanError::ConfigError(
                    "Host timeout must be non-zero".to_string(),
                ));
            }
        }
        if let Some(budget) = self.scan_timeout {
            if budget.is_zero() {
                return Err(ScanError::ConfigError(
                    "Scan timeout must be non-zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(ScanType::Syn)
    }
}

/// Timing parameters: RTT estimation, timeout bounds, retransmission budget
/// and congestion window limits
///
/// The smoothing constants are deliberately configuration, not code: they
/// are tuned policy, and tests pin behavior through them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Probe timeout before the first RTT sample arrives
    pub initial_rtt_timeout: Duration,

    /// Lower clamp for the computed probe timeout
    pub min_rtt_timeout: Duration,

    /// Upper clamp for the computed probe timeout, including loss backoff
    pub max_rtt_timeout: Duration,

    /// Retransmissions allowed per probe before it fails permanently
    pub max_retries: u32,

    /// Smoothing gain for srtt (RFC 6298 alpha)
    pub rtt_alpha: f64,

    /// Smoothing gain for rttvar (RFC 6298 beta)
    pub rtt_beta: f64,

    /// Variance multiplier when deriving the timeout from srtt
    pub rtt_var_factor: f64,

    /// Congestion window at host start
    pub initial_cwnd: f64,

    /// Hard cap on the per-host congestion window
    pub max_cwnd: f64,

    /// Multiplicative window decrease applied per drop
    pub cwnd_backoff: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingTemplate::Normal.timing()
    }
}

impl TimingConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_rtt_timeout > self.max_rtt_timeout {
            return Err(ScanError::ConfigError(format!(
                "min_rtt_timeout {:?} exceeds max_rtt_timeout {:?}",
                self.min_rtt_timeout, self.max_rtt_timeout
            )));
        }
        if self.min_rtt_timeout.is_zero() {
            return Err(ScanError::ConfigError(
                "min_rtt_timeout must be non-zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.rtt_alpha) || !(0.0..1.0).contains(&self.rtt_beta) {
            return Err(ScanError::ConfigError(
                "RTT smoothing gains must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.cwnd_backoff) {
            return Err(ScanError::ConfigError(
                "cwnd_backoff must be in [0, 1)".to_string(),
            ));
        }
        if self.initial_cwnd < 1.0 || self.max_cwnd < self.initial_cwnd {
            return Err(ScanError::ConfigError(
                "congestion window bounds must satisfy 1 <= initial <= max".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tunables for the host group size estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSizeTunables {
    /// Smallest group the estimator may return (when hosts remain)
    pub min_group_size: usize,

    /// Hard cap on the group size
    pub max_group_size: usize,

    /// Completed hosts needed per unit of ramp-up
    pub ramp_divisor: usize,
}

impl Default for GroupSizeTunables {
    fn default() -> Self {
        Self {
            min_group_size: 4,
            max_group_size: 64,
            ramp_divisor: 2,
        }
    }
}

impl GroupSizeTunables {
    pub fn validate(&self) -> crate::Result<()> {
        if self.min_group_size == 0 {
            return Err(ScanError::ConfigError(
                "min_group_size must be at least 1".to_string(),
            ));
        }
        if self.max_group_size < self.min_group_size {
            return Err(ScanError::ConfigError(format!(
                "max_group_size {} below min_group_size {}",
                self.max_group_size, self.min_group_size
            )));
        }
        if self.ramp_divisor == 0 {
            return Err(ScanError::ConfigError(
                "ramp_divisor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Timing templates, slowest to fastest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingTemplate {
    Paranoid,
    Sneaky,
    Polite,
    Normal,
    Aggressive,
    Insane,
}

impl TimingTemplate {
    /// Get timing parameters for the template
    pub fn timing(&self) -> TimingConfig {
        let base = |initial: u64, min: u64, max: u64, retries: u32, cwnd_cap: f64| TimingConfig {
            initial_rtt_timeout: Duration::from_millis(initial),
            min_rtt_timeout: Duration::from_millis(min),
            max_rtt_timeout: Duration::from_millis(max),
            max_retries: retries,
            rtt_alpha: 0.125,
            rtt_beta: 0.25,
            rtt_var_factor: 4.0,
            initial_cwnd: cwnd_cap.min(10.0),
            max_cwnd: cwnd_cap,
            cwnd_backoff: 0.5,
        };
        match self {
            TimingTemplate::Paranoid => base(5000, 1000, 10_000, 10, 1.0),
            TimingTemplate::Sneaky => base(2000, 500, 5000, 5, 4.0),
            TimingTemplate::Polite => base(1000, 200, 3000, 3, 32.0),
            TimingTemplate::Normal => base(1000, 100, 10_000, 3, 300.0),
            TimingTemplate::Aggressive => base(500, 50, 1250, 2, 300.0),
            TimingTemplate::Insane => base(250, 50, 300, 1, 300.0),
        }
    }
}
