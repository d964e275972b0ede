//! Deimos - the probe engine a scanner is built around
//!
//! Adaptive parallel probing with per-host RTT estimation, congestion
//! windows and retransmission, behind a transport-agnostic boundary.

pub mod config;
pub mod error;
pub mod network;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use config::{GroupSizeTunables, ScanConfig, TimingConfig, TimingTemplate};
pub use error::ScanError;
pub use network::probe::{ProbePlan, ProbeSpec};
pub use network::transport::{ProbeEvent, ProbeToken, ProbeTransport, Response};
pub use network::{PortState, Protocol, ScanType};
pub use scanner::engine::ScanEngine;
pub use scanner::group::estimate_group_size;
pub use scanner::{HostReport, ScanReport, ScanStats};

pub type Result<T> = std::result::Result<T, ScanError>;
