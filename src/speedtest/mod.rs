pub mod download;
pub mod engine;
pub mod payload;
pub mod ping;
pub mod throughput;
pub mod transport;
pub mod upload;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use engine::SpeedTest;
pub use transport::{HttpTransport, Transport};

/// Download plan: a small warm-up, the main measurement, then large transfers for fast links.
pub const DOWNLOAD_PHASES: [MeasurementPhase; 3] = [
    MeasurementPhase::new(1_000_000, 4),
    MeasurementPhase::new(5_000_000, 6),
    MeasurementPhase::new(10_000_000, 4),
];

/// Upload plan, sized down since upload links are usually slower.
pub const UPLOAD_PHASES: [MeasurementPhase; 3] = [
    MeasurementPhase::new(500_000, 4),
    MeasurementPhase::new(2_000_000, 6),
    MeasurementPhase::new(5_000_000, 4),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPhase {
    Ping,
    Download,
    Upload,
}

impl TestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TestPhase::Ping => "ping",
            TestPhase::Download => "download",
            TestPhase::Upload => "upload",
        }
    }
}

impl fmt::Display for TestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One graduated step of a throughput plan, e.g. "4 transfers of 1MB".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementPhase {
    pub transfer_size_bytes: u64,
    pub transfer_count: u32,
}

impl MeasurementPhase {
    pub const fn new(transfer_size_bytes: u64, transfer_count: u32) -> Self {
        Self {
            transfer_size_bytes,
            transfer_count,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.transfer_size_bytes > 0 && self.transfer_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub ping_ms: u64,
    /// Unloaded latency; same value as `ping_ms`.
    pub latency_ms: u64,
    pub jitter_ms: f64,
    pub server_name: String,
}

/// Live progress hooks for a host. Every method defaults to a no-op.
pub trait SpeedTestCallbacks: Send + Sync {
    /// After every latency probe and every throughput transfer.
    fn on_progress(&self, _phase: TestPhase, _percent: f64, _current_value: f64) {}

    /// Raw Mbps after every throughput transfer, for graphing.
    fn on_data_point(&self, _phase: TestPhase, _mbps: f64) {}

    fn on_latency_sample(&self, _rtt_ms: f64) {}

    /// Once per stage with its summary value (median ms or Mbps).
    fn on_phase_complete(&self, _phase: TestPhase, _value: f64) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

impl SpeedTestCallbacks for NoopCallbacks {}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
