//! Phased HTTP speed test engine: median latency and jitter, then download and upload
//! throughput measured over sequential, time-boxed transfers.

pub mod app;
pub mod config;
pub mod error;
pub mod speedtest;

pub use config::Settings;
pub use error::{ConfigError, SpeedTestError};
pub use speedtest::{
    HttpTransport, MeasurementPhase, NoopCallbacks, SpeedTest, SpeedTestCallbacks,
    SpeedTestResult, TestPhase, Transport,
};
