use crate::speedtest::TestPhase;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("Aborted")]
    Aborted,
    #[error("Latency measurement failed")]
    LatencyMeasurementFailed,
    #[error("Download test failed")]
    DownloadTestFailed,
    #[error("Upload test failed")]
    UploadTestFailed,
    #[error("{phase} request failed: {status}")]
    TransferFailed { phase: TestPhase, status: StatusCode },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl SpeedTestError {
    /// A run stopped by `abort()` rather than by a failure.
    pub fn is_aborted(&self) -> bool {
        matches!(self, SpeedTestError::Aborted)
    }

    pub fn is_rate_limited(&self) -> bool {
        match self {
            SpeedTestError::TransferFailed { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
            }
            SpeedTestError::Http(error) => error.status() == Some(StatusCode::TOO_MANY_REQUESTS),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),
    #[error("base_url must not be empty")]
    EmptyBaseUrl,
    #[error("stage_ceiling_ms must be greater than zero")]
    ZeroCeiling,
    #[error("{phase} plan has no phases")]
    EmptyPlan { phase: TestPhase },
    #[error("{phase} phase #{index} must have a non-zero size and count")]
    InvalidPhase { phase: TestPhase, index: usize },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Figment(Box::new(error))
    }
}
