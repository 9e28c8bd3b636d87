use crate::error::ConfigError;
use crate::speedtest::{MeasurementPhase, TestPhase, DOWNLOAD_PHASES, UPLOAD_PHASES};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PULSESPEED_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub server_name: String,
    pub latency_samples: usize,
    pub stage_ceiling_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub download_phases: Vec<MeasurementPhase>,
    pub upload_phases: Vec<MeasurementPhase>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://speed.cloudflare.com".to_string(),
            server_name: "Cloudflare".to_string(),
            latency_samples: 5,
            stage_ceiling_ms: 10_000,
            request_timeout_secs: 120,
            connect_timeout_secs: 10,
            download_phases: DOWNLOAD_PHASES.to_vec(),
            upload_phases: UPLOAD_PHASES.to_vec(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional TOML file, then `PULSESPEED_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Settings = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }
        if self.stage_ceiling_ms == 0 {
            return Err(ConfigError::ZeroCeiling);
        }
        validate_plan(TestPhase::Download, &self.download_phases)?;
        validate_plan(TestPhase::Upload, &self.upload_phases)
    }

    pub fn stage_ceiling(&self) -> Duration {
        Duration::from_millis(self.stage_ceiling_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn download_url(&self) -> String {
        format!("{}/__down", self.base_url.trim_end_matches('/'))
    }

    pub fn upload_url(&self) -> String {
        format!("{}/__up", self.base_url.trim_end_matches('/'))
    }
}

fn validate_plan(phase: TestPhase, plan: &[MeasurementPhase]) -> Result<(), ConfigError> {
    if plan.is_empty() {
        return Err(ConfigError::EmptyPlan { phase });
    }
    match plan.iter().position(|step| !step.is_valid()) {
        Some(index) => Err(ConfigError::InvalidPhase { phase, index }),
        None => Ok(()),
    }
}
