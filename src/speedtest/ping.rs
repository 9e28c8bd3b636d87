use super::download::{drain, ensure_success, request};
use super::transport::Transport;
use super::{SpeedTestCallbacks, TestPhase};
use crate::error::SpeedTestError;
use reqwest::Client;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct PingTest {
    samples: Vec<f64>,
    ping_count: usize,
}

impl PingTest {
    pub fn new(ping_count: usize) -> Self {
        Self {
            samples: Vec::with_capacity(ping_count),
            ping_count,
        }
    }

    /// Sequential probes; the median round trip becomes the ping.
    pub async fn run<T: Transport>(
        &mut self,
        transport: &T,
        cancel: &CancellationToken,
        callbacks: &dyn SpeedTestCallbacks,
    ) -> Result<PingResult, SpeedTestError> {
        self.samples.clear();

        for i in 0..self.ping_count {
            if cancel.is_cancelled() {
                return Err(SpeedTestError::Aborted);
            }

            let start = Instant::now();
            transport.probe().await?;
            let rtt = start.elapsed().as_secs_f64() * 1000.0;
            self.samples.push(rtt);
            debug!(sample = i + 1, rtt_ms = rtt, "latency probe");

            let percent = (i + 1) as f64 * 100.0 / self.ping_count as f64;
            callbacks.on_progress(TestPhase::Ping, percent, rtt.round());
            callbacks.on_latency_sample(rtt);
        }

        let ping_ms = median(&self.samples).ok_or(SpeedTestError::LatencyMeasurementFailed)?;
        Ok(PingResult {
            ping_ms,
            samples: self.samples.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PingResult {
    pub ping_ms: f64,
    /// In the order they were measured.
    pub samples: Vec<f64>,
}

impl PingResult {
    pub fn jitter_ms(&self) -> f64 {
        jitter(&self.samples)
    }
}

/// Element at `len / 2` of the sorted samples. Even-length input is not averaged.
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted[sorted.len() / 2])
}

/// Mean absolute difference between consecutive samples, in measurement order.
pub fn jitter(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let total: f64 = samples
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).abs())
        .sum();
    total / (samples.len() - 1) as f64
}

pub(crate) async fn probe(client: &Client, url: &str) -> Result<(), SpeedTestError> {
    let response = ensure_success(TestPhase::Ping, request(client, url, 0).send().await?)?;
    drain(response).await?;
    Ok(())
}
