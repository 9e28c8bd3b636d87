use crate::speedtest::{round_to, SpeedTestCallbacks, SpeedTestResult, TestPhase};
use tokio::sync::mpsc;

// Graph history kept per phase
const MAX_SAMPLES: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum TestUpdate {
    Progress {
        phase: TestPhase,
        percent: f64,
        current_value: f64,
    },
    DataPoint {
        phase: TestPhase,
        mbps: f64,
    },
    LatencySample(f64),
    PhaseComplete {
        phase: TestPhase,
        value: f64,
    },
}

/// Forwards engine callbacks to the host's event loop.
#[derive(Debug, Clone)]
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<TestUpdate>,
}

impl ChannelCallbacks {
    pub fn new(tx: mpsc::UnboundedSender<TestUpdate>) -> Self {
        Self { tx }
    }

    fn send(&self, update: TestUpdate) {
        // The host may have stopped listening; the run still completes.
        let _ = self.tx.send(update);
    }
}

impl SpeedTestCallbacks for ChannelCallbacks {
    fn on_progress(&self, phase: TestPhase, percent: f64, current_value: f64) {
        self.send(TestUpdate::Progress {
            phase,
            percent,
            current_value,
        });
    }

    fn on_data_point(&self, phase: TestPhase, mbps: f64) {
        self.send(TestUpdate::DataPoint { phase, mbps });
    }

    fn on_latency_sample(&self, rtt_ms: f64) {
        self.send(TestUpdate::LatencySample(rtt_ms));
    }

    fn on_phase_complete(&self, phase: TestPhase, value: f64) {
        self.send(TestUpdate::PhaseComplete { phase, value });
    }
}

/// Host-side view of a run, folded from `TestUpdate`s.
#[derive(Debug, Default)]
pub struct App {
    pub phase: Option<TestPhase>,
    pub progress: f64,
    pub current_value: f64,

    pub ping_ms: Option<f64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,

    pub download_samples: Vec<f64>,
    pub upload_samples: Vec<f64>,
    pub ping_samples: Vec<f64>,

    pub result: Option<SpeedTestResult>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_for_new_test(&mut self) {
        *self = Self::default();
        self.phase = Some(TestPhase::Ping);
    }

    pub fn handle_update(&mut self, update: TestUpdate) {
        match update {
            TestUpdate::Progress {
                phase,
                percent,
                current_value,
            } => {
                self.phase = Some(phase);
                self.progress = percent;
                self.current_value = current_value;
            }
            TestUpdate::DataPoint { phase, mbps } => match phase {
                TestPhase::Download => push_sample(&mut self.download_samples, mbps),
                TestPhase::Upload => push_sample(&mut self.upload_samples, mbps),
                TestPhase::Ping => {}
            },
            TestUpdate::LatencySample(rtt) => push_sample(&mut self.ping_samples, rtt),
            TestUpdate::PhaseComplete { phase, value } => match phase {
                TestPhase::Ping => self.ping_ms = Some(value.round()),
                TestPhase::Download => self.download_mbps = Some(round_to(value, 2)),
                TestPhase::Upload => self.upload_mbps = Some(round_to(value, 2)),
            },
        }
    }

    pub fn complete_test(&mut self, result: SpeedTestResult) {
        self.phase = None;
        self.progress = 100.0;
        self.result = Some(result);
    }

    pub fn status_line(&self) -> String {
        match self.phase {
            Some(phase) => {
                let unit = match phase {
                    TestPhase::Ping => "ms",
                    _ => "Mbps",
                };
                format!(
                    "{:<8} {:>5.1}%  {} {}",
                    phase,
                    self.progress,
                    self.current_value.round(),
                    unit
                )
            }
            None => "idle".to_string(),
        }
    }
}

fn push_sample(samples: &mut Vec<f64>, value: f64) {
    samples.push(value);
    if samples.len() > MAX_SAMPLES {
        samples.remove(0);
    }
}
