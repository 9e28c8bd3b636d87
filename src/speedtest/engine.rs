use super::download::DownloadTest;
use super::ping::PingTest;
use super::transport::{HttpTransport, Transport};
use super::upload::UploadTest;
use super::{round_to, SpeedTestCallbacks, SpeedTestResult, TestPhase};
use crate::config::Settings;
use crate::error::SpeedTestError;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs latency, download and upload stages in order against one transport.
///
/// Every run gets its own cancellation token; `abort` cancels the most recent one. Stages
/// observe it before each probe or transfer and after the latency and download stages.
#[derive(Debug)]
pub struct SpeedTest<T = HttpTransport> {
    transport: T,
    settings: Settings,
    current_run: Mutex<CancellationToken>,
}

impl SpeedTest<HttpTransport> {
    pub fn new(settings: Settings) -> Result<Self, SpeedTestError> {
        settings.validate()?;
        let transport = HttpTransport::new(&settings)?;
        Ok(Self::with_transport(transport, settings))
    }
}

impl<T: Transport> SpeedTest<T> {
    pub fn with_transport(transport: T, settings: Settings) -> Self {
        Self {
            transport,
            settings,
            current_run: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Stops the active run at its next checkpoint. In-flight requests are left to finish.
    pub fn abort(&self) {
        self.current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    fn start_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    pub async fn run(
        &self,
        callbacks: &dyn SpeedTestCallbacks,
    ) -> Result<SpeedTestResult, SpeedTestError> {
        let cancel = self.start_run();
        let result = self.run_stages(&cancel, callbacks).await;
        match &result {
            Ok(summary) => info!(
                download_mbps = summary.download_mbps,
                upload_mbps = summary.upload_mbps,
                ping_ms = summary.ping_ms,
                jitter_ms = summary.jitter_ms,
                "speed test finished"
            ),
            Err(SpeedTestError::Aborted) => warn!("speed test aborted"),
            Err(error) => warn!(%error, "speed test failed"),
        }
        result
    }

    async fn run_stages(
        &self,
        cancel: &CancellationToken,
        callbacks: &dyn SpeedTestCallbacks,
    ) -> Result<SpeedTestResult, SpeedTestError> {
        let ceiling = self.settings.stage_ceiling();

        let ping = PingTest::new(self.settings.latency_samples)
            .run(&self.transport, cancel, callbacks)
            .await?;
        callbacks.on_phase_complete(TestPhase::Ping, ping.ping_ms);
        ensure_active(cancel)?;

        let download_mbps = DownloadTest::new(&self.settings.download_phases, ceiling)
            .run(&self.transport, cancel, callbacks)
            .await?;
        callbacks.on_phase_complete(TestPhase::Download, download_mbps);
        ensure_active(cancel)?;

        let upload_mbps = UploadTest::new(&self.settings.upload_phases, ceiling)
            .run(&self.transport, cancel, callbacks)
            .await?;
        callbacks.on_phase_complete(TestPhase::Upload, upload_mbps);

        let ping_ms = ping.ping_ms.round() as u64;
        Ok(SpeedTestResult {
            download_mbps: round_to(download_mbps, 2),
            upload_mbps: round_to(upload_mbps, 2),
            ping_ms,
            latency_ms: ping_ms,
            jitter_ms: round_to(ping.jitter_ms(), 1),
            server_name: self.settings.server_name.clone(),
        })
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), SpeedTestError> {
    if cancel.is_cancelled() {
        Err(SpeedTestError::Aborted)
    } else {
        Ok(())
    }
}
