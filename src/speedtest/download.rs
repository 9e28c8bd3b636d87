use super::throughput::run_stage;
use super::transport::{cache_buster, Transport};
use super::{MeasurementPhase, SpeedTestCallbacks, TestPhase};
use crate::error::SpeedTestError;
use futures::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CACHE_CONTROL};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub struct DownloadTest<'a> {
    phases: &'a [MeasurementPhase],
    ceiling: Duration,
}

impl<'a> DownloadTest<'a> {
    pub fn new(phases: &'a [MeasurementPhase], ceiling: Duration) -> Self {
        Self { phases, ceiling }
    }

    /// Overall download Mbps across every completed transfer.
    pub async fn run<T: Transport>(
        &self,
        transport: &T,
        cancel: &CancellationToken,
        callbacks: &dyn SpeedTestCallbacks,
    ) -> Result<f64, SpeedTestError> {
        run_stage(
            TestPhase::Download,
            self.phases,
            self.ceiling,
            cancel,
            callbacks,
            |bytes| transport.download(bytes),
        )
        .await
    }
}

/// `GET __down?bytes=N` with caching and compression disabled.
pub(crate) fn request(client: &Client, url: &str, bytes: u64) -> RequestBuilder {
    client
        .get(url)
        .query(&[("bytes", bytes.to_string()), ("_", cache_buster())])
        .header(CACHE_CONTROL, "no-cache, no-store")
        .header(ACCEPT_ENCODING, "identity")
}

pub(crate) fn ensure_success(
    phase: TestPhase,
    response: Response,
) -> Result<Response, SpeedTestError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SpeedTestError::TransferFailed { phase, status })
    }
}

/// Reads the whole body so the bytes have actually crossed the wire.
pub(crate) async fn drain(response: Response) -> Result<u64, SpeedTestError> {
    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;
    while let Some(chunk) = stream.next().await {
        received += chunk?.len() as u64;
    }
    Ok(received)
}

/// Bytes to credit for one download: the advertised Content-Length, else the requested size.
pub fn accounted_bytes(content_length: Option<u64>, requested: u64) -> u64 {
    content_length.unwrap_or(requested)
}

pub(crate) async fn fetch(client: &Client, url: &str, bytes: u64) -> Result<u64, SpeedTestError> {
    let response = ensure_success(TestPhase::Download, request(client, url, bytes).send().await?)?;
    let content_length = response.content_length();
    let received = drain(response).await?;
    trace!(requested = bytes, ?content_length, received, "download drained");
    Ok(accounted_bytes(content_length, bytes))
}
