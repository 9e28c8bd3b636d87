use super::download::{drain, ensure_success};
use super::throughput::run_stage;
use super::transport::{cache_buster, Transport};
use super::{MeasurementPhase, SpeedTestCallbacks, TestPhase};
use crate::error::SpeedTestError;
use bytes::Bytes;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct UploadTest<'a> {
    phases: &'a [MeasurementPhase],
    ceiling: Duration,
}

impl<'a> UploadTest<'a> {
    pub fn new(phases: &'a [MeasurementPhase], ceiling: Duration) -> Self {
        Self { phases, ceiling }
    }

    pub async fn run<T: Transport>(
        &self,
        transport: &T,
        cancel: &CancellationToken,
        callbacks: &dyn SpeedTestCallbacks,
    ) -> Result<f64, SpeedTestError> {
        run_stage(
            TestPhase::Upload,
            self.phases,
            self.ceiling,
            cancel,
            callbacks,
            |bytes| transport.upload(bytes),
        )
        .await
    }
}

/// `POST __up` with an opaque body, cache-busted like downloads. The size sent is what gets
/// credited.
pub(crate) async fn send(
    client: &Client,
    url: &str,
    payload: Bytes,
) -> Result<u64, SpeedTestError> {
    let sent = payload.len() as u64;
    let response = client
        .post(url)
        .query(&[("_", cache_buster())])
        .header(CACHE_CONTROL, "no-cache, no-store")
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(payload)
        .send()
        .await?;
    // Read the reply so the connection goes back to the pool.
    drain(ensure_success(TestPhase::Upload, response)?).await?;
    Ok(sent)
}
