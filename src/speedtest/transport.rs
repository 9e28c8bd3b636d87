use super::payload::PayloadCache;
use super::{download, ping, upload};
use crate::config::Settings;
use crate::error::SpeedTestError;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

/// The remote measurement service, one request at a time.
pub trait Transport: Send + Sync {
    /// Zero-byte round trip to the generator endpoint.
    fn probe(&self) -> impl Future<Output = Result<(), SpeedTestError>> + Send;

    /// Fetches and drains `bytes` bytes, returning the byte count to account for.
    fn download(&self, bytes: u64) -> impl Future<Output = Result<u64, SpeedTestError>> + Send;

    /// Sends a body of exactly `bytes` bytes, returning the byte count sent.
    fn upload(&self, bytes: u64) -> impl Future<Output = Result<u64, SpeedTestError>> + Send;
}

#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    download_url: String,
    upload_url: String,
    payloads: PayloadCache,
}

impl HttpTransport {
    pub fn new(settings: &Settings) -> Result<Self, SpeedTestError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .connect_timeout(settings.connect_timeout())
            .build()?;
        Ok(Self::with_client(client, settings))
    }

    pub fn with_client(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            download_url: settings.download_url(),
            upload_url: settings.upload_url(),
            payloads: PayloadCache::new(),
        }
    }

    pub fn payloads(&self) -> &PayloadCache {
        &self.payloads
    }
}

impl Transport for HttpTransport {
    async fn probe(&self) -> Result<(), SpeedTestError> {
        ping::probe(&self.client, &self.download_url).await
    }

    async fn download(&self, bytes: u64) -> Result<u64, SpeedTestError> {
        download::fetch(&self.client, &self.download_url, bytes).await
    }

    async fn upload(&self, bytes: u64) -> Result<u64, SpeedTestError> {
        let payload = self.payloads.get(bytes as usize);
        upload::send(&self.client, &self.upload_url, payload).await
    }
}

/// Unique per-request query value so no cache along the way can answer for the server.
pub(crate) fn cache_buster() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|byte| char::from(byte).to_ascii_lowercase())
        .collect();
    format!("{millis}-{suffix}")
}
