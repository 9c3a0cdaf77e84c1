//! Acquisition and caching of the public verification key.
//!
//! The gateway starts without a key. [`KeyProvider::acquire`] makes one
//! attempt; if it fails, a background task retries on a fixed delay until it
//! succeeds or the provider is shut down. There is no attempt limit: if the
//! key source stays unreachable the gateway never becomes ready and every
//! protected request is answered with "service not ready".
//!
//! The current key lives in an `ArcSwapOption`, so verifications read it
//! without locking and always observe a complete key, old or new.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use log::{debug, info, warn};
use parking_lot::Mutex;
use reqwest::Url;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::KeyError;

/// Delay between acquisition attempts when none is configured.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Public key material together with the algorithm it verifies.
pub struct VerificationKey {
    algorithm: Algorithm,
    material: String,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Parses PEM material as a public key for `algorithm`.
    ///
    /// Only asymmetric algorithms are accepted.
    pub fn from_pem(material: impl Into<String>, algorithm: Algorithm) -> Result<Self, KeyError> {
        let material = material.into();
        let pem = material.trim().as_bytes();

        let parsed = match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
            other => {
                return Err(KeyError::InvalidMaterial(format!(
                    "{:?} is not an asymmetric algorithm",
                    other
                )))
            }
        };
        let decoding_key = parsed.map_err(|e| {
            KeyError::InvalidMaterial(format!("not a {:?} public key: {}", algorithm, e))
        })?;

        Ok(Self {
            algorithm,
            material,
            decoding_key,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The PEM text as received from the key source.
    pub fn material(&self) -> &str {
        &self.material
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Where key material comes from.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetches the current key material as PEM text.
    async fn fetch(&self) -> Result<String, KeyError>;

    /// Human-readable origin, used in log lines.
    fn describe(&self) -> String;
}

/// Pulls key material from the identity service's key distribution endpoint.
pub struct HttpKeySource {
    client: reqwest::Client,
    url: Url,
}

impl HttpKeySource {
    pub fn new(url: Url) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<String, KeyError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KeyError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

pub struct KeyProvider {
    source: Arc<dyn KeySource>,
    algorithm: Algorithm,
    retry_delay: Duration,
    current: ArcSwapOption<VerificationKey>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl KeyProvider {
    pub fn new(source: Arc<dyn KeySource>, algorithm: Algorithm, retry_delay: Duration) -> Self {
        Self {
            source,
            algorithm,
            retry_delay,
            current: ArcSwapOption::empty(),
            retry_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// The key, or `None` while it has not been acquired yet.
    pub fn current(&self) -> Option<Arc<VerificationKey>> {
        self.current.load_full()
    }

    pub fn is_ready(&self) -> bool {
        self.current.load().is_some()
    }

    #[cfg(test)]
    pub(crate) fn install(&self, key: VerificationKey) {
        self.current.store(Some(Arc::new(key)));
    }

    /// Makes one acquisition attempt and stores the key on success.
    ///
    /// A later success replaces the key; verifications already holding the
    /// previous one finish with it.
    pub async fn try_acquire(&self) -> Result<(), KeyError> {
        let material = self.source.fetch().await?;
        let key = VerificationKey::from_pem(material, self.algorithm)?;
        self.current.store(Some(Arc::new(key)));
        info!("Public key fetched successfully from {}", self.source.describe());
        Ok(())
    }

    /// Attempts acquisition once. On failure, schedules background retries
    /// and returns; the failure is only observable through [`current`](Self::current).
    pub async fn acquire(self: &Arc<Self>) {
        if let Err(e) = self.try_acquire().await {
            warn!(
                "Failed to fetch public key from {}: {}. Retrying every {:?}",
                self.source.describe(),
                e,
                self.retry_delay
            );
            self.schedule_retry();
        }
    }

    /// Stops the retry loop, if any, and waits for it to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.retry_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        let mut slot = self.retry_task.lock();
        if self.shutdown.is_cancelled() || slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let provider = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { provider.retry_loop().await }));
    }

    async fn retry_loop(&self) {
        let mut attempt: u64 = 1;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("key retry loop cancelled after {} attempts", attempt);
                    return;
                }
                _ = tokio::time::sleep(self.retry_delay) => {}
            }

            attempt += 1;
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                result = self.try_acquire() => result,
            };
            match result {
                Ok(()) => {
                    debug!("verification key acquired on attempt {}", attempt);
                    return;
                }
                Err(e) => warn!(
                    "Attempt {} to fetch public key from {} failed: {}",
                    attempt,
                    self.source.describe(),
                    e
                ),
            }
        }
    }
}
