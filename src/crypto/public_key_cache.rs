//! Process-wide cache of the exchange's token-encryption public key.
//!
//! One entry per environment. An entry is trusted while it is younger than
//! 24 hours AND its certificate stays valid for more than 24 hours plus a
//! randomized jitter, so concurrent processes don't refresh in lockstep.
//! Refreshes for the same environment are single-flighted; there is no
//! stale fallback — a failed refresh fails the caller.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Duration, Utc};
use openssl::x509::X509;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use tokio::sync::Mutex as TokioMutex;

use crate::api::ExchangeCertificate;
use crate::clock::{Clock, SystemClock};
use crate::environment::Environment;
use crate::error::KsefError;

/// Declared usage marking the certificate the exchange publishes for
/// authentication-token encryption.
const TOKEN_ENCRYPTION_USAGE: &str = "KsefTokenEncryption";

const MAX_AGE_HOURS: i64 = 24;
const MIN_REMAINING_HOURS: i64 = 24;
const MAX_JITTER_SECS: i64 = 300;

/// One cached public key with the metadata its validity check needs.
#[derive(Debug, Clone)]
pub struct CachedPublicKey {
    pub public_key_pem: String,
    pub fetched_at: DateTime<Utc>,
    pub cert_not_after: DateTime<Utc>,
}

impl CachedPublicKey {
    fn is_valid(&self, now: DateTime<Utc>, jitter_secs: i64) -> bool {
        let fresh = now - self.fetched_at < Duration::hours(MAX_AGE_HOURS);
        let margin = Duration::hours(MIN_REMAINING_HOURS) + Duration::seconds(jitter_secs);
        fresh && self.cert_not_after - now > margin
    }
}

type JitterFn = Box<dyn Fn() -> i64 + Send + Sync>;

/// Per-environment public-key cache, safe for concurrent readers.
pub struct PublicKeyCache {
    clock: Arc<dyn Clock>,
    jitter_secs: JitterFn,
    entries: StdMutex<HashMap<Environment, CachedPublicKey>>,
    refresh_locks: StdMutex<HashMap<Environment, Arc<TokioMutex<()>>>>,
}

impl std::fmt::Debug for PublicKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PublicKeyCache { .. }")
    }
}

impl PublicKeyCache {
    pub fn new() -> Self {
        Self::with_clock_and_jitter(
            Arc::new(SystemClock),
            Box::new(|| rand::Rng::gen_range(&mut rand::thread_rng(), 0..MAX_JITTER_SECS)),
        )
    }

    /// Construct with an explicit clock and jitter source, for tests.
    pub fn with_clock_and_jitter(clock: Arc<dyn Clock>, jitter_secs: JitterFn) -> Self {
        Self {
            clock,
            jitter_secs,
            entries: StdMutex::new(HashMap::new()),
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// The shared process-wide instance used by default-constructed clients.
    pub fn shared() -> &'static PublicKeyCache {
        static SHARED: OnceLock<PublicKeyCache> = OnceLock::new();
        SHARED.get_or_init(PublicKeyCache::new)
    }

    /// Return the token-encryption public key for `environment`, invoking
    /// `fetch` for the exchange certificate list on a cache miss. Concurrent
    /// misses for the same environment coalesce into one fetch.
    pub async fn get_public_key<F, Fut>(
        &self,
        environment: Environment,
        fetch: F,
    ) -> Result<String, KsefError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ExchangeCertificate>, KsefError>>,
    {
        if let Some(pem) = self.lookup(environment) {
            return Ok(pem);
        }

        let lock = self.refresh_lock(environment);
        let _guard = lock.lock().await;

        // Another task may have refreshed while we waited.
        if let Some(pem) = self.lookup(environment) {
            return Ok(pem);
        }

        tracing::debug!(environment = %environment, "refreshing exchange public key");
        let certs = fetch().await?;
        let entry = self.select_token_certificate(&certs)?;
        let pem = entry.public_key_pem.clone();
        self.entries
            .lock()
            .expect("public key cache poisoned")
            .insert(environment, entry);
        Ok(pem)
    }

    fn lookup(&self, environment: Environment) -> Option<String> {
        let now = self.clock.now();
        let jitter = (self.jitter_secs)();
        let entries = self.entries.lock().expect("public key cache poisoned");
        entries
            .get(&environment)
            .filter(|e| e.is_valid(now, jitter))
            .map(|e| e.public_key_pem.clone())
    }

    fn refresh_lock(&self, environment: Environment) -> Arc<TokioMutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        locks.entry(environment).or_default().clone()
    }

    fn select_token_certificate(
        &self,
        certs: &[ExchangeCertificate],
    ) -> Result<CachedPublicKey, KsefError> {
        let entry = certs
            .iter()
            .find(|c| c.usage.iter().any(|u| u == TOKEN_ENCRYPTION_USAGE))
            .ok_or_else(|| {
                KsefError::Protocol(format!(
                    "no certificate with usage {TOKEN_ENCRYPTION_USAGE} in exchange list"
                ))
            })?;

        let der = B64
            .decode(&entry.certificate)
            .map_err(|e| KsefError::Protocol(format!("exchange certificate is not base64: {e}")))?;
        let cert = X509::from_der(&der)
            .map_err(|e| KsefError::Certificate(format!("exchange certificate invalid: {e}")))?;
        let public_key_pem = String::from_utf8(cert.public_key()?.public_key_to_pem()?)
            .map_err(|e| KsefError::Certificate(format!("public key PEM not UTF-8: {e}")))?;

        Ok(CachedPublicKey {
            public_key_pem,
            fetched_at: self.clock.now(),
            cert_not_after: super::certificate::asn1_time_to_utc(cert.not_after())?,
        })
    }
}

impl Default for PublicKeyCache {
    fn default() -> Self {
        Self::new()
    }
}
