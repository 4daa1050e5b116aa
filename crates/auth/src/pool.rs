//! Round-robin credential rotation with per-credential backoff.
//!
//! Each provider owns a rotation ring. [`CredentialPool::pick`] hands out the
//! least recently used credential that is not cooling down and moves it to
//! the tail; when every credential is cooling down it returns the one that
//! recovers first instead of blocking.
//!
//! The in-memory lock is never held across a store write.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use {
    courier_common::{Clock, SystemClock},
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    sha2::{Digest, Sha256},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, credentials as cred_metrics, labels};

use crate::{
    FailureReason,
    backoff::backoff,
    store::{CooldownRecord, CooldownStore, MemoryStore},
};

/// Persisted key for a credential: provider plus the last six characters of
/// the secret.
#[must_use]
pub fn persist_key(provider: &str, secret: &str) -> String {
    format!("{provider}:{}", suffix(secret))
}

fn suffix(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    chars[chars.len().saturating_sub(6)..].iter().collect()
}

fn fingerprint(secret: &str) -> String {
    format!("{:x}", Sha256::digest(secret.as_bytes()))
}

struct CredentialEntry {
    secret: Secret<String>,
    fingerprint: String,
    failures: u32,
    /// Epoch ms, 0 when never failed (or since the last success).
    last_failure_ms: i64,
    /// Epoch ms, 0 when not cooling down.
    backoff_until_ms: i64,
    last_reason: Option<FailureReason>,
}

impl CredentialEntry {
    fn status(&self, provider: &str, now_ms: i64) -> CredentialStatus {
        CredentialStatus {
            provider: provider.to_string(),
            suffix: suffix(self.secret.expose_secret()),
            failures: self.failures,
            last_failure_ms: self.last_failure_ms,
            backoff_until_ms: self.backoff_until_ms,
            last_reason: self.last_reason,
            available: self.backoff_until_ms <= now_ms,
        }
    }
}

/// Redacted view of one credential's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub provider: String,
    /// Last six characters of the secret.
    pub suffix: String,
    pub failures: u32,
    pub last_failure_ms: i64,
    pub backoff_until_ms: i64,
    pub last_reason: Option<FailureReason>,
    pub available: bool,
}

/// Rotating per-provider credential pool.
pub struct CredentialPool {
    /// provider → rotation ring, front is least recently used.
    rings: Mutex<HashMap<String, VecDeque<CredentialEntry>>>,
    store: Arc<dyn CooldownStore>,
    clock: Arc<dyn Clock>,
}

impl Default for CredentialPool {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }
}

impl CredentialPool {
    pub fn new(store: Arc<dyn CooldownStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            rings: Mutex::new(HashMap::new()),
            store,
            clock,
        }
    }

    /// Register a credential. Idempotent: returns `false` if it was already
    /// registered. A persisted cooldown that has not yet expired is restored.
    pub async fn add_credential(&self, provider: &str, secret: Secret<String>) -> bool {
        let fp = fingerprint(secret.expose_secret());
        if self.find(provider, &fp, |_| ()).is_some() {
            return false;
        }

        let key = persist_key(provider, secret.expose_secret());
        let restored = match self.store.get(&key).await {
            Ok(record) => record.filter(|r| r.cooldown_until > self.clock.now_ms()),
            Err(e) => {
                warn!(provider, key = %key, error = %e, "failed to read credential cooldown");
                None
            },
        };

        let mut entry = CredentialEntry {
            secret,
            fingerprint: fp,
            failures: 0,
            last_failure_ms: 0,
            backoff_until_ms: 0,
            last_reason: None,
        };
        if let Some(record) = restored {
            info!(
                provider,
                key = %key,
                until = record.cooldown_until,
                reason = %record.last_reason,
                "restored credential cooldown"
            );
            entry.failures = record.error_count;
            entry.last_failure_ms = record.last_error_at;
            entry.backoff_until_ms = record.cooldown_until;
            entry.last_reason = Some(record.last_reason);
        }

        let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        let ring = rings.entry(provider.to_string()).or_default();
        // Lost a race with a concurrent registration of the same secret.
        if ring.iter().any(|e| e.fingerprint == entry.fingerprint) {
            return false;
        }
        ring.push_back(entry);
        true
    }

    /// Next credential for `provider`, or `None` if none are registered.
    pub fn pick(&self, provider: &str) -> Option<Secret<String>> {
        let now = self.clock.now_ms();
        let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        let ring = rings.get_mut(provider)?;

        if let Some(idx) = ring.iter().position(|e| e.backoff_until_ms <= now) {
            let entry = ring.remove(idx)?;
            let secret = entry.secret.clone();
            ring.push_back(entry);
            return Some(secret);
        }

        // Everything is cooling down: hand out whichever recovers first.
        let soonest = ring.iter().min_by_key(|e| e.backoff_until_ms)?;
        debug!(
            provider,
            suffix = %suffix(soonest.secret.expose_secret()),
            until = soonest.backoff_until_ms,
            "all credentials cooling down"
        );
        #[cfg(feature = "metrics")]
        counter!(cred_metrics::EXHAUSTED_PICKS_TOTAL, labels::PROVIDER => provider.to_string())
            .increment(1);
        Some(soonest.secret.clone())
    }

    /// Record a failure: bump the failure count and push `backoff_until`
    /// out along the reason's curve. `backoff_until` never moves backwards.
    pub async fn mark_failed(&self, provider: &str, secret: &Secret<String>, reason: FailureReason) {
        let now = self.clock.now_ms();
        let fp = fingerprint(secret.expose_secret());
        let record = self.find(provider, &fp, |entry| {
            entry.failures = entry.failures.saturating_add(1);
            let cooldown = backoff(reason, entry.failures);
            let until = now.saturating_add(i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX));
            entry.backoff_until_ms = entry.backoff_until_ms.max(until);
            entry.last_failure_ms = now;
            entry.last_reason = Some(reason);
            CooldownRecord {
                cooldown_until: entry.backoff_until_ms,
                error_count: entry.failures,
                last_reason: reason,
                last_error_at: now,
            }
        });
        let Some(record) = record else {
            warn!(provider, reason = %reason, "mark_failed for unregistered credential");
            return;
        };

        let key = persist_key(provider, secret.expose_secret());
        info!(
            provider,
            key = %key,
            reason = %reason,
            failures = record.error_count,
            until = record.cooldown_until,
            "credential cooling down"
        );
        #[cfg(feature = "metrics")]
        counter!(
            cred_metrics::FAILURES_TOTAL,
            labels::PROVIDER => provider.to_string(),
            labels::REASON => reason.as_str()
        )
        .increment(1);

        if let Err(e) = self.store.put(&key, record).await {
            warn!(provider, key = %key, error = %e, "failed to persist credential cooldown");
            #[cfg(feature = "metrics")]
            counter!(cred_metrics::PERSIST_ERRORS_TOTAL).increment(1);
        }
    }

    /// Record a success: clear failures, backoff, and the persisted cooldown.
    pub async fn mark_success(&self, provider: &str, secret: &Secret<String>) {
        let fp = fingerprint(secret.expose_secret());
        let was_failing = self.find(provider, &fp, |entry| {
            let was_failing = entry.failures > 0 || entry.backoff_until_ms > 0;
            entry.failures = 0;
            entry.last_failure_ms = 0;
            entry.backoff_until_ms = 0;
            entry.last_reason = None;
            was_failing
        });
        if was_failing != Some(true) {
            return;
        }

        let key = persist_key(provider, secret.expose_secret());
        debug!(provider, key = %key, "credential recovered");
        #[cfg(feature = "metrics")]
        counter!(cred_metrics::RECOVERIES_TOTAL, labels::PROVIDER => provider.to_string())
            .increment(1);

        if let Err(e) = self.store.remove(&key).await {
            warn!(provider, key = %key, error = %e, "failed to clear credential cooldown");
        }
    }

    /// Redacted state of one credential.
    #[must_use]
    pub fn status_of(&self, provider: &str, secret: &Secret<String>) -> Option<CredentialStatus> {
        let now = self.clock.now_ms();
        let fp = fingerprint(secret.expose_secret());
        self.find(provider, &fp, |entry| entry.status(provider, now))
    }

    /// Redacted state of every credential, grouped by provider in rotation
    /// order.
    #[must_use]
    pub fn status(&self) -> Vec<CredentialStatus> {
        let now = self.clock.now_ms();
        let rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        let mut providers: Vec<&String> = rings.keys().collect();
        providers.sort();
        providers
            .into_iter()
            .flat_map(|p| rings[p].iter().map(move |e| e.status(p, now)))
            .collect()
    }

    #[must_use]
    pub fn len(&self, provider: &str) -> usize {
        self.rings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(provider)
            .map_or(0, VecDeque::len)
    }

    fn find<T>(
        &self,
        provider: &str,
        fingerprint: &str,
        f: impl FnOnce(&mut CredentialEntry) -> T,
    ) -> Option<T> {
        let mut rings = self.rings.lock().unwrap_or_else(|e| e.into_inner());
        rings
            .get_mut(provider)?
            .iter_mut()
            .find(|e| e.fingerprint == fingerprint)
            .map(f)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store::JsonFileStore,
        courier_common::ManualClock,
        std::time::Duration,
    };

    fn key(s: &str) -> Secret<String> {
        Secret::new(s.to_string())
    }

    fn pool_with(clock: Arc<ManualClock>) -> (CredentialPool, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (CredentialPool::new(store.clone(), clock), store)
    }

    #[test]
    fn persist_key_uses_suffix_only() {
        assert_eq!(persist_key("openai", "sk-abcdef123456"), "openai:123456");
        assert_eq!(persist_key("openai", "abc"), "openai:abc");
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let (pool, _) = pool_with(Arc::new(ManualClock::default()));
        assert!(pool.add_credential("openai", key("sk-one")).await);
        assert!(!pool.add_credential("openai", key("sk-one")).await);
        assert!(pool.add_credential("anthropic", key("sk-one")).await);
        assert_eq!(pool.len("openai"), 1);
    }

    #[tokio::test]
    async fn pick_rotates_round_robin() {
        let (pool, _) = pool_with(Arc::new(ManualClock::default()));
        for k in ["sk-a", "sk-b", "sk-c"] {
            pool.add_credential("openai", key(k)).await;
        }
        let picks: Vec<String> = (0..6)
            .map(|_| pool.pick("openai").unwrap().expose_secret().clone())
            .collect();
        assert_eq!(picks, ["sk-a", "sk-b", "sk-c", "sk-a", "sk-b", "sk-c"]);
        assert!(pool.pick("unknown").is_none());
    }

    #[tokio::test]
    async fn pick_skips_cooling_credentials() {
        let clock = Arc::new(ManualClock::default());
        let (pool, _) = pool_with(clock.clone());
        pool.add_credential("openai", key("sk-a")).await;
        pool.add_credential("openai", key("sk-b")).await;

        pool.mark_failed("openai", &key("sk-a"), FailureReason::RateLimit)
            .await;
        for _ in 0..3 {
            assert_eq!(pool.pick("openai").unwrap().expose_secret(), "sk-b");
        }

        clock.advance(Duration::from_secs(61));
        let picks: Vec<String> = (0..2)
            .map(|_| pool.pick("openai").unwrap().expose_secret().clone())
            .collect();
        assert!(picks.contains(&"sk-a".to_string()));
    }

    #[tokio::test]
    async fn all_cooling_returns_earliest_recovery() {
        let clock = Arc::new(ManualClock::default());
        let (pool, _) = pool_with(clock.clone());
        pool.add_credential("openai", key("sk-billing")).await;
        pool.add_credential("openai", key("sk-ratelimited")).await;

        pool.mark_failed("openai", &key("sk-billing"), FailureReason::Billing)
            .await;
        pool.mark_failed("openai", &key("sk-ratelimited"), FailureReason::RateLimit)
            .await;

        assert_eq!(
            pool.pick("openai").unwrap().expose_secret(),
            "sk-ratelimited"
        );
    }

    #[tokio::test]
    async fn backoff_is_monotonic_and_success_resets() {
        let clock = Arc::new(ManualClock::default());
        let (pool, store) = pool_with(clock.clone());
        let k = key("sk-monotonic");
        pool.add_credential("openai", k.clone()).await;

        let mut prev = 0;
        for _ in 0..8 {
            pool.mark_failed("openai", &k, FailureReason::RateLimit).await;
            let status = pool.status_of("openai", &k).unwrap();
            assert!(status.backoff_until_ms >= prev);
            prev = status.backoff_until_ms;
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(store.len(), 1);

        pool.mark_success("openai", &k).await;
        let status = pool.status_of("openai", &k).unwrap();
        assert_eq!(status.failures, 0);
        assert_eq!(status.backoff_until_ms, 0);
        assert!(status.available);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn shorter_reason_never_shortens_existing_backoff() {
        let clock = Arc::new(ManualClock::default());
        let (pool, _) = pool_with(clock);
        let k = key("sk-billing-then-timeout");
        pool.add_credential("openai", k.clone()).await;

        pool.mark_failed("openai", &k, FailureReason::Billing).await;
        let billing_until = pool.status_of("openai", &k).unwrap().backoff_until_ms;
        pool.mark_failed("openai", &k, FailureReason::RateLimit).await;
        assert_eq!(
            pool.status_of("openai", &k).unwrap().backoff_until_ms,
            billing_until
        );
    }

    #[tokio::test]
    async fn cooldown_restored_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cooldowns.json");
        let clock = Arc::new(ManualClock::default());
        let k = key("sk-persisted-abcdef");

        {
            let pool = CredentialPool::new(Arc::new(JsonFileStore::new(path.clone())), clock.clone());
            pool.add_credential("openai", k.clone()).await;
            pool.mark_failed("openai", &k, FailureReason::Billing).await;
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("openai:abcdef"));
        assert!(!raw.contains("sk-persisted"));

        let pool = CredentialPool::new(Arc::new(JsonFileStore::new(path.clone())), clock.clone());
        pool.add_credential("openai", k.clone()).await;
        let status = pool.status_of("openai", &k).unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.last_reason, Some(FailureReason::Billing));
        assert!(!status.available);

        // An expired cooldown is not restored.
        clock.advance(Duration::from_secs(6 * 60 * 60));
        let pool = CredentialPool::new(Arc::new(JsonFileStore::new(path)), clock);
        pool.add_credential("openai", k.clone()).await;
        assert_eq!(pool.status_of("openai", &k).unwrap().failures, 0);
    }

    #[tokio::test]
    async fn status_is_redacted() {
        let (pool, _) = pool_with(Arc::new(ManualClock::default()));
        pool.add_credential("openai", key("sk-secret-value-xyz789")).await;
        let status = pool.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].suffix, "xyz789");
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
