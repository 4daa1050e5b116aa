//! Live session handles keyed by session key.
//!
//! The handle map and the last-active map are separate structures but share
//! one lock, so "is it stale?" and "replace it" are decided atomically. That
//! lock is never held across an await. Replacing a key's handle goes through
//! a per-key async gate, so the old session is disposed before any new one
//! exists.

use std::{collections::HashMap, future::Future, sync::Arc, sync::Mutex};

use {
    chrono::{DateTime, Utc},
    courier_agents::{ModelRef, SessionHandle},
    courier_common::{Clock, SystemClock},
    tracing::{debug, info},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, gauge, labels, sessions as session_metrics};

use crate::{error::Result, staleness::StalenessPolicy};

/// A handle shared between the registry and the turn currently using it.
pub type SharedHandle = Arc<tokio::sync::Mutex<SessionHandle>>;

/// How [`SessionRegistry::resolve`] obtained its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Reused,
    Created,
    /// A stale handle (or one on a different primary model) was disposed
    /// and replaced.
    Replaced,
}

struct Entry {
    handle: SharedHandle,
    primary: ModelRef,
}

enum Verdict {
    Reuse(SharedHandle),
    Replace(&'static str),
    Create,
}

#[derive(Default)]
struct RegistryState {
    handles: HashMap<String, Entry>,
    last_active: HashMap<String, DateTime<Utc>>,
    /// Held while a key's handle is being replaced or created.
    gates: HashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RegistryState {
    fn remove(&mut self, key: &str) -> Option<SharedHandle> {
        self.last_active.remove(key);
        self.handles.remove(key).map(|e| e.handle)
    }
}

pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    policy: StalenessPolicy,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(policy: StalenessPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            policy,
            clock,
        }
    }

    pub fn with_policy(policy: StalenessPolicy) -> Self {
        Self::new(policy, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the cached handle for `key` must be discarded before reuse.
    /// `false` when nothing is cached.
    #[must_use]
    pub fn evaluate(&self, key: &str) -> bool {
        let now = self.clock.now();
        let state = self.lock();
        state.handles.get(key).is_some_and(|entry| {
            is_disposed(&entry.handle)
                || state
                    .last_active
                    .get(key)
                    .is_some_and(|last| self.policy.is_stale(*last, now))
        })
    }

    fn verdict(&self, state: &RegistryState, key: &str, primary: &ModelRef, now: DateTime<Utc>) -> Verdict {
        let Some(entry) = state.handles.get(key) else {
            return Verdict::Create;
        };
        if state
            .last_active
            .get(key)
            .is_some_and(|last| self.policy.is_stale(*last, now))
        {
            Verdict::Replace("stale")
        } else if is_disposed(&entry.handle) {
            Verdict::Replace("disposed")
        } else if entry.primary != *primary {
            Verdict::Replace("model_changed")
        } else {
            Verdict::Reuse(Arc::clone(&entry.handle))
        }
    }

    /// Return the live handle for `key`, creating one with `create` when none
    /// exists, when the cached one is stale or disposed, or when it was opened
    /// for a different primary model.
    ///
    /// Replacement and creation for one key are serialized: a concurrent
    /// caller waits until the old handle is disposed and the new one cached,
    /// then reuses it.
    pub async fn resolve<F, Fut>(&self, key: &str, primary: &ModelRef, create: F) -> Result<(SharedHandle, Acquired)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = courier_agents::Result<SessionHandle>>,
    {
        let gate = {
            let mut state = self.lock();
            if let Verdict::Reuse(handle) = self.verdict(&state, key, primary, self.clock.now()) {
                return Ok((handle, Acquired::Reused));
            }
            Arc::clone(state.gates.entry(key.to_string()).or_default())
        };

        let result = self.replace_or_create(key, primary, create, &gate).await;

        let mut state = self.lock();
        // Only the map and this caller hold the gate: nobody is waiting.
        if Arc::strong_count(&gate) == 2 && state.gates.get(key).is_some_and(|g| Arc::ptr_eq(g, &gate)) {
            state.gates.remove(key);
        }
        result
    }

    async fn replace_or_create<F, Fut>(
        &self,
        key: &str,
        primary: &ModelRef,
        create: F,
        gate: &tokio::sync::Mutex<()>,
    ) -> Result<(SharedHandle, Acquired)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = courier_agents::Result<SessionHandle>>,
    {
        let _gate = gate.lock().await;

        let replaced = {
            let mut state = self.lock();
            match self.verdict(&state, key, primary, self.clock.now()) {
                // Cached by the caller we waited behind.
                Verdict::Reuse(handle) => return Ok((handle, Acquired::Reused)),
                Verdict::Replace(reason) => {
                    info!(session_key = key, reason, model = %primary, "replacing cached session");
                    let old = state.remove(key);
                    #[cfg(feature = "metrics")]
                    gauge!(session_metrics::ACTIVE).set(state.handles.len() as f64);
                    old.map(|old| (old, reason))
                },
                Verdict::Create => None,
            }
        };

        let acquired = match replaced {
            Some((old, reason)) => {
                dispose(&old).await;
                #[cfg(feature = "metrics")]
                counter!(
                    session_metrics::EVICTED_TOTAL,
                    labels::REASON => reason,
                    labels::POLICY => self.policy.as_str()
                )
                .increment(1);
                #[cfg(not(feature = "metrics"))]
                let _ = reason;
                Acquired::Replaced
            },
            None => Acquired::Created,
        };

        let fresh = Arc::new(tokio::sync::Mutex::new(create().await?));
        {
            let mut state = self.lock();
            state.handles.insert(key.to_string(), Entry {
                handle: Arc::clone(&fresh),
                primary: primary.clone(),
            });
            state.last_active.insert(key.to_string(), self.clock.now());
            #[cfg(feature = "metrics")]
            gauge!(session_metrics::ACTIVE).set(state.handles.len() as f64);
        }
        debug!(session_key = key, ?acquired, "session cached");
        Ok((fresh, acquired))
    }

    /// Drop `handle` from the cache if it is still the one held for `key`.
    /// Used once its session has been disposed, e.g. after the fallback
    /// chain ran out.
    pub fn discard(&self, key: &str, handle: &SharedHandle) -> bool {
        let mut state = self.lock();
        if !state
            .handles
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.handle, handle))
        {
            return false;
        }
        state.remove(key);
        #[cfg(feature = "metrics")]
        {
            gauge!(session_metrics::ACTIVE).set(state.handles.len() as f64);
            counter!(session_metrics::EVICTED_TOTAL, labels::REASON => "disposed").increment(1);
        }
        info!(session_key = key, "disposed session discarded");
        true
    }

    /// Record activity on `key`.
    pub fn touch(&self, key: &str) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.handles.contains_key(key) {
            state.last_active.insert(key.to_string(), now);
        }
    }

    #[must_use]
    pub fn last_active(&self, key: &str) -> Option<DateTime<Utc>> {
        self.lock().last_active.get(key).copied()
    }

    /// The cached handle, without any staleness check.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<SharedHandle> {
        self.lock().handles.get(key).map(|e| Arc::clone(&e.handle))
    }

    /// Remove and dispose the handle for `key`. Returns whether one existed.
    pub async fn evict(&self, key: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let removed = state.remove(key);
            #[cfg(feature = "metrics")]
            gauge!(session_metrics::ACTIVE).set(state.handles.len() as f64);
            removed
        };
        match removed {
            Some(handle) => {
                dispose(&handle).await;
                #[cfg(feature = "metrics")]
                counter!(session_metrics::EVICTED_TOTAL, labels::REASON => "reset").increment(1);
                info!(session_key = key, "session evicted");
                true
            },
            None => false,
        }
    }

    /// Dispose every live handle and clear the registry.
    pub async fn shutdown(&self) {
        let handles: Vec<SharedHandle> = {
            let mut state = self.lock();
            state.last_active.clear();
            state.handles.drain().map(|(_, e)| e.handle).collect()
        };
        let count = handles.len();
        for handle in handles {
            dispose(&handle).await;
        }
        #[cfg(feature = "metrics")]
        gauge!(session_metrics::ACTIVE).set(0.0);
        info!(count, "session registry shut down");
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().handles.keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().handles.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_policy(StalenessPolicy::Manual)
    }
}

/// A handle locked by a running turn counts as live.
fn is_disposed(handle: &SharedHandle) -> bool {
    handle.try_lock().is_ok_and(|h| h.is_disposed())
}

async fn dispose(handle: &SharedHandle) {
    handle.lock().await.dispose().await;
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        courier_agents::{
            AgentSession, CompactionStats, Listeners, PromptOutcome, SessionFactory,
            SessionListener, SessionSpec, Subscription, TurnOptions,
        },
        courier_auth::CredentialPool,
        courier_common::ManualClock,
        std::{
            sync::atomic::{AtomicUsize, Ordering},
            time::Duration,
        },
    };

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        disposed: AtomicUsize,
    }

    struct NullSession {
        counters: Arc<Counters>,
        listeners: Listeners,
    }

    #[async_trait]
    impl AgentSession for NullSession {
        async fn prompt(&self, text: &str, _opts: &TurnOptions) -> anyhow::Result<PromptOutcome> {
            Ok(PromptOutcome {
                text: text.to_string(),
                ..Default::default()
            })
        }

        fn subscribe(&self, listener: SessionListener) -> Subscription {
            self.listeners.add(listener)
        }

        async fn compact(&self, _instructions: Option<&str>) -> anyhow::Result<CompactionStats> {
            Ok(CompactionStats::default())
        }

        async fn dispose(&self) {
            self.counters.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullFactory(Arc<Counters>);

    #[async_trait]
    impl SessionFactory for NullFactory {
        async fn create(&self, _spec: &SessionSpec) -> anyhow::Result<Arc<dyn AgentSession>> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullSession {
                counters: Arc::clone(&self.0),
                listeners: Listeners::default(),
            }))
        }
    }

    struct Fixture {
        registry: SessionRegistry,
        clock: Arc<ManualClock>,
        counters: Arc<Counters>,
        factory: NullFactory,
        pool: CredentialPool,
    }

    impl Fixture {
        fn new(policy: StalenessPolicy) -> Self {
            let clock = Arc::new(ManualClock::default());
            let counters = Arc::new(Counters::default());
            Self {
                registry: SessionRegistry::new(policy, clock.clone()),
                clock,
                factory: NullFactory(Arc::clone(&counters)),
                counters,
                pool: CredentialPool::default(),
            }
        }

        async fn resolve(&self, key: &str, model: &str) -> (SharedHandle, Acquired) {
            let primary = ModelRef::parse(model).unwrap();
            let chain = vec![primary.clone()];
            self.registry
                .resolve(key, &primary, || {
                    SessionHandle::open(&self.factory, &self.pool, key, "main", chain)
                })
                .await
                .unwrap()
        }

        fn created(&self) -> usize {
            self.counters.created.load(Ordering::SeqCst)
        }

        fn disposed(&self) -> usize {
            self.counters.disposed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn reuses_fresh_handle() {
        let fx = Fixture::new(StalenessPolicy::Manual);
        let (a, first) = fx.resolve("k", "openai/gpt").await;
        let (b, second) = fx.resolve("k", "openai/gpt").await;
        assert_eq!(first, Acquired::Created);
        assert_eq!(second, Acquired::Reused);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fx.created(), 1);
        assert_eq!(fx.registry.len(), 1);
    }

    #[tokio::test]
    async fn stale_handle_is_disposed_before_replacement() {
        let fx = Fixture::new(StalenessPolicy::Idle {
            threshold: Duration::from_secs(60),
        });
        let (old, _) = fx.resolve("k", "openai/gpt").await;
        assert!(!fx.registry.evaluate("k"));

        fx.clock.advance(Duration::from_secs(61));
        assert!(fx.registry.evaluate("k"));

        let (new, acquired) = fx.resolve("k", "openai/gpt").await;
        assert_eq!(acquired, Acquired::Replaced);
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.lock().await.is_disposed());
        assert_eq!(fx.disposed(), 1);
        assert_eq!(fx.created(), 2);
    }

    #[tokio::test]
    async fn concurrent_resolve_waits_for_replacement() {
        let fx = Fixture::new(StalenessPolicy::Idle {
            threshold: Duration::from_secs(60),
        });
        let (old, _) = fx.resolve("k", "openai/gpt").await;
        // A turn is still running on the old handle when it goes stale.
        let in_flight = old.lock().await;
        fx.clock.advance(Duration::from_secs(61));

        let replacing = fx.resolve("k", "openai/gpt");
        let waiting = async {
            tokio::task::yield_now().await;
            fx.resolve("k", "openai/gpt").await
        };
        let finish_turn = async move {
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            drop(in_flight);
        };
        let ((a, first), (b, second), ()) = tokio::join!(replacing, waiting, finish_turn);

        assert_eq!(first, Acquired::Replaced);
        assert_eq!(second, Acquired::Reused);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(old.lock().await.is_disposed());
        assert_eq!(fx.created(), 2);
        assert_eq!(fx.disposed(), 1);
        assert_eq!(fx.registry.len(), 1);
    }

    #[tokio::test]
    async fn disposed_handle_is_replaced() {
        let fx = Fixture::new(StalenessPolicy::Manual);
        let (old, _) = fx.resolve("k", "openai/gpt").await;
        old.lock().await.dispose().await;
        assert!(fx.registry.evaluate("k"));

        let (new, acquired) = fx.resolve("k", "openai/gpt").await;
        assert_eq!(acquired, Acquired::Replaced);
        assert!(!new.lock().await.is_disposed());
        assert_eq!(fx.created(), 2);
    }

    #[tokio::test]
    async fn discard_only_drops_the_given_handle() {
        let fx = Fixture::new(StalenessPolicy::Manual);
        let (first, _) = fx.resolve("k", "openai/gpt").await;
        let (second, _) = fx.resolve("k", "anthropic/claude").await;

        assert!(!fx.registry.discard("k", &first));
        assert_eq!(fx.registry.len(), 1);
        assert!(fx.registry.discard("k", &second));
        assert!(fx.registry.is_empty());
        assert!(fx.registry.last_active("k").is_none());
    }

    #[tokio::test]
    async fn touch_keeps_session_alive() {
        let fx = Fixture::new(StalenessPolicy::Idle {
            threshold: Duration::from_secs(60),
        });
        fx.resolve("k", "openai/gpt").await;
        fx.clock.advance(Duration::from_secs(50));
        fx.registry.touch("k");
        fx.clock.advance(Duration::from_secs(50));
        assert!(!fx.registry.evaluate("k"));
        assert_eq!(fx.resolve("k", "openai/gpt").await.1, Acquired::Reused);
    }

    #[tokio::test]
    async fn primary_change_replaces_handle() {
        let fx = Fixture::new(StalenessPolicy::Manual);
        fx.resolve("k", "openai/gpt").await;
        let (handle, acquired) = fx.resolve("k", "anthropic/claude").await;
        assert_eq!(acquired, Acquired::Replaced);
        assert_eq!(handle.lock().await.model().provider, "anthropic");
        assert_eq!(fx.disposed(), 1);
    }

    #[tokio::test]
    async fn evict_and_shutdown_dispose() {
        let fx = Fixture::new(StalenessPolicy::Manual);
        fx.resolve("a", "openai/gpt").await;
        fx.resolve("b", "openai/gpt").await;
        fx.resolve("c", "openai/gpt").await;

        assert!(fx.registry.evict("a").await);
        assert!(!fx.registry.evict("a").await);
        assert!(fx.registry.last_active("a").is_none());
        assert_eq!(fx.registry.keys(), vec!["b".to_string(), "c".to_string()]);

        fx.registry.shutdown().await;
        assert!(fx.registry.is_empty());
        assert_eq!(fx.disposed(), 3);
    }

    #[tokio::test]
    async fn unknown_key_is_not_stale() {
        let fx = Fixture::new(StalenessPolicy::Idle {
            threshold: Duration::ZERO,
        });
        assert!(!fx.registry.evaluate("missing"));
        fx.registry.touch("missing");
        assert!(fx.registry.last_active("missing").is_none());
    }
}
