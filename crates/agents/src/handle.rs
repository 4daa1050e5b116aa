//! A live session plus everything resolved to create it.

use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    courier_auth::CredentialPool,
    secrecy::Secret,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, labels, sessions as session_metrics};

use crate::{
    error::{Result, RunError},
    model::{AgentSession, SessionFactory, SessionSpec, Usage},
    model_ref::ModelRef,
};

/// One per session key. Owns the session and the model/credential it runs on.
pub struct SessionHandle {
    session_key: String,
    agent_id: String,
    session: Arc<dyn AgentSession>,
    chain: Vec<ModelRef>,
    position: usize,
    credential: Option<Secret<String>>,
    usage: Usage,
    turns: u64,
    created_at: DateTime<Utc>,
    disposed: bool,
}

impl SessionHandle {
    /// Create a session on the first model of `chain` that can be opened.
    pub async fn open(
        factory: &dyn SessionFactory,
        pool: &CredentialPool,
        session_key: &str,
        agent_id: &str,
        chain: Vec<ModelRef>,
    ) -> Result<Self> {
        if chain.is_empty() {
            return Err(RunError::NoModel);
        }

        let mut last_err = None;
        for position in 0..chain.len() {
            match create_session(factory, pool, session_key, agent_id, &chain[position]).await {
                Ok((session, credential)) => {
                    info!(
                        session_key,
                        agent_id,
                        model = %chain[position],
                        "session opened"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(
                        session_metrics::CREATED_TOTAL,
                        labels::MODEL => chain[position].to_string()
                    )
                    .increment(1);
                    return Ok(Self {
                        session_key: session_key.to_string(),
                        agent_id: agent_id.to_string(),
                        session,
                        chain,
                        position,
                        credential,
                        usage: Usage::default(),
                        turns: 0,
                        created_at: Utc::now(),
                        disposed: false,
                    });
                },
                Err(e) => {
                    warn!(session_key, model = %chain[position], error = %e, "failed to open session");
                    last_err = Some(e);
                },
            }
        }
        Err(last_err.unwrap_or(RunError::NoModel))
    }

    /// Dispose the current session and recreate it on the next model in the
    /// chain. Returns `Ok(false)` when the chain is exhausted.
    pub async fn advance(&mut self, factory: &dyn SessionFactory, pool: &CredentialPool) -> Result<bool> {
        self.dispose().await;

        while self.position + 1 < self.chain.len() {
            self.position += 1;
            let model = &self.chain[self.position];
            match create_session(factory, pool, &self.session_key, &self.agent_id, model).await {
                Ok((session, credential)) => {
                    info!(
                        session_key = %self.session_key,
                        model = %model,
                        position = self.position,
                        "switched to fallback model"
                    );
                    self.session = session;
                    self.credential = credential;
                    self.disposed = false;
                    return Ok(true);
                },
                Err(e) => {
                    warn!(session_key = %self.session_key, model = %model, error = %e, "fallback model unavailable");
                },
            }
        }
        Ok(false)
    }

    /// Dispose the underlying session. Idempotent.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        debug!(session_key = %self.session_key, model = %self.model(), "disposing session");
        self.session.dispose().await;
    }

    pub(crate) fn record_turn(&mut self, usage: Usage) {
        self.usage.add(usage);
        self.turns += 1;
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn AgentSession> {
        &self.session
    }

    #[must_use]
    pub fn model(&self) -> &ModelRef {
        &self.chain[self.position]
    }

    /// The configured chain this handle was opened with.
    #[must_use]
    pub fn chain(&self) -> &[ModelRef] {
        &self.chain
    }

    #[must_use]
    pub fn credential(&self) -> Option<&Secret<String>> {
        self.credential.as_ref()
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        self.usage
    }

    #[must_use]
    pub fn turns(&self) -> u64 {
        self.turns
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_key", &self.session_key)
            .field("agent_id", &self.agent_id)
            .field("model", self.model())
            .field("usage", &self.usage)
            .field("turns", &self.turns)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

async fn create_session(
    factory: &dyn SessionFactory,
    pool: &CredentialPool,
    session_key: &str,
    agent_id: &str,
    model: &ModelRef,
) -> Result<(Arc<dyn AgentSession>, Option<Secret<String>>)> {
    let credential = pool.pick(&model.provider);
    let spec = SessionSpec {
        session_key: session_key.to_string(),
        agent_id: agent_id.to_string(),
        model: model.clone(),
        credential: credential.clone(),
    };
    let session = factory
        .create(&spec)
        .await
        .map_err(|source| RunError::SessionCreate {
            model: model.to_string(),
            source,
        })?;
    Ok((session, credential))
}
