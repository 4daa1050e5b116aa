//! Sessions backed by any OpenAI-compatible `/chat/completions` endpoint.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    courier_config::{CourierConfig, ProviderEntry},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::{debug, trace, warn},
};

use crate::{
    failover::with_retry_after_marker,
    model::{
        AgentSession, CompactionStats, Listeners, PromptOutcome, SessionEvent, SessionFactory,
        SessionListener, SessionSpec, Subscription, TurnOptions, Usage,
    },
    sanitize::{needs_sanitizing, sanitize_tool_result},
    think::ThinkLevel,
};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Messages kept verbatim after a compaction.
const KEEP_AFTER_COMPACTION: usize = 2;
const COMPACTION_PROMPT: &str = "Summarize the conversation so far. Keep decisions, open \
                                 questions, names, and any facts the user asked you to \
                                 remember. Be concise.";

/// One transcript entry in chat-completions shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

pub struct OpenAiCompatSession {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<Secret<String>>,
    transcript: Mutex<Vec<Message>>,
    listeners: Listeners,
    disposed: AtomicBool,
}

impl OpenAiCompatSession {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<Secret<String>>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            transcript: Mutex::new(Vec::new()),
            listeners: Listeners::default(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Replace the transcript, e.g. when restoring a conversation.
    pub fn seed(&self, messages: Vec<Message>) {
        *self.transcript.lock().unwrap_or_else(|e| e.into_inner()) = messages;
    }

    #[must_use]
    pub fn transcript(&self) -> Vec<Message> {
        self.transcript
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn complete(&self, messages: &[Message], think: ThinkLevel) -> anyhow::Result<(String, Usage)> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if think != ThinkLevel::Off {
            body["reasoning_effort"] = serde_json::Value::String(think.as_str().to_string());
        }
        trace!(body = %body, "chat completions request");

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::anyhow!("request timed out: {e}")
            } else {
                anyhow::anyhow!("request failed: {e}")
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after_ms = retry_after_ms_from_headers(resp.headers());
            let body_text = resp.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, body = %body_text, "chat completions error");
            anyhow::bail!(
                "{}",
                with_retry_after_marker(format!("HTTP {status}: {body_text}"), retry_after_ms)
            );
        }

        let payload: serde_json::Value = resp.json().await?;
        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let usage = Usage {
            input_tokens: token_count(&payload["usage"]["prompt_tokens"]),
            output_tokens: token_count(&payload["usage"]["completion_tokens"]),
        };
        Ok((text, usage))
    }
}

fn token_count(value: &serde_json::Value) -> u32 {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// `retry-after-ms` wins over `retry-after` (seconds).
fn retry_after_ms_from_headers(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let parse = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    };
    parse("retry-after-ms").or_else(|| parse("retry-after").map(|s| s.saturating_mul(1_000)))
}

#[async_trait]
impl AgentSession for OpenAiCompatSession {
    async fn prompt(&self, text: &str, opts: &TurnOptions) -> anyhow::Result<PromptOutcome> {
        if self.disposed.load(Ordering::Acquire) {
            anyhow::bail!("session disposed");
        }
        if let Some(exec) = opts.exec {
            debug!(exec = exec.as_str(), "exec mode has no effect without tools");
        }

        let mut messages = self.transcript();
        messages.push(Message::new("user", text));

        let (reply, usage) = self.complete(&messages, opts.think).await?;

        if !reply.is_empty() {
            self.listeners.emit(&SessionEvent::TextDelta(reply.clone()));
        }
        self.listeners.emit(&SessionEvent::TurnEnd { usage });

        // Only a completed exchange enters the transcript, so retries never
        // duplicate the user message.
        {
            let mut transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
            transcript.push(Message::new("user", text));
            transcript.push(Message::new("assistant", reply.clone()));
        }

        Ok(PromptOutcome { text: reply, usage })
    }

    fn subscribe(&self, listener: SessionListener) -> Subscription {
        self.listeners.add(listener)
    }

    async fn compact(&self, instructions: Option<&str>) -> anyhow::Result<CompactionStats> {
        let snapshot = self.transcript();
        let before = snapshot.len();
        if before <= KEEP_AFTER_COMPACTION {
            return Ok(CompactionStats {
                messages_before: before,
                messages_after: before,
            });
        }

        let split = before - KEEP_AFTER_COMPACTION;
        let mut request: Vec<Message> = snapshot[..split].to_vec();
        let prompt = match instructions {
            Some(extra) => format!("{COMPACTION_PROMPT}\n\n{extra}"),
            None => COMPACTION_PROMPT.to_string(),
        };
        request.push(Message::new("user", prompt));

        let (summary, _) = self.complete(&request, ThinkLevel::Off).await?;

        let mut compacted = Vec::with_capacity(KEEP_AFTER_COMPACTION + 1);
        compacted.push(Message::new(
            "system",
            format!("Summary of the earlier conversation:\n{summary}"),
        ));
        compacted.extend_from_slice(&snapshot[split..]);
        let after = compacted.len();
        self.seed(compacted);

        debug!(model = %self.model, before, after, "transcript compacted");
        Ok(CompactionStats {
            messages_before: before,
            messages_after: after,
        })
    }

    fn truncate_tool_results(&self, max_chars: usize) -> usize {
        let mut transcript = self.transcript.lock().unwrap_or_else(|e| e.into_inner());
        let mut changed = 0;
        for msg in transcript
            .iter_mut()
            .filter(|m| m.role == "tool" && needs_sanitizing(&m.content, max_chars))
        {
            msg.content = sanitize_tool_result(&msg.content, max_chars);
            changed += 1;
        }
        changed
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

/// Creates [`OpenAiCompatSession`]s using per-provider base URLs from config.
pub struct OpenAiCompatFactory {
    client: reqwest::Client,
    providers: HashMap<String, ProviderEntry>,
}

impl OpenAiCompatFactory {
    pub fn new(providers: HashMap<String, ProviderEntry>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, providers })
    }

    pub fn from_config(config: &CourierConfig) -> anyhow::Result<Self> {
        Self::new(config.providers.clone())
    }

    fn base_url(&self, provider: &str) -> Option<String> {
        match self.providers.get(provider) {
            Some(entry) if !entry.enabled => None,
            Some(ProviderEntry {
                base_url: Some(url),
                ..
            }) => Some(url.clone()),
            _ if provider == "openai" => Some(DEFAULT_OPENAI_BASE_URL.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl SessionFactory for OpenAiCompatFactory {
    async fn create(&self, spec: &SessionSpec) -> anyhow::Result<Arc<dyn AgentSession>> {
        let Some(base_url) = self.base_url(&spec.model.provider) else {
            anyhow::bail!(
                "provider '{}' is disabled or has no base_url configured",
                spec.model.provider
            );
        };
        debug!(
            session_key = %spec.session_key,
            model = %spec.model,
            base_url = %base_url,
            has_credential = spec.credential.is_some(),
            "creating openai-compatible session"
        );
        Ok(Arc::new(OpenAiCompatSession::new(
            self.client.clone(),
            base_url,
            spec.model.model.clone(),
            spec.credential.clone(),
        )))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{failover::analyze, model_ref::ModelRef},
        axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::post},
        courier_auth::FailureReason,
    };

    #[derive(Default, Clone)]
    struct Captured(Arc<Mutex<Vec<serde_json::Value>>>);

    impl Captured {
        fn bodies(&self) -> Vec<serde_json::Value> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Mock endpoint that records every body and answers with `respond`.
    async fn start_mock<F>(respond: F) -> (String, Captured)
    where
        F: Fn(&serde_json::Value) -> axum::response::Response + Clone + Send + Sync + 'static,
    {
        let captured = Captured::default();
        let cap = captured.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move |Json(body): Json<serde_json::Value>| {
                let cap = cap.clone();
                let respond = respond.clone();
                async move {
                    let resp = respond(&body);
                    cap.0.lock().unwrap().push(body);
                    resp
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), captured)
    }

    fn reply(text: &str) -> axum::response::Response {
        Json(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": text}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .into_response()
    }

    fn session(base_url: &str) -> OpenAiCompatSession {
        OpenAiCompatSession::new(
            reqwest::Client::new(),
            base_url,
            "gpt-test",
            Some(Secret::new("sk-test".into())),
        )
    }

    #[tokio::test]
    async fn prompt_records_exchange_and_usage() {
        let (url, captured) = start_mock(|_| reply("hello back")).await;
        let session = session(&url);
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&deltas);
        let _sub = session.subscribe(Arc::new(move |ev| {
            if let SessionEvent::TextDelta(t) = ev {
                d.lock().unwrap().push(t.clone());
            }
        }));

        let out = session
            .prompt("hello", &TurnOptions::default())
            .await
            .unwrap();
        assert_eq!(out.text, "hello back");
        assert_eq!(out.usage.input_tokens, 12);
        assert_eq!(out.usage.output_tokens, 3);
        assert_eq!(*deltas.lock().unwrap(), vec!["hello back".to_string()]);
        assert_eq!(session.transcript().len(), 2);

        let body = &captured.bodies()[0];
        assert_eq!(body["model"], "gpt-test");
        assert!(body.get("reasoning_effort").is_none());
    }

    #[tokio::test]
    async fn think_level_sets_reasoning_effort() {
        let (url, captured) = start_mock(|_| reply("ok")).await;
        let session = session(&url);
        session
            .prompt("q", &TurnOptions {
                think: ThinkLevel::High,
                exec: None,
            })
            .await
            .unwrap();
        assert_eq!(captured.bodies()[0]["reasoning_effort"], "high");
    }

    #[tokio::test]
    async fn error_status_carries_retry_after() {
        let (url, _) = start_mock(|_| {
            (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", "3")],
                "slow down",
            )
                .into_response()
        })
        .await;
        let session = session(&url);
        let err = session
            .prompt("q", &TurnOptions::default())
            .await
            .unwrap_err();

        let signals = analyze(&err, 30_000);
        assert_eq!(signals.reason, FailureReason::RateLimit);
        assert_eq!(signals.retry_after_ms, Some(3_000));
        // A failed exchange is not recorded.
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn compact_keeps_recent_messages() {
        let (url, captured) = start_mock(|_| reply("the gist")).await;
        let session = session(&url);
        session.seed(vec![
            Message::new("user", "one"),
            Message::new("assistant", "two"),
            Message::new("user", "three"),
            Message::new("assistant", "four"),
        ]);

        let stats = session.compact(Some("focus on numbers")).await.unwrap();
        assert_eq!(stats.messages_before, 4);
        assert_eq!(stats.messages_after, 3);

        let transcript = session.transcript();
        assert_eq!(transcript[0].role, "system");
        assert!(transcript[0].content.ends_with("the gist"));
        assert_eq!(transcript[2].content, "four");

        let sent = &captured.bodies()[0]["messages"];
        assert_eq!(sent.as_array().unwrap().len(), 3);
        assert!(sent[2]["content"].as_str().unwrap().contains("focus on numbers"));
    }

    #[test]
    fn truncates_only_oversized_tool_results() {
        let session = session("http://unused");
        session.seed(vec![
            Message::new("user", "x".repeat(500)),
            Message::new("tool", "y".repeat(500)),
            Message::new("tool", "short"),
        ]);
        assert_eq!(session.truncate_tool_results(100), 1);
        let transcript = session.transcript();
        assert_eq!(transcript[0].content.len(), 500);
        assert!(transcript[1].content.contains("[truncated: 500 chars total]"));
        assert_eq!(transcript[2].content, "short");
        assert_eq!(session.truncate_tool_results(100), 0);
    }

    #[tokio::test]
    async fn factory_resolves_base_urls() {
        let mut providers = HashMap::new();
        providers.insert("local".to_string(), ProviderEntry {
            enabled: true,
            base_url: Some("http://localhost:11434/v1".into()),
            ..Default::default()
        });
        providers.insert("off".to_string(), ProviderEntry {
            enabled: false,
            base_url: Some("http://nowhere".into()),
            ..Default::default()
        });
        let factory = OpenAiCompatFactory::new(providers).unwrap();

        let spec = |model: &str| SessionSpec {
            session_key: "k".into(),
            agent_id: "main".into(),
            model: ModelRef::parse(model).unwrap(),
            credential: None,
        };
        assert!(factory.create(&spec("local/llama3")).await.is_ok());
        assert!(factory.create(&spec("openai/gpt-4o")).await.is_ok());
        assert!(factory.create(&spec("off/model")).await.is_err());
        assert!(factory.create(&spec("mystery/model")).await.is_err());
    }

    #[tokio::test]
    async fn disposed_session_refuses_prompts() {
        let session = session("http://unused");
        session.dispose().await;
        assert!(session.prompt("q", &TurnOptions::default()).await.is_err());
    }
}
