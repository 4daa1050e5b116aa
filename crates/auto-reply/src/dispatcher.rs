//! The dispatch pipeline: every inbound event enters through
//! [`Dispatcher::dispatch`].
//!
//! Stages: dedup, collect (channel sources in collect mode), finalize
//! (route, trim, injection guard), directives and commands, then the turn
//! itself (session resolve, typing, runner) and paced outbound delivery.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    courier_agents::{
        ModelRef, ResilientRunner, RunError, SessionEvent, SessionFactory, ThinkLevel, TurnRequest,
        chain_with_override, fallback_chain,
    },
    courier_auth::CredentialPool,
    courier_channels::{ChannelOutbound, ChannelRegistry, ChannelReplyTarget},
    courier_common::{
        Clock, SystemClock,
        types::{InboundEvent, SourceKind},
    },
    courier_config::{CourierConfig, MessageQueueMode},
    courier_sessions::{SessionRegistry, StalenessPolicy},
    dashmap::DashMap,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use courier_metrics::{counter, dispatch as dispatch_metrics, histogram, labels, runner as runner_metrics};

use crate::{
    Error, Result,
    chunk::chunk_text,
    coalesce::{Coalescer, CoalescerConfig},
    commands::{Command, CommandOutcome, SkillResolver, resolve_command},
    context::MsgContext,
    dedup::DedupCache,
    delivery::{Pacing, deliver},
    directives::{Directives, parse_directives},
    envelope::{envelope, frame},
    queue::CollectQueue,
    reply::{DispatchError, DispatchResult, DispatchStatus, render_error, truncate_chars},
    typing::TypingGuard,
};

/// An in-flight turn. A session key can have several when messages overlap.
struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Removes its run from the active table when the turn ends.
struct ActiveRunGuard<'a> {
    runs: &'a DashMap<String, Vec<ActiveRun>>,
    key: String,
    id: u64,
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut runs) = self.runs.get_mut(&self.key) {
            runs.retain(|run| run.id != self.id);
        }
        self.runs.remove_if(&self.key, |_, runs| runs.is_empty());
    }
}

pub struct DispatcherBuilder {
    config: CourierConfig,
    factory: Arc<dyn SessionFactory>,
    pool: Arc<CredentialPool>,
    channels: ChannelRegistry,
    skills: Option<Arc<dyn SkillResolver>>,
    clock: Arc<dyn Clock>,
}

impl DispatcherBuilder {
    #[must_use]
    pub fn channels(mut self, channels: ChannelRegistry) -> Self {
        self.channels = channels;
        self
    }

    #[must_use]
    pub fn skills(mut self, skills: Arc<dyn SkillResolver>) -> Self {
        self.skills = Some(skills);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<Dispatcher> {
        let config = Arc::new(self.config);
        let policy = StalenessPolicy::from_config(&config.session.reset);
        let runner = ResilientRunner::new(self.factory, self.pool, config.runner.clone());
        let dedup = DedupCache::new(
            Duration::from_secs(config.dispatch.dedup_window_secs),
            config.dispatch.dedup_max_entries,
            Arc::clone(&self.clock),
        );
        let collect = Arc::new(CollectQueue::new(Duration::from_millis(
            config.dispatch.collect_debounce_ms,
        )));
        let sessions = SessionRegistry::new(policy, Arc::clone(&self.clock));

        Arc::new_cyclic(|me| Dispatcher {
            me: me.clone(),
            config,
            runner,
            sessions,
            channels: self.channels,
            dedup,
            collect,
            active_runs: DashMap::new(),
            model_overrides: DashMap::new(),
            skills: self.skills,
            clock: self.clock,
            run_ids: AtomicU64::new(1),
        })
    }
}

/// Owns every registry the pipeline needs. Build with [`Dispatcher::builder`],
/// stop with [`Dispatcher::shutdown`].
pub struct Dispatcher {
    me: Weak<Dispatcher>,
    config: Arc<CourierConfig>,
    runner: ResilientRunner,
    sessions: SessionRegistry,
    channels: ChannelRegistry,
    dedup: DedupCache,
    collect: Arc<CollectQueue>,
    active_runs: DashMap<String, Vec<ActiveRun>>,
    /// `/model` overrides by session key, cleared by `/new`.
    model_overrides: DashMap<String, String>,
    skills: Option<Arc<dyn SkillResolver>>,
    clock: Arc<dyn Clock>,
    run_ids: AtomicU64,
}

impl Dispatcher {
    pub fn builder(
        config: CourierConfig,
        factory: Arc<dyn SessionFactory>,
        pool: Arc<CredentialPool>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            factory,
            pool,
            channels: ChannelRegistry::new(),
            skills: None,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<CredentialPool> {
        self.runner.pool()
    }

    /// Process one inbound event. Never fails: errors are logged and come
    /// back in the result.
    pub async fn dispatch(&self, event: InboundEvent) -> DispatchResult {
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::EVENTS_TOTAL, labels::SOURCE => event.source.as_str()).increment(1);

        if let Some(channel) = event.channel_id.as_deref()
            && let Some(key) = DedupCache::key(channel, event.message_id.as_deref())
            && self.dedup.check_and_insert(&key)
        {
            debug!(key = %key, "duplicate inbound message dropped");
            #[cfg(feature = "metrics")]
            counter!(dispatch_metrics::DEDUP_DROPPED_TOTAL, labels::CHANNEL => channel.to_string()).increment(1);
            return DispatchResult::status(DispatchStatus::Duplicate);
        }

        if event.source == SourceKind::Channel && self.config.dispatch.queue_mode == MessageQueueMode::Collect {
            let me = self.me.clone();
            self.collect.push(event, move |combined| async move {
                if let Some(dispatcher) = me.upgrade() {
                    let result = dispatcher.process(combined).await;
                    debug!(status = ?result.status, "collected batch processed");
                }
            });
            return DispatchResult::status(DispatchStatus::Queued);
        }

        self.process(event).await
    }

    /// Everything after dedup and collect.
    async fn process(&self, event: InboundEvent) -> DispatchResult {
        let started = Instant::now();
        let source = event.source;

        let ctx = match MsgContext::finalize(event, &self.config, self.clock.now()) {
            Ok(ctx) => ctx,
            Err(e) => return self.failed(None, e).await,
        };
        let result = match self.handle(&ctx).await {
            Ok(result) => result,
            Err(e) => self.failed(Some(&ctx), e).await,
        };

        #[cfg(feature = "metrics")]
        histogram!(dispatch_metrics::TURN_DURATION_SECONDS, labels::SOURCE => source.as_str())
            .record(started.elapsed().as_secs_f64());
        info!(
            source = source.as_str(),
            session_key = ctx.session_key(),
            status = ?result.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        result
    }

    async fn handle(&self, ctx: &MsgContext) -> Result<DispatchResult> {
        if ctx.is_empty() {
            return Ok(DispatchResult::status(DispatchStatus::Empty).with_session_key(ctx.session_key()));
        }

        // A flagged body is data: no directives, no commands.
        let (directives, body) = if ctx.injection_flagged {
            (Directives::default(), ctx.body.clone())
        } else {
            parse_directives(&ctx.body, &self.config.agents.defaults.aliases)
        };
        if body.is_empty() && ctx.media_urls.is_empty() {
            return Ok(DispatchResult::status(DispatchStatus::Empty).with_session_key(ctx.session_key()));
        }

        let outcome = if ctx.injection_flagged {
            CommandOutcome::Passthrough(body)
        } else {
            resolve_command(&body, self.skills.as_deref())
                .await
                .map_err(|source| Error::Command {
                    command: "skill",
                    source,
                })?
        };

        match outcome {
            CommandOutcome::Run(command) => self.command(ctx, command).await,
            CommandOutcome::Passthrough(body) => self.turn(ctx, &directives, &body).await,
        }
    }

    // ── Turn ────────────────────────────────────────────────────────────────

    async fn turn(&self, ctx: &MsgContext, directives: &Directives, body: &str) -> Result<DispatchResult> {
        let key = ctx.session_key();
        let agent_id = ctx.route.agent_id.as_str();
        let aliases = &self.config.agents.defaults.aliases;
        let model_config = self.config.model_for(agent_id);

        // directive > /model override > agent default
        let requested = directives
            .model
            .clone()
            .or_else(|| self.model_overrides.get(key).map(|m| m.value().clone()));
        let chain = match requested.as_deref() {
            Some(model) => chain_with_override(model, model_config, aliases),
            None => fallback_chain(model_config, aliases),
        };
        let primary = chain.first().cloned().ok_or(RunError::NoModel)?;
        let think = directives
            .think
            .or_else(|| {
                self.config
                    .thinking_for(agent_id)
                    .and_then(|t| t.parse::<ThinkLevel>().ok())
            })
            .unwrap_or_default();

        let since_last = self.sessions.last_active(key).map(|at| ctx.received_at - at);
        let (handle, acquired) = self
            .sessions
            .resolve(key, &primary, || self.runner.open(key, agent_id, chain.clone()))
            .await?;
        debug!(session_key = key, ?acquired, model = %primary, think = %think, "session ready");

        let run_cancel = ctx.cancel.child_token();
        let run_id = self.run_ids.fetch_add(1, Ordering::Relaxed);
        {
            let mut runs = self.active_runs.entry(key.to_string()).or_default();
            if !runs.is_empty() {
                debug!(session_key = key, running = runs.len(), "another turn is already running");
            }
            runs.push(ActiveRun {
                id: run_id,
                cancel: run_cancel.clone(),
            });
        }
        let _active = ActiveRunGuard {
            runs: &self.active_runs,
            key: key.to_string(),
            id: run_id,
        };

        let target = ctx.reply_target();
        let outbound = match &target {
            Some(target) => Some(self.channels.require(&target.channel_id)?),
            None => None,
        };
        if let (Some(target), Some(outbound)) = (&target, &outbound) {
            self.acknowledge(outbound.as_ref(), target).await;
        }
        let typing = match (&target, &outbound) {
            (Some(target), Some(outbound)) => Some(TypingGuard::start(
                Arc::clone(outbound),
                target.account_id.clone(),
                target.chat_id.clone(),
                Duration::from_secs(self.config.delivery.typing_interval_secs.max(1)),
                Duration::from_secs(self.config.delivery.typing_ttl_secs),
            )),
            _ => None,
        };

        let framing = target
            .as_ref()
            .map(|t| envelope(&t.channel_id, ctx.sender_label(), since_last, ctx.received_at));
        let prompt = frame(body, &ctx.media_urls, framing.as_deref());

        let coalescer = ctx.on_block.as_ref().map(|sink| {
            Arc::new(Coalescer::new(
                CoalescerConfig::from(&self.config.streaming),
                Arc::clone(sink),
            ))
        });

        let (output, disposed) = {
            let mut handle = handle.lock().await;
            let subscription = coalescer.as_ref().map(|coalescer| {
                let coalescer = Arc::clone(coalescer);
                handle.session().subscribe(Arc::new(move |event: &SessionEvent| {
                    if let SessionEvent::TextDelta(delta) = event {
                        coalescer.push(delta);
                    }
                }))
            });
            let output = self
                .runner
                .run(&mut handle, TurnRequest {
                    text: &prompt,
                    think,
                    exec: directives.exec,
                    cancel: &run_cancel,
                })
                .await;
            drop(subscription);
            (output, handle.is_disposed())
        };
        if let Some(typing) = typing {
            typing.seal();
        }
        if disposed {
            // The fallback chain ran out; the next turn starts a new session.
            self.sessions.discard(key, &handle);
        }
        let output = output?;
        if let Some(coalescer) = &coalescer {
            coalescer.finish();
        }
        self.sessions.touch(key);

        info!(
            session_key = key,
            model = %output.model,
            attempts = output.attempts,
            input_tokens = output.usage.input_tokens,
            output_tokens = output.usage.output_tokens,
            "turn complete"
        );

        let delivery = match (&target, &outbound) {
            (Some(target), Some(outbound)) if !output.text.trim().is_empty() => {
                let limit = self.text_limit(outbound.as_ref());
                let chunks = chunk_text(&output.text, limit);
                Some(
                    deliver(
                        outbound.as_ref(),
                        target,
                        &chunks,
                        Pacing::from(&self.config.delivery),
                        &run_cancel,
                    )
                    .await,
                )
            },
            _ => None,
        };

        Ok(DispatchResult {
            status: DispatchStatus::Replied,
            reply: Some(output.text),
            session_key: Some(key.to_string()),
            error: None,
            model: Some(output.model.to_string()),
            usage: Some(output.usage),
            delivery,
        })
    }

    async fn acknowledge(&self, outbound: &dyn ChannelOutbound, target: &ChannelReplyTarget) {
        let (Some(emoji), Some(message_id)) = (&self.config.dispatch.ack_reaction, &target.message_id) else {
            return;
        };
        if let Err(e) = outbound
            .send_reaction(&target.account_id, &target.chat_id, message_id, emoji)
            .await
        {
            debug!(channel = %target.channel_id, error = %e, "ack reaction failed");
        }
    }

    fn text_limit(&self, outbound: &dyn ChannelOutbound) -> usize {
        outbound
            .capabilities()
            .max_text_len
            .min(self.config.delivery.text_limit)
            .max(1)
    }

    // ── Commands ────────────────────────────────────────────────────────────

    async fn command(&self, ctx: &MsgContext, command: Command) -> Result<DispatchResult> {
        let name = command.name();
        info!(session_key = ctx.session_key(), command = name, "command");
        #[cfg(feature = "metrics")]
        counter!(dispatch_metrics::COMMANDS_TOTAL, labels::COMMAND => name).increment(1);

        let text = match command {
            Command::New => self.reset(ctx.session_key()).await,
            Command::Stop => self.stop(ctx.session_key()),
            Command::Compact(instructions) => self.compact(ctx.session_key(), instructions.as_deref()).await?,
            Command::Model(value) => self.model_command(ctx, value.as_deref()),
            Command::Status => self.status(ctx).await,
        };

        if let Some(target) = ctx.reply_target() {
            self.send_single(&target, &text).await;
        }
        Ok(DispatchResult::status(DispatchStatus::Command)
            .with_session_key(ctx.session_key())
            .with_reply(text))
    }

    /// Cancel every turn running on `key`. Returns how many there were.
    fn cancel_runs(&self, key: &str) -> usize {
        let Some((_, runs)) = self.active_runs.remove(key) else {
            return 0;
        };
        for run in &runs {
            run.cancel.cancel();
            debug!(session_key = key, run_id = run.id, "turn cancelled");
        }
        runs.len()
    }

    async fn reset(&self, key: &str) -> String {
        self.cancel_runs(key);
        self.model_overrides.remove(key);
        if self.sessions.evict(key).await {
            "New session started.".to_string()
        } else {
            "Session is already fresh.".to_string()
        }
    }

    fn stop(&self, key: &str) -> String {
        match self.cancel_runs(key) {
            0 => "Nothing is running.".to_string(),
            count => {
                info!(session_key = key, count, "turns cancelled by /stop");
                "Stopped.".to_string()
            },
        }
    }

    async fn compact(&self, key: &str, instructions: Option<&str>) -> Result<String> {
        let Some(handle) = self.sessions.peek(key) else {
            return Ok("No active session to compact.".to_string());
        };
        let session = Arc::clone(handle.lock().await.session());
        let stats = session
            .compact(instructions)
            .await
            .map_err(|source| Error::Command {
                command: "compact",
                source,
            })?;
        Ok(format!(
            "Session compacted from {} to {} messages.",
            stats.messages_before, stats.messages_after
        ))
    }

    fn model_command(&self, ctx: &MsgContext, value: Option<&str>) -> String {
        let key = ctx.session_key();
        let aliases = &self.config.agents.defaults.aliases;
        match value {
            None => match self.model_overrides.get(key) {
                Some(model) => format!("Model: {} (set for this session)", model.value()),
                None => format!(
                    "Model: {}",
                    self.config.model_for(&ctx.route.agent_id).primary
                ),
            },
            Some(value) => match ModelRef::resolve(value, aliases) {
                Some(model) => {
                    self.model_overrides.insert(key.to_string(), value.to_string());
                    format!("Model set to {model} for this session.")
                },
                None => format!("Unknown model '{value}'. Use an alias or provider/model."),
            },
        }
    }

    async fn status(&self, ctx: &MsgContext) -> String {
        let key = ctx.session_key();
        let mut lines = vec![
            format!("Session: {key}"),
            format!("Agent: {}", ctx.route.agent_id),
        ];

        let cached = self.sessions.peek(key);
        let model = match &cached {
            Some(handle) => match handle.try_lock() {
                Ok(handle) => {
                    let usage = handle.usage();
                    lines.push(format!("Model: {}", handle.model()));
                    lines.push(format!("Turns: {}", handle.turns()));
                    lines.push(format!(
                        "Tokens: {} in / {} out",
                        usage.input_tokens, usage.output_tokens
                    ));
                    Some(handle.model().clone())
                },
                Err(_) => {
                    lines.push("Model: (turn in progress)".to_string());
                    None
                },
            },
            None => {
                lines.push("No active session.".to_string());
                let config = self.config.model_for(&ctx.route.agent_id);
                ModelRef::resolve(&config.primary, &self.config.agents.defaults.aliases)
            },
        };

        if let Some(model) = model {
            let now_ms = self.clock.now_ms();
            for cred in self
                .pool()
                .status()
                .into_iter()
                .filter(|c| c.provider == model.provider)
            {
                let state = if cred.available {
                    "ok".to_string()
                } else {
                    format!(
                        "cooling down {}s",
                        (cred.backoff_until_ms - now_ms).max(0) / 1000
                    )
                };
                lines.push(format!(
                    "Key ...{}: {state}, {} failures",
                    cred.suffix, cred.failures
                ));
            }
        }
        lines.join("\n")
    }

    // ── Errors and single messages ──────────────────────────────────────────

    /// Send one message, cut to the channel limit. Failures are logged only.
    async fn send_single(&self, target: &ChannelReplyTarget, text: &str) {
        let Some(outbound) = self.channels.get(&target.channel_id) else {
            warn!(channel = %target.channel_id, "no outbound registered for channel");
            return;
        };
        let text = truncate_chars(text, self.text_limit(outbound.as_ref()));
        if let Err(e) = outbound
            .send_text(&target.account_id, &target.chat_id, &text)
            .await
        {
            warn!(channel = %target.channel_id, error = %e, "failed to send reply");
        }
    }

    async fn failed(&self, ctx: Option<&MsgContext>, err: Error) -> DispatchResult {
        let session_key = ctx.map(|c| c.session_key().to_string());
        if err.is_cancelled() {
            info!(session_key = session_key.as_deref().unwrap_or(""), "turn cancelled");
            let mut result = DispatchResult::status(DispatchStatus::Cancelled);
            result.session_key = session_key;
            return result;
        }

        let kind = err.kind();
        error!(
            session_key = session_key.as_deref().unwrap_or(""),
            error_type = kind,
            error = %err,
            "dispatch failed"
        );
        #[cfg(feature = "metrics")]
        {
            counter!(dispatch_metrics::ERRORS_TOTAL, labels::ERROR_TYPE => kind).increment(1);
            if err.run_error().is_some() {
                counter!(runner_metrics::TERMINAL_ERRORS_TOTAL, labels::ERROR_TYPE => kind).increment(1);
            }
        }

        let rendered = render_error(&err);
        if let Some(target) = ctx.and_then(MsgContext::reply_target) {
            self.send_single(&target, &rendered).await;
        }
        DispatchResult {
            status: DispatchStatus::Failed,
            reply: Some(rendered),
            session_key,
            error: Some(DispatchError {
                kind: kind.to_string(),
                message: err.to_string(),
            }),
            model: None,
            usage: None,
            delivery: None,
        }
    }

    /// Cancel pending batches and running turns, then dispose every session.
    pub async fn shutdown(&self) {
        self.collect.clear();
        let runs: Vec<CancellationToken> = self
            .active_runs
            .iter()
            .flat_map(|runs| runs.iter().map(|run| run.cancel.clone()).collect::<Vec<_>>())
            .collect();
        for cancel in runs {
            cancel.cancel();
        }
        self.active_runs.clear();
        self.sessions.shutdown().await;
        info!("dispatcher shut down");
    }
}
