//! Resilient turn execution.
//!
//! One turn is a bounded retry state machine around `AgentSession::prompt`.
//! Every failure is classified once (see [`crate::failover`]) and mapped to a
//! recovery:
//!
//! | signal               | recovery                                            |
//! |----------------------|-----------------------------------------------------|
//! | cancelled            | stop immediately                                    |
//! | format               | terminal                                            |
//! | context overflow     | truncate tool results, later compact the transcript |
//! | reasoning rejected   | step the think level down, terminal at `off`        |
//! | rate limit           | exponential backoff with jitter, same credential    |
//! | timeout              | shorter exponential backoff, no credential penalty  |
//! | auth / billing       | penalize credential, move to the next model         |
//! | unknown              | terminal                                            |
//!
//! All retrying branches share one counter; going past `max_retries` ends the
//! turn with [`RunError::ExhaustedRetries`].

use std::{sync::Arc, time::Duration};

use {
    courier_auth::{CredentialPool, FailureReason},
    courier_config::RunnerConfig,
    rand::Rng,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use {
    courier_metrics::{counter, histogram, labels, runner as runner_metrics},
    std::time::Instant,
};

use crate::{
    error::{Result, RunError},
    failover::analyze,
    handle::SessionHandle,
    model::{ExecMode, SessionFactory, TurnOptions, Usage},
    model_ref::ModelRef,
    think::ThinkLevel,
};

/// Input for one turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub text: &'a str,
    pub think: ThinkLevel,
    pub exec: Option<ExecMode>,
    pub cancel: &'a CancellationToken,
}

/// A successful turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutput {
    pub text: String,
    pub usage: Usage,
    /// Model that produced the reply (may differ from the primary).
    pub model: ModelRef,
    pub attempts: u32,
    /// Think level actually used (may have been downgraded).
    pub think: ThinkLevel,
}

#[derive(Clone, Copy)]
enum Recovery {
    TruncateToolResults,
    Compact,
    Downgrade(ThinkLevel),
    RateLimitBackoff,
    TimeoutBackoff,
    Fallback(FailureReason),
}

pub struct ResilientRunner {
    factory: Arc<dyn SessionFactory>,
    pool: Arc<CredentialPool>,
    config: RunnerConfig,
}

impl ResilientRunner {
    pub fn new(factory: Arc<dyn SessionFactory>, pool: Arc<CredentialPool>, config: RunnerConfig) -> Self {
        Self {
            factory,
            pool,
            config,
        }
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Open a handle for `session_key` on the first usable model of `chain`.
    pub async fn open(&self, session_key: &str, agent_id: &str, chain: Vec<ModelRef>) -> Result<SessionHandle> {
        SessionHandle::open(self.factory.as_ref(), &self.pool, session_key, agent_id, chain).await
    }

    /// Run one turn on `handle`, recovering from failures where possible.
    pub async fn run(&self, handle: &mut SessionHandle, req: TurnRequest<'_>) -> Result<TurnOutput> {
        let mut think = req.think;
        let mut attempts: u32 = 0;
        let mut retries: u32 = 0;
        let mut truncated = false;
        let mut rate_limit_hits: u32 = 0;
        let mut timeout_hits: u32 = 0;

        loop {
            if req.cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            attempts += 1;

            let session = Arc::clone(handle.session());
            let opts = TurnOptions {
                think,
                exec: req.exec,
            };
            debug!(
                session_key = handle.session_key(),
                model = %handle.model(),
                attempt = attempts,
                think = %think,
                "prompting"
            );
            #[cfg(feature = "metrics")]
            let started = Instant::now();
            #[cfg(feature = "metrics")]
            counter!(runner_metrics::ATTEMPTS_TOTAL, labels::MODEL => handle.model().to_string())
                .increment(1);

            let outcome = tokio::select! {
                biased;
                () = req.cancel.cancelled() => return Err(RunError::Cancelled),
                outcome = session.prompt(req.text, &opts) => outcome,
            };

            #[cfg(feature = "metrics")]
            histogram!(runner_metrics::PROMPT_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

            let err = match outcome {
                Ok(outcome) => {
                    if let Some(credential) = handle.credential() {
                        self.pool
                            .mark_success(&handle.model().provider, credential)
                            .await;
                    }
                    handle.record_turn(outcome.usage);
                    #[cfg(feature = "metrics")]
                    {
                        counter!(runner_metrics::INPUT_TOKENS_TOTAL)
                            .increment(u64::from(outcome.usage.input_tokens));
                        counter!(runner_metrics::OUTPUT_TOKENS_TOTAL)
                            .increment(u64::from(outcome.usage.output_tokens));
                    }
                    info!(
                        session_key = handle.session_key(),
                        model = %handle.model(),
                        attempts,
                        input_tokens = outcome.usage.input_tokens,
                        output_tokens = outcome.usage.output_tokens,
                        "turn complete"
                    );
                    return Ok(TurnOutput {
                        text: outcome.text,
                        usage: outcome.usage,
                        model: handle.model().clone(),
                        attempts,
                        think,
                    });
                },
                Err(err) => err,
            };

            if req.cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }

            let signals = analyze(&err, self.config.rate_limit_max_ms);
            warn!(
                session_key = handle.session_key(),
                model = %handle.model(),
                attempt = attempts,
                reason = %signals.reason,
                context_overflow = signals.context_overflow,
                reasoning_rejected = signals.reasoning_rejected,
                error = %signals.message,
                "prompt failed"
            );
            #[cfg(feature = "metrics")]
            counter!(
                runner_metrics::FAILURES_TOTAL,
                labels::REASON => signals.reason.as_str(),
                labels::MODEL => handle.model().to_string()
            )
            .increment(1);

            if signals.reason == FailureReason::Format {
                return Err(RunError::Format(signals.message));
            }

            let recovery = if signals.context_overflow {
                if truncated {
                    Recovery::Compact
                } else {
                    Recovery::TruncateToolResults
                }
            } else if signals.reasoning_rejected {
                match think.downgrade() {
                    Some(next) => Recovery::Downgrade(next),
                    None => return Err(RunError::ReasoningRejected(signals.message)),
                }
            } else {
                match signals.reason {
                    FailureReason::RateLimit => Recovery::RateLimitBackoff,
                    FailureReason::Timeout => Recovery::TimeoutBackoff,
                    FailureReason::Auth | FailureReason::Billing => Recovery::Fallback(signals.reason),
                    FailureReason::Format | FailureReason::Unknown => {
                        return Err(RunError::Failed {
                            reason: signals.reason,
                            message: signals.message,
                        });
                    },
                }
            };

            // The credential is penalized even when this attempt exhausts the
            // retry budget.
            let penalty = match recovery {
                Recovery::RateLimitBackoff => Some(FailureReason::RateLimit),
                Recovery::Fallback(reason) => Some(reason),
                _ => None,
            };
            if let Some(reason) = penalty
                && let Some(credential) = handle.credential()
            {
                self.pool
                    .mark_failed(&handle.model().provider, credential, reason)
                    .await;
            }

            retries += 1;
            if retries > self.config.max_retries {
                warn!(
                    session_key = handle.session_key(),
                    attempts,
                    max_retries = self.config.max_retries,
                    "retries exhausted"
                );
                return Err(RunError::ExhaustedRetries {
                    attempts,
                    last: signals.message,
                });
            }

            match recovery {
                Recovery::TruncateToolResults => {
                    truncated = true;
                    let changed = session.truncate_tool_results(self.config.tool_result_max_chars);
                    info!(
                        session_key = handle.session_key(),
                        changed,
                        max_chars = self.config.tool_result_max_chars,
                        "context overflow, truncated tool results"
                    );
                    if changed == 0 {
                        self.compact(handle, req.cancel).await?;
                    }
                },
                Recovery::Compact => self.compact(handle, req.cancel).await?,
                Recovery::Downgrade(next) => {
                    info!(
                        session_key = handle.session_key(),
                        from = %think,
                        to = %next,
                        "reasoning level rejected, downgrading"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(runner_metrics::THINK_DOWNGRADES_TOTAL).increment(1);
                    think = next;
                },
                Recovery::RateLimitBackoff => {
                    rate_limit_hits += 1;
                    let delay_ms = signals.retry_after_ms.unwrap_or_else(|| {
                        jittered(
                            exponential_ms(
                                self.config.rate_limit_base_ms,
                                self.config.rate_limit_max_ms,
                                rate_limit_hits,
                            ),
                            self.config.jitter_ratio,
                        )
                    });
                    debug!(delay_ms, "rate limited, backing off");
                    sleep_or_cancel(Duration::from_millis(delay_ms), req.cancel).await?;
                },
                Recovery::TimeoutBackoff => {
                    timeout_hits += 1;
                    let delay_ms = exponential_ms(
                        self.config.timeout_base_ms,
                        self.config.timeout_max_ms,
                        timeout_hits,
                    );
                    debug!(delay_ms, "timed out, backing off");
                    sleep_or_cancel(Duration::from_millis(delay_ms), req.cancel).await?;
                },
                Recovery::Fallback(reason) => {
                    let from = handle.model().clone();
                    if !handle.advance(self.factory.as_ref(), &self.pool).await? {
                        return Err(RunError::Authentication(signals.message));
                    }
                    #[cfg(feature = "metrics")]
                    counter!(runner_metrics::FALLBACKS_TOTAL, labels::REASON => reason.as_str())
                        .increment(1);
                    info!(from = %from, to = %handle.model(), reason = %reason, "model fallback");
                },
            }
        }
    }

    async fn compact(&self, handle: &SessionHandle, cancel: &CancellationToken) -> Result<()> {
        let session = Arc::clone(handle.session());
        let stats = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RunError::Cancelled),
            stats = session.compact(None) => stats,
        }
        .map_err(|e| RunError::ContextOverflow(format!("{e:#}")))?;
        info!(
            session_key = handle.session_key(),
            before = stats.messages_before,
            after = stats.messages_after,
            "compacted context"
        );
        #[cfg(feature = "metrics")]
        counter!(runner_metrics::COMPACTIONS_TOTAL).increment(1);
        Ok(())
    }
}

/// `base * 2^(n-1)`, capped.
fn exponential_ms(base_ms: u64, cap_ms: u64, n: u32) -> u64 {
    let exp = n.saturating_sub(1).min(32);
    base_ms.saturating_mul(1u64 << exp).min(cap_ms)
}

/// Spread `ms` uniformly by ±`ratio`.
fn jittered(ms: u64, ratio: f64) -> u64 {
    if ratio <= 0.0 || ms == 0 {
        return ms;
    }
    let factor = 1.0 + rand::rng().random_range(-ratio..=ratio);
    (ms as f64 * factor).round().max(1.0) as u64
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RunError::Cancelled),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}
