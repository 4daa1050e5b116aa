//! Metric name and label definitions.
//!
//! Every metric courier emits is named here so dashboards and code agree.

/// Inbound dispatch metrics
pub mod dispatch {
    /// Inbound events accepted by the dispatcher
    pub const EVENTS_TOTAL: &str = "courier_dispatch_events_total";
    /// Events dropped as duplicates of a recent (channel, message id)
    pub const DEDUP_DROPPED_TOTAL: &str = "courier_dispatch_dedup_dropped_total";
    /// Events buffered by the collect queue
    pub const COLLECTED_TOTAL: &str = "courier_dispatch_collected_total";
    /// Collect queue flushes (one per quiet period)
    pub const COLLECT_FLUSHES_TOTAL: &str = "courier_dispatch_collect_flushes_total";
    /// Slash commands handled without a model turn
    pub const COMMANDS_TOTAL: &str = "courier_dispatch_commands_total";
    /// Bodies wrapped by the injection guard
    pub const INJECTION_WRAPPED_TOTAL: &str = "courier_dispatch_injection_wrapped_total";
    /// Dispatches that ended with an error result
    pub const ERRORS_TOTAL: &str = "courier_dispatch_errors_total";
    /// End-to-end turn duration in seconds
    pub const TURN_DURATION_SECONDS: &str = "courier_dispatch_turn_duration_seconds";
}

/// Resilient runner metrics
pub mod runner {
    /// Prompt attempts (first tries and retries)
    pub const ATTEMPTS_TOTAL: &str = "courier_runner_attempts_total";
    /// Failed attempts by classified reason
    pub const FAILURES_TOTAL: &str = "courier_runner_failures_total";
    /// Model fallbacks after auth/billing failures
    pub const FALLBACKS_TOTAL: &str = "courier_runner_fallbacks_total";
    /// Context compactions triggered by overflow
    pub const COMPACTIONS_TOTAL: &str = "courier_runner_compactions_total";
    /// Reasoning level downgrades
    pub const THINK_DOWNGRADES_TOTAL: &str = "courier_runner_think_downgrades_total";
    /// Turns that ended in a terminal error
    pub const TERMINAL_ERRORS_TOTAL: &str = "courier_runner_terminal_errors_total";
    /// Input tokens reported by sessions
    pub const INPUT_TOKENS_TOTAL: &str = "courier_runner_input_tokens_total";
    /// Output tokens reported by sessions
    pub const OUTPUT_TOKENS_TOTAL: &str = "courier_runner_output_tokens_total";
    /// Prompt duration in seconds
    pub const PROMPT_DURATION_SECONDS: &str = "courier_runner_prompt_duration_seconds";
}

/// Credential pool metrics
pub mod credentials {
    pub const FAILURES_TOTAL: &str = "courier_credentials_failures_total";
    pub const RECOVERIES_TOTAL: &str = "courier_credentials_recoveries_total";
    /// Picks that had to return a credential still in backoff
    pub const EXHAUSTED_PICKS_TOTAL: &str = "courier_credentials_exhausted_picks_total";
    pub const PERSIST_ERRORS_TOTAL: &str = "courier_credentials_persist_errors_total";
}

/// Session registry metrics
pub mod sessions {
    pub const CREATED_TOTAL: &str = "courier_sessions_created_total";
    /// Handles evicted by the staleness policy
    pub const EVICTED_TOTAL: &str = "courier_sessions_evicted_total";
    pub const ACTIVE: &str = "courier_sessions_active";
}

/// Outbound delivery metrics
pub mod delivery {
    pub const CHUNKS_SENT_TOTAL: &str = "courier_delivery_chunks_sent_total";
    pub const FAILURES_TOTAL: &str = "courier_delivery_failures_total";
    /// Blocks emitted by the streaming coalescer
    pub const BLOCKS_EMITTED_TOTAL: &str = "courier_delivery_blocks_emitted_total";
}

/// Common label keys
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const SOURCE: &str = "source";
    pub const PROVIDER: &str = "provider";
    pub const MODEL: &str = "model";
    pub const REASON: &str = "reason";
    pub const COMMAND: &str = "command";
    pub const ERROR_TYPE: &str = "error_type";
    pub const POLICY: &str = "policy";
}

/// Histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Turn duration buckets (in seconds), 100ms to 5 minutes
    pub static TURN_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0,
        ]
    });

    /// Single prompt duration buckets (in seconds), 50ms to 2 minutes
    pub static PROMPT_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    });
}
