//! Agent sessions and the resilient runner that drives them.
//!
//! A turn goes through [`ResilientRunner::run`], which owns retry, fallback,
//! compaction and reasoning downgrade. Failures are classified in
//! [`failover`].

pub mod error;
pub mod failover;
pub mod handle;
pub mod model;
pub mod model_ref;
pub mod providers;
pub mod runner;
pub mod sanitize;
pub mod think;

pub use {
    error::{Result, RunError},
    failover::{ErrorSignals, analyze, classify},
    handle::SessionHandle,
    model::{
        AgentSession, CompactionStats, ExecMode, Listeners, PromptOutcome, SessionEvent,
        SessionFactory, SessionListener, SessionSpec, Subscription, TurnOptions, Usage,
    },
    model_ref::{ModelRef, chain_with_override, fallback_chain},
    providers::{OpenAiCompatFactory, OpenAiCompatSession},
    runner::{ResilientRunner, TurnOutput, TurnRequest},
    sanitize::sanitize_tool_result,
    think::ThinkLevel,
};
