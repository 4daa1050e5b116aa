//! Inbound message processing pipeline: the glue between channels and agents.
//!
//! Flow: inbound event → dedup → collect batch → finalize (route, trim,
//! injection guard) → directives and commands → resilient turn → chunk →
//! paced delivery via the channel outbound.

pub mod chunk;
pub mod coalesce;
pub mod commands;
pub mod context;
pub mod dedup;
pub mod delivery;
pub mod directives;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod fence;
pub mod injection;
pub mod queue;
pub mod reply;
pub mod typing;

pub use {
    chunk::chunk_text,
    coalesce::{Coalescer, CoalescerConfig},
    commands::{Command, CommandOutcome, ParsedCommand, SkillResolver, parse_command},
    context::MsgContext,
    dedup::DedupCache,
    delivery::{DeliveryReport, Pacing, deliver},
    directives::{Directives, parse_directives},
    dispatcher::{Dispatcher, DispatcherBuilder},
    error::{Error, Result},
    queue::CollectQueue,
    reply::{DispatchError, DispatchResult, DispatchStatus, render_error},
    typing::TypingGuard,
};
