//! Metric names and recorder setup for courier.
//!
//! Library crates record through the `metrics` facade behind their own
//! `metrics` cargo feature; the binary installs a recorder with
//! [`init_metrics`]. With the `prometheus` feature the recorder renders the
//! Prometheus text format.
//!
//! ```rust,ignore
//! use courier_metrics::{counter, dispatch, labels};
//!
//! counter!(dispatch::DEDUP_DROPPED_TOTAL, labels::CHANNEL => "telegram").increment(1);
//! ```

mod definitions;
pub mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

pub use metrics::{counter, gauge, histogram};
