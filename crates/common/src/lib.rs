//! Shared types, clocks and timers used across all courier crates.

pub mod clock;
pub mod timer;
pub mod types;

pub use {
    clock::{Clock, ManualClock, SystemClock},
    timer::Timers,
};
