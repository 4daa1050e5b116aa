//! Credential cooldown curves.
//!
//! Billing failures cool down slowly and for long (5h, 10h, 20h, capped at
//! 24h); everything else starts at a minute and grows fivefold up to an hour.

use std::time::Duration;

use crate::FailureReason;

const BILLING_BASE: Duration = Duration::from_secs(5 * 60 * 60);
const BILLING_CAP: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_BASE: Duration = Duration::from_secs(60);
const DEFAULT_CAP: Duration = Duration::from_secs(60 * 60);

/// Cooldown after the `failures`-th consecutive failure for `reason`.
///
/// Zero failures means no cooldown.
#[must_use]
pub fn backoff(reason: FailureReason, failures: u32) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let (base, factor, cap) = match reason {
        FailureReason::Billing => (BILLING_BASE, 2u32, BILLING_CAP),
        _ => (DEFAULT_BASE, 5u32, DEFAULT_CAP),
    };
    // Past a handful of failures every curve is pinned at its cap.
    let exp = (failures - 1).min(16);
    base.checked_mul(factor.saturating_pow(exp))
        .map_or(cap, |d| d.min(cap))
}
