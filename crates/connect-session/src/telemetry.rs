//! Refresh metrics
//!
//! - `auth_refresh_total` (counter): label `outcome` (`success`, `failure`, `terminal`)
//! - `auth_refresh_coalesced_total` (counter): callers that joined an in-flight refresh

/// Record a settled refresh attempt.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a caller that waited on someone else's refresh instead of starting one.
pub fn record_coalesced() {
    metrics::counter!("auth_refresh_coalesced_total").increment(1);
}
