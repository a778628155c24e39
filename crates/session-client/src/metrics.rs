//! Counters for the refresh and request paths
//!
//! - `session_refresh_attempts_total` (counter): label `outcome`
//! - `session_refresh_joined_total` (counter)
//! - `session_invalidations_total` (counter)
//! - `session_requests_total` (counter): label `outcome`
//!
//! Without an installed recorder these are no-ops.

/// Record a completed refresh attempt.
pub fn record_refresh_attempt(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    ::metrics::counter!("session_refresh_attempts_total", "outcome" => outcome).increment(1);
}

/// Record a caller that joined an attempt already in flight.
pub fn record_refresh_joined() {
    ::metrics::counter!("session_refresh_joined_total").increment(1);
}

/// Record a session invalidation.
pub fn record_invalidation() {
    ::metrics::counter!("session_invalidations_total").increment(1);
}

/// Record the final outcome of an authenticated request.
pub fn record_request(outcome: &'static str) {
    ::metrics::counter!("session_requests_total", "outcome" => outcome).increment(1);
}
