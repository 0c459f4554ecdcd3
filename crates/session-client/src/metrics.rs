//! Token lifecycle metrics
//!
//! - `auth_refresh_total` (counter): label `outcome` (success, failure, superseded, soft_failure)
//! - `auth_refresh_duration_seconds` (histogram)
//! - `auth_replays_total` (counter): label `outcome` (ok, error, abandoned, rejected, stale_token)
//! - `auth_pending_requests` (gauge): requests waiting on a refresh
//! - `auth_logouts_total` (counter): label `reason`
//!
//! Without an installed recorder every call is a no-op.

use std::time::Duration;

pub fn record_refresh(outcome: &'static str, duration: Duration) {
    metrics::counter!("auth_refresh_total", "outcome" => outcome).increment(1);
    metrics::histogram!("auth_refresh_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_replay(outcome: &'static str) {
    metrics::counter!("auth_replays_total", "outcome" => outcome).increment(1);
}

pub fn set_pending(depth: usize) {
    metrics::gauge!("auth_pending_requests").set(depth as f64);
}

pub fn record_logout(reason: &'static str) {
    metrics::counter!("auth_logouts_total", "reason" => reason).increment(1);
}
