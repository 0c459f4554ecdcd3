//! Prometheus metrics exposition
//!
//! The session client emits `auth_*` metrics through the `metrics` facade.
//! With `--metrics` the CLI installs a Prometheus recorder and prints the
//! text exposition after the command finishes.

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Buckets for `auth_refresh_duration_seconds`, 5ms to 30s.
const REFRESH_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("auth_refresh_duration_seconds".to_string()),
        REFRESH_BUCKETS,
    )
}

/// Install the Prometheus recorder globally and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}
