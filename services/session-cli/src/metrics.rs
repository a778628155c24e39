//! Prometheus exposition of the session counters
//!
//! The counters themselves are recorded by `session_client::metrics`; this
//! module only installs the recorder and renders the text format.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

#[cfg(test)]
mod tests {
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn session_counters_render_in_text_format() {
        // Local recorder so tests never fight over the global one
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            session_client::metrics::record_refresh_attempt(true);
            session_client::metrics::record_refresh_joined();
            session_client::metrics::record_request("refresh_expired");
        });

        let output = handle.render();
        assert!(
            output.contains("session_refresh_attempts_total{outcome=\"success\"} 1"),
            "got: {output}"
        );
        assert!(output.contains("session_refresh_joined_total 1"), "got: {output}");
        assert!(
            output.contains("session_requests_total{outcome=\"refresh_expired\"} 1"),
            "got: {output}"
        );
    }
}
