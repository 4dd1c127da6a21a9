//! Dispatch metrics
//!
//! - `dispatch_requests_total` (counter): label `status` (final HTTP status, or
//!   `none` when no response was received)
//! - `dispatch_request_duration_seconds` (histogram): label `status`

/// Record a finished call, including any refresh-and-retry it went through.
pub fn record_request(status: Option<u16>, duration_secs: f64) {
    let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
    metrics::counter!("dispatch_requests_total", "status" => status.clone()).increment(1);
    metrics::histogram!("dispatch_request_duration_seconds", "status" => status)
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn record_without_recorder_is_noop() {
        record_request(Some(200), 0.01);
        record_request(None, 0.01);
    }

    #[test]
    fn status_label_is_recorded() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(Some(200), 0.02);
        record_request(None, 0.5);

        let output = handle.render();
        assert!(
            output.contains("dispatch_requests_total{status=\"200\"} 1"),
            "got: {output}"
        );
        assert!(
            output.contains("dispatch_requests_total{status=\"none\"} 1"),
            "got: {output}"
        );
    }
}
