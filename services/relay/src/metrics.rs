//! Prometheus metrics exposition
//!
//! - `relay_completions_total` (counter): labels `model`, `mode`, `outcome`
//! - `relay_completion_duration_seconds` (histogram): label `outcome`
//! - `relay_dispatch_retries_total` (counter): label `reason`
//! - `relay_accounts_disabled_total` (counter)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return the render handle.
///
/// Explicit buckets make the duration metric render as a histogram with
/// `_bucket` lines; the range covers sub-second rejections up to the
/// longest streamed generation.
pub fn install_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                "relay_completion_duration_seconds".to_string(),
            ),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
        )
        .expect("failed to set histogram buckets")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record one finished completion request.
pub fn record_completion(model: &str, mode: &'static str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!(
        "relay_completions_total",
        "model" => model.to_string(),
        "mode" => mode,
        "outcome" => outcome,
    )
    .increment(1);
    metrics::histogram!("relay_completion_duration_seconds", "outcome" => outcome)
        .record(duration_secs);
}

/// Record one dispatch attempt that moved on to another account.
pub fn record_dispatch_retry(reason: &'static str) {
    metrics::counter!("relay_dispatch_retries_total", "reason" => reason).increment(1);
}

/// Record an account being disabled by the dispatcher.
pub fn record_account_disabled() {
    metrics::counter!("relay_accounts_disabled_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_completion("claude-4-sonnet", "stream", "ok", 1.2);
        record_dispatch_retry("transport");
        record_account_disabled();
    }

    /// Local recorder pair so tests don't fight over the process-global
    /// recorder singleton.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    "relay_completion_duration_seconds".to_string(),
                ),
                &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0],
            )
            .expect("failed to set histogram buckets")
            .build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn completion_counter_and_histogram_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_completion("claude-4-sonnet", "stream", "ok", 2.1);
        record_completion("claude-4-sonnet", "blocking", "error", 0.2);

        let output = handle.render();
        assert!(output.contains("relay_completions_total"));
        assert!(output.contains("model=\"claude-4-sonnet\""));
        assert!(output.contains("mode=\"stream\""));
        assert!(output.contains("outcome=\"error\""));
        assert!(
            output.contains("relay_completion_duration_seconds_bucket"),
            "duration must render as a histogram"
        );
    }

    #[test]
    fn retry_and_disable_counters_render() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_dispatch_retry("transport");
        record_dispatch_retry("rejected");
        record_account_disabled();

        let output = handle.render();
        assert!(output.contains("relay_dispatch_retries_total"));
        assert!(output.contains("reason=\"transport\""));
        assert!(output.contains("reason=\"rejected\""));
        assert!(output.contains("relay_accounts_disabled_total"));
    }
}
