//! Metrics for the dispatch stages and the render pass.
//!
//! The stages record through the `metrics` facade unconditionally; nothing is
//! kept unless the host installs a recorder. [`MetricsRecorder`] installs a
//! Prometheus recorder and leaves serving the exposition text to the host.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_taxi_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // ... run render passes ...
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Synchronous actions forwarded by the gate
pub const GATE_FORWARDED: &str = "taxi.gate.forwarded";
/// Pending operations collected by the gate
pub const GATE_COLLECTED: &str = "taxi.gate.collected";
/// Unregistered async actions refused by the gate
pub const GATE_REJECTED: &str = "taxi.gate.rejected";
/// START actions emitted by the sequencer
pub const SEQUENCE_STARTED: &str = "taxi.sequence.started";
/// DONE actions emitted by the sequencer
pub const SEQUENCE_DONE: &str = "taxi.sequence.done";
/// ERROR actions emitted by the sequencer
pub const SEQUENCE_FAILED: &str = "taxi.sequence.failed";
/// Time spent in [`RenderPass::settle`](crate::pass::RenderPass::settle)
pub const PASS_SETTLE_DURATION: &str = "taxi.pass.settle_duration_seconds";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for the `taxi.*` metrics.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// A recorder that has not been installed yet
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (common across tests) is logged
    /// and treated as success, leaving [`handle`](Self::handle) empty.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// The installed handle, if this recorder installed one
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in Prometheus text format.
    ///
    /// Returns `None` if this recorder did not install the global recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(GATE_FORWARDED, "Synchronous actions forwarded by the gate");
    describe_counter!(GATE_COLLECTED, "Pending operations collected by the gate");
    describe_counter!(
        GATE_REJECTED,
        "Async actions refused by the gate because their kind was not registered"
    );

    describe_counter!(SEQUENCE_STARTED, "START actions emitted by the sequencer");
    describe_counter!(SEQUENCE_DONE, "DONE actions emitted by the sequencer");
    describe_counter!(SEQUENCE_FAILED, "ERROR actions emitted by the sequencer");

    describe_histogram!(
        PASS_SETTLE_DURATION,
        "Time taken for a render pass to settle every collected operation"
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn recorder_starts_uninstalled() {
        let recorder = MetricsRecorder::new();

        assert!(recorder.handle().is_none());
        assert!(recorder.render().is_none());
    }

    #[test]
    fn install_then_render_includes_recorded_metrics() {
        let mut recorder = MetricsRecorder::new();
        recorder.install().unwrap();

        metrics::counter!(GATE_COLLECTED, "kind" => "FETCH").increment(1);
        metrics::counter!(SEQUENCE_DONE, "kind" => "FETCH").increment(1);

        // Another test may have installed the global recorder first.
        if let Some(rendered) = recorder.render() {
            assert!(rendered.contains("taxi_gate_collected"));
            assert!(rendered.contains("taxi_sequence_done"));
        }
    }

    #[test]
    fn second_install_is_tolerated() {
        let mut first = MetricsRecorder::new();
        let mut second = MetricsRecorder::new();

        assert!(first.install().is_ok());
        assert!(second.install().is_ok());
    }
}
