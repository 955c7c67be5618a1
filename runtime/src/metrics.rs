//! Prometheus metrics for stock reservation.
//!
//! Recorders in this module are thin wrappers over the `metrics` macros, so
//! they are no-ops until a recorder is installed. [`MetricsRecorder`] installs
//! the Prometheus exporter and renders the scrape payload.
//!
//! # Example
//!
//! ```rust,no_run
//! use stockpile_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//! let payload = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders metrics.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create an uninstalled recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// A recorder can only be installed once per process. If one is already
    /// installed (e.g. by another test) this logs a warning and succeeds
    /// without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "stock_reservations_total",
        "Stock reservations attempted, labelled by outcome"
    );
    describe_counter!(
        "stock_reserved_items_total",
        "Line items reserved through the batch paths"
    );
    describe_counter!(
        "stock_reservations_released_total",
        "Reservations released back to available stock"
    );
    describe_counter!(
        "stock_reservations_confirmed_total",
        "Reservations converted into stock deductions"
    );
    describe_counter!(
        "stock_bundle_compensations_total",
        "Bundle sagas that ran compensation, labelled by result"
    );
    describe_counter!(
        "stock_lock_acquisitions_total",
        "Lock acquisition attempts, labelled by outcome"
    );
    describe_counter!(
        "stock_lock_release_failures_total",
        "Lock releases that failed or found the lease already lost"
    );
    describe_histogram!(
        "stock_lock_wait_duration_seconds",
        "Time spent waiting to acquire a lock"
    );
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a reservation attempt outcome (`reserved`, `insufficient`, `lock_unavailable`, `failed`).
    pub fn record_outcome(outcome: &'static str) {
        counter!("stock_reservations_total", "outcome" => outcome).increment(1);
    }

    /// Record line items reserved in one batch.
    pub fn record_items(count: usize) {
        counter!("stock_reserved_items_total").increment(count as u64);
    }

    /// Record a released reservation.
    pub fn record_release() {
        counter!("stock_reservations_released_total").increment(1);
    }

    /// Record a confirmed reservation.
    pub fn record_confirm() {
        counter!("stock_reservations_confirmed_total").increment(1);
    }

    /// Record a bundle compensation run (`compensated` or `failed`).
    pub fn record_compensation(result: &'static str) {
        counter!("stock_bundle_compensations_total", "result" => result).increment(1);
    }
}

/// Lock metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record an acquisition that succeeded after `waited`.
    pub fn record_acquired(waited: Duration) {
        counter!("stock_lock_acquisitions_total", "outcome" => "acquired").increment(1);
        histogram!("stock_lock_wait_duration_seconds").record(waited.as_secs_f64());
    }

    /// Record an acquisition that timed out.
    pub fn record_timeout(waited: Duration) {
        counter!("stock_lock_acquisitions_total", "outcome" => "timeout").increment(1);
        histogram!("stock_lock_wait_duration_seconds").record(waited.as_secs_f64());
    }

    /// Record a release that did not succeed.
    pub fn record_release_failure() {
        counter!("stock_lock_release_failures_total").increment(1);
    }
}
