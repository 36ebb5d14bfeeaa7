//! Failure-suppressing wrapper around a [`RecordExporter`].
//!
//! [`ExportGate`] sits between a batching processor and the exporter that
//! talks to the collector. It rate-limits export attempts after failures
//! with an exponentially growing cool-down window and keeps every failure
//! away from the caller, so a dead collector degrades telemetry instead of
//! the instrumented application.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;

use crate::diag::{DiagnosticsSink, StderrDiagnostics};
use crate::error::{ExportError, SetupError};
use crate::export::{ExportOutcome, ExportResult, RecordExporter};

/// Cool-down window armed by the first failure.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound the cool-down window grows to under repeated failures.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct GateState {
    /// Window length the next failure will arm. Doubles per failure up to
    /// the configured maximum, resets to the initial value on success.
    backoff: Duration,
    /// Deadline before which export calls are short-circuited. `None`
    /// means the gate is open.
    next_attempt: Option<Instant>,
    /// Set by the first reported failure, never cleared.
    failure_reported: bool,
}

/// Wraps an exporter so that failures suppress future attempts instead of
/// surfacing to the caller.
///
/// A failed export arms a cool-down window of the current backoff length
/// and doubles the backoff, capped at the configured maximum. While the
/// window is open, [`export`] returns [`ExportOutcome::Suppressed`] without
/// touching the inner exporter; the batch is dropped, not buffered. The
/// first successful export resets the backoff and clears the window.
/// Suppressed calls never advance the backoff, so at most one growth step
/// happens per actual attempt regardless of how often the processor
/// flushes.
///
/// Failures are reported through a [`DiagnosticsSink`] rather than the
/// return value: the first one carries the failure detail and latches, so
/// a long-lived degraded collector produces one detailed report plus
/// repeating retry notices. The sink must not feed the telemetry pipeline
/// this gate exports for, or a failing export could log itself back into
/// another export.
///
/// [`shutdown`] and [`force_flush`] delegate to the inner exporter and
/// catch its failures the same way, reporting through the shared latch and
/// returning `Ok(())` / `false`. Neither arms the cool-down window.
///
/// [`export`]: RecordExporter::export
/// [`shutdown`]: RecordExporter::shutdown
/// [`force_flush`]: RecordExporter::force_flush
#[derive(Debug)]
pub struct ExportGate<E> {
    inner: E,
    initial_backoff: Duration,
    max_backoff: Duration,
    state: Mutex<GateState>,
    diag: Arc<dyn DiagnosticsSink>,
}

impl<E> ExportGate<E> {
    /// Starts building a gate around `inner` with the default backoff
    /// range and stderr diagnostics.
    pub fn builder(inner: E) -> ExportGateBuilder<E> {
        ExportGateBuilder {
            inner,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            diag: Arc::new(StderrDiagnostics),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_failure_once(&self, line: &str) {
        let mut state = self.lock_state();
        if !state.failure_reported {
            state.failure_reported = true;
            self.diag.report(line);
        }
    }
}

#[cfg(test)]
impl<E> ExportGate<E> {
    pub(crate) fn current_backoff(&self) -> Duration {
        self.lock_state().backoff
    }

    pub(crate) fn next_attempt(&self) -> Option<Instant> {
        self.lock_state().next_attempt
    }

    pub(crate) fn failure_reported(&self) -> bool {
        self.lock_state().failure_reported
    }

    /// Clears the cool-down window without resetting the backoff, so tests
    /// can step through failures without sleeping.
    pub(crate) fn force_open(&self) {
        self.lock_state().next_attempt = None;
    }
}

impl<E: RecordExporter> RecordExporter for ExportGate<E> {
    type Record = E::Record;

    fn export(&self, batch: Vec<Self::Record>) -> BoxFuture<'_, ExportResult> {
        // Gate check before the inner exporter is touched. A suppressed
        // call leaves backoff state untouched.
        {
            let state = self.lock_state();
            if state
                .next_attempt
                .is_some_and(|next| Instant::now() < next)
            {
                return Box::pin(std::future::ready(Ok(ExportOutcome::Suppressed)));
            }
        }

        Box::pin(async move {
            match self.inner.export(batch).await {
                Ok(outcome) => {
                    let mut state = self.lock_state();
                    state.backoff = self.initial_backoff;
                    state.next_attempt = None;
                    Ok(outcome)
                }
                Err(error) => {
                    let mut state = self.lock_state();
                    if !state.failure_reported {
                        state.failure_reported = true;
                        self.diag.report(&format!(
                            "telemetry export failed: {error}; further failures will not be reported"
                        ));
                    }
                    self.diag.report(&format!(
                        "telemetry export backing off; next attempt in {:.1}s",
                        state.backoff.as_secs_f64()
                    ));
                    state.next_attempt = Some(Instant::now() + state.backoff);
                    state.backoff = state.backoff.saturating_mul(2).min(self.max_backoff);
                    Ok(ExportOutcome::Suppressed)
                }
            }
        })
    }

    fn shutdown(&mut self) -> Result<(), ExportError> {
        if let Err(error) = self.inner.shutdown() {
            self.report_failure_once(&format!("telemetry exporter shutdown failed: {error}"));
        }
        Ok(())
    }

    fn force_flush(&mut self, timeout: Duration) -> bool {
        if self.inner.force_flush(timeout) {
            true
        } else {
            self.report_failure_once("telemetry exporter force_flush reported failure");
            false
        }
    }
}

/// Builder for [`ExportGate`].
#[derive(Debug)]
pub struct ExportGateBuilder<E> {
    inner: E,
    initial_backoff: Duration,
    max_backoff: Duration,
    diag: Arc<dyn DiagnosticsSink>,
}

impl<E> ExportGateBuilder<E> {
    /// Window armed by the first failure. Must be greater than zero.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Cap on the window growth. Must be at least the initial backoff.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Replaces the stderr sink failure reports go to. The sink must not
    /// re-enter the telemetry pipeline this gate feeds.
    pub fn with_diagnostics(mut self, diag: Arc<dyn DiagnosticsSink>) -> Self {
        self.diag = diag;
        self
    }

    /// Validates the backoff range and builds the gate. The gate performs
    /// no I/O at construction.
    pub fn build(self) -> Result<ExportGate<E>, SetupError> {
        if self.initial_backoff.is_zero() {
            return Err(SetupError::InvalidConfig {
                name: "initial_backoff".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_backoff < self.initial_backoff {
            return Err(SetupError::InvalidConfig {
                name: "max_backoff".to_string(),
                reason: format!(
                    "must be at least the initial backoff ({:?})",
                    self.initial_backoff
                ),
            });
        }
        Ok(ExportGate {
            inner: self.inner,
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff,
            state: Mutex::new(GateState {
                backoff: self.initial_backoff,
                next_attempt: None,
                failure_reported: false,
            }),
            diag: self.diag,
        })
    }
}
