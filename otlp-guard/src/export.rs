//! Exporter capability and the seams the prober plugs into.

use std::fmt::Debug;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::endpoint::CollectorEndpoint;
use crate::error::{ExportError, InstallError, SetupError};

/// Outcome of a non-failed export call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// The batch was handed to the collector.
    Delivered,
    /// The batch was dropped without an attempt, because the exporter is
    /// inside a backoff window or its last attempt failed. Not fatal;
    /// callers carry on.
    Suppressed,
}

/// Describes the result of an export.
pub type ExportResult = Result<ExportOutcome, ExportError>;

/// `RecordExporter` defines the interface that exporters of one telemetry
/// signal implement so they can be wrapped by an
/// [`ExportGate`](crate::gate::ExportGate) and driven by a batching
/// processor.
///
/// The trait is object safe: factories hand out [`BoxExporter`] values and
/// the gate wraps them without knowing the concrete type. `export` returns a
/// boxed future for the same reason.
pub trait RecordExporter: Send + Sync + Debug {
    /// The record type of the signal this exporter carries.
    type Record: Send;

    /// Exports a batch of records. Any retry logic beyond what the gate
    /// provides is the exporter's own responsibility.
    ///
    /// This call must not block indefinitely; there must be a reasonable
    /// internal timeout after which it resolves to an error.
    fn export(&self, batch: Vec<Self::Record>) -> BoxFuture<'_, ExportResult>;

    /// Shuts down the exporter. Exporters with nothing to tear down keep
    /// the default, which reports success.
    fn shutdown(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    /// Hint that any buffered records should be sent now, bounded by
    /// `timeout`. Returns whether the flush completed. Exporters without
    /// buffering report `true`.
    fn force_flush(&mut self, timeout: Duration) -> bool {
        let _ = timeout;
        true
    }
}

/// A type-erased exporter for records of type `R`.
pub type BoxExporter<R> = Box<dyn RecordExporter<Record = R>>;

impl<R: Send> RecordExporter for BoxExporter<R> {
    type Record = R;

    fn export(&self, batch: Vec<R>) -> BoxFuture<'_, ExportResult> {
        self.as_ref().export(batch)
    }

    fn shutdown(&mut self) -> Result<(), ExportError> {
        self.as_mut().shutdown()
    }

    fn force_flush(&mut self, timeout: Duration) -> bool {
        self.as_mut().force_flush(timeout)
    }
}

/// Builds a fresh exporter bound to an endpoint.
///
/// The prober calls this once reachability is confirmed; a build failure is
/// treated as transient and probing continues. Any
/// `Fn(&CollectorEndpoint) -> Result<BoxExporter<R>, SetupError>` closure
/// qualifies.
pub trait ExporterFactory<R>: Send + Sync {
    /// Construct an exporter that sends to `endpoint`.
    fn build(&self, endpoint: &CollectorEndpoint) -> Result<BoxExporter<R>, SetupError>;
}

impl<R, F> ExporterFactory<R> for F
where
    F: Fn(&CollectorEndpoint) -> Result<BoxExporter<R>, SetupError> + Send + Sync,
{
    fn build(&self, endpoint: &CollectorEndpoint) -> Result<BoxExporter<R>, SetupError> {
        self(endpoint)
    }
}

/// The provider-side registration hook the prober hands its exporter to.
///
/// Implementations typically wrap the exporter in a batching processor and
/// attach it to a live provider. Invoked at most once per prober. Any
/// `Fn(BoxExporter<R>) -> Result<(), InstallError>` closure qualifies.
pub trait TelemetryPipeline<R>: Send + Sync {
    /// Attach `exporter` to the running pipeline.
    fn install_exporter(&self, exporter: BoxExporter<R>) -> Result<(), InstallError>;
}

impl<R, F> TelemetryPipeline<R> for F
where
    F: Fn(BoxExporter<R>) -> Result<(), InstallError> + Send + Sync,
{
    fn install_exporter(&self, exporter: BoxExporter<R>) -> Result<(), InstallError> {
        self(exporter)
    }
}
