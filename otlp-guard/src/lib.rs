//! Resilient OTLP exporter wiring for services whose collector may be
//! down, slow to start, or misconfigured.
//!
//! Telemetry must never take the instrumented application down with it.
//! The pieces here enforce that at the three points where a collector
//! outage would otherwise bite:
//!
//! - [`ExportGate`] wraps any [`RecordExporter`] and turns failures into
//!   suppressed batches behind an exponentially growing cool-down
//!   window. Failures are reported once, with detail, through a plain
//!   side channel that cannot re-enter the logging pipeline the gate
//!   itself feeds.
//! - [`ReachabilityProber`] defers exporter installation until a
//!   background thread sees the collector accept a TCP connection, then
//!   builds a gated exporter and installs it into the pipeline exactly
//!   once.
//! - [`resolve_exporters`] picks the wire transport (grpc or http) from
//!   an explicit override, `OTEL_EXPORTER_OTLP_PROTOCOL`, or the
//!   endpoint URL scheme, with a configurable fallback for builds that
//!   do not provide grpc.
//!
//! The crate does not talk to the wire itself. Concrete exporters come
//! from the embedding application through the [`ExporterFactory`] and
//! [`TelemetryPipeline`] seams, which closures satisfy directly.
//!
//! # Getting started
//!
//! ```no_run
//! use otlp_guard::{
//!     BoxExporter, CollectorEndpoint, InstallError, ReachabilityProber, SetupError,
//! };
//!
//! # fn build_exporter(endpoint: &CollectorEndpoint) -> Result<BoxExporter<String>, SetupError> {
//! #     unimplemented!()
//! # }
//! # fn main() -> Result<(), SetupError> {
//! let factory = |endpoint: &CollectorEndpoint| -> Result<BoxExporter<String>, SetupError> {
//!     build_exporter(endpoint)
//! };
//! let pipeline = |_exporter: BoxExporter<String>| -> Result<(), InstallError> {
//!     // hand the exporter to the provider's batch processor
//!     Ok(())
//! };
//!
//! let prober = ReachabilityProber::builder("http://localhost:4318", pipeline, factory)
//!     .start()?;
//! # let _ = prober;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! - `internal-logs` (default): routes this crate's own operational
//!   events through [`tracing`].
//! - `testing`: exposes `InMemoryExporter` and `InMemoryDiagnostics` for
//!   use outside this crate's own tests.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod diag;
pub mod endpoint;
pub mod error;
pub mod export;
pub mod gate;
#[cfg(any(feature = "testing", test))]
pub mod in_memory_exporter;
mod internal_logging;
pub mod prober;
pub mod transport;

pub use diag::{DiagnosticsSink, StderrDiagnostics};
#[cfg(any(feature = "testing", test))]
pub use diag::InMemoryDiagnostics;
pub use endpoint::{CollectorEndpoint, DEFAULT_HTTP_PORT};
pub use error::{ExportError, InstallError, SetupError};
pub use export::{
    BoxExporter, ExportOutcome, ExportResult, ExporterFactory, RecordExporter, TelemetryPipeline,
};
pub use gate::{ExportGate, ExportGateBuilder, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
#[cfg(any(feature = "testing", test))]
pub use in_memory_exporter::InMemoryExporter;
pub use prober::{
    AttachNotice, ProberBuilder, ReachabilityProber, DEFAULT_PROBE_INITIAL_BACKOFF,
    DEFAULT_PROBE_MAX_BACKOFF, DEFAULT_PROBE_TIMEOUT,
};
pub use transport::{
    resolve_exporters, resolve_transport, FallbackPolicy, Protocol, ResolutionConfig,
    ResolvedExporterSet, SignalFactories, TransportCatalog, TransportKind, TransportSupport,
    OTEL_EXPORTER_OTLP_ENDPOINT, OTEL_EXPORTER_OTLP_PROTOCOL,
};

#[cfg(feature = "internal-logs")]
#[doc(hidden)]
pub mod _private {
    pub use tracing::{event, Level};
}
