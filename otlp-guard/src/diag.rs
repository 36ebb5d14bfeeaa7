//! The out-of-band diagnostic channel.
//!
//! Failure reports from the gate and per-attempt notices from the prober
//! must not travel through the structured-logging pipeline this crate
//! feeds: a failing exporter that logged its own failure into the pipeline
//! would trigger another export, another failure, and so on. A
//! [`DiagnosticsSink`] is a plain-text line writer with no such path back
//! in; the default writes straight to stderr.

use std::fmt::Debug;

/// Receiver for out-of-band diagnostic lines.
///
/// Implementations must not forward lines into any telemetry pipeline that
/// an [`ExportGate`](crate::gate::ExportGate) of this crate may be feeding.
pub trait DiagnosticsSink: Send + Sync + Debug {
    /// Record one diagnostic line.
    fn report(&self, line: &str);
}

/// Default sink: one line per report, written directly to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrDiagnostics;

impl DiagnosticsSink for StderrDiagnostics {
    fn report(&self, line: &str) {
        eprintln!("{line}");
    }
}

/// A sink that stores reported lines in memory.
///
/// Useful for testing and debugging. Clones share the same storage, so a
/// clone handed to a gate or prober can be inspected afterwards through the
/// original.
#[cfg(any(feature = "testing", test))]
#[derive(Debug, Clone, Default)]
pub struct InMemoryDiagnostics {
    lines: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(any(feature = "testing", test))]
impl InMemoryDiagnostics {
    /// Returns the lines reported so far, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Clears the stored lines.
    pub fn reset(&self) {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[cfg(any(feature = "testing", test))]
impl DiagnosticsSink for InMemoryDiagnostics {
    fn report(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(line.to_owned());
    }
}
