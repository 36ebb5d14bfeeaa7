//! In-memory exporter for tests and examples.

use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::error::ExportError;
use crate::export::{ExportOutcome, ExportResult, RecordExporter};

/// Exporter that keeps everything it is given in memory, so tests can
/// assert on what reached it.
///
/// Clones share the same storage, which lets a test keep a handle to the
/// exporter after moving it into a gate or pipeline.
pub struct InMemoryExporter<R> {
    state: Arc<Mutex<InMemoryState<R>>>,
}

struct InMemoryState<R> {
    exported: Vec<R>,
    export_calls: usize,
    flush_calls: usize,
    shutdown_called: bool,
}

impl<R> Default for InMemoryState<R> {
    fn default() -> Self {
        InMemoryState {
            exported: Vec::new(),
            export_calls: 0,
            flush_calls: 0,
            shutdown_called: false,
        }
    }
}

impl<R> Default for InMemoryExporter<R> {
    fn default() -> Self {
        InMemoryExporter {
            state: Arc::new(Mutex::new(InMemoryState::default())),
        }
    }
}

impl<R> Clone for InMemoryExporter<R> {
    fn clone(&self) -> Self {
        InMemoryExporter {
            state: self.state.clone(),
        }
    }
}

impl<R> Debug for InMemoryExporter<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryExporter").finish()
    }
}

// A poisoned lock surfaces as `ExportError::InternalFailure` from every
// accessor that can carry a result, and as `false` from `force_flush`.
impl<R> InMemoryExporter<R> {
    /// Returns a copy of every record exported so far.
    pub fn get_exported(&self) -> Result<Vec<R>, ExportError>
    where
        R: Clone,
    {
        let state = self.state.lock()?;
        Ok(state.exported.clone())
    }

    /// Number of export calls that reached this exporter.
    pub fn export_calls(&self) -> Result<usize, ExportError> {
        Ok(self.state.lock()?.export_calls)
    }

    /// Number of force_flush calls that reached this exporter.
    pub fn flush_calls(&self) -> Result<usize, ExportError> {
        Ok(self.state.lock()?.flush_calls)
    }

    pub fn is_shutdown_called(&self) -> Result<bool, ExportError> {
        Ok(self.state.lock()?.shutdown_called)
    }

    /// Clears the stored records and counters.
    pub fn reset(&self) -> Result<(), ExportError> {
        *self.state.lock()? = InMemoryState::default();
        Ok(())
    }
}

impl<R: Send> RecordExporter for InMemoryExporter<R> {
    type Record = R;

    fn export(&self, mut batch: Vec<R>) -> BoxFuture<'_, ExportResult> {
        let result = match self.state.lock() {
            Ok(mut state) => {
                state.export_calls += 1;
                state.exported.append(&mut batch);
                Ok(ExportOutcome::Delivered)
            }
            Err(poisoned) => Err(poisoned.into()),
        };
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) -> Result<(), ExportError> {
        let mut state = self.state.lock()?;
        state.shutdown_called = true;
        Ok(())
    }

    fn force_flush(&mut self, _timeout: Duration) -> bool {
        match self.state.lock() {
            Ok(mut state) => {
                state.flush_calls += 1;
                true
            }
            Err(_) => false,
        }
    }
}
