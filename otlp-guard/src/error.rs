//! Error types, split by when they may occur.
//!
//! Anything that can fail *after* the export pipeline is running is modeled
//! as [`ExportError`] and recovered locally; the gate never lets it reach
//! the instrumented application. One-time setup and resolution failures are
//! [`SetupError`] and do propagate, since the operator should learn
//! immediately that the configuration is unusable.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportKind;

/// Errors returned by an exporter at runtime.
///
/// The error message is intended for logging purposes only and should not be
/// used to make programmatic decisions.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// The exporter was already shut down when the call arrived.
    #[error("exporter is already shutdown")]
    AlreadyShutdown,

    /// The export did not complete within the allowed time.
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    /// Failed due to an internal error.
    #[error("Reason: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for ExportError {
    fn from(err: PoisonError<T>) -> Self {
        ExportError::InternalFailure(format!("mutex poisoned: {err}"))
    }
}

/// Errors that can occur while building or resolving export components.
///
/// This is the only error class surfaced synchronously to the caller of
/// setup; everything later degrades to diagnostics instead.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SetupError {
    /// The endpoint could not be parsed into a usable URL.
    #[error("invalid endpoint {0}. Reason {1}")]
    InvalidEndpoint(String, String),

    /// Invalid configuration.
    #[error("{name}: {reason}")]
    InvalidConfig {
        /// The configuration name.
        name: String,
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// The required transport has no usable implementation in this runtime.
    #[error("{transport} transport is unavailable: {reason}")]
    TransportUnavailable {
        /// The transport that was requested.
        transport: TransportKind,
        /// Why it cannot be used.
        reason: String,
    },

    /// Spawning the prober thread failed.
    #[error("spawning the prober thread failed: {0}")]
    ThreadSpawnFailed(String),

    /// Failed due to an internal error.
    #[error("Reason: {0}")]
    InternalFailure(String),
}

/// Errors returned by a pipeline's exporter-registration hook.
///
/// The prober treats every variant as transient and keeps probing.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum InstallError {
    /// The pipeline is already shut down and accepts no more exporters.
    #[error("pipeline is already shutdown")]
    AlreadyShutdown,

    /// Failed due to an internal error.
    #[error("Reason: {0}")]
    InternalFailure(String),
}

impl<T> From<PoisonError<T>> for InstallError {
    fn from(err: PoisonError<T>) -> Self {
        InstallError::InternalFailure(format!("mutex poisoned: {err}"))
    }
}
