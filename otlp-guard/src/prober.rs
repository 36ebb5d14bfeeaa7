//! Background reachability probing and one-time exporter attachment.
//!
//! A service that starts before its collector would otherwise wire up an
//! exporter doomed to fail its first exports. [`ReachabilityProber`]
//! defers the wiring instead: a background thread probes the endpoint
//! with its own exponential backoff and, on the first success, builds the
//! exporter, wraps it in an [`ExportGate`] and installs it into the
//! pipeline. The thread exits after that single installation.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::diag::{DiagnosticsSink, StderrDiagnostics};
use crate::endpoint::CollectorEndpoint;
use crate::error::SetupError;
use crate::export::{ExporterFactory, TelemetryPipeline};
use crate::gate::ExportGate;
use crate::{guard_debug, guard_error, guard_info};

/// Delay after the first failed probe.
pub const DEFAULT_PROBE_INITIAL_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound the probe delay grows to.
pub const DEFAULT_PROBE_MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Timeout for a single TCP connectivity check.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Sent exactly once, when the prober has installed an exporter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AttachNotice {
    /// Probe cycles it took, counting the successful one.
    pub attempts: u64,
}

/// Handle to the background probe thread.
///
/// The thread runs until it installs an exporter; against a collector
/// that never comes up it probes for the life of the process. Dropping
/// the handle detaches the thread rather than stopping it. Starting two
/// probers against the same pipeline is a caller error; nothing here
/// arbitrates between them.
#[derive(Debug)]
pub struct ReachabilityProber {
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    attach_rx: Mutex<mpsc::Receiver<AttachNotice>>,
    attached: Mutex<Option<AttachNotice>>,
}

impl ReachabilityProber {
    /// Starts building a prober for `endpoint` that installs into
    /// `pipeline` whatever `factory` produces, using the default probe
    /// timings and stderr diagnostics.
    pub fn builder<P, F>(
        endpoint: impl Into<String>,
        pipeline: P,
        factory: F,
    ) -> ProberBuilder<P, F> {
        ProberBuilder {
            endpoint: endpoint.into(),
            pipeline,
            factory,
            initial_backoff: DEFAULT_PROBE_INITIAL_BACKOFF,
            max_backoff: DEFAULT_PROBE_MAX_BACKOFF,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            diag: Arc::new(StderrDiagnostics),
        }
    }

    /// Blocks until the prober reports a successful installation, or
    /// `timeout` elapses. Repeated calls after the notice arrived keep
    /// returning it.
    pub fn wait_for_attach(&self, timeout: Duration) -> Option<AttachNotice> {
        if let Some(notice) = *self.attached.lock().unwrap_or_else(PoisonError::into_inner) {
            return Some(notice);
        }
        let receiver = self
            .attach_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let notice = receiver.recv_timeout(timeout).ok()?;
        *self.attached.lock().unwrap_or_else(PoisonError::into_inner) = Some(notice);
        Some(notice)
    }

    /// Whether the probe thread has terminated.
    pub fn is_finished(&self) -> bool {
        match self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Waits for the probe thread to terminate. This returns only once
    /// an exporter is installed, since the thread never exits otherwise.
    pub fn join(self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Builder for [`ReachabilityProber`].
#[derive(Debug)]
pub struct ProberBuilder<P, F> {
    endpoint: String,
    pipeline: P,
    factory: F,
    initial_backoff: Duration,
    max_backoff: Duration,
    probe_timeout: Duration,
    diag: Arc<dyn DiagnosticsSink>,
}

impl<P, F> ProberBuilder<P, F> {
    /// Delay after the first failed probe. Must be greater than zero.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Cap on the probe delay. Must be at least the initial backoff.
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Timeout for each TCP connectivity check.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Replaces the stderr sink. The sink is also handed to the
    /// [`ExportGate`] built around the installed exporter.
    pub fn with_diagnostics(mut self, diag: Arc<dyn DiagnosticsSink>) -> Self {
        self.diag = diag;
        self
    }

    /// Validates the configuration, parses the endpoint and spawns the
    /// probe thread. Returns immediately; the caller does not wait for
    /// the probe to succeed.
    ///
    /// Configuration problems surface here: a zero backoff or probe
    /// timeout, an inverted backoff range, or an endpoint that does not
    /// parse. An endpoint that parses but yields no port is not an
    /// error; the thread reports it every cycle and keeps retrying.
    pub fn start<R>(self) -> Result<ReachabilityProber, SetupError>
    where
        R: Send + 'static,
        P: TelemetryPipeline<R> + 'static,
        F: ExporterFactory<R> + 'static,
    {
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
        if self.probe_timeout.is_zero() {
            return Err(SetupError::InvalidConfig {
                name: "probe_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let endpoint = CollectorEndpoint::parse(&self.endpoint)?;

        let ProberBuilder {
            pipeline,
            factory,
            initial_backoff,
            max_backoff,
            probe_timeout,
            diag,
            ..
        } = self;

        let (attach_tx, attach_rx) = mpsc::sync_channel(1);
        let handle = thread::Builder::new()
            .name("OtlpGuard.Prober".to_string())
            .spawn(move || {
                guard_debug!(
                    name: "Prober.ThreadStarted",
                    endpoint = format!("{}", endpoint)
                );
                diag.report(&format!("starting reachability probe for {endpoint}"));

                let mut attempt: u64 = 0;
                let mut backoff = initial_backoff;
                loop {
                    attempt += 1;
                    let mut attached = false;
                    if endpoint.port().is_none() {
                        diag.report(&format!(
                            "no port can be derived from {endpoint} (attempt {attempt}); retrying in {:.1}s",
                            backoff.as_secs_f64()
                        ));
                    } else if endpoint.is_reachable(probe_timeout) {
                        match attach(&endpoint, &factory, &pipeline, initial_backoff, max_backoff, &diag) {
                            Ok(()) => attached = true,
                            Err(error) => {
                                diag.report(&format!(
                                    "failed to attach exporter for {endpoint}: {error}"
                                ));
                                guard_error!(
                                    name: "Prober.AttachFailed",
                                    endpoint = format!("{}", endpoint),
                                    error = format!("{}", error)
                                );
                            }
                        }
                    } else {
                        diag.report(&format!(
                            "collector {endpoint} not reachable (attempt {attempt}); retrying in {:.1}s",
                            backoff.as_secs_f64()
                        ));
                    }

                    if attached {
                        diag.report(&format!(
                            "exporter attached to {endpoint} (after {attempt} attempts)"
                        ));
                        guard_info!(
                            name: "Prober.ExporterAttached",
                            endpoint = format!("{}", endpoint),
                            attempts = attempt
                        );
                        let _ = attach_tx.try_send(AttachNotice { attempts: attempt });
                        break;
                    }

                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2).min(max_backoff);
                }
                guard_debug!(name: "Prober.ThreadExiting");
            })
            .map_err(|err| SetupError::ThreadSpawnFailed(err.to_string()))?;

        Ok(ReachabilityProber {
            handle: Mutex::new(Some(handle)),
            attach_rx: Mutex::new(attach_rx),
            attached: Mutex::new(None),
        })
    }
}

/// Builds the exporter, gates it with the prober's backoff range and
/// sink, and installs it. Any failure is transient to the probe loop.
fn attach<R, P, F>(
    endpoint: &CollectorEndpoint,
    factory: &F,
    pipeline: &P,
    initial_backoff: Duration,
    max_backoff: Duration,
    diag: &Arc<dyn DiagnosticsSink>,
) -> Result<(), SetupError>
where
    R: Send + 'static,
    P: TelemetryPipeline<R>,
    F: ExporterFactory<R>,
{
    let inner = factory.build(endpoint)?;
    let gate = ExportGate::builder(inner)
        .with_initial_backoff(initial_backoff)
        .with_max_backoff(max_backoff)
        .with_diagnostics(diag.clone())
        .build()?;
    pipeline
        .install_exporter(Box::new(gate))
        .map_err(|err| SetupError::InternalFailure(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::InMemoryDiagnostics;
    use crate::error::{ExportError, InstallError};
    use crate::export::{BoxExporter, ExportOutcome, ExportResult, RecordExporter};
    use crate::in_memory_exporter::InMemoryExporter;
    use futures_executor::block_on;
    use futures_util::future::BoxFuture;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn in_memory_factory() -> impl ExporterFactory<u32> + 'static {
        |_endpoint: &CollectorEndpoint| -> Result<BoxExporter<u32>, SetupError> {
            Ok(Box::new(InMemoryExporter::<u32>::default()))
        }
    }

    fn ok_pipeline() -> impl TelemetryPipeline<u32> + 'static {
        |_exporter: BoxExporter<u32>| -> Result<(), InstallError> { Ok(()) }
    }

    /// Rejects the first `failures_remaining` installations.
    #[derive(Debug)]
    struct ScriptedPipeline {
        failures_remaining: Arc<AtomicUsize>,
        installs: Arc<AtomicUsize>,
    }

    impl TelemetryPipeline<u32> for ScriptedPipeline {
        fn install_exporter(&self, _exporter: BoxExporter<u32>) -> Result<(), InstallError> {
            let refused = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                Err(InstallError::InternalFailure("pipeline not ready".to_string()))
            } else {
                self.installs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct RefusingExporter;

    impl RecordExporter for RefusingExporter {
        type Record = u32;

        fn export(&self, _batch: Vec<u32>) -> BoxFuture<'_, ExportResult> {
            Box::pin(std::future::ready(Err(ExportError::InternalFailure(
                "no route to collector".to_string(),
            ))))
        }
    }

    #[test]
    fn probe_defaults_match_documented_values() {
        assert_eq!(DEFAULT_PROBE_INITIAL_BACKOFF, Duration::from_secs(5));
        assert_eq!(DEFAULT_PROBE_MAX_BACKOFF, Duration::from_secs(300));
        assert_eq!(DEFAULT_PROBE_TIMEOUT, Duration::from_millis(500));
    }

    #[test]
    fn start_validates_configuration_synchronously() {
        let err = ReachabilityProber::builder("http://localhost:4318", ok_pipeline(), in_memory_factory())
            .with_initial_backoff(Duration::ZERO)
            .start()
            .unwrap_err();
        assert!(
            matches!(err, SetupError::InvalidConfig { ref name, .. } if name == "initial_backoff")
        );

        let err = ReachabilityProber::builder("http://localhost:4318", ok_pipeline(), in_memory_factory())
            .with_initial_backoff(Duration::from_secs(10))
            .with_max_backoff(Duration::from_secs(5))
            .start()
            .unwrap_err();
        assert!(matches!(err, SetupError::InvalidConfig { ref name, .. } if name == "max_backoff"));

        let err = ReachabilityProber::builder("http://localhost:4318", ok_pipeline(), in_memory_factory())
            .with_probe_timeout(Duration::ZERO)
            .start()
            .unwrap_err();
        assert!(
            matches!(err, SetupError::InvalidConfig { ref name, .. } if name == "probe_timeout")
        );

        let err = ReachabilityProber::builder("not an endpoint", ok_pipeline(), in_memory_factory())
            .start()
            .unwrap_err();
        assert!(matches!(err, SetupError::InvalidEndpoint(_, _)));
    }

    #[test]
    fn attach_retries_until_the_pipeline_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let installs = Arc::new(AtomicUsize::new(0));
        let pipeline = ScriptedPipeline {
            failures_remaining: Arc::new(AtomicUsize::new(2)),
            installs: installs.clone(),
        };
        let diag = InMemoryDiagnostics::default();

        let prober = ReachabilityProber::builder(
            format!("http://127.0.0.1:{port}"),
            pipeline,
            in_memory_factory(),
        )
        .with_initial_backoff(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(40))
        .with_diagnostics(Arc::new(diag.clone()))
        .start()
        .unwrap();

        let notice = prober
            .wait_for_attach(Duration::from_secs(5))
            .expect("prober never attached");
        assert_eq!(notice.attempts, 3);
        prober.join();

        assert_eq!(installs.load(Ordering::SeqCst), 1);
        let lines = diag.lines();
        assert_eq!(
            lines.iter().filter(|l| l.contains("failed to attach")).count(),
            2
        );
        assert_eq!(
            lines
                .iter()
                .filter(|l| l.contains("(after 3 attempts)"))
                .count(),
            1
        );
    }

    #[test]
    fn the_prober_attaches_once_the_collector_is_reachable() {
        // Reserve a port, then release it so the first probes fail.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let installs = Arc::new(AtomicUsize::new(0));
        let pipeline_installs = installs.clone();
        let diag = InMemoryDiagnostics::default();

        let prober = ReachabilityProber::builder(
            format!("http://127.0.0.1:{port}"),
            move |_exporter: BoxExporter<u32>| -> Result<(), InstallError> {
                pipeline_installs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            in_memory_factory(),
        )
        .with_initial_backoff(Duration::from_millis(20))
        .with_max_backoff(Duration::from_millis(20))
        .with_diagnostics(Arc::new(diag.clone()))
        .start()
        .unwrap();

        assert!(prober.wait_for_attach(Duration::from_millis(100)).is_none());
        assert!(!prober.is_finished());

        let _listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let notice = prober
            .wait_for_attach(Duration::from_secs(5))
            .expect("prober never attached");
        assert!(notice.attempts >= 2, "attempts: {}", notice.attempts);
        prober.join();

        assert_eq!(installs.load(Ordering::SeqCst), 1);
        let lines = diag.lines();
        assert!(lines.iter().any(|l| l.contains("not reachable")));
        assert!(lines.iter().any(|l| l.contains("exporter attached")));
    }

    /// Records every line and binds the probe port right after the fourth
    /// "not reachable" report, so the fifth probe finds a listener.
    #[derive(Debug)]
    struct PortOpeningSink {
        port: u16,
        unreachable_seen: AtomicUsize,
        listener: Mutex<Option<TcpListener>>,
        lines: InMemoryDiagnostics,
    }

    impl DiagnosticsSink for PortOpeningSink {
        fn report(&self, line: &str) {
            self.lines.report(line);
            if line.contains("not reachable")
                && self.unreachable_seen.fetch_add(1, Ordering::SeqCst) == 3
            {
                let listener =
                    TcpListener::bind(("127.0.0.1", self.port)).expect("rebind probe port");
                *self.listener.lock().unwrap() = Some(listener);
            }
        }
    }

    #[test]
    fn four_unreachable_probes_are_each_reported_then_one_attach() {
        // Reserve a port, then release it so exactly the first four probes
        // fail; the sink re-binds it during the fourth report.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let lines = InMemoryDiagnostics::default();
        let sink = Arc::new(PortOpeningSink {
            port,
            unreachable_seen: AtomicUsize::new(0),
            listener: Mutex::new(None),
            lines: lines.clone(),
        });

        let installs = Arc::new(AtomicUsize::new(0));
        let pipeline_installs = installs.clone();
        let prober = ReachabilityProber::builder(
            format!("http://127.0.0.1:{port}"),
            move |_exporter: BoxExporter<u32>| -> Result<(), InstallError> {
                pipeline_installs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            in_memory_factory(),
        )
        .with_initial_backoff(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(10))
        .with_diagnostics(sink)
        .start()
        .unwrap();

        let notice = prober
            .wait_for_attach(Duration::from_secs(5))
            .expect("prober never attached");
        assert_eq!(notice, AttachNotice { attempts: 5 });
        prober.join();

        assert_eq!(installs.load(Ordering::SeqCst), 1);
        let lines = lines.lines();
        assert_eq!(
            lines.iter().filter(|l| l.contains("not reachable")).count(),
            4
        );
        assert_eq!(
            lines.iter().filter(|l| l.contains("failed to attach")).count(),
            0
        );
        assert_eq!(
            lines
                .iter()
                .filter(|l| l.contains("(after 5 attempts)"))
                .count(),
            1
        );
    }

    #[test]
    fn an_endpoint_without_a_derivable_port_is_retried_forever() {
        let installs = Arc::new(AtomicUsize::new(0));
        let pipeline_installs = installs.clone();
        let diag = InMemoryDiagnostics::default();

        let prober = ReachabilityProber::builder(
            "tcp://127.0.0.1",
            move |_exporter: BoxExporter<u32>| -> Result<(), InstallError> {
                pipeline_installs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            in_memory_factory(),
        )
        .with_initial_backoff(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(20))
        .with_diagnostics(Arc::new(diag.clone()))
        .start()
        .unwrap();

        assert!(prober.wait_for_attach(Duration::from_millis(150)).is_none());
        assert!(!prober.is_finished());
        assert_eq!(installs.load(Ordering::SeqCst), 0);
        assert!(
            diag.lines()
                .iter()
                .filter(|l| l.contains("no port can be derived"))
                .count()
                >= 2
        );
        // Dropping the handle detaches the probe thread.
        drop(prober);
    }

    #[test]
    fn attached_exporters_are_gated_with_the_probers_sink() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let slot: Arc<Mutex<Option<BoxExporter<u32>>>> = Arc::new(Mutex::new(None));
        let pipeline_slot = slot.clone();
        let diag = InMemoryDiagnostics::default();

        let prober = ReachabilityProber::builder(
            format!("http://127.0.0.1:{port}"),
            move |exporter: BoxExporter<u32>| -> Result<(), InstallError> {
                *pipeline_slot.lock().unwrap() = Some(exporter);
                Ok(())
            },
            |_endpoint: &CollectorEndpoint| -> Result<BoxExporter<u32>, SetupError> {
                Ok(Box::new(RefusingExporter))
            },
        )
        .with_initial_backoff(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(10))
        .with_diagnostics(Arc::new(diag.clone()))
        .start()
        .unwrap();

        prober
            .wait_for_attach(Duration::from_secs(5))
            .expect("prober never attached");
        prober.join();

        let mut slot = slot.lock().unwrap();
        let exporter = slot.as_mut().expect("no exporter installed");
        let outcome = block_on(exporter.export(vec![9])).unwrap();
        assert_eq!(outcome, ExportOutcome::Suppressed);
        assert!(
            diag.lines()
                .iter()
                .any(|l| l.contains("telemetry export failed"))
        );
    }
}
