//! Transport selection for the collector connection.
//!
//! The resolution order is fixed: an explicit override wins, then the
//! protocol environment variable, then the endpoint URL scheme. A
//! [`TransportCatalog`] states which transports the embedding build
//! actually provides; when the preferred grpc transport is missing, the
//! [`FallbackPolicy`] decides between substituting http and failing
//! setup outright.

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::Arc;

use crate::endpoint::CollectorEndpoint;
use crate::error::SetupError;
use crate::export::ExporterFactory;
use crate::{guard_debug, guard_info, guard_warn};

/// Target to which exporters send telemetry, e.g. `http://localhost:4318`.
pub const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Preferred wire protocol, `grpc` or one of the `http` variants.
pub const OTEL_EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";

const OTEL_EXPORTER_OTLP_PROTOCOL_GRPC: &str = "grpc";
const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF: &str = "http/protobuf";
const OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON: &str = "http/json";

/// Wire protocol named by [`OTEL_EXPORTER_OTLP_PROTOCOL`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// grpc
    Grpc,
    /// http with binary protobuf payloads
    HttpBinary,
    /// http with json payloads
    HttpJson,
}

impl Protocol {
    /// Parses an `OTEL_EXPORTER_OTLP_PROTOCOL` value. Unknown http
    /// sub-variants map to [`Protocol::HttpBinary`]; anything else is
    /// `None` and leaves the decision to the endpoint scheme.
    pub fn parse(value: &str) -> Option<Protocol> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            OTEL_EXPORTER_OTLP_PROTOCOL_GRPC => Some(Protocol::Grpc),
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_PROTOBUF => Some(Protocol::HttpBinary),
            OTEL_EXPORTER_OTLP_PROTOCOL_HTTP_JSON => Some(Protocol::HttpJson),
            other if other.starts_with("http") => Some(Protocol::HttpBinary),
            _ => None,
        }
    }

    /// Reads and parses [`OTEL_EXPORTER_OTLP_PROTOCOL`].
    pub fn from_env() -> Option<Protocol> {
        std::env::var(OTEL_EXPORTER_OTLP_PROTOCOL)
            .ok()
            .and_then(|value| Self::parse(&value))
    }
}

/// The transport family an exporter set speaks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    Grpc,
    Http,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Grpc => "grpc",
            TransportKind::Http => "http",
        })
    }
}

/// What to do when grpc is preferred but the build does not provide it.
///
/// The http transport has no substitute, so a missing http transport
/// fails setup under either policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FallbackPolicy {
    /// Warn and substitute the http transport.
    #[default]
    SoftFallback,
    /// Fail setup so the operator sees the broken configuration.
    HardFail,
}

/// One exporter factory per signal, all bound to the same transport.
pub struct SignalFactories<L, S, M> {
    pub logs: Arc<dyn ExporterFactory<L>>,
    pub traces: Arc<dyn ExporterFactory<S>>,
    pub metrics: Arc<dyn ExporterFactory<M>>,
}

impl<L, S, M> Clone for SignalFactories<L, S, M> {
    fn clone(&self) -> Self {
        SignalFactories {
            logs: self.logs.clone(),
            traces: self.traces.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<L, S, M> Debug for SignalFactories<L, S, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalFactories").finish_non_exhaustive()
    }
}

/// Whether a build provides a transport, decided once at startup.
pub enum TransportSupport<L, S, M> {
    Available(SignalFactories<L, S, M>),
    Unavailable { reason: String },
}

impl<L, S, M> Clone for TransportSupport<L, S, M> {
    fn clone(&self) -> Self {
        match self {
            TransportSupport::Available(factories) => {
                TransportSupport::Available(factories.clone())
            }
            TransportSupport::Unavailable { reason } => TransportSupport::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

impl<L, S, M> Debug for TransportSupport<L, S, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransportSupport::Available(_) => f.write_str("Available"),
            TransportSupport::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

/// The transports an embedding build can offer, one entry per kind.
pub struct TransportCatalog<L, S, M> {
    pub grpc: TransportSupport<L, S, M>,
    pub http: TransportSupport<L, S, M>,
}

impl<L, S, M> Clone for TransportCatalog<L, S, M> {
    fn clone(&self) -> Self {
        TransportCatalog {
            grpc: self.grpc.clone(),
            http: self.http.clone(),
        }
    }
}

impl<L, S, M> Debug for TransportCatalog<L, S, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCatalog")
            .field("grpc", &self.grpc)
            .field("http", &self.http)
            .finish()
    }
}

/// Inputs to [`resolve_exporters`], usually taken from the environment
/// with code-supplied values taking priority.
#[derive(Clone, Debug, Default)]
pub struct ResolutionConfig {
    /// Skips protocol and scheme inspection entirely when set.
    pub transport_override: Option<TransportKind>,
    /// Preferred protocol, normally from [`OTEL_EXPORTER_OTLP_PROTOCOL`].
    pub protocol: Option<Protocol>,
    /// Collector endpoint, normally from [`OTEL_EXPORTER_OTLP_ENDPOINT`].
    /// `None` disables telemetry export instead of failing.
    pub endpoint: Option<String>,
    pub fallback_policy: FallbackPolicy,
}

impl ResolutionConfig {
    /// Builds a config from the process environment. Blank values count
    /// as unset.
    pub fn from_env() -> Self {
        ResolutionConfig {
            transport_override: None,
            protocol: Protocol::from_env(),
            endpoint: non_empty_env(OTEL_EXPORTER_OTLP_ENDPOINT),
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The outcome of resolution: a transport, the parsed endpoint, and the
/// factories for it. Computed once at startup, never mutated.
pub struct ResolvedExporterSet<L, S, M> {
    pub transport: TransportKind,
    pub endpoint: CollectorEndpoint,
    pub factories: SignalFactories<L, S, M>,
}

impl<L, S, M> Clone for ResolvedExporterSet<L, S, M> {
    fn clone(&self) -> Self {
        ResolvedExporterSet {
            transport: self.transport,
            endpoint: self.endpoint.clone(),
            factories: self.factories.clone(),
        }
    }
}

impl<L, S, M> Debug for ResolvedExporterSet<L, S, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedExporterSet")
            .field("transport", &self.transport)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Picks the transport from override, protocol and endpoint scheme, in
/// that order. Pure; availability is not consulted here.
///
/// Without an override or a recognized protocol, an `http`/`https`
/// endpoint scheme selects http and every other scheme selects grpc.
pub fn resolve_transport(
    transport_override: Option<TransportKind>,
    protocol: Option<Protocol>,
    endpoint: Option<&CollectorEndpoint>,
) -> TransportKind {
    if let Some(kind) = transport_override {
        return kind;
    }
    match protocol {
        Some(Protocol::Grpc) => TransportKind::Grpc,
        Some(Protocol::HttpBinary) | Some(Protocol::HttpJson) => TransportKind::Http,
        None => match endpoint.map(CollectorEndpoint::scheme) {
            Some("http") | Some("https") => TransportKind::Http,
            _ => TransportKind::Grpc,
        },
    }
}

/// Resolves the exporter set for the configured endpoint.
///
/// Returns `Ok(None)` when no endpoint is configured, which callers
/// should treat as "telemetry export disabled". Endpoint parse failures
/// and unavailable transports surface as [`SetupError`] so a broken
/// configuration stops initialization instead of being retried forever.
pub fn resolve_exporters<L, S, M>(
    config: &ResolutionConfig,
    catalog: &TransportCatalog<L, S, M>,
) -> Result<Option<ResolvedExporterSet<L, S, M>>, SetupError> {
    let Some(raw_endpoint) = config.endpoint.as_deref() else {
        guard_info!(
            name: "Resolution.EndpointUnset",
            message = "no collector endpoint configured, telemetry export stays disabled"
        );
        return Ok(None);
    };
    let endpoint = CollectorEndpoint::parse(raw_endpoint)?;

    let preferred = resolve_transport(config.transport_override, config.protocol, Some(&endpoint));

    let (transport, factories) = match preferred {
        TransportKind::Http => match &catalog.http {
            TransportSupport::Available(factories) => (TransportKind::Http, factories.clone()),
            TransportSupport::Unavailable { reason } => {
                return Err(SetupError::TransportUnavailable {
                    transport: TransportKind::Http,
                    reason: reason.clone(),
                });
            }
        },
        TransportKind::Grpc => match &catalog.grpc {
            TransportSupport::Available(factories) => (TransportKind::Grpc, factories.clone()),
            TransportSupport::Unavailable { reason } => match config.fallback_policy {
                FallbackPolicy::HardFail => {
                    return Err(SetupError::TransportUnavailable {
                        transport: TransportKind::Grpc,
                        reason: reason.clone(),
                    });
                }
                FallbackPolicy::SoftFallback => match &catalog.http {
                    TransportSupport::Available(factories) => {
                        guard_warn!(
                            name: "Resolution.GrpcUnavailable",
                            reason = format!("{}", reason),
                            message = "falling back to the http transport"
                        );
                        (TransportKind::Http, factories.clone())
                    }
                    TransportSupport::Unavailable { reason } => {
                        return Err(SetupError::TransportUnavailable {
                            transport: TransportKind::Http,
                            reason: reason.clone(),
                        });
                    }
                },
            },
        },
    };

    guard_debug!(
        name: "Resolution.TransportSelected",
        transport = format!("{}", transport),
        endpoint = format!("{}", endpoint)
    );

    Ok(Some(ResolvedExporterSet {
        transport,
        endpoint,
        factories,
    }))
}
