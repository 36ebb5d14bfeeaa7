//! Collector endpoint parsing and reachability probing.

use std::fmt::{self, Display, Formatter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::SetupError;

/// Default port assumed for `http`/`https` endpoints given without one.
pub const DEFAULT_HTTP_PORT: u16 = 4318;

/// A parsed collector address.
///
/// The host is required; the port is the explicit one if given, otherwise
/// derived from the scheme (`http`/`https` imply [`DEFAULT_HTTP_PORT`]).
/// Other schemes have no implied port, which leaves the endpoint without a
/// probe target; the prober reports that every cycle instead of failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorEndpoint {
    raw: String,
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl CollectorEndpoint {
    /// Parses `endpoint` into its probe-relevant parts.
    ///
    /// Fails on unparsable URLs and on URLs without a host. Those are
    /// configuration errors the caller should see at startup, not
    /// conditions worth retrying.
    pub fn parse(endpoint: &str) -> Result<Self, SetupError> {
        let url = url::Url::parse(endpoint)
            .map_err(|err| SetupError::InvalidEndpoint(endpoint.to_string(), err.to_string()))?;

        let host = url
            .host_str()
            .ok_or_else(|| {
                SetupError::InvalidEndpoint(endpoint.to_string(), "no host".to_string())
            })?
            .to_string();

        let scheme = url.scheme().to_string();
        let port = url
            .port()
            .or_else(|| explicit_port(endpoint))
            .or(match scheme.as_str() {
                "http" | "https" => Some(DEFAULT_HTTP_PORT),
                _ => None,
            });

        Ok(CollectorEndpoint {
            raw: endpoint.to_string(),
            scheme,
            host,
            port,
        })
    }

    /// The URL scheme, lowercased.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The host component.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The explicit or scheme-derived port, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Fast TCP check for host:port. No protocol handshake is performed,
    /// and the connection is closed immediately.
    ///
    /// Returns `false` when no port can be derived, when name resolution
    /// fails, or when no resolved address accepts a connection within
    /// `timeout`.
    pub fn is_reachable(&self, timeout: Duration) -> bool {
        let Some(port) = self.port else {
            return false;
        };
        // to_socket_addrs wants a bare IPv6 address, not the bracketed URL form
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        let Ok(addrs) = (host, port).to_socket_addrs() else {
            return false;
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                return true;
            }
        }
        false
    }
}

impl Display for CollectorEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// Url::port() reports None for a port matching the scheme default
// (http://host:80, https://host:443), so recover it from the raw text.
fn explicit_port(endpoint: &str) -> Option<u16> {
    let rest = endpoint.split_once("//").map_or(endpoint, |(_, rest)| rest);
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let port = match host_port.rsplit_once(']') {
        Some((_, rest)) => rest.strip_prefix(':')?,
        None => host_port.rsplit_once(':')?.1,
    };
    port.parse().ok()
}
