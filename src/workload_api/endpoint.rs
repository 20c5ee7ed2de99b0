// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Workload API endpoint resolution (spec §6).
//!
//! Grounded on `other_examples/242e398b_troydai-spiffe-helper-rust__spiffe-
//! helper-src-workload_api.rs`'s `normalize_endpoint` for the unix/tcp URI
//! handling style; the error text is a tested invariant (spec §6, §8
//! scenario 5).

use crate::error::{Result, SpiffeError};

/// Environment variable holding the default workload endpoint socket URI.
pub const SPIFFE_ENDPOINT_SOCKET_ENV: &str = "SPIFFE_ENDPOINT_SOCKET";

/// A resolved Workload API endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Endpoint {
    /// `unix:/path/to/socket` — a filesystem socket (or, on non-POSIX
    /// platforms, a named pipe; this does not change the URI grammar).
    Unix(String),
    /// `tcp:host:port`.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// Parse a `unix:...` or `tcp:...` endpoint URI.
    pub fn parse(uri: &str) -> Result<Self> {
        let normalized = normalize(uri);
        if let Some(path) = normalized.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(SpiffeError::MalformedEndpoint(
                    "unix endpoint must name a path".into(),
                ));
            }
            return Ok(Self::Unix(path.to_string()));
        }
        if let Some(rest) = normalized.strip_prefix("tcp:") {
            let rest = rest.trim_start_matches("//");
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| SpiffeError::MalformedEndpoint(format!("missing port in {uri:?}")))?;
            let port: u16 = port
                .parse()
                .map_err(|_| SpiffeError::MalformedEndpoint(format!("invalid port in {uri:?}")))?;
            if host.is_empty() {
                return Err(SpiffeError::MalformedEndpoint("tcp endpoint must name a host".into()));
            }
            return Ok(Self::Tcp {
                host: host.to_string(),
                port,
            });
        }
        Err(SpiffeError::UnsupportedEndpointScheme)
    }

    /// Resolve the default endpoint from `SPIFFE_ENDPOINT_SOCKET`, falling
    /// back to the explicit `default` when the env var is unset.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        if let Some(uri) = explicit {
            return Self::parse(uri);
        }
        let from_env = std::env::var(SPIFFE_ENDPOINT_SOCKET_ENV)
            .map_err(|_| SpiffeError::MalformedEndpoint(format!("{SPIFFE_ENDPOINT_SOCKET_ENV} is not set")))?;
        Self::parse(&from_env)
    }
}

/// Accepts the common `unix:///path` triple-slash form in addition to the
/// canonical `unix:/path` form, same normalization `normalize_endpoint`
/// performs in the grounding reference.
fn normalize(uri: &str) -> String {
    if let Some(rest) = uri.strip_prefix("unix://") {
        return format!("unix:{rest}");
    }
    uri.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_socket() {
        assert_eq!(
            Endpoint::parse("unix:/tmp/agent.sock").unwrap(),
            Endpoint::Unix("/tmp/agent.sock".into())
        );
    }

    #[test]
    fn normalizes_triple_slash_unix() {
        assert_eq!(
            Endpoint::parse("unix:///tmp/agent.sock").unwrap(),
            Endpoint::Unix("/tmp/agent.sock".into())
        );
    }

    #[test]
    fn parses_tcp_host_port() {
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:8081").unwrap(),
            Endpoint::Tcp {
                host: "127.0.0.1".into(),
                port: 8081
            }
        );
    }

    #[test]
    fn rejects_unsupported_scheme() {
        let err = Endpoint::parse("wrong-socket-path").unwrap_err();
        assert_eq!(
            err.to_string(),
            "workload endpoint socket URI must have a \"tcp\" or \"unix\" scheme"
        );
    }
}
