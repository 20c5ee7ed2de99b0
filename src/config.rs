// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Typed runtime configuration (spec §2 ambient row): workload endpoint
//! resolution, reconnect backoff bounds, and a default JWT audience list,
//! loaded from the environment with explicit overrides taking precedence.
//! Generalizes [`crate::workload_api::Endpoint::resolve`]'s env-first
//! pattern to the other two knobs the state machine and `get_jwt_svid`
//! convenience callers need.

use crate::error::Result;
use crate::workload_api::Endpoint;
use std::time::Duration;

/// Reconnect backoff bounds the state machine can be parameterized with.
/// The state machine in `workload_api::client` hard-codes the spec's
/// defaults (1s initial, 30s cap); this struct exists for callers that want
/// to read those bounds from configuration rather than accept the default.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub initial: Duration,
    /// Upper bound the backoff delay never exceeds.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// `env var -> field` configuration for one workload, resolved once at
/// startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Resolved Workload API socket endpoint.
    pub endpoint: Endpoint,
    /// Reconnect backoff bounds.
    pub backoff: BackoffConfig,
    /// Audiences used by `get_jwt_svid` callers that don't name one.
    pub default_audience: Vec<String>,
}

/// Comma-separated default audiences for `get_jwt_svid` calls that don't
/// name one explicitly.
pub const SPIFFE_JWT_AUDIENCE_ENV: &str = "SPIFFE_JWT_AUDIENCE";

fn parse_audiences(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

impl Config {
    /// Resolve configuration from the environment, falling back to
    /// `default_endpoint` only when `SPIFFE_ENDPOINT_SOCKET` is unset.
    pub fn from_env(default_endpoint: Option<&str>) -> Result<Self> {
        let endpoint = Endpoint::resolve(default_endpoint)?;
        let default_audience = std::env::var(SPIFFE_JWT_AUDIENCE_ENV)
            .ok()
            .map(|raw| parse_audiences(&raw))
            .unwrap_or_default();
        Ok(Self {
            endpoint,
            backoff: BackoffConfig::default(),
            default_audience,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_explicit_endpoint_when_env_unset() {
        let config = Config::from_env(Some("unix:/tmp/agent.sock")).unwrap();
        assert_eq!(config.endpoint, Endpoint::Unix("/tmp/agent.sock".into()));
    }

    #[test]
    fn parses_comma_separated_audiences() {
        assert_eq!(
            parse_audiences("api, other-service ,"),
            vec!["api".to_string(), "other-service".to_string()]
        );
    }

    #[test]
    fn empty_input_parses_to_no_audiences() {
        assert!(parse_audiences("").is_empty());
    }
}
