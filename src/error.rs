// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns [`SpiffeError`] (or a
//! narrower alias of [`Result`]). Variants are grouped the way spec §7
//! groups them: input, state, crypto, policy, transport, cancellation.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpiffeError>;

/// The crate's single error type.
#[derive(Debug, thiserror::Error)]
pub enum SpiffeError {
    // -- Input errors -----------------------------------------------------
    /// A SPIFFE ID string failed to parse.
    #[error("malformed SPIFFE ID: {0}")]
    MalformedSpiffeId(String),

    /// A trust domain string failed validation.
    #[error("malformed trust domain: {0}")]
    MalformedTrustDomain(String),

    /// A workload endpoint URI had an unsupported or missing scheme.
    #[error("workload endpoint socket URI must have a \"tcp\" or \"unix\" scheme")]
    UnsupportedEndpointScheme,

    /// A workload endpoint URI could not be parsed at all.
    #[error("malformed workload endpoint URI: {0}")]
    MalformedEndpoint(String),

    /// PEM/DER input could not be decoded.
    #[error("malformed certificate or key material: {0}")]
    MalformedCertMaterial(String),

    /// A bundle document failed to parse as JSON/JWKS.
    #[error("malformed bundle document: {0}")]
    MalformedBundleDocument(#[from] serde_json::Error),

    // -- State errors -------------------------------------------------------
    /// A source has no cached snapshot yet, or has been closed.
    #[error("source unavailable: {0}")]
    SourceUnavailable(&'static str),

    /// No bundle is registered for the requested trust domain.
    #[error("x509bundle: no X.509 bundle found for trust domain: \"{0}\"")]
    NoX509Bundle(String),

    /// No JWT bundle is registered for the requested trust domain.
    #[error("no JWT bundle found for trust domain: \"{0}\"")]
    NoJwtBundle(String),

    /// No authority with the requested key id exists in a JWT bundle.
    #[error("no authority found for key id: \"{0}\"")]
    NoJwtAuthority(String),

    // -- Crypto errors --------------------------------------------------
    /// The leaf certificate did not carry exactly one URI SAN.
    #[error("certificate does not have exactly one URI SAN")]
    SanCountMismatch,

    /// The leaf certificate is a CA certificate, or lacks digital-signature
    /// key usage.
    #[error("leaf certificate is not a valid X.509-SVID: {0}")]
    InvalidLeafConstraints(&'static str),

    /// Chain building/verification against the trust bundle failed.
    #[error("x509: certificate signed by unknown authority")]
    UnknownAuthority,

    /// A JWT-SVID's signature did not validate.
    #[error("jwtsvid: signature verification failed")]
    InvalidSignature,

    /// A JWT-SVID has expired.
    #[error("jwtsvid: token has expired")]
    Expired,

    /// A JWT-SVID's `sub` claim does not match the expected SPIFFE ID shape.
    #[error("jwtsvid: invalid or missing \"sub\" claim")]
    InvalidSubject,

    /// A JWT-SVID is missing a required audience.
    #[error("jwtsvid: required audience \"{0}\" not present")]
    MissingAudience(String),

    // -- Policy errors ------------------------------------------------------
    /// The authorizer predicate rejected a verified identity.
    #[error("unexpected trust domain \"{0}\"")]
    UnexpectedTrustDomain(String),

    /// The authorizer predicate rejected a verified identity for a reason
    /// other than trust domain mismatch.
    #[error("authorizer rejected identity \"{0}\": {1}")]
    AuthorizerRejected(String, String),

    // -- Transport errors -----------------------------------------------
    /// Dialing the workload API endpoint failed.
    #[error("failed to dial workload API: {0}")]
    DialFailed(String),

    /// The workload API stream ended or errored.
    #[error("workload API stream closed: {0}")]
    StreamClosed(String),

    /// An HTTP fetch (e.g. federation) returned a non-2xx status.
    #[error("http fetch failed with status {0}")]
    HttpStatus(u16),

    /// An HTTP transport-level error occurred.
    #[error("http transport error: {0}")]
    HttpTransport(String),

    /// The TLS handshake itself failed.
    #[error("tls handshake failed: {0}")]
    TlsHandshake(#[from] rustls::Error),

    // -- Cancellation ------------------------------------------------------
    /// The operation's context was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    // -- Escape hatch used only at crate/module boundaries -----------------
    /// Any I/O failure not otherwise categorized above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpiffeError {
    /// `true` for errors whose root cause is the caller's own predicate
    /// rather than something produced inside this crate.
    #[must_use]
    pub const fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedTrustDomain(_) | Self::AuthorizerRejected(_, _)
        )
    }
}

impl From<url::ParseError> for SpiffeError {
    fn from(e: url::ParseError) -> Self {
        Self::MalformedSpiffeId(e.to_string())
    }
}

/// Helper for formatting a short context string onto an otherwise opaque
/// error, used where `spec.md` §6 fixes the exact surfaced message.
pub(crate) fn context(prefix: &str, err: impl fmt::Display) -> String {
    format!("{prefix}: {err}")
}
