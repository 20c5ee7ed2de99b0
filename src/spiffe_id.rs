// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! SPIFFE ID and Trust Domain parsing and validation.
//!
//! A SPIFFE ID is the triple `(scheme="spiffe", trust_domain, path)`. The
//! canonical string form lowercases the trust domain and preserves path
//! case, and `parse(s).to_string()` round-trips for every string this
//! module accepts as input.

use crate::error::{Result, SpiffeError};
use std::fmt;
use std::str::FromStr;

const MAX_TRUST_DOMAIN_LEN: usize = 255;

fn is_trust_domain_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_')
}

fn is_path_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

/// A validated trust domain: the authority component of a SPIFFE ID.
///
/// Trust domains compare and hash on their canonical (lowercased) form.
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TrustDomain(String);

impl TrustDomain {
    /// Parse and validate a trust domain label.
    ///
    /// Accepts `[a-z0-9._-]+` case-insensitively (canonicalized to
    /// lowercase), 1..255 bytes, with no `/`.
    pub fn parse(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        if s.is_empty() || s.len() > MAX_TRUST_DOMAIN_LEN {
            return Err(SpiffeError::MalformedTrustDomain(format!(
                "length must be 1..=255 bytes, got {}",
                s.len()
            )));
        }
        let lower = s.to_ascii_lowercase();
        if !lower.chars().all(is_trust_domain_char) {
            return Err(SpiffeError::MalformedTrustDomain(format!(
                "invalid character in trust domain: {s:?}"
            )));
        }
        Ok(Self(lower))
    }

    /// Parse, panicking-free but returning the error immediately — an
    /// alias kept for callers that prefer the `require_*` naming from
    /// spec §4.A.
    pub fn require(s: impl AsRef<str>) -> Result<Self> {
        Self::parse(s)
    }

    /// The canonical (lowercase) string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the `spiffe://<trust-domain>` ID with an empty path that
    /// names this trust domain itself.
    #[must_use]
    pub fn id_string(&self) -> String {
        format!("spiffe://{}", self.0)
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TrustDomain {
    type Err = SpiffeError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for TrustDomain {
    type Error = SpiffeError;
    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TrustDomain {
    type Error = SpiffeError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(s)
    }
}

/// A single non-empty path segment, validated against the SPIFFE ID
/// grammar (`[A-Za-z0-9._-]+`, never `.` or `..`).
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(SpiffeError::MalformedSpiffeId(format!(
            "path must be empty or start with '/': {path:?}"
        )));
    }
    for segment in path.split('/').skip(1) {
        if segment.is_empty() {
            return Err(SpiffeError::MalformedSpiffeId(
                "path must not contain empty segments (e.g. \"//\")".into(),
            ));
        }
        if segment == "." || segment == ".." {
            return Err(SpiffeError::MalformedSpiffeId(format!(
                "path segment must not be \".\" or \"..\": {segment:?}"
            )));
        }
        if segment.contains('\0') {
            return Err(SpiffeError::MalformedSpiffeId(
                "path segment must not contain NUL".into(),
            ));
        }
        if !segment.chars().all(is_path_segment_char) {
            return Err(SpiffeError::MalformedSpiffeId(format!(
                "invalid character in path segment: {segment:?}"
            )));
        }
    }
    Ok(())
}

/// A fully-qualified SPIFFE ID: `spiffe://<trust-domain>/<path>`.
///
/// Two IDs compare equal iff their trust domain and path are byte-equal
/// after canonicalization (trust domain lowercased, path case preserved).
#[derive(Clone, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpiffeId {
    trust_domain: TrustDomain,
    path: String,
}

impl SpiffeId {
    /// Construct a SPIFFE ID from an already-validated trust domain and a
    /// path. `path` must be empty or start with `/`; segments are
    /// validated against the SPIFFE ID grammar.
    pub fn new(trust_domain: TrustDomain, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self { trust_domain, path })
    }

    /// Parse a full `spiffe://...` URI string.
    pub fn parse(s: impl AsRef<str>) -> Result<Self> {
        let s = s.as_ref();
        let rest = s
            .strip_prefix("spiffe://")
            .ok_or_else(|| SpiffeError::MalformedSpiffeId(format!("wrong scheme: {s:?}")))?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(SpiffeError::MalformedSpiffeId(
                "empty trust domain".into(),
            ));
        }
        let trust_domain = TrustDomain::parse(authority)?;
        Self::new(trust_domain, path)
    }

    /// Fail-fast variant name kept for parity with spec §4.A's
    /// `require_*` convention.
    pub fn require(s: impl AsRef<str>) -> Result<Self> {
        Self::parse(s)
    }

    /// The trust domain component.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// The path component, including the leading `/` if non-empty, or
    /// `""` for a bare trust-domain ID.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `true` iff this ID belongs to `trust_domain`.
    #[must_use]
    pub fn is_member_of(&self, trust_domain: &TrustDomain) -> bool {
        &self.trust_domain == trust_domain
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spiffe://{}{}", self.trust_domain, self.path)
    }
}

impl FromStr for SpiffeId {
    type Err = SpiffeError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for SpiffeId {
    type Error = SpiffeError;
    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SpiffeId {
    type Error = SpiffeError;
    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<SpiffeId> for String {
    fn from(id: SpiffeId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_canonical_form() {
        for s in [
            "spiffe://example.org",
            "spiffe://example.org/backend",
            "spiffe://example.org/backend/worker-1",
        ] {
            let id = SpiffeId::parse(s).unwrap();
            assert_eq!(id.to_string(), s);
        }
    }

    #[test]
    fn lowercases_trust_domain_but_not_path() {
        let id = SpiffeId::parse("spiffe://Example.ORG/Backend").unwrap();
        assert_eq!(id.trust_domain().as_str(), "example.org");
        assert_eq!(id.path(), "/Backend");
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert!(SpiffeId::parse("http://example.org/backend").is_err());
    }

    #[test]
    fn rejects_empty_trust_domain() {
        assert!(SpiffeId::parse("spiffe:///backend").is_err());
    }

    #[test]
    fn rejects_dot_dot_segments() {
        assert!(SpiffeId::parse("spiffe://example.org/../etc").is_err());
        assert!(SpiffeId::parse("spiffe://example.org/./etc").is_err());
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(SpiffeId::parse("spiffe://example.org//backend").is_err());
    }

    #[test]
    fn member_of_checks_trust_domain_only() {
        let id = SpiffeId::parse("spiffe://example.org/backend").unwrap();
        assert!(id.is_member_of(&TrustDomain::parse("example.org").unwrap()));
        assert!(!id.is_member_of(&TrustDomain::parse("other.org").unwrap()));
    }

    #[test]
    fn equality_is_canonical() {
        let a = SpiffeId::parse("spiffe://Example.org/backend").unwrap();
        let b = SpiffeId::parse("spiffe://example.org/backend").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn trust_domain_rejects_bad_chars_and_length() {
        assert!(TrustDomain::parse("").is_err());
        assert!(TrustDomain::parse("a/b").is_err());
        assert!(TrustDomain::parse("a".repeat(256)).is_err());
        assert!(TrustDomain::parse("Example.org").is_ok());
    }
}
