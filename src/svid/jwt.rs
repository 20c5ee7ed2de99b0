// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! JWT-SVID: a signed JWT carrying a SPIFFE ID as its subject.
//!
//! Signature verification itself is an external collaborator (spec §1
//! explicitly excludes "JWT-SVID signing/verification primitives" from
//! scope): callers inject a `sign/verify JWS` closure, grounded on the
//! decode-then-verify pipeline shape in
//! `other_examples/3cbe1212_isabella232-E4K__common-jwt-svid-validator`.

use crate::bundle::JwtBundle;
use crate::error::{Result, SpiffeError};
use crate::spiffe_id::SpiffeId;
use base64::Engine;
use std::time::{SystemTime, UNIX_EPOCH};

/// A parsed (but not yet verified) JWT-SVID.
#[derive(Clone, Debug)]
pub struct JwtSvid {
    spiffe_id: SpiffeId,
    audience: Vec<String>,
    expiry: u64,
    raw: String,
    claims: serde_json::Value,
    kid: String,
    signing_input: String,
    signature: Vec<u8>,
}

fn b64url_decode(segment: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| SpiffeError::MalformedCertMaterial(format!("invalid base64url: {e}")))
}

impl JwtSvid {
    /// Decode the JWS structure (header.payload.signature) and extract
    /// claims, without verifying the signature. Requires `kid` in the
    /// header per spec §4.C.
    pub fn parse_insecure(token: &str) -> Result<Self> {
        let mut parts = token.split('.');
        let header_b64 = parts
            .next()
            .ok_or_else(|| SpiffeError::MalformedCertMaterial("missing JWS header".into()))?;
        let payload_b64 = parts
            .next()
            .ok_or_else(|| SpiffeError::MalformedCertMaterial("missing JWS payload".into()))?;
        let sig_b64 = parts
            .next()
            .ok_or_else(|| SpiffeError::MalformedCertMaterial("missing JWS signature".into()))?;
        if parts.next().is_some() {
            return Err(SpiffeError::MalformedCertMaterial(
                "JWS must have exactly three segments".into(),
            ));
        }

        let header: serde_json::Value = serde_json::from_slice(&b64url_decode(header_b64)?)?;
        let kid = header
            .get("kid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SpiffeError::MalformedCertMaterial("JWS header missing \"kid\"".into()))?
            .to_string();

        let claims: serde_json::Value = serde_json::from_slice(&b64url_decode(payload_b64)?)?;

        let sub = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or(SpiffeError::InvalidSubject)?;
        let spiffe_id = SpiffeId::parse(sub).map_err(|_| SpiffeError::InvalidSubject)?;

        let audience: Vec<String> = match claims.get("aud") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };
        if audience.is_empty() {
            return Err(SpiffeError::MissingAudience("<any>".into()));
        }

        let expiry = claims
            .get("exp")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| SpiffeError::MalformedCertMaterial("missing \"exp\" claim".into()))?;

        Ok(Self {
            spiffe_id,
            audience,
            expiry,
            raw: token.to_string(),
            claims,
            kid,
            signing_input: format!("{header_b64}.{payload_b64}"),
            signature: b64url_decode(sig_b64)?,
        })
    }

    /// Full validation per spec §4.C / §3: locate the signing key in the
    /// supplied bundle, verify the signature with the caller's `verify`
    /// closure, check expiry, and require every entry in `audiences` to be
    /// present in the token's `aud`.
    pub fn validate_with(
        token: &str,
        bundle: &JwtBundle,
        audiences: &[&str],
        verify: impl FnOnce(&[u8], &[u8], &str) -> bool,
        now: SystemTime,
    ) -> Result<Self> {
        let svid = Self::parse_insecure(token)?;

        if svid.spiffe_id.trust_domain() != bundle.trust_domain() {
            return Err(SpiffeError::NoJwtBundle(
                svid.spiffe_id.trust_domain().to_string(),
            ));
        }
        let authority = bundle.get_authority(&svid.kid)?;

        if !verify(
            svid.signing_input.as_bytes(),
            &svid.signature,
            authority.key_type(),
        ) {
            return Err(SpiffeError::InvalidSignature);
        }

        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if svid.expiry <= now_secs {
            return Err(SpiffeError::Expired);
        }

        for required in audiences {
            if !svid.audience.iter().any(|a| a == required) {
                return Err(SpiffeError::MissingAudience((*required).to_string()));
            }
        }

        Ok(svid)
    }

    /// The subject's SPIFFE ID (the `sub` claim).
    #[must_use]
    pub const fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// The token's intended audiences.
    #[must_use]
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    /// Expiry as Unix seconds (the `exp` claim).
    #[must_use]
    pub const fn expiry(&self) -> u64 {
        self.expiry
    }

    /// The raw, still-encoded JWT.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The decoded claim set.
    #[must_use]
    pub const fn claims(&self) -> &serde_json::Value {
        &self.claims
    }
}
