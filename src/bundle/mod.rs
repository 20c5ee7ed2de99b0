// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! X.509 and JWT trust bundles (spec §3, §4.B).
//!
//! A bundle is a per-trust-domain collection of trust material. All
//! mutation goes through an exclusive lock; readers get an immutable
//! snapshot (a `Vec`/`HashMap` clone) that stays valid across later
//! mutations, matching the teacher's own preference for `std` sync
//! primitives (see `trust_domain_store.rs`) over an external atomics crate.

mod jwks;

use crate::error::{Result, SpiffeError};
use crate::spiffe_id::TrustDomain;
use base64::Engine;
use jwks::{BundleDocument, JwkEntry};
use std::collections::HashMap;
use std::sync::RwLock;

/// A DER-encoded X.509 certificate, compared by byte identity.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct X509Authority(Vec<u8>);

impl X509Authority {
    /// Wrap an already-DER-encoded certificate.
    #[must_use]
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self(der.into())
    }

    /// The raw DER bytes.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.0
    }
}

/// A single JWT-SVID signing key, identified by `kid`.
#[derive(Clone, Debug)]
pub struct JwtAuthority {
    kid: String,
    entry: JwkEntry,
}

impl JwtAuthority {
    #[cfg(test)]
    pub(crate) fn for_test(kid: &str, kty: &str) -> Self {
        Self {
            kid: kid.to_string(),
            entry: JwkEntry {
                kty: kty.to_string(),
                key_use: "jwt-svid".to_string(),
                kid: Some(kid.to_string()),
                x5c: None,
                extra: serde_json::Map::new(),
            },
        }
    }

    /// The key identifier used to select this authority from a JWKS.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// The JWK `kty` field (`"RSA"`, `"EC"`, ...).
    #[must_use]
    pub fn key_type(&self) -> &str {
        &self.entry.kty
    }

    /// The raw JWK fields (`n`, `e`, `crv`, `x`, `y`, ...) as JSON, handed
    /// to the caller-supplied verification closure since this crate does
    /// not implement JWS signature verification itself.
    #[must_use]
    pub fn jwk_fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.entry.extra
    }
}

/// Per-trust-domain set of X.509 trust anchors.
pub struct X509Bundle {
    trust_domain: TrustDomain,
    authorities: RwLock<Vec<X509Authority>>,
}

impl X509Bundle {
    /// An empty bundle for `trust_domain`, with no trust anchors yet.
    #[must_use]
    pub fn empty(trust_domain: TrustDomain) -> Self {
        Self {
            trust_domain,
            authorities: RwLock::new(Vec::new()),
        }
    }

    /// Build a bundle from already-DER-encoded trust anchors.
    pub fn from_der_authorities(
        trust_domain: TrustDomain,
        authorities: impl IntoIterator<Item = Vec<u8>>,
    ) -> Self {
        Self {
            trust_domain,
            authorities: RwLock::new(authorities.into_iter().map(X509Authority::from_der).collect()),
        }
    }

    /// Parse a bundle from one or more concatenated PEM certificates.
    pub fn from_pem(trust_domain: TrustDomain, pem_bytes: &[u8]) -> Result<Self> {
        let certs = pem::parse_many(pem_bytes)
            .map_err(|e| SpiffeError::MalformedCertMaterial(e.to_string()))?;
        Ok(Self::from_der_authorities(
            trust_domain,
            certs.into_iter().map(|p| p.contents().to_vec()),
        ))
    }

    /// The trust domain this bundle is scoped to.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Snapshot of the current trust anchors.
    #[must_use]
    pub fn authorities(&self) -> Vec<X509Authority> {
        self.authorities.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Idempotent: adding an authority already present is a no-op.
    pub fn add_authority(&self, authority: X509Authority) {
        let mut authorities = self.authorities.write().unwrap_or_else(|e| e.into_inner());
        if !authorities.contains(&authority) {
            authorities.push(authority);
        }
    }

    /// Idempotent: removing an absent authority is a no-op.
    pub fn remove_authority(&self, authority: &X509Authority) {
        let mut authorities = self.authorities.write().unwrap_or_else(|e| e.into_inner());
        authorities.retain(|a| a != authority);
    }
}

/// Per-trust-domain set of JWT-SVID signing keys.
pub struct JwtBundle {
    trust_domain: TrustDomain,
    authorities: RwLock<HashMap<String, JwtAuthority>>,
}

impl JwtBundle {
    /// An empty bundle for `trust_domain`, with no signing keys yet.
    #[must_use]
    pub fn empty(trust_domain: TrustDomain) -> Self {
        Self {
            trust_domain,
            authorities: RwLock::new(HashMap::new()),
        }
    }

    /// The trust domain this bundle is scoped to.
    #[must_use]
    pub const fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    /// Look up a signing key by `kid`.
    pub fn get_authority(&self, kid: &str) -> Result<JwtAuthority> {
        self.authorities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kid)
            .cloned()
            .ok_or_else(|| SpiffeError::NoJwtAuthority(kid.to_string()))
    }

    /// Insert or replace a signing key.
    pub fn add_authority(&self, authority: JwtAuthority) {
        self.authorities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(authority.kid.clone(), authority);
    }

    /// Remove a signing key by `kid`, if present.
    pub fn remove_authority(&self, kid: &str) {
        self.authorities.write().unwrap_or_else(|e| e.into_inner()).remove(kid);
    }
}

/// The combined X.509 + JWT trust material for one trust domain, as it
/// appears serialized in one bundle document (spec §4.B, §6).
pub struct Bundle {
    /// X.509 authorities for this trust domain.
    pub x509: X509Bundle,
    /// JWT signing keys for this trust domain.
    pub jwt: JwtBundle,
}

impl Bundle {
    /// An empty bundle for `trust_domain`, with no trust material yet.
    #[must_use]
    pub fn empty(trust_domain: TrustDomain) -> Self {
        Self {
            x509: X509Bundle::empty(trust_domain.clone()),
            jwt: JwtBundle::empty(trust_domain),
        }
    }

    /// The trust domain this bundle is scoped to.
    #[must_use]
    pub fn trust_domain(&self) -> &TrustDomain {
        self.x509.trust_domain()
    }

    /// Parse a bundle document (spec §6's JWKS-shaped JSON).
    pub fn parse(trust_domain: TrustDomain, json: &[u8]) -> Result<Self> {
        Self::parse_with_refresh_hint(trust_domain, json).map(|(bundle, _hint)| bundle)
    }

    /// Same as [`Self::parse`] but also returns the document's
    /// `spiffe_refresh_hint`, used by [`crate::federation::watch_bundle`]
    /// to pace its poll loop (spec §4.H).
    pub fn parse_with_refresh_hint(trust_domain: TrustDomain, json: &[u8]) -> Result<(Self, Option<u64>)> {
        let doc: BundleDocument = serde_json::from_slice(json)?;
        let hint = doc.spiffe_refresh_hint;
        let x509 = X509Bundle::from_der_authorities(trust_domain.clone(), doc.x509_authorities()?);
        let jwt = JwtBundle::empty(trust_domain);
        for (kid, entry) in doc.jwt_authorities() {
            jwt.add_authority(JwtAuthority { kid, entry });
        }
        Ok((Self { x509, jwt }, hint))
    }

    /// Serialize to the same bundle document shape `parse` accepts.
    ///
    /// `parse(serialize(b)) == b` for every bundle `b` (invariant #2 in
    /// spec §8), compared by authority set rather than byte-for-byte JSON.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let doc = self.to_document();
        serde_json::to_vec(&doc).unwrap_or_default()
    }

    fn to_document(&self) -> BundleDocument {
        let mut keys = Vec::new();
        for authority in self.x509.authorities() {
            keys.push(JwkEntry {
                kty: "RSA".to_string(),
                key_use: "x509-svid".to_string(),
                kid: None,
                x5c: Some(vec![base64::engine::general_purpose::STANDARD
                    .encode(authority.content())]),
                extra: serde_json::Map::new(),
            });
        }
        let jwt_authorities = self
            .jwt
            .authorities
            .read()
            .unwrap_or_else(|e| e.into_inner());
        for authority in jwt_authorities.values() {
            let mut entry = authority.entry.clone();
            entry.key_use = "jwt-svid".to_string();
            entry.kid = Some(authority.kid.clone());
            keys.push(entry);
        }
        BundleDocument {
            keys,
            spiffe_sequence: None,
            spiffe_refresh_hint: None,
        }
    }

    /// Same as [`Self::serialize`] but attaches the SPIFFE sequence/refresh
    /// hint extensions (spec §6). Not enforced as monotonic (spec §9 Open
    /// Question) — callers may observe it decrease across reconnects.
    #[must_use]
    pub fn serialize_with_hints(&self, sequence: Option<u64>, refresh_hint_secs: Option<u64>) -> Vec<u8> {
        let mut doc = self.to_document();
        doc.spiffe_sequence = sequence;
        doc.spiffe_refresh_hint = refresh_hint_secs;
        serde_json::to_vec(&doc).unwrap_or_default()
    }
}

/// A `trust_domain -> Bundle` map, used by consumers spanning multiple
/// federations (spec §3 "Bundle Set").
#[derive(Default)]
pub struct BundleSet {
    bundles: RwLock<HashMap<TrustDomain, std::sync::Arc<Bundle>>>,
}

impl BundleSet {
    /// An empty set with no bundles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the bundle for `trust_domain`, if one has been set.
    #[must_use]
    pub fn get_bundle(&self, trust_domain: &TrustDomain) -> Option<std::sync::Arc<Bundle>> {
        self.bundles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(trust_domain)
            .cloned()
    }

    /// Insert or replace the bundle for its trust domain.
    pub fn set_bundle(&self, bundle: std::sync::Arc<Bundle>) {
        self.bundles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bundle.trust_domain().clone(), bundle);
    }

    /// Every trust domain with a bundle currently in this set.
    #[must_use]
    pub fn trust_domains(&self) -> Vec<TrustDomain> {
        self.bundles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_der() -> Vec<u8> {
        vec![0x30, 0x82, 0x01, 0x0a, 0x02, 0x01, 0x00]
    }

    #[test]
    fn add_x509_authority_is_idempotent() {
        let td = TrustDomain::parse("example.org").unwrap();
        let bundle = X509Bundle::empty(td);
        let authority = X509Authority::from_der(sample_der());
        bundle.add_authority(authority.clone());
        bundle.add_authority(authority);
        assert_eq!(bundle.authorities().len(), 1);
    }

    #[test]
    fn remove_x509_authority_is_idempotent() {
        let td = TrustDomain::parse("example.org").unwrap();
        let bundle = X509Bundle::empty(td);
        let authority = X509Authority::from_der(sample_der());
        bundle.remove_authority(&authority);
        bundle.add_authority(authority.clone());
        bundle.remove_authority(&authority);
        bundle.remove_authority(&authority);
        assert!(bundle.authorities().is_empty());
    }

    #[test]
    fn bundle_document_round_trips() {
        let td = TrustDomain::parse("example.org").unwrap();
        let bundle = Bundle::empty(td.clone());
        bundle.x509.add_authority(X509Authority::from_der(sample_der()));

        let json = bundle.serialize();
        let parsed = Bundle::parse(td, &json).unwrap();

        assert_eq!(parsed.x509.authorities(), bundle.x509.authorities());
    }

    #[test]
    fn bundle_set_get_and_set() {
        let td = TrustDomain::parse("example.org").unwrap();
        let set = BundleSet::new();
        assert!(set.get_bundle(&td).is_none());
        set.set_bundle(std::sync::Arc::new(Bundle::empty(td.clone())));
        assert!(set.get_bundle(&td).is_some());
    }
}
