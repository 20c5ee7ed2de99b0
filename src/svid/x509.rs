// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! X.509-SVID: a leaf certificate (plus intermediates) carrying a SPIFFE ID.
//!
//! Parsing follows spec §4.C: exactly one URI SAN, `CA=false`, a
//! digital-signature key usage bit, and a SAN that parses as a SPIFFE ID.
//! Grounded on the teacher's `svid_extractor.rs` (SAN walk via
//! `x509-parser`) generalized to full leaf validation.

use crate::error::{Result, SpiffeError};
use crate::spiffe_id::SpiffeId;
use x509_parser::extensions::{GeneralName, KeyUsage, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

/// A workload's X.509 identity: SPIFFE ID, private key, leaf certificate,
/// ordered intermediates, and an optional selection hint (spec §3).
#[derive(Clone)]
pub struct X509Svid {
    spiffe_id: SpiffeId,
    private_key_der: Vec<u8>,
    cert_chain: Vec<Vec<u8>>,
    hint: Option<String>,
    federates_with: Vec<crate::spiffe_id::TrustDomain>,
}

impl X509Svid {
    /// Parse an X.509-SVID from a leaf certificate DER (first element of
    /// `cert_chain_der`), its ordered intermediates, and a PKCS#8 DER
    /// private key.
    ///
    /// Cryptographic key/leaf matching is left to the TLS library at
    /// handshake time, the same division of labor the teacher's
    /// `build_client_config`/`build_server_config` rely on when handing
    /// `cert_chain` + `private_key` straight to `rustls`.
    pub fn parse_from_der(cert_chain_der: &[Vec<u8>], private_key_der: &[u8]) -> Result<Self> {
        let leaf_der = cert_chain_der
            .first()
            .ok_or_else(|| SpiffeError::MalformedCertMaterial("empty certificate chain".into()))?;
        let (_, leaf) = X509Certificate::from_der(leaf_der)
            .map_err(|e| SpiffeError::MalformedCertMaterial(e.to_string()))?;

        if leaf.is_ca() {
            return Err(SpiffeError::InvalidLeafConstraints(
                "leaf certificate must not be a CA",
            ));
        }
        match key_usage(&leaf)? {
            Some(ku) if ku.digital_signature() => {}
            _ => {
                return Err(SpiffeError::InvalidLeafConstraints(
                    "leaf certificate must permit digital signature",
                ));
            }
        }

        let spiffe_id = extract_spiffe_id(&leaf)?;

        Ok(Self {
            spiffe_id,
            private_key_der: private_key_der.to_vec(),
            cert_chain: cert_chain_der.to_vec(),
            hint: None,
            federates_with: Vec::new(),
        })
    }

    /// Attach a preference hint used by [`crate::source::X509Source`]'s
    /// `default_svid_name`-based selection rule (spec §4.F).
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach the set of trust domains this SVID's bundle set additionally
    /// federates with; informational only (spec §3 supplementary field,
    /// never consulted by the verifier).
    #[must_use]
    pub fn with_federates_with(mut self, domains: Vec<crate::spiffe_id::TrustDomain>) -> Self {
        self.federates_with = domains;
        self
    }

    /// The SPIFFE ID extracted from the leaf certificate's SAN.
    #[must_use]
    pub const fn spiffe_id(&self) -> &SpiffeId {
        &self.spiffe_id
    }

    /// The preference hint, if one was attached.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Trust domains this SVID's bundle set additionally federates with.
    #[must_use]
    pub fn federates_with(&self) -> &[crate::spiffe_id::TrustDomain] {
        &self.federates_with
    }

    /// The full DER-encoded certificate chain, leaf first.
    #[must_use]
    pub fn cert_chain(&self) -> &[Vec<u8>] {
        &self.cert_chain
    }

    /// The leaf certificate, DER-encoded.
    #[must_use]
    pub fn leaf(&self) -> &[u8] {
        &self.cert_chain[0]
    }

    /// The private key, DER-encoded (PKCS#8).
    #[must_use]
    pub fn private_key_der(&self) -> &[u8] {
        &self.private_key_der
    }
}

fn key_usage<'a>(cert: &'a X509Certificate<'a>) -> Result<Option<&'a KeyUsage>> {
    for ext in cert.extensions() {
        if let ParsedExtension::KeyUsage(ku) = ext.parsed_extension() {
            return Ok(Some(ku));
        }
    }
    Ok(None)
}

/// Walk a leaf certificate's SAN extension and extract exactly one URI SAN
/// as a [`SpiffeId`] (spec §4.C step (a)/(c)).
pub(crate) fn extract_spiffe_id(cert: &X509Certificate<'_>) -> Result<SpiffeId> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| SpiffeError::MalformedCertMaterial(e.to_string()))?
        .ok_or(SpiffeError::SanCountMismatch)?;

    let mut uri_sans = san.value.general_names.iter().filter_map(|gn| match gn {
        GeneralName::URI(uri) => Some(*uri),
        _ => None,
    });

    let uri = uri_sans.next().ok_or(SpiffeError::SanCountMismatch)?;
    if uri_sans.next().is_some() {
        return Err(SpiffeError::SanCountMismatch);
    }

    SpiffeId::parse(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(spiffe_id: &str, ca: bool) -> (Vec<u8>, Vec<u8>) {
        let mut params = rcgen::CertificateParams::default();
        params
            .subject_alt_names
            .push(rcgen::SanType::URI(rcgen::Ia5String::try_from(spiffe_id).unwrap()));
        params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
        if ca {
            params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        }
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.der().to_vec(), key_pair.serialize_der())
    }

    #[test]
    fn parses_valid_leaf() {
        let (der, key) = generate("spiffe://example.org/workload", false);
        let svid = X509Svid::parse_from_der(&[der], &key).unwrap();
        assert_eq!(svid.spiffe_id().to_string(), "spiffe://example.org/workload");
    }

    #[test]
    fn rejects_ca_certificate() {
        let (der, key) = generate("spiffe://example.org/workload", true);
        assert!(X509Svid::parse_from_der(&[der], &key).is_err());
    }

    #[test]
    fn rejects_empty_chain() {
        assert!(X509Svid::parse_from_der(&[], &[]).is_err());
    }

    #[test]
    fn rejects_leaf_with_no_key_usage_extension() {
        let mut params = rcgen::CertificateParams::default();
        params
            .subject_alt_names
            .push(rcgen::SanType::URI(rcgen::Ia5String::try_from("spiffe://example.org/workload").unwrap()));
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        let err = X509Svid::parse_from_der(&[cert.der().to_vec()], &key_pair.serialize_der()).unwrap_err();
        assert!(matches!(err, SpiffeError::InvalidLeafConstraints(_)));
    }

    #[test]
    fn hint_round_trips() {
        let (der, key) = generate("spiffe://example.org/workload", false);
        let svid = X509Svid::parse_from_der(&[der], &key)
            .unwrap()
            .with_hint("primary");
        assert_eq!(svid.hint(), Some("primary"));
    }
}
