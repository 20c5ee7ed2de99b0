// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! JWKS-shaped wire format for bundle documents (spec §4.B, §6).

use base64::Engine;
use serde::{Deserialize, Serialize};

/// One entry in a bundle document's `keys[]` array.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JwkEntry {
    /// Key type (`"RSA"`, `"EC"`, ...).
    pub kty: String,
    /// Intended use (`"x509-svid"` or `"jwt-svid"`).
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key identifier, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// DER-encoded certificate chain, base64-standard-encoded, present when
    /// `key_use == "x509-svid"`.
    #[serde(rename = "x5c", skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
    /// Remaining JWK fields (`n`, `e`, `crv`, `x`, `y`, ...) kept opaque —
    /// this crate does not perform JWT signature verification itself
    /// (spec §1 excludes that primitive from scope), it only needs to
    /// round-trip the key material faithfully.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A full bundle document: `keys[]` plus the optional SPIFFE extensions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BundleDocument {
    /// The document's JWK entries.
    pub keys: Vec<JwkEntry>,
    /// Advisory version counter; this crate exposes it but never requires
    /// it to strictly increase across reconnects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spiffe_sequence: Option<u64>,
    /// Seconds the publisher suggests between refetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spiffe_refresh_hint: Option<u64>,
}

impl BundleDocument {
    /// Decode one `x509-svid` entry's DER certificates.
    pub(crate) fn x509_authorities(&self) -> crate::error::Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        for entry in &self.keys {
            if entry.key_use != "x509-svid" {
                continue;
            }
            let Some(chain) = &entry.x5c else { continue };
            for cert_b64 in chain {
                let der = base64::engine::general_purpose::STANDARD
                    .decode(cert_b64)
                    .map_err(|e| {
                        crate::error::SpiffeError::MalformedCertMaterial(format!(
                            "invalid x5c base64: {e}"
                        ))
                    })?;
                out.push(der);
            }
        }
        Ok(out)
    }

    pub(crate) fn jwt_authorities(&self) -> Vec<(String, JwkEntry)> {
        self.keys
            .iter()
            .filter(|e| e.key_use == "jwt-svid")
            .filter_map(|e| e.kid.clone().map(|kid| (kid, e.clone())))
            .collect()
    }
}
