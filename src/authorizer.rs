// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Authorizer: the pure predicate applied after chain validation (spec §3,
//! §4.D). Modeled as the tagged variant spec §9's Design Note calls for
//! ("Authorizer as closure-valued predicate") since Rust closures can't be
//! named as a public API surface without type erasure; `Custom` carries the
//! erased closure for the escape hatch.

use crate::error::{Result, SpiffeError};
use crate::spiffe_id::{SpiffeId, TrustDomain};
use std::collections::HashSet;
use std::sync::Arc;

/// A single verified certificate chain, leaf first.
pub type Chain = Vec<Vec<u8>>;

/// The canonical authorizer forms from spec §3.
#[derive(Clone)]
pub enum Authorizer {
    /// Accepts any verified identity.
    Any,
    /// Accepts exactly one expected SPIFFE ID.
    Id(SpiffeId),
    /// Accepts any identity belonging to the given trust domain.
    MemberOf(TrustDomain),
    /// Accepts any identity in the given set.
    OneOf(HashSet<SpiffeId>),
    /// Delegates to a caller-supplied predicate. Must be deterministic and
    /// free of I/O (spec §3).
    Custom(Arc<dyn Fn(&SpiffeId, &[Chain]) -> Result<()> + Send + Sync>),
}

impl Authorizer {
    /// Build a [`Self::OneOf`] from an iterator of accepted IDs.
    #[must_use]
    pub fn one_of(ids: impl IntoIterator<Item = SpiffeId>) -> Self {
        Self::OneOf(ids.into_iter().collect())
    }

    /// Build a [`Self::Custom`] from a predicate closure.
    pub fn matches(
        predicate: impl Fn(&SpiffeId, &[Chain]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom(Arc::new(predicate))
    }

    /// Apply the predicate. Its error (if any) becomes the verification
    /// error (spec §4.D step 5).
    pub fn authorize(&self, id: &SpiffeId, chains: &[Chain]) -> Result<()> {
        match self {
            Self::Any => Ok(()),
            Self::Id(expected) => {
                if id == expected {
                    Ok(())
                } else {
                    Err(SpiffeError::UnexpectedTrustDomain(
                        id.trust_domain().to_string(),
                    ))
                }
            }
            Self::MemberOf(trust_domain) => {
                if id.is_member_of(trust_domain) {
                    Ok(())
                } else {
                    Err(SpiffeError::UnexpectedTrustDomain(
                        id.trust_domain().to_string(),
                    ))
                }
            }
            Self::OneOf(ids) => {
                if ids.contains(id) {
                    Ok(())
                } else {
                    Err(SpiffeError::UnexpectedTrustDomain(
                        id.trust_domain().to_string(),
                    ))
                }
            }
            Self::Custom(predicate) => predicate(id, chains),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SpiffeId {
        SpiffeId::parse(s).unwrap()
    }

    #[test]
    fn any_accepts_everything() {
        assert!(Authorizer::Any.authorize(&id("spiffe://a.org/x"), &[]).is_ok());
    }

    #[test]
    fn id_rejects_mismatch() {
        let auth = Authorizer::Id(id("spiffe://a.org/x"));
        assert!(auth.authorize(&id("spiffe://a.org/x"), &[]).is_ok());
        assert!(auth.authorize(&id("spiffe://a.org/y"), &[]).is_err());
    }

    #[test]
    fn member_of_checks_trust_domain() {
        let auth = Authorizer::MemberOf(TrustDomain::parse("a.org").unwrap());
        assert!(auth.authorize(&id("spiffe://a.org/x"), &[]).is_ok());
        let err = auth.authorize(&id("spiffe://b.org/x"), &[]).unwrap_err();
        assert!(err.to_string().contains("unexpected trust domain"));
    }

    #[test]
    fn one_of_checks_set_membership() {
        let auth = Authorizer::one_of([id("spiffe://a.org/x")]);
        assert!(auth.authorize(&id("spiffe://a.org/x"), &[]).is_ok());
        assert!(auth.authorize(&id("spiffe://a.org/y"), &[]).is_err());
    }

    #[test]
    fn custom_delegates() {
        let auth = Authorizer::matches(|id, _| {
            if id.path().starts_with("/admin") {
                Ok(())
            } else {
                Err(SpiffeError::AuthorizerRejected(
                    id.to_string(),
                    "not admin".into(),
                ))
            }
        });
        assert!(auth.authorize(&id("spiffe://a.org/admin/x"), &[]).is_ok());
        assert!(auth.authorize(&id("spiffe://a.org/user"), &[]).is_err());
    }
}
