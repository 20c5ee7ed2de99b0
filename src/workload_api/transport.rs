// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The dial/bidirectional-stream capability spec §1 assumes as an external
//! collaborator. Production wiring (a gRPC channel over the resolved
//! [`super::endpoint::Endpoint`]) is out of scope; this trait is the seam,
//! modeled in the style of `other_examples/4a3eaa4f_hiyosi-sandbox__rust-
//! spiffe-client-src-workload.rs`'s channel-holding `WorkloadApiClient`.

use crate::bundle::BundleSet;
use crate::error::Result;
use crate::spiffe_id::SpiffeId;
use crate::svid::{JwtSvid, X509Svid};
use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

/// A snapshot delivered from the agent: a bundle set plus an ordered list
/// of SVIDs (spec §3 "Update Event"). The first SVID is the default; order
/// also encodes hint-based preference.
#[derive(Clone)]
pub struct X509Update {
    /// SVIDs for this workload, most-preferred first.
    pub svids: Vec<X509Svid>,
    /// Trust bundles current as of this update.
    pub bundles: std::sync::Arc<BundleSet>,
}

impl X509Update {
    /// The most-preferred SVID, if any were delivered.
    #[must_use]
    pub fn default_svid(&self) -> Option<&X509Svid> {
        self.svids.first()
    }
}

/// A stream of X.509 context updates, as would be produced by a
/// `StreamX509SVIDs` RPC.
pub type X509UpdateStream = Pin<Box<dyn Stream<Item = Result<X509Update>> + Send>>;

/// A stream of JWT bundle set updates, as would be produced by a
/// `StreamJWTBundles` RPC.
pub type JwtBundleUpdateStream = Pin<Box<dyn Stream<Item = Result<std::sync::Arc<BundleSet>>> + Send>>;

/// The external dial/stream capability the Workload API client state
/// machine (spec §4.E) drives. A production implementation wires this to a
/// gRPC channel; out of scope per spec §1.
#[async_trait]
pub trait WorkloadApiTransport: Send + Sync {
    /// Dial the agent and open the X.509 context stream.
    async fn stream_x509_contexts(&self) -> Result<X509UpdateStream>;

    /// Dial the agent and open the JWT bundle set stream.
    async fn stream_jwt_bundles(&self) -> Result<JwtBundleUpdateStream>;

    /// Fetch a single JWT-SVID for `audiences`, optionally for a specific
    /// `subject` rather than the workload's default identity (spec §4.F
    /// `get_jwt_svid`). Unlike the two resource streams this is a one-shot
    /// RPC, not a subscription.
    async fn fetch_jwt_svid(&self, audiences: &[&str], subject: Option<&SpiffeId>) -> Result<JwtSvid>;
}
