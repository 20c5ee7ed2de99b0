// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! JWT-SVID façade (spec §4.F). Unlike the other two Sources this wraps a
//! one-shot fetch rather than a cached stream: the Workload API client's
//! two resource kinds (spec §4.E) are X.509 context and bundle set, not
//! JWT-SVIDs, so there is nothing to conflate here.

use crate::error::{Result, SpiffeError};
use crate::spiffe_id::SpiffeId;
use crate::svid::JwtSvid;
use crate::workload_api::WorkloadApiTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Fetches JWT-SVIDs on demand from the Workload API agent.
pub struct JwtSource {
    transport: Arc<dyn WorkloadApiTransport>,
    closed: AtomicBool,
}

impl JwtSource {
    /// Wrap `transport` for on-demand JWT-SVID fetches.
    #[must_use]
    pub const fn new(transport: Arc<dyn WorkloadApiTransport>) -> Self {
        Self {
            transport,
            closed: AtomicBool::new(false),
        }
    }

    /// Fetch a JWT-SVID for `audience`, for `subject` if given, else the
    /// default identity.
    pub async fn get_jwt_svid(&self, audience: &[&str], subject: Option<&SpiffeId>) -> Result<JwtSvid> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpiffeError::SourceUnavailable("source is closed"));
        }
        self.transport.fetch_jwt_svid(audience, subject).await
    }

    /// Revoke further fetches.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
