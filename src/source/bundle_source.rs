// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Cached view over the federated bundle set stream (spec §4.F).

use super::CachedView;
use crate::bundle::{Bundle, BundleSet};
use crate::error::{Result, SpiffeError};
use crate::spiffe_id::TrustDomain;
use crate::workload_api::Subscription;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Synchronous, always-current view of the bundle sets the Workload API
/// agent supplies for federated trust domains.
pub struct BundleSource {
    view: Arc<CachedView<Arc<BundleSet>>>,
    _driver: tokio::task::JoinHandle<()>,
}

impl BundleSource {
    /// Start driving `subscription` into a cached, always-current view.
    #[must_use]
    pub fn new(subscription: Subscription<Arc<BundleSet>>, cancel: CancellationToken) -> Self {
        let view = CachedView::new(cancel);
        let driver = view.spawn_driver(subscription);
        Self { view, _driver: driver }
    }

    /// Resolves once the first bundle set has arrived.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.view.wait_until_ready().await
    }

    /// The bundle for `trust_domain`.
    pub fn get_bundle_for_trust_domain(&self, trust_domain: &TrustDomain) -> Result<Arc<Bundle>> {
        let set = self.view.current()?;
        set.get_bundle(trust_domain)
            .ok_or_else(|| SpiffeError::NoX509Bundle(trust_domain.to_string()))
    }

    /// Register a listener invoked with every subsequent bundle set update.
    pub fn on_update(&self, listener: impl Fn(&Arc<BundleSet>) + Send + Sync + 'static) {
        self.view.on_update(listener);
    }

    /// Stop the background driver task.
    pub fn close(&self) {
        self.view.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spiffe_id::TrustDomain;
    use crate::workload_api::{JwtBundleUpdateStream, WorkloadApiClient, WorkloadApiTransport, X509UpdateStream};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_stream::wrappers::ReceiverStream;

    struct FakeTransport {
        events: Mutex<Vec<Result<Arc<BundleSet>>>>,
    }

    #[async_trait]
    impl WorkloadApiTransport for FakeTransport {
        async fn stream_x509_contexts(&self) -> Result<X509UpdateStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(Box::pin(ReceiverStream::new(rx)))
        }

        async fn stream_jwt_bundles(&self) -> Result<JwtBundleUpdateStream> {
            let events = std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()));
            let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
            tokio::spawn(async move {
                for event in events {
                    let _ = tx.send(event).await;
                }
            });
            Ok(Box::pin(ReceiverStream::new(rx)))
        }

        async fn fetch_jwt_svid(
            &self,
            _audiences: &[&str],
            _subject: Option<&crate::spiffe_id::SpiffeId>,
        ) -> Result<crate::svid::JwtSvid> {
            Err(SpiffeError::SourceUnavailable("not implemented in fake transport"))
        }
    }

    #[tokio::test]
    async fn serves_bundle_once_cached() {
        let td = TrustDomain::parse("example.org").unwrap();
        let set = BundleSet::new();
        set.set_bundle(Arc::new(Bundle::empty(td.clone())));
        let transport = Arc::new(FakeTransport {
            events: Mutex::new(vec![Ok(Arc::new(set))]),
        });
        let client = WorkloadApiClient::start(transport);
        let source = BundleSource::new(client.subscribe_jwt_bundles(), client.cancellation_token());
        source.wait_until_ready().await.unwrap();

        assert!(source.get_bundle_for_trust_domain(&td).is_ok());
        let other = TrustDomain::parse("other.org").unwrap();
        assert!(matches!(
            source.get_bundle_for_trust_domain(&other),
            Err(SpiffeError::NoX509Bundle(_))
        ));
        client.close();
    }
}
