// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Cached view over the X.509 context stream (spec §4.F).

use super::CachedView;
use crate::error::{Result, SpiffeError};
use crate::spiffe_id::TrustDomain;
use crate::svid::X509Svid;
use crate::workload_api::{Subscription, X509Update};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Synchronous, always-current view of a workload's X.509 identity and
/// federated bundles, backed by a [`crate::workload_api::WorkloadApiClient`]
/// subscription.
pub struct X509Source {
    view: Arc<CachedView<X509Update>>,
    default_svid_name: Option<String>,
    _driver: tokio::task::JoinHandle<()>,
}

impl X509Source {
    /// Start caching `subscription`'s updates. `default_svid_name`, if set,
    /// selects the SVID whose hint matches it instead of the snapshot's
    /// first SVID (spec §4.F selection rule).
    #[must_use]
    pub fn new(
        subscription: Subscription<X509Update>,
        default_svid_name: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        let view = CachedView::new(cancel);
        let driver = view.spawn_driver(subscription);
        Self {
            view,
            default_svid_name,
            _driver: driver,
        }
    }

    /// Block until the first snapshot is cached or the source's context is
    /// cancelled.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.view.wait_until_ready().await
    }

    /// The default SVID: the hint-matching one if `default_svid_name` was
    /// set, else the snapshot's first SVID.
    pub fn get_x509_svid(&self) -> Result<X509Svid> {
        let update = self.view.current()?;
        match &self.default_svid_name {
            Some(name) => update
                .svids
                .iter()
                .find(|svid| svid.hint() == Some(name.as_str()))
                .cloned()
                .ok_or(SpiffeError::SourceUnavailable("no SVID matches default_svid_name")),
            None => update
                .default_svid()
                .cloned()
                .ok_or(SpiffeError::SourceUnavailable("no SVID in snapshot")),
        }
    }

    /// The X.509 bundle for `trust_domain`, from the snapshot's bundle set.
    pub fn get_x509_bundle_for_trust_domain(&self, trust_domain: &TrustDomain) -> Result<Arc<crate::bundle::Bundle>> {
        let update = self.view.current()?;
        update
            .bundles
            .get_bundle(trust_domain)
            .ok_or_else(|| SpiffeError::NoX509Bundle(trust_domain.to_string()))
    }

    /// Register a listener invoked on the source's own notification task
    /// (never the stream reader) for every subsequent update.
    pub fn on_update(&self, listener: impl Fn(&X509Update) + Send + Sync + 'static) {
        self.view.on_update(listener);
    }

    /// Revoke the subscription and stop the notification task.
    pub fn close(&self) {
        self.view.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleSet;
    use crate::workload_api::{JwtBundleUpdateStream, WorkloadApiClient, WorkloadApiTransport, X509UpdateStream};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_stream::wrappers::ReceiverStream;

    struct FakeTransport {
        events: Mutex<Vec<Result<X509Update>>>,
    }

    #[async_trait]
    impl WorkloadApiTransport for FakeTransport {
        async fn stream_x509_contexts(&self) -> Result<X509UpdateStream> {
            let events = std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()));
            let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));
            tokio::spawn(async move {
                for event in events {
                    let _ = tx.send(event).await;
                }
            });
            Ok(Box::pin(ReceiverStream::new(rx)))
        }

        async fn stream_jwt_bundles(&self) -> Result<JwtBundleUpdateStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
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

    fn leaf(spiffe_id: &str, hint: Option<&str>) -> X509Svid {
        let mut params = rcgen::CertificateParams::default();
        params
            .subject_alt_names
            .push(rcgen::SanType::URI(rcgen::Ia5String::try_from(spiffe_id).unwrap()));
        params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        let svid = X509Svid::parse_from_der(&[cert.der().to_vec()], &key_pair.serialize_der()).unwrap();
        match hint {
            Some(h) => svid.with_hint(h),
            None => svid,
        }
    }

    #[tokio::test]
    async fn returns_unavailable_before_first_snapshot() {
        let transport = Arc::new(FakeTransport {
            events: Mutex::new(vec![]),
        });
        let client = WorkloadApiClient::start(transport);
        let source = X509Source::new(client.subscribe_x509(), None, client.cancellation_token());
        assert!(matches!(
            source.get_x509_svid(),
            Err(SpiffeError::SourceUnavailable(_))
        ));
        client.close();
    }

    #[tokio::test]
    async fn selects_first_svid_by_default() {
        let update = X509Update {
            svids: vec![
                leaf("spiffe://example.org/primary", None),
                leaf("spiffe://example.org/secondary", None),
            ],
            bundles: Arc::new(BundleSet::new()),
        };
        let transport = Arc::new(FakeTransport {
            events: Mutex::new(vec![Ok(update)]),
        });
        let client = WorkloadApiClient::start(transport);
        let source = X509Source::new(client.subscribe_x509(), None, client.cancellation_token());
        source.wait_until_ready().await.unwrap();

        let svid = source.get_x509_svid().unwrap();
        assert_eq!(svid.spiffe_id().to_string(), "spiffe://example.org/primary");
        client.close();
    }

    #[tokio::test]
    async fn selects_svid_by_hint_when_configured() {
        let update = X509Update {
            svids: vec![
                leaf("spiffe://example.org/primary", Some("primary")),
                leaf("spiffe://example.org/secondary", Some("secondary")),
            ],
            bundles: Arc::new(BundleSet::new()),
        };
        let transport = Arc::new(FakeTransport {
            events: Mutex::new(vec![Ok(update)]),
        });
        let client = WorkloadApiClient::start(transport);
        let source = X509Source::new(
            client.subscribe_x509(),
            Some("secondary".to_string()),
            client.cancellation_token(),
        );
        source.wait_until_ready().await.unwrap();

        let svid = source.get_x509_svid().unwrap();
        assert_eq!(svid.spiffe_id().to_string(), "spiffe://example.org/secondary");
        client.close();
    }

    #[tokio::test]
    async fn close_makes_subsequent_calls_unavailable() {
        let update = X509Update {
            svids: vec![leaf("spiffe://example.org/primary", None)],
            bundles: Arc::new(BundleSet::new()),
        };
        let transport = Arc::new(FakeTransport {
            events: Mutex::new(vec![Ok(update)]),
        });
        let client = WorkloadApiClient::start(transport);
        let source = X509Source::new(client.subscribe_x509(), None, client.cancellation_token());
        source.wait_until_ready().await.unwrap();
        source.close();
        assert!(matches!(
            source.get_x509_svid(),
            Err(SpiffeError::SourceUnavailable(_))
        ));
        client.close();
    }
}
