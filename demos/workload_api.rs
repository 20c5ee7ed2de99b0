// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Subscribes to X.509 context updates and prints each SVID rotation as it
//! arrives, backed by a fake transport that emits two successive updates.
//! Run with `cargo run --example workload_api`.

use async_trait::async_trait;
use spiffe_rustls::bundle::BundleSet;
use spiffe_rustls::source::X509Source;
use spiffe_rustls::spiffe_id::SpiffeId;
use spiffe_rustls::svid::{JwtSvid, X509Svid};
use spiffe_rustls::workload_api::{
    JwtBundleUpdateStream, WorkloadApiClient, WorkloadApiTransport, X509Update, X509UpdateStream,
};
use spiffe_rustls::{Result, SpiffeError};
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

struct RotatingTransport {
    updates: Mutex<Vec<X509Update>>,
}

#[async_trait]
impl WorkloadApiTransport for RotatingTransport {
    async fn stream_x509_contexts(&self) -> Result<X509UpdateStream> {
        let updates = std::mem::take(&mut *self.updates.lock().unwrap_or_else(|e| e.into_inner()));
        let (tx, rx) = tokio::sync::mpsc::channel(updates.len().max(1));
        tokio::spawn(async move {
            for update in updates {
                let _ = tx.send(Ok(update)).await;
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn stream_jwt_bundles(&self) -> Result<JwtBundleUpdateStream> {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn fetch_jwt_svid(&self, _audiences: &[&str], _subject: Option<&SpiffeId>) -> Result<JwtSvid> {
        Err(SpiffeError::SourceUnavailable("demo transport has no JWT-SVIDs"))
    }
}

fn self_signed(spiffe_id: &str) -> X509Svid {
    let mut params = rcgen::CertificateParams::default();
    params
        .subject_alt_names
        .push(rcgen::SanType::URI(rcgen::Ia5String::try_from(spiffe_id).unwrap()));
    params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    X509Svid::parse_from_der(&[cert.der().to_vec()], &key_pair.serialize_der()).unwrap()
}

#[tokio::main]
async fn main() {
    let updates = vec![
        X509Update {
            svids: vec![self_signed("spiffe://example.org/worker-1")],
            bundles: Arc::new(BundleSet::new()),
        },
        X509Update {
            svids: vec![self_signed("spiffe://example.org/worker-1-rotated")],
            bundles: Arc::new(BundleSet::new()),
        },
    ];

    let client = WorkloadApiClient::start(Arc::new(RotatingTransport {
        updates: Mutex::new(updates),
    }));
    let source = X509Source::new(client.subscribe_x509(), None, client.cancellation_token());

    source.on_update(|update| {
        if let Some(svid) = update.default_svid() {
            println!("rotated to {}", svid.spiffe_id());
        }
    });

    source.wait_until_ready().await.unwrap();
    println!("initial: {}", source.get_x509_svid().unwrap().spiffe_id());

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    println!("latest: {}", source.get_x509_svid().unwrap().spiffe_id());

    client.close();
}
