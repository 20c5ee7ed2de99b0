// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Stands up a loopback mTLS server and client using the `mTLS-server` /
//! `mTLS-client` presets, with SVIDs generated on the fly instead of a real
//! Workload API agent. Run with `cargo run --example basic_mtls`.

use async_trait::async_trait;
use spiffe_rustls::authorizer::Authorizer;
use spiffe_rustls::bundle::{Bundle, BundleSet, X509Authority};
use spiffe_rustls::source::X509Source;
use spiffe_rustls::spiffe_id::{SpiffeId, TrustDomain};
use spiffe_rustls::svid::{JwtSvid, X509Svid};
use spiffe_rustls::tls::{self, BundleLookup, ServerIdentity, Trace};
use spiffe_rustls::workload_api::{
    JwtBundleUpdateStream, WorkloadApiClient, WorkloadApiTransport, X509Update, X509UpdateStream,
};
use spiffe_rustls::{Result, SpiffeError};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_stream::wrappers::ReceiverStream;

struct StaticTransport(Mutex<Option<X509Update>>);

#[async_trait]
impl WorkloadApiTransport for StaticTransport {
    async fn stream_x509_contexts(&self) -> Result<X509UpdateStream> {
        let update = self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        if let Some(update) = update {
            tokio::spawn(async move {
                let _ = tx.send(Ok(update)).await;
            });
        }
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

fn self_signed_ca() -> (rcgen::Certificate, rcgen::KeyPair) {
    let mut params = rcgen::CertificateParams::default();
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.distinguished_name.push(rcgen::DnType::CommonName, "demo-ca");
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    (cert, key_pair)
}

fn leaf_svid(spiffe_id: &str, ca: &rcgen::Certificate, ca_key: &rcgen::KeyPair) -> X509Svid {
    let mut params = rcgen::CertificateParams::default();
    params
        .subject_alt_names
        .push(rcgen::SanType::URI(rcgen::Ia5String::try_from(spiffe_id).unwrap()));
    params.key_usages = vec![rcgen::KeyUsagePurpose::DigitalSignature];
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.signed_by(&key_pair, ca, ca_key).unwrap();
    X509Svid::parse_from_der(&[cert.der().to_vec()], &key_pair.serialize_der()).unwrap()
}

#[tokio::main]
async fn main() {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::aws_lc_rs::default_provider())
        .expect("install default crypto provider");

    let (ca, ca_key) = self_signed_ca();
    let trust_domain = TrustDomain::parse("example.org").unwrap();

    let bundle_set = Arc::new({
        let set = BundleSet::new();
        let bundle = Bundle::empty(trust_domain.clone());
        bundle.x509.add_authority(X509Authority::from_der(ca.der().to_vec()));
        set.set_bundle(Arc::new(bundle));
        set
    });

    let server_svid = leaf_svid("spiffe://example.org/server", &ca, &ca_key);
    let client_svid = leaf_svid("spiffe://example.org/client", &ca, &ca_key);

    let server_client = WorkloadApiClient::start(Arc::new(StaticTransport(Mutex::new(Some(X509Update {
        svids: vec![server_svid],
        bundles: bundle_set.clone(),
    })))));
    let client_client = WorkloadApiClient::start(Arc::new(StaticTransport(Mutex::new(Some(X509Update {
        svids: vec![client_svid],
        bundles: bundle_set.clone(),
    })))));

    let server_source = Arc::new(X509Source::new(
        server_client.subscribe_x509(),
        None,
        server_client.cancellation_token(),
    ));
    let client_source = Arc::new(X509Source::new(
        client_client.subscribe_x509(),
        None,
        client_client.cancellation_token(),
    ));
    server_source.wait_until_ready().await.unwrap();
    client_source.wait_until_ready().await.unwrap();

    let lookup = |set: Arc<BundleSet>| -> BundleLookup { Arc::new(move || Ok(set.clone())) };

    let server_config = Arc::new(
        tls::mtls_server(
            lookup(bundle_set.clone()),
            Authorizer::MemberOf(trust_domain),
            ServerIdentity::Spiffe(server_source),
            Arc::new(Trace::none()),
        )
        .unwrap(),
    );
    let client_config = Arc::new(
        tls::mtls_client(lookup(bundle_set), Authorizer::Any, client_source, Arc::new(Trace::none())).unwrap(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let acceptor = tokio_rustls::TlsAcceptor::from(server_config);
        let mut stream = acceptor.accept(stream).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        println!("server received: {}", String::from_utf8_lossy(&buf));
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let connector = tokio_rustls::TlsConnector::from(client_config);
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(server_name, stream).await.unwrap();
    stream.write_all(b"hello over mTLS").await.unwrap();
    stream.shutdown().await.unwrap();

    server.await.unwrap();
    server_client.close();
    client_client.close();
}
