// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! The Workload API client state machine (spec §4.E): one long-lived
//! stream per resource kind, automatic reconnect with full-jitter
//! exponential backoff, and single-slot conflated fan-out to subscribers.
//!
//! Fan-out is built directly on [`tokio::sync::watch`]: a lagged receiver
//! only ever observes the latest value on its next poll, which is exactly
//! the "drop-oldest with a single-slot conflator" discipline spec §4.E
//! requires — no hand-rolled queue needed (spec §9 Design Note).

use crate::bundle::BundleSet;
use crate::error::{Result, SpiffeError};
use crate::workload_api::transport::{WorkloadApiTransport, X509Update};
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "tracing")]
use tracing::{debug, warn};

/// A single delivered update, tagged with a strictly-monotonic per-stream
/// sequence number (spec §4.E, §5 "Ordering").
#[derive(Clone)]
pub struct Snapshot<T> {
    /// Strictly increases with every delivered update on this stream.
    pub seq: u64,
    /// The delivered value.
    pub value: T,
}

const INITIAL_BACKOFF_SECS: u64 = 1;
const MAX_BACKOFF_SECS: u64 = 30;

struct Backoff {
    attempt: u32,
}

impl Backoff {
    const fn new() -> Self {
        Self { attempt: 0 }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Full-jitter exponential backoff: `random(0, min(cap, base * 2^n))`.
    fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(40);
        let capped = INITIAL_BACKOFF_SECS
            .saturating_mul(1u64 << exponent)
            .min(MAX_BACKOFF_SECS);
        self.attempt = self.attempt.saturating_add(1);
        let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
        Duration::from_secs(jittered)
    }
}

/// A subscription to one conflated stream. Every subsequent call to
/// [`Self::recv`] resolves as soon as a newer snapshot arrives; if several
/// arrived while this subscriber was busy, only the latest is delivered.
pub struct Subscription<T> {
    rx: watch::Receiver<Option<Snapshot<T>>>,
}

impl<T: Clone> Subscription<T> {
    /// The current snapshot, if one has been cached yet.
    pub fn current(&self) -> Option<Snapshot<T>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot after the one this subscriber last saw.
    /// Cancellation-safe: drop the future to stop waiting.
    pub async fn recv(&mut self) -> Result<Snapshot<T>> {
        self.rx
            .changed()
            .await
            .map_err(|_| SpiffeError::SourceUnavailable("stream closed"))?;
        self.rx
            .borrow()
            .clone()
            .ok_or(SpiffeError::SourceUnavailable("no snapshot cached yet"))
    }

    /// Block until a snapshot is cached or `cancel` fires (spec §4.E
    /// "Initialization semantics").
    pub async fn wait_until_ready(&mut self, cancel: &CancellationToken) -> Result<Snapshot<T>> {
        if let Some(snap) = self.current() {
            return Ok(snap);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(SpiffeError::Cancelled),
            res = self.rx.changed() => {
                res.map_err(|_| SpiffeError::SourceUnavailable("stream closed"))?;
                self.current().ok_or(SpiffeError::SourceUnavailable("no snapshot cached yet"))
            }
        }
    }
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

struct StreamHandle<T> {
    tx: watch::Sender<Option<Snapshot<T>>>,
}

impl<T: Clone + Send + Sync + 'static> StreamHandle<T> {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }
}

/// Drive the Idle→Dialing→Streaming→Backoff→Dialing… state machine for one
/// resource kind until `cancel` fires.
async fn run_stream_loop<T, F, Fut, S>(
    mut open_stream: F,
    tx: watch::Sender<Option<Snapshot<T>>>,
    cancel: CancellationToken,
) where
    T: Clone + Send + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    S: tokio_stream::Stream<Item = Result<T>> + Send + Unpin,
{
    let seq = AtomicU64::new(0);
    let mut backoff = Backoff::new();

    'reconnect: loop {
        if cancel.is_cancelled() {
            break;
        }

        let stream_result = tokio::select! {
            () = cancel.cancelled() => break 'reconnect,
            r = open_stream() => r,
        };

        let mut stream = match stream_result {
            Ok(s) => {
                backoff.reset();
                s
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                warn!("workload API dial failed, backing off");
                let delay = backoff.next_delay();
                tokio::select! {
                    () = cancel.cancelled() => break 'reconnect,
                    () = tokio::time::sleep(delay) => {}
                }
                continue 'reconnect;
            }
        };

        loop {
            let item = tokio::select! {
                () = cancel.cancelled() => break 'reconnect,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(value)) => {
                    let seq_no = seq.fetch_add(1, Ordering::SeqCst) + 1;
                    let _ = tx.send(Some(Snapshot { seq: seq_no, value }));
                    backoff.reset();
                }
                // A clean EOF is treated as an error for resilience (spec
                // §4.E): either way we fall through to backoff.
                Some(Err(_)) | None => break,
            }
        }

        #[cfg(feature = "tracing")]
        debug!("workload API stream ended, reconnecting after backoff");
        let delay = backoff.next_delay();
        tokio::select! {
            () = cancel.cancelled() => break 'reconnect,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// The long-lived Workload API consumer (spec §4.E). Owns one background
/// task per resource kind; [`Self::close`] tears both down.
pub struct WorkloadApiClient {
    x509: Arc<StreamHandle<X509Update>>,
    jwt_bundles: Arc<StreamHandle<Arc<BundleSet>>>,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkloadApiClient {
    /// Start streaming both resource kinds from `transport`.
    #[must_use]
    pub fn start(transport: Arc<dyn WorkloadApiTransport>) -> Self {
        let cancel = CancellationToken::new();
        let x509 = Arc::new(StreamHandle::<X509Update>::new());
        let jwt_bundles = Arc::new(StreamHandle::<Arc<BundleSet>>::new());

        let x509_tx = x509.tx.clone();
        let x509_cancel = cancel.clone();
        let x509_transport = transport.clone();
        let x509_task = tokio::spawn(async move {
            run_stream_loop(
                move || {
                    let transport = x509_transport.clone();
                    async move { transport.stream_x509_contexts().await }
                },
                x509_tx,
                x509_cancel,
            )
            .await;
        });

        let jwt_tx = jwt_bundles.tx.clone();
        let jwt_cancel = cancel.clone();
        let jwt_transport = transport;
        let jwt_task = tokio::spawn(async move {
            run_stream_loop(
                move || {
                    let transport = jwt_transport.clone();
                    async move { transport.stream_jwt_bundles().await }
                },
                jwt_tx,
                jwt_cancel,
            )
            .await;
        });

        Self {
            x509,
            jwt_bundles,
            cancel,
            tasks: vec![x509_task, jwt_task],
        }
    }

    /// Subscribe to the X.509 context stream.
    #[must_use]
    pub fn subscribe_x509(&self) -> Subscription<X509Update> {
        self.x509.subscribe()
    }

    /// Subscribe to the JWT bundle set stream.
    #[must_use]
    pub fn subscribe_jwt_bundles(&self) -> Subscription<Arc<BundleSet>> {
        self.jwt_bundles.subscribe()
    }

    /// Cancel both streams (spec §4.E "cancel (any→Closed)").
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// A child token that is cancelled whenever this client is closed, for
    /// propagating cancellation to sources built on top of it (spec §5
    /// "hierarchical context").
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

impl Drop for WorkloadApiClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload_api::transport::{JwtBundleUpdateStream, X509UpdateStream};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_stream::wrappers::ReceiverStream;

    struct FakeTransport {
        x509_events: Mutex<Vec<Result<X509Update>>>,
        fail_dial: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl WorkloadApiTransport for FakeTransport {
        async fn stream_x509_contexts(&self) -> Result<X509UpdateStream> {
            if self.fail_dial.load(Ordering::SeqCst) {
                return Err(SpiffeError::DialFailed("boom".into()));
            }
            let events = std::mem::take(&mut *self.x509_events.lock().unwrap_or_else(|e| e.into_inner()));
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

    fn sample_update() -> X509Update {
        X509Update {
            svids: vec![],
            bundles: Arc::new(BundleSet::new()),
        }
    }

    #[tokio::test]
    async fn delivers_snapshots_to_subscribers() {
        let transport = Arc::new(FakeTransport {
            x509_events: Mutex::new(vec![Ok(sample_update()), Ok(sample_update())]),
            fail_dial: std::sync::atomic::AtomicBool::new(false),
        });
        let client = WorkloadApiClient::start(transport);
        let mut sub = client.subscribe_x509();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.seq, 1);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.seq, 2);

        client.close();
    }

    #[tokio::test]
    async fn wait_until_ready_returns_cancelled_when_agent_never_responds() {
        let transport = Arc::new(FakeTransport {
            x509_events: Mutex::new(vec![]),
            fail_dial: std::sync::atomic::AtomicBool::new(true),
        });
        let client = WorkloadApiClient::start(transport);
        let mut sub = client.subscribe_x509();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        let result = sub.wait_until_ready(&cancel).await;
        assert!(matches!(result, Err(SpiffeError::Cancelled)));
        client.close();
    }

    #[tokio::test]
    async fn subscribers_never_see_decreasing_sequence_numbers() {
        let transport = Arc::new(FakeTransport {
            x509_events: Mutex::new(
                (0..5).map(|_| Ok(sample_update())).collect(),
            ),
            fail_dial: std::sync::atomic::AtomicBool::new(false),
        });
        let client = WorkloadApiClient::start(transport);
        let mut sub = client.subscribe_x509();

        let mut last_seq = 0;
        for _ in 0..5 {
            let snap = sub.recv().await.unwrap();
            assert!(snap.seq > last_seq);
            last_seq = snap.seq;
        }
        client.close();
    }
}
