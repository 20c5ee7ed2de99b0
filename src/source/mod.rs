// SPDX-License-Identifier: Apache-2.0 WITH LLVM-exception

//! Caching façades over the Workload API client (spec §4.F): the last
//! received X.509 context and bundle set, served synchronously from a
//! cache that a dedicated notification task keeps warm — never the stream
//! reader itself, per spec §4.F's `on_update` contract.

mod bundle_source;
mod jwt_source;
mod x509_source;

pub use bundle_source::BundleSource;
pub use jwt_source::JwtSource;
pub use x509_source::X509Source;

use crate::error::{Result, SpiffeError};
use crate::workload_api::Subscription;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared plumbing behind every Source: a cache kept warm by a background
/// task draining a [`Subscription`], a readiness signal for
/// `wait_until_ready`, and an `on_update` listener registry.
pub(crate) struct CachedView<T> {
    cache: RwLock<Option<T>>,
    listeners: Mutex<Vec<Box<dyn Fn(&T) + Send + Sync>>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl<T: Clone + Send + Sync + 'static> CachedView<T> {
    fn new(cancel: CancellationToken) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(false);
        Arc::new(Self {
            cache: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            ready_tx,
            ready_rx,
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    /// Drain `subscription` on a dedicated task: the stream reader that
    /// produced the snapshot never runs a listener itself (spec §4.F).
    fn spawn_driver(self: &Arc<Self>, mut subscription: Subscription<T>) -> tokio::task::JoinHandle<()> {
        let view = self.clone();
        tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    () = view.cancel.cancelled() => break,
                    res = subscription.recv() => match res {
                        Ok(s) => s,
                        Err(_) => break,
                    },
                };
                *view.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.value.clone());
                let _ = view.ready_tx.send(true);
                let listeners = view.listeners.lock().unwrap_or_else(|e| e.into_inner());
                for listener in listeners.iter() {
                    listener(&snapshot.value);
                }
            }
        })
    }

    fn current(&self) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpiffeError::SourceUnavailable("source is closed"));
        }
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(SpiffeError::SourceUnavailable("no snapshot cached yet"))
    }

    async fn wait_until_ready(&self) -> Result<()> {
        if *self.ready_rx.borrow() {
            return Ok(());
        }
        let mut rx = self.ready_rx.clone();
        tokio::select! {
            () = self.cancel.cancelled() => Err(SpiffeError::Cancelled),
            res = rx.changed() => {
                res.map_err(|_| SpiffeError::SourceUnavailable("stream closed"))?;
                Ok(())
            }
        }
    }

    fn on_update(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }
}
