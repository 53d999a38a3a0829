//! Bounded wait for a peer's out-of-band connection.
//!
//! [`connect_oob`] races the connector against a caller timeout and a
//! [`CancelHandle`]. Whichever way the attempt ends without a channel, the
//! connector's `disconnect` runs exactly once and the caller gets an error,
//! never a late channel.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Result, TetherTrustError};
use crate::oob::verifier::OobChannel;

/// Opens the side channel.
pub trait OobConnector: Send + Sync {
    type Channel: OobChannel;

    /// Wait for the peer to connect.
    fn connect(&self) -> impl Future<Output = Result<Self::Channel>> + Send;

    /// Tear down any partially established connection.
    fn disconnect(&self);
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation token for an in-flight OOB attempt.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel. Safe to call any number of times from any thread.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs `disconnect` at most once.
struct Teardown<'a, C: OobConnector> {
    connector: &'a C,
    done: AtomicBool,
}

impl<'a, C: OobConnector> Teardown<'a, C> {
    fn new(connector: &'a C) -> Self {
        Self {
            connector,
            done: AtomicBool::new(false),
        }
    }

    fn run(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            self.connector.disconnect();
        }
    }
}

/// Await a peer OOB connection for at most `timeout`.
pub async fn connect_oob<C: OobConnector>(
    connector: &C,
    timeout: Duration,
    cancel: &CancelHandle,
) -> Result<C::Channel> {
    let teardown = Teardown::new(connector);
    if cancel.is_cancelled() {
        teardown.run();
        return Err(TetherTrustError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!("oob connect cancelled");
            teardown.run();
            Err(TetherTrustError::Cancelled)
        }
        outcome = tokio::time::timeout(timeout, connector.connect()) => match outcome {
            Ok(Ok(channel)) if !cancel.is_cancelled() => {
                tracing::debug!("oob channel connected");
                Ok(channel)
            }
            Ok(Ok(_)) => {
                teardown.run();
                Err(TetherTrustError::Cancelled)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "oob connect failed");
                teardown.run();
                Err(e)
            }
            Err(_) => {
                tracing::warn!(?timeout, "oob connect timed out");
                teardown.run();
                Err(TetherTrustError::Timeout(timeout))
            }
        }
    }
}
