//! Connectivity state and reconnect listener
//!
//! [`WatchNetworkState`] is an [`INetworkState`] backed by a
//! `tokio::sync::watch` channel: the platform integration calls
//! [`set_connected`](WatchNetworkState::set_connected) and the engine
//! subscribes to changes.
//!
//! [`NetworkListener`] runs until cancelled, invoking its callback on every
//! offline → online edge.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use syncq_core::ports::INetworkState;

// ============================================================================
// WatchNetworkState
// ============================================================================

/// Connectivity flag shared between the platform and the engine
#[derive(Debug)]
pub struct WatchNetworkState {
    tx: watch::Sender<bool>,
}

impl WatchNetworkState {
    pub fn new(connected: bool) -> Self {
        let (tx, _rx) = watch::channel(connected);
        Self { tx }
    }

    /// Publishes the current connectivity; repeated values are not re-sent
    pub fn set_connected(&self, connected: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
        if changed {
            info!(connected, "Network connectivity changed");
        }
    }

    /// Receiver of connectivity changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl INetworkState for WatchNetworkState {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }
}

// ============================================================================
// NetworkListener
// ============================================================================

/// Future run on reconnect
pub type ReconnectTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Background task reacting to connectivity changes
pub struct NetworkListener {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl NetworkListener {
    /// Spawns a listener calling `on_reconnect` on each offline → online edge
    pub fn spawn<F>(mut rx: watch::Receiver<bool>, on_reconnect: F) -> Self
    where
        F: Fn() -> ReconnectTask + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut was_connected = *rx.borrow_and_update();
            debug!(connected = was_connected, "Network listener started");
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            debug!("Connectivity channel closed");
                            break;
                        }
                        let connected = *rx.borrow_and_update();
                        if connected && !was_connected {
                            info!("Network reconnected, resuming");
                            on_reconnect().await;
                        }
                        was_connected = connected;
                    }
                }
            }
            debug!("Network listener stopped");
        });

        Self { token, handle }
    }

    /// Stops the listener and waits for it to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }

    /// Stops the listener without waiting
    pub fn cancel(&self) {
        self.token.cancel();
    }
}
