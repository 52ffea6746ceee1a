//! Cooperative Shutdown
//!
//! Cloneable stop token polled by long-running loops, plus OS signal wiring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Why a stop was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested by code
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "interrupt"),
            ShutdownSignal::Terminate => write!(f, "terminate"),
            ShutdownSignal::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    notify: watch::Sender<bool>,
}

/// Explicit cancellation token shared between a run and its signal handlers
#[derive(Debug, Clone)]
pub struct StopToken {
    inner: Arc<Inner>,
}

impl StopToken {
    pub fn new() -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify,
            }),
        }
    }

    /// Request a stop; later calls are ignored
    pub fn cancel(&self) {
        self.cancel_with(ShutdownSignal::Manual);
    }

    pub fn cancel_with(&self, signal: ShutdownSignal) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            warn!("Stop already requested, ignoring duplicate signal: {}", signal);
            return;
        }
        info!("Stop requested: {}", signal);
        self.inner.notify.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.inner.notify.subscribe();
        if *rx.borrow() {
            return;
        }
        // The sender lives as long as any token clone, so this only ends on cancel
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM
pub fn install_signal_handlers(token: StopToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                ctrl_c_token.cancel_with(ShutdownSignal::Interrupt);
            }
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM");
                    token.cancel_with(ShutdownSignal::Terminate);
                }
                Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
            }
        });
    }
}
