//! Shutdown coordination for the API server and the log worker.
//!
//! A [`ShutdownSignal`] is cloned into every component that must stop on
//! SIGTERM / Ctrl+C. Unlike a plain broadcast, the flag is sticky: a
//! component that starts waiting after the signal fired still sees it.
//!
//! # Example
//!
//! ```rust,ignore
//! use mathlog::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move { shutdown.listen_for_signals().await }
//! });
//!
//! worker.run(&shutdown).await?;
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// A sticky, cloneable shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Wait for SIGTERM or Ctrl+C, then trigger shutdown.
    pub async fn listen_for_signals(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down");
            }
        }

        self.trigger();
    }

    /// Trigger shutdown programmatically.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been triggered.
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns on trigger.
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
