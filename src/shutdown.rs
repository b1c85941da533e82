//! Cancellation from the terminal or a service manager.

/// Installs SIGINT/SIGTERM handlers. On non-Unix platforms only Ctrl-C is
/// watched.
pub struct Shutdown {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl Shutdown {
    /// Must be called inside a Tokio runtime.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
                sigint: signal(SignalKind::interrupt())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Resolves on the first signal.
    pub async fn recv(mut self) {
        #[cfg(unix)]
        {
            tokio::select! {
                biased;
                _ = self.sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down gracefully");
                }
                _ = self.sigint.recv() => {
                    tracing::info!("Received SIGINT, shutting down gracefully");
                }
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Ctrl-C handler failed, running until killed");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl-C, shutting down gracefully");
        }
    }
}
