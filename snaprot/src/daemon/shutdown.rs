//! Interrupt handling for SIGINT, SIGTERM and SIGHUP.
//!
//! A signal does not kill the run outright. It cancels a token that the orchestrator
//! checks between machines, so the run winds down through its normal exit path and
//! the backup volume is remounted read-only before the process exits.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl ShutdownCoordinator {
    /// Register the signal handlers. Signals arriving from here on are not lost,
    /// even before [`wait_for_signal`](Self::wait_for_signal) is polled.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            token: CancellationToken::new(),
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Token handed to the orchestrator
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the first signal, then cancel the token.
    pub async fn wait_for_signal(&mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {
                warn!("Received SIGINT (Ctrl+C), stopping after the current machine...");
            }
            _ = self.terminate.recv() => {
                warn!("Received SIGTERM, stopping after the current machine...");
            }
            _ = self.hangup.recv() => {
                warn!("Received SIGHUP, stopping after the current machine...");
            }
        }

        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, Signal as NixSignal};
    use std::time::Duration;

    async fn cancels_on(sig: NixSignal) {
        let mut coordinator = ShutdownCoordinator::install().unwrap();
        let token = coordinator.token();
        assert!(!token.is_cancelled());

        // Raised before anyone waits: the registered handler keeps it
        raise(sig).unwrap();

        tokio::time::timeout(Duration::from_secs(5), coordinator.wait_for_signal())
            .await
            .expect("signal was not delivered");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_sigterm_cancels_token() {
        cancels_on(NixSignal::SIGTERM).await;
    }

    #[tokio::test]
    async fn test_sighup_cancels_token() {
        cancels_on(NixSignal::SIGHUP).await;
    }
}
