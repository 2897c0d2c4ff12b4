// Unix signal handling for graceful shutdown
// Captures SIGTERM and SIGINT and turns them into a cancellation

use anyhow::Result;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Create a future that resolves when a shutdown signal is received
/// Listens for SIGTERM and SIGINT (Ctrl+C)
pub fn create_shutdown_listener() -> Result<impl std::future::Future<Output = ()>> {
    let signals = Signals::new([SIGTERM, SIGINT])?;

    Ok(async move {
        let mut signals = signals;

        while let Some(signal) = signals.next().await {
            match signal {
                SIGTERM => {
                    info!("Received SIGTERM - graceful shutdown initiated");
                    break;
                }
                SIGINT => {
                    info!("Received SIGINT (Ctrl+C) - graceful shutdown initiated");
                    break;
                }
                _ => {
                    debug!("Received unexpected signal: {}", signal);
                }
            }
        }
    })
}

/// Cancel `token` on the first shutdown signal.
/// The listener stops quietly if the token is cancelled some other way.
pub fn cancel_on_shutdown(token: CancellationToken) -> Result<JoinHandle<()>> {
    let listener = create_shutdown_listener()?;
    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = listener => {
                token.cancel();
                info!("Shutdown broadcast to the server and host");
            }
            _ = token.cancelled() => {
                debug!("Shutdown requested without a signal");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sigterm_cancels_token() {
        let token = CancellationToken::new();
        let handle = cancel_on_shutdown(token.clone()).unwrap();

        signal_hook::low_level::raise(SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_exits_on_external_cancel() {
        let token = CancellationToken::new();
        let handle = cancel_on_shutdown(token.clone()).unwrap();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
