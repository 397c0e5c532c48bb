//! One-shot bridge from a shutdown trigger to [`Node::stop`].
//!
//! The binary's trigger is SIGINT/SIGTERM ([`shutdown_signal`]); any other
//! future resolving to a reason works the same way.

use std::future::Future;
use std::sync::Weak;

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::node::Node;

/// Resolves on the first SIGINT or SIGTERM. A handler that cannot be
/// installed never resolves.
pub(crate) async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(err) => {
                error!("failed to install Ctrl+C handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Spawn the watcher for a started node.
///
/// The watcher holds the node weakly and exits without acting when the
/// node's token is cancelled, so a caller-driven stop retires it and drops
/// `trigger`.
pub(crate) fn spawn_watcher<F>(node: Weak<Node>, trigger: F) -> JoinHandle<()>
where
    F: Future<Output = &'static str> + Send + 'static,
{
    let Some(token) = node.upgrade().map(|node| node.cancellation_token()) else {
        return tokio::spawn(async {});
    };
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("[signals] Node cancelled, watcher exiting");
            }
            reason = trigger => {
                let Some(node) = node.upgrade() else {
                    debug!(reason, "[signals] Node already dropped");
                    return;
                };
                info!(reason, "Got interrupt, shutting down...");
                if let Err(e) = node.stop().await {
                    error!(error = %e, "[signals] Shutdown finished with errors");
                }
            }
        }
    })
}
