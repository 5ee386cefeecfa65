//! OS signal wiring for graceful shutdown.

use super::ShutdownHandle;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wait for SIGINT (Ctrl-C) or SIGTERM. Returns the signal name.
#[cfg(unix)]
pub async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!(error = %e, "Cannot register SIGTERM handler, only Ctrl-C will stop the feed");
            None
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "Ctrl-C handler failed");
            }
            "SIGINT"
        }
        _ = async {
            match terminate.as_mut() {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        } => "SIGTERM",
    }
}

/// Wait for Ctrl-C. Returns the signal name.
#[cfg(not(unix))]
pub async fn wait_for_termination() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl-C handler failed");
    }
    "SIGINT"
}

/// Drive `work` unless `signal` resolves first. Returns `None` if it did.
///
/// Used around startup, which can spend a long time retrying the bus
/// connection before there is a feed to hand a [`ShutdownHandle`] to.
pub async fn unless_signalled<F, S>(work: F, signal: S) -> Option<F::Output>
where
    F: Future,
    S: Future<Output = &'static str>,
{
    tokio::select! {
        biased;
        signal = signal => {
            info!(signal, "Termination signal received during startup");
            None
        }
        output = work => Some(output),
    }
}

/// Spawn a task that triggers `handle` on the first termination signal.
pub fn spawn_signal_hook(handle: ShutdownHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_termination().await;
        info!(signal, "Termination signal received, stopping after the current cycle");
        handle.trigger();
    })
}
