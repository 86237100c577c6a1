use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Install a shutdown handler for the broker server and the worker loop.
///
/// On Unix the returned token is cancelled on SIGTERM or SIGINT; elsewhere on
/// Ctrl-C. Signal registration errors are returned rather than swallowed.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    Ok(cancel_when(shutdown_signal()?))
}

/// A token cancelled once `signal` resolves.
fn cancel_when<F>(signal: F) -> CancellationToken
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        signal.await;
        child.cancel();
    });
    token
}

#[cfg(unix)]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send + 'static> {
    use tokio::signal::unix::{SignalKind, signal};

    // Registered up front so a failure surfaces before the server starts.
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send + 'static> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, initiating graceful shutdown"),
            Err(e) => {
                // Without a signal source, keep running until killed.
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    })
}
