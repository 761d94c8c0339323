//! Graceful shutdown coordinator.
//!
//! Listens for SIGINT (Ctrl+C), SIGTERM, and SIGHUP, then cancels a
//! [`tokio_util::sync::CancellationToken`] so the scheduler stops dispatching
//! and the validator stops after its current sweep. A second signal
//! force-exits.

use tokio_util::sync::CancellationToken;

/// Exit status used when a second signal forces the process down.
const FORCED_EXIT_CODE: i32 = 130;

/// Install signal handlers and return a token cancelled on the first signal.
///
/// Fails if the signal listeners cannot be registered.
pub(crate) fn install_signal_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::terminate())?,
            signal(SignalKind::hangup())?,
        )
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        let mut received = 0u32;
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                    _ = sighup.recv() => {}
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
                    return;
                }
            }

            received += 1;
            if received == 1 {
                tracing::info!("Received shutdown signal, letting running passes finish...");
                tracing::info!("Press Ctrl+C again to force exit");
                handler_token.cancel();
            } else {
                tracing::warn!("Force exit requested");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    });

    Ok(token)
}
