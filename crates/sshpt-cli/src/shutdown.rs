use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler for SIGINT and SIGTERM.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The runner stops dispatching and lets in-flight sessions finish.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!("could not install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, finishing in-flight hosts");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, finishing in-flight hosts");
            }
        }

        token_clone.cancel();
    });

    token
}
