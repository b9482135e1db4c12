//! Waits for a signal which requests the node to shut down.
//!
//! Used to gracefully stop the [HttpPool](crate::http::HttpPool) once either **CTRL+C** or
//! **SIGHUP** is received.
use tokio::signal::unix::SignalKind;

/// Completes once either **CTRL+C** or **SIGHUP** has been received.
///
/// If no handler for **SIGHUP** can be installed, only **CTRL+C** is observed.
pub async fn shutdown_requested() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sig_hup = match tokio::signal::unix::signal(SignalKind::hangup()) {
        Ok(signal) => signal,
        Err(error) => {
            log::warn!("Cannot install a handler for SIGHUP: {}", error);
            if let Err(error) = ctrl_c.await {
                log::error!("Cannot wait for CTRL-C: {}", error);
            }
            return;
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received CTRL-C. Shutting down...");
        },
        _ = sig_hup.recv() => {
            log::info!("Received SIGHUP. Shutting down...");
        }
    }
}
