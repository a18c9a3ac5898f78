//! Installs a signal handler which terminates the platform on CTRL+C, SIGHUP or SIGTERM.
//!
//! Forks an async task which waits for one of these signals and then invokes
//! [Platform::terminate](crate::platform::Platform::terminate). The server notices this within
//! its next check interval and shuts down gracefully, so that in-flight peer requests complete.
use std::sync::Arc;

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::platform::Platform;
use crate::spawn;

/// Installs a signal handler for the given platform.
///
/// Note that this is automatically called by the [Builder](crate::builder::Builder) unless it is
/// disabled.
pub fn install(platform: Arc<Platform>) {
    spawn!(async move {
        let mut sig_hup = match listen(SignalKind::hangup()) {
            Some(signal) => signal,
            None => return,
        };
        let mut sig_term = match listen(SignalKind::terminate()) {
            Some(signal) => signal,
            None => return,
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received CTRL-C. Shutting down...");
            },
            _ = sig_hup.recv() => {
                log::info!("Received SIGHUP. Shutting down...");
            },
            _ = sig_term.recv() => {
                log::info!("Received SIGTERM. Shutting down...");
            }
        }

        platform.terminate();
    });
}

fn listen(kind: SignalKind) -> Option<Signal> {
    match signal(kind) {
        Ok(signal) => Some(signal),
        Err(error) => {
            log::error!("Failed to install a signal handler: {}", error);
            None
        }
    }
}
