//! Waits for whichever of SIGINT, SIGTERM, or SIGQUIT arrives first
//! (`spec.md` §6), so `runtime::run` can drive orderly shutdown from a
//! single await point.

use tokio::signal::unix::{signal, SignalKind};

pub async fn wait_for_signal() -> &'static str {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    }
}
