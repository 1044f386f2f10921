//! Shutdown signalling shared by the listeners.

use tokio::sync::watch;

/// Create a shutdown trigger. `true` means stop.
pub(crate) fn channel() -> watch::Sender<bool> {
    watch::channel(false).0
}

/// Resolve once shutdown has been requested or the trigger was dropped.
pub(crate) async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
