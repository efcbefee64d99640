//! Shutdown signaling for in-flight sync runs.
//!
//! Abstracts a tokio watch channel into a cancellation signal. A run checks
//! the signal between batches; the in-flight batch always completes, so no
//! partial-batch writes are possible.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
pub type ShutdownTx = watch::Sender<bool>;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<bool>;

/// Creates a new shutdown channel in the not-cancelled state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    watch::channel(false)
}

/// Returns `true` once shutdown has been requested.
pub fn is_shutdown_requested(rx: &ShutdownRx) -> bool {
    *rx.borrow()
}
