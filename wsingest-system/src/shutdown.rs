use tokio_util::sync::CancellationToken;

/// The sending side of a one-time shutdown notification.
///
/// A signal can be observed through any number of [`ShutdownHandle`]s obtained via
/// [`handle`](Self::handle). Firing the signal wakes all current and future observers. Firing more
/// than once is allowed and has no further effect; it never blocks.
///
/// Dropping the signal does *not* fire it.
///
/// # Example
///
/// ```
/// use wsingest_system::ShutdownSignal;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let signal = ShutdownSignal::new();
/// let handle = signal.handle();
///
/// assert!(signal.fire());
/// assert!(!signal.fire());
///
/// handle.notified().await;
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Creates a new signal that has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal.
    ///
    /// Returns `true` if this call fired the signal and `false` if it had fired before. Concurrent
    /// calls racing to fire first may both return `true`.
    pub fn fire(&self) -> bool {
        let first = !self.token.is_cancelled();
        self.token.cancel();

        if first {
            wsingest_log::debug!("shutdown signal fired");
        }

        first
    }

    /// Returns `true` if the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a new observer for this signal.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.token.clone(),
        }
    }
}

/// The receiving side of a [`ShutdownSignal`].
///
/// Handles can be freely cloned. Every handle observes the signal independently.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Waits until the signal fires.
    ///
    /// Resolves immediately if the signal has already fired. This future is cancel-safe and can be
    /// used in `tokio::select!` next to other work.
    pub async fn notified(&self) {
        self.token.cancelled().await
    }

    /// Returns `true` if the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }
}
