use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Shutdown state machine (Envoy-inspired)
///
/// States:
/// 1. Running - normal operation
/// 2. Draining - reject new sends, let in-flight sends finish
/// 3. Terminated - everything stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Terminated,
}

/// Manages graceful shutdown with a drain period.
pub struct Shutdown {
    /// Current state
    state: watch::Sender<ShutdownState>,

    /// Drain period duration
    drain_period: Duration,

    /// In-flight send count
    in_flight: AtomicU64,

    /// Shutdown complete signal
    complete_tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new(drain_period: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(ShutdownState::Running);
        let (complete_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            state,
            drain_period,
            in_flight: AtomicU64::new(0),
            complete_tx,
        })
    }

    /// Get current state
    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    /// Subscribe to shutdown complete
    pub fn complete_signal(&self) -> broadcast::Receiver<()> {
        self.complete_tx.subscribe()
    }

    /// How long draining may take before the server forces termination.
    pub fn drain_period(&self) -> Duration {
        self.drain_period
    }

    /// Start draining (called on SIGTERM/SIGINT)
    pub fn start_drain(&self) {
        if self.state() != ShutdownState::Running {
            return;
        }

        info!(
            drain_period_secs = self.drain_period.as_secs(),
            in_flight = self.in_flight.load(Ordering::SeqCst),
            "starting graceful shutdown drain"
        );

        let _ = self.state.send(ShutdownState::Draining);

        // Nothing to wait for
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.terminate();
        }
    }

    /// Complete shutdown
    pub fn terminate(&self) {
        if self.state() == ShutdownState::Terminated {
            return;
        }

        let in_flight = self.in_flight.load(Ordering::SeqCst);
        if in_flight > 0 {
            warn!(in_flight, "force terminating with sends still in flight");
        }

        info!("shutdown complete");
        let _ = self.state.send(ShutdownState::Terminated);
        let _ = self.complete_tx.send(());
    }

    /// Register a send. Returns a guard that unregisters it when dropped,
    /// or `None` when draining, meaning the send must be rejected.
    pub fn send_started(self: &Arc<Self>) -> Option<SendGuard> {
        if self.state() != ShutdownState::Running {
            return None;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(SendGuard {
            shutdown: Arc::clone(self),
        })
    }

    /// Get in-flight send count
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Check if accepting new sends
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }
}

/// In-flight slot for one send.
///
/// Must be held across the whole send. The count comes back down in
/// `Drop`, so a caller whose future is cancelled mid-send (a client
/// disconnect dropping the handler) still releases its slot.
pub struct SendGuard {
    shutdown: Arc<Shutdown>,
}

impl Drop for SendGuard {
    fn drop(&mut self) {
        let prev = self.shutdown.in_flight.fetch_sub(1, Ordering::SeqCst);

        // Last send out completes the drain
        if self.shutdown.state() == ShutdownState::Draining && prev == 1 {
            self.shutdown.terminate();
        }
    }
}
