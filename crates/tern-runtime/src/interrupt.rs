use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What an interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// No turn was running.
    Idle,
    /// The running turn will stop at its next check point.
    Graceful,
    /// The turn was already stopping; the front end should abandon it.
    Forced,
}

struct Armed {
    token: CancellationToken,
    active: bool,
}

/// Cooperative cancellation for the turn loop.
///
/// Each turn gets its own token from [`arm`](Self::arm). An interrupt only
/// cancels that token; the orchestrator decides where to stop.
pub struct InterruptController {
    armed: Mutex<Armed>,
    forced: Notify,
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            armed: Mutex::new(Armed {
                token: CancellationToken::new(),
                active: false,
            }),
            forced: Notify::new(),
        }
    }

    /// Fresh token for the turn about to start.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut armed = self.armed.lock();
        armed.token = token.clone();
        armed.active = true;
        token
    }

    /// The turn is over; later interrupts report [`InterruptKind::Idle`].
    pub fn disarm(&self) {
        self.armed.lock().active = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.lock().active
    }

    /// Request cancellation of the running turn.
    pub fn interrupt(&self) -> InterruptKind {
        let kind = {
            let armed = self.armed.lock();
            if !armed.active {
                InterruptKind::Idle
            } else if armed.token.is_cancelled() {
                InterruptKind::Forced
            } else {
                armed.token.cancel();
                InterruptKind::Graceful
            }
        };
        if kind != InterruptKind::Graceful {
            // Only current waiters; a stale permit must not fire a later turn.
            self.forced.notify_waiters();
        }
        kind
    }

    /// Resolves on the next forced or idle interrupt.
    pub async fn forced(&self) {
        self.forced.notified().await;
    }

    /// Route Ctrl+C to [`interrupt`](Self::interrupt) for the rest of the session.
    pub fn listen_for_ctrl_c(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "cannot listen for ctrl-c");
                    return;
                }
                match controller.interrupt() {
                    InterruptKind::Graceful => info!("interrupt requested, stopping after the current step"),
                    InterruptKind::Forced => warn!("second interrupt, abandoning the turn"),
                    InterruptKind::Idle => info!("interrupt while idle"),
                }
            }
        })
    }
}
