use super::ShutdownState;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Monotonic holder for the coordinator state.
///
/// Transitions are compare-and-swap under the watch channel's lock, so two
/// racing triggers can never both win the same transition.
pub(crate) struct StateCell {
    sender: watch::Sender<ShutdownState>,
    history: Mutex<Vec<ShutdownState>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(ShutdownState::Running);
        Self {
            sender,
            history: Mutex::new(vec![ShutdownState::Running]),
        }
    }

    pub(crate) fn current(&self) -> ShutdownState {
        *self.sender.borrow()
    }

    /// Move from `from` to `to`. Returns false when the state was not `from`.
    pub(crate) fn advance(&self, from: ShutdownState, to: ShutdownState) -> bool {
        if to <= from {
            return false;
        }

        let advanced = self.sender.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            self.history.lock().push(to);
            true
        });

        if advanced {
            debug!("Shutdown state changed: {} -> {}", from, to);
        }
        advanced
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.sender.subscribe()
    }

    pub(crate) fn history(&self) -> Vec<ShutdownState> {
        self.history.lock().clone()
    }
}
