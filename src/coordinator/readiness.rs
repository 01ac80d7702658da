use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness indicator read by the health-check endpoint
#[derive(Debug, Clone)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new(ready: bool) -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(ready)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Set the flag and return the previous value
    pub fn set_ready(&self, ready: bool) -> bool {
        self.ready.swap(ready, Ordering::AcqRel)
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new(true)
    }
}
