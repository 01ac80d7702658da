use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Identifier assigned to each tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Default)]
struct TrackerInner {
    next_id: AtomicU64,
    active: Mutex<HashMap<ConnectionId, Instant>>,
    // Mirrors active.len(); written under the lock, read without it
    outstanding: AtomicUsize,
    total_started: AtomicU64,
}

/// Shared registry of in-flight requests.
///
/// Cheap to clone; every clone refers to the same registry.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new unit of work
    pub fn begin(&self) -> ConnectionId {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut active = self.inner.active.lock();
        active.insert(id, Instant::now());
        self.inner.outstanding.store(active.len(), Ordering::Release);
        self.inner.total_started.fetch_add(1, Ordering::Relaxed);
        trace!("Connection {} started ({} active)", id, active.len());
        id
    }

    /// Unregister a unit of work. Ending an unknown id is a no-op.
    pub fn end(&self, id: ConnectionId) -> bool {
        let mut active = self.inner.active.lock();
        let removed = active.remove(&id).is_some();
        self.inner.outstanding.store(active.len(), Ordering::Release);
        if removed {
            trace!("Connection {} finished ({} active)", id, active.len());
        }
        removed
    }

    /// Register work that is released when the returned guard drops
    pub fn guard(&self) -> ConnectionGuard {
        ConnectionGuard {
            id: self.begin(),
            tracker: self.clone(),
        }
    }

    /// Run a future as tracked work
    pub async fn track<F: Future>(&self, future: F) -> F::Output {
        let _guard = self.guard();
        future.await
    }

    /// Number of in-flight requests. Lock-free.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn is_idle(&self) -> bool {
        self.outstanding() == 0
    }

    /// Age of the longest-running request
    pub fn oldest_age(&self) -> Option<Duration> {
        let active = self.inner.active.lock();
        active.values().min().map(|started| started.elapsed())
    }

    pub fn total_started(&self) -> u64 {
        self.inner.total_started.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("outstanding", &self.outstanding())
            .field("total_started", &self.total_started())
            .finish()
    }
}

/// Scoped registration of one request.
///
/// Released on drop, which covers normal return, early `?` return,
/// unwinding, and cancellation of the owning future.
#[must_use = "the request is unregistered as soon as the guard is dropped"]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.end(self.id);
    }
}

impl fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGuard").field("id", &self.id).finish()
    }
}
