use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};

/// Snapshot of slot usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Configured ceiling.
    pub limit: usize,
    /// Runs currently holding a slot.
    pub active: usize,
    /// Runs waiting for a slot.
    pub queued: usize,
}

/// Caps how many runs may load the execution backend at once.
///
/// A run holds a slot while its tests execute and while a fix is applied;
/// every other stage runs without one. Runs that cannot get a slot wait in
/// line instead of failing, and a cancelled wait gives up its place.
pub struct ResourceManager {
    semaphore: Arc<Semaphore>,
    limit: usize,
    queued: AtomicUsize,
}

struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ResourceManager {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            queued: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot.
    ///
    /// Returns `DomainError::Cancelled` if `cancel` fires first. The slot is
    /// released when the returned permit is dropped.
    pub async fn acquire(&self, cancel: &CancellationToken) -> DomainResult<OwnedSemaphorePermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(permit);
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        let _queued = QueuedGuard(&self.queued);
        debug!(queued = self.queued.load(Ordering::SeqCst), "waiting for execution slot");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DomainError::Cancelled("cancelled while queued".to_string())),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| DomainError::ServiceUnavailable("scheduler closed".to_string())),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            limit: self.limit,
            active: self.limit.saturating_sub(self.semaphore.available_permits()),
            queued: self.queued.load(Ordering::SeqCst),
        }
    }
}
