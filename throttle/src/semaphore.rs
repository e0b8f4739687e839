use std::sync::Arc;

/// Counting semaphore that can be switched off entirely.
///
/// A limit of 0 disables the semaphore: `acquire` returns immediately without a permit.
#[derive(Debug)]
pub struct Semaphore {
    limit: usize,
    sem: Arc<tokio::sync::Semaphore>,
}

impl Semaphore {
    pub fn new(limit: usize) -> Self {
        let permits = if limit == 0 {
            tokio::sync::Semaphore::MAX_PERMITS
        } else {
            limit
        };
        Self {
            limit,
            sem: Arc::new(tokio::sync::Semaphore::new(permits)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn available_permits(&self) -> usize {
        self.sem.available_permits()
    }

    /// Wait for a free slot. The permit is owned so it can move into a spawned task.
    pub async fn acquire(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        if !self.is_enabled() {
            return None;
        }
        // the semaphore is never closed, acquire only fails after close()
        self.sem.clone().acquire_owned().await.ok()
    }
}
