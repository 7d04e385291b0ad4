//! Per-upload mutual exclusion.
//!
//! Requests that address the same upload id run one at a time; requests for
//! different ids never wait on each other. Entries are dropped from the map
//! as soon as the last holder or waiter lets go.

use crate::models::upload::UploadId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Clone, Default)]
pub struct UploadLockService {
    locks: Arc<DashMap<UploadId, Arc<Mutex<()>>>>,
}

impl UploadLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other request holds `id`, then hold it until the guard drops.
    pub async fn lock(&self, id: UploadId) -> UploadLock {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        trace!(upload_id = %id, "waiting for upload lock");
        let guard = mutex.lock_owned().await;
        UploadLock {
            id,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of ids currently locked or waited on.
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock on one upload id.
pub struct UploadLock {
    id: UploadId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<UploadId, Arc<Mutex<()>>>>,
}

impl UploadLock {
    pub fn id(&self) -> UploadId {
        self.id
    }
}

impl Drop for UploadLock {
    fn drop(&mut self) {
        // Release first so the map holds the only remaining Arc when idle.
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
        trace!(upload_id = %self.id, "released upload lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test]
    async fn same_id_is_serialized() {
        let locks = UploadLockService::new();
        let id = UploadId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _lock = locks.lock(id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_ids_do_not_block() {
        let locks = UploadLockService::new();
        let _first = locks.lock(UploadId::new()).await;
        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(UploadId::new())).await;
        assert!(second.is_ok());
        assert_eq!(locks.active(), 2);
    }

    #[tokio::test]
    async fn entry_is_removed_after_release() {
        let locks = UploadLockService::new();
        let id = UploadId::new();
        {
            let lock = locks.lock(id).await;
            assert_eq!(lock.id(), id);
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);
    }
}
