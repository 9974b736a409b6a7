//! Per-path in-flight fetch coordination.
//!
//! Two simultaneous first-requests for the same uncached path would both
//! observe a missing file and both hit the origin. The coordinator hands
//! out one async mutex per path: the leader fetches while waiters queue,
//! then re-check the file once the leader releases. Slots are dropped from
//! the map when the last holder leaves.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct FetchCoordinator {
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl FetchCoordinator {
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Wait for exclusive fetch rights on a path.
    pub async fn enter(&self, path: &str) -> FlightPermit<'_> {
        let slot = self
            .inflight
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = slot.clone().lock_owned().await;
        FlightPermit {
            coordinator: self,
            path: path.to_string(),
            slot,
            guard: Some(guard),
        }
    }

    pub fn inflight_paths(&self) -> usize {
        self.inflight.len()
    }
}

pub struct FlightPermit<'a> {
    coordinator: &'a FetchCoordinator,
    path: String,
    slot: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Two references remain when nobody else waits: the map entry and
        // our own clone.
        self.coordinator
            .inflight
            .remove_if(&self.path, |_, slot| Arc::strong_count(slot) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn permits_for_one_path_are_exclusive() {
        let coordinator = Arc::new(FetchCoordinator::new());
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let _permit = coordinator.enter("/post/same.html").await;
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.expect("task completes");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.inflight_paths(), 0);
    }

    #[tokio::test]
    async fn distinct_paths_do_not_block_each_other() {
        let coordinator = FetchCoordinator::new();
        let first = coordinator.enter("/post/a.html").await;
        // Would deadlock if paths shared a slot.
        let second = coordinator.enter("/post/b.html").await;
        drop(first);
        drop(second);
        assert_eq!(coordinator.inflight_paths(), 0);
    }
}
