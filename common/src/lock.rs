// Process-wide per-file-name locking

use dashmap::DashMap;
use lazy_static::lazy_static;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::debug;

type LockMap = DashMap<String, Arc<Mutex<()>>>;

lazy_static! {
    static ref GLOBAL_LOCKS: FileLocks = FileLocks::new();
}

/// Locks keyed by file name, created on first use
///
/// At most one guard per name exists at a time. Entries are dropped again
/// once no task holds or waits for them.
#[derive(Clone, Default)]
pub struct FileLocks {
    locks: Arc<LockMap>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock map shared by every job in this process
    pub fn global() -> &'static FileLocks {
        &GLOBAL_LOCKS
    }

    /// Wait for exclusive access to `name`
    pub async fn acquire(&self, name: &str) -> FileLockGuard {
        // Clone the mutex out so the shard lock is not held across the await
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        debug!(file_name = %name, "File lock acquired");

        FileLockGuard {
            name: name.to_string(),
            locks: Arc::clone(&self.locks),
            acquired_at: Instant::now(),
            guard: Some(guard),
        }
    }

    /// Names currently tracked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one file name; released on drop
pub struct FileLockGuard {
    name: String,
    locks: Arc<LockMap>,
    acquired_at: Instant,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FileLockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody holds or waits for it
        self.locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
        debug!(file_name = %self.name, held_ms = self.elapsed().as_millis() as u64, "File lock released");
    }
}
