//! Per-call concurrency control (§5's per-call lock). A single call
//! never runs two turn-pipeline passes concurrently; the lock is held
//! across STT+LLM+TTS of one turn. Adapted from the teacher's
//! per-session semaphore map, but waits for the holder rather than
//! rejecting — §4.6 coalesces repeated arrivals instead of reporting
//! busy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub struct CallLockMap {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Default for CallLockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CallLockMap {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the run lock for a call, waiting if a turn is already
    /// in flight. The returned guard releases on drop.
    pub async fn acquire(&self, call_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(call_id.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
        };
        lock.lock_owned().await
    }

    /// Drops the tracked lock for a call once it has ended. Safe to call
    /// even if a guard is still briefly alive elsewhere; the `Arc` keeps
    /// the underlying mutex valid until the last guard is dropped.
    pub fn remove(&self, call_id: &str) {
        self.locks.lock().remove(call_id);
    }

    pub fn call_count(&self) -> usize {
        self.locks.lock().len()
    }
}
