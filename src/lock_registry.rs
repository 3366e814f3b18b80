//! Named advisory locks keyed by absolute path (spec.md §4.3).
//!
//! Grounded in `scheduler::disk_read_scheduler::DiskReadScheduler`'s
//! global `Mutex`-guarded table of per-key bookkeeping
//! (`load_scheduled: RwLock<HashMap<(String, PartitionID), AtomicBool>>`):
//! one process-global table, entries created on demand, mutex per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// A process-global table of advisory mutexes keyed by path string.
/// Re-entrancy per holder is explicitly not required (spec.md §4.3).
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> LockRegistry {
        LockRegistry::default()
    }

    fn entry(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs `critical_section` while holding the advisory lock for
    /// `name`, releasing it no matter how `critical_section` returns —
    /// including an early `Err` from a `?` inside it — since the guard
    /// lives for the whole call and drops when this function returns
    /// (spec.md §4.3: "guaranteed to release on all exit paths").
    pub fn with_lock<R>(&self, name: &str, critical_section: impl FnOnce() -> Result<R>) -> Result<R> {
        let mutex = self.entry(name);
        let _guard = mutex.lock().unwrap();
        critical_section()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    #[test]
    fn serialises_access_to_the_same_name() {
        let registry = Arc::new(LockRegistry::new());
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                registry
                    .with_lock("/a", || {
                        let before = counter.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(before, 0, "another holder was inside the critical section");
                        thread::yield_now();
                        counter.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn release_happens_even_on_error_return() {
        let registry = LockRegistry::new();
        let _: Result<()> = registry.with_lock("/a", || Err(crate::error::FsError::NoSuchFile("/a".into())));
        // If the lock weren't released, this would deadlock.
        registry.with_lock("/a", || Ok(())).unwrap();
    }

    #[test]
    fn different_names_do_not_contend() {
        let registry = LockRegistry::new();
        registry
            .with_lock("/a", || registry.with_lock("/b", || Ok(())))
            .unwrap();
    }
}
