// semaphore.rs
//
// A small counting semaphore bounding the worker pool (spec.md §4.9:
// "default 10 concurrent sessions"). Grounded on original_source's
// `server/manager.py::ClientManager`, which tracks one future per client
// against a fixed-size `ThreadPoolExecutor`; std has no thread pool, so this
// crate builds the bound directly on `Condvar`.
use std::sync::{Arc, Condvar, Mutex};

pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        })
    }

    /// Blocks until a permit is free, then takes it.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut permits = self.permits.lock().unwrap_or_else(|e| e.into_inner());
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(|e| e.into_inner());
        }
        *permits -= 1;
        Permit { semaphore: self.clone() }
    }
}

/// RAII guard that returns its permit when dropped - including when the
/// holding thread panics, so one misbehaving session can't shrink the pool
/// permanently (spec.md §4.9: "the pool must cope with abrupt task
/// failure").
pub struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut permits = self
            .semaphore
            .permits
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *permits += 1;
        self.semaphore.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn permit_is_returned_on_drop() {
        let sem = Semaphore::new(1);
        let permit = sem.acquire();
        drop(permit);
        let _second = sem.acquire(); // would hang if the first permit leaked
    }

    #[test]
    fn acquire_blocks_until_a_permit_frees_up() {
        let sem = Semaphore::new(1);
        let first = sem.acquire();
        let sem2 = sem.clone();
        let handle = thread::spawn(move || {
            let _second = sem2.acquire();
        });
        thread::sleep(Duration::from_millis(50));
        drop(first);
        handle.join().unwrap();
    }
}
