//! Progress observation
//!
//! Workers tick a shared counter; a dedicated observer thread samples it
//! at a fixed interval and forwards strictly-monotone values in `[0, 3]`
//! to the user callback.  The four phases (build, alignment, mesh, tree
//! deletion) each contribute one unit of range, with the final deletion
//! phase reporting its completion as the closing `3.0`.
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Number of phases reported over a full render
const PHASES: usize = 4;

/// Sampling interval for the observer thread
const POLL: Duration = Duration::from_millis(5);

/// Shared progress state, sampled by a single observer thread
pub struct ProgressWatcher {
    counter: AtomicU64,
    total: AtomicU64,
    phase: AtomicUsize,
    stop: AtomicBool,
}

impl Default for ProgressWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressWatcher {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            total: AtomicU64::new(1),
            phase: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        }
    }

    /// Records completed work in the current phase
    pub fn tick(&self, n: u64) {
        self.counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Enters the next phase, with the given tick budget
    ///
    /// The budget may be an over-estimate; the reported fraction saturates
    /// at the phase boundary either way.
    pub fn start_phase(&self, total: u64) {
        debug_assert!(self.phase.load(Ordering::Relaxed) < PHASES);
        self.total.store(total.max(1), Ordering::SeqCst);
        self.counter.store(0, Ordering::SeqCst);
        self.phase.fetch_add(1, Ordering::SeqCst);
    }

    /// Asks the observer to emit the final value and return
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Observer loop; run this on a dedicated thread
    ///
    /// The first reported value is exactly 0.0 and the last is exactly
    /// 3.0; everything in between is strictly increasing.  Sampling may
    /// coarsen the counter, never reorder it.
    pub fn run(&self, cb: &(dyn Fn(f32) + Sync)) {
        cb(0.0);
        let mut last = 0.0f32;
        while !self.stop.load(Ordering::Acquire) {
            std::thread::sleep(POLL);
            let phase = self.phase.load(Ordering::SeqCst);
            if phase == 0 {
                continue;
            }
            let c = self.counter.load(Ordering::SeqCst);
            let t = self.total.load(Ordering::SeqCst);
            let frac = (c as f64 / t as f64).min(1.0);
            let v = (((phase - 1) as f64 + frac) as f32)
                .min((PHASES - 1) as f32);
            if v > last {
                cb(v);
                last = v;
            }
        }
        if last < (PHASES - 1) as f32 {
            cb((PHASES - 1) as f32);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn progress_endpoints_and_monotonicity() {
        let watcher = ProgressWatcher::new();
        let seen = Mutex::new(vec![]);
        let cb = |v: f32| seen.lock().unwrap().push(v);
        std::thread::scope(|s| {
            let h = s.spawn(|| watcher.run(&cb));
            for _phase in 0..4 {
                watcher.start_phase(100);
                for _ in 0..10 {
                    watcher.tick(10);
                    std::thread::sleep(Duration::from_millis(2));
                }
            }
            watcher.stop();
            h.join().unwrap();
        });
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&3.0));
        for w in seen.windows(2) {
            assert!(w[1] > w[0], "non-monotone progress: {seen:?}");
        }
        assert!(seen.len() > 2, "sampler never caught an update");
    }

    #[test]
    fn progress_empty_run() {
        // A run that does no work still reports both endpoints
        let watcher = ProgressWatcher::new();
        let seen = Mutex::new(vec![]);
        let cb = |v: f32| seen.lock().unwrap().push(v);
        std::thread::scope(|s| {
            let h = s.spawn(|| watcher.run(&cb));
            watcher.stop();
            h.join().unwrap();
        });
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 3.0]);
    }
}
