//! Bounded multi-producer/multi-consumer task stack
//!
//! The stack is a coordination device, not a queue: its capacity equals
//! the worker count, so the hot path stays lock-free with trivial backing
//! storage.  When a push fails the caller buffers the task on its own
//! local stack, which also keeps the working set cache-hot.
use crossbeam_queue::ArrayQueue;

pub(crate) struct TaskStack<T> {
    queue: ArrayQueue<T>,
}

impl<T> TaskStack<T> {
    /// Builds a stack with one slot per worker
    pub fn new(workers: usize) -> Self {
        Self {
            queue: ArrayQueue::new(workers.max(1)),
        }
    }

    /// Attempts to push, handing the task back when the stack is full
    pub fn bounded_push(&self, t: T) -> Result<(), T> {
        self.queue.push(t)
    }

    /// Pops a task, if any is available
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflow_returns_task() {
        let stack = TaskStack::new(2);
        assert!(stack.bounded_push(1).is_ok());
        assert!(stack.bounded_push(2).is_ok());
        assert_eq!(stack.bounded_push(3), Err(3));
        assert!(stack.pop().is_some());
        assert!(stack.bounded_push(3).is_ok());
    }

    #[test]
    fn concurrent_push_pop() {
        use std::sync::{atomic::AtomicUsize, atomic::Ordering, Barrier};
        const N: usize = 4;
        let stack = TaskStack::new(N);
        let popped = AtomicUsize::new(0);
        let barrier = Barrier::new(N);
        std::thread::scope(|s| {
            for _ in 0..N {
                s.spawn(|| {
                    let mut local = vec![];
                    for i in 0..1000 {
                        if let Err(v) = stack.bounded_push(i) {
                            local.push(v);
                        }
                        if stack.pop().is_some() || local.pop().is_some() {
                            popped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    // Once every thread is done pushing, drain the rest
                    barrier.wait();
                    while stack.pop().is_some() || local.pop().is_some() {
                        popped.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(popped.load(Ordering::Relaxed), N * 1000);
    }
}
