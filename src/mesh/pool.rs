//! Per-worker storage pools and the owning tree handle
use crate::{
    mesh::{progress::ProgressWatcher, xtree::XTree},
    region::Region,
    tape::{Clause, Tape},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Cap on recycled buffers per pool, to bound idle memory
const MAX_SPARE: usize = 64;

/// Per-worker recycler for allocation-churn-heavy scratch
///
/// Tape specialization allocates a clause buffer per ambiguous cell; pools
/// hand exhausted buffers back to the next specialization instead of the
/// allocator.  Each worker owns one pool; on termination the pool is
/// claimed by the [`Root`] under its mutex.
#[derive(Default)]
pub struct ObjectPool {
    pub(crate) tape_storage: Vec<Vec<Clause>>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to reclaim a tape's clause buffer
    ///
    /// This only succeeds when the tape is uniquely held, which is the
    /// common case for a fully-folded subtree.
    pub(crate) fn claim(&mut self, tape: Tape) {
        if self.tape_storage.len() >= MAX_SPARE {
            return;
        }
        if let Some(mut buf) = tape.take() {
            buf.clear();
            self.tape_storage.push(buf);
        }
    }

    fn absorb(&mut self, mut other: ObjectPool) {
        let spare = MAX_SPARE.saturating_sub(self.tape_storage.len());
        self.tape_storage
            .extend(other.tape_storage.drain(..).take(spare));
    }
}

/// Owning handle for a built octree
///
/// The root owns the finished tree, the root tape, and every worker pool
/// claimed at shutdown; dropping (or [`reset`](Root::reset)-ing) it
/// releases the whole structure.
#[derive(Default)]
pub struct Root {
    tree: Option<Arc<XTree>>,
    region: Option<Region>,
    tape: Option<Tape>,
    node_count: u64,
    pools: Mutex<Vec<ObjectPool>>,
}

impl Root {
    pub(crate) fn new(region: Region, tape: Tape) -> Self {
        Self {
            tree: None,
            region: Some(region),
            tape: Some(tape),
            node_count: 0,
            pools: Mutex::new(vec![]),
        }
    }

    /// Installs the finished tree; called once by the build scheduler
    pub(crate) fn finish(
        mut self,
        tree: Option<Arc<XTree>>,
        node_count: u64,
    ) -> Self {
        self.tree = tree;
        self.node_count = node_count;
        self
    }

    /// Takes ownership of a worker's pool, under the root mutex
    pub(crate) fn claim(&self, pool: ObjectPool) {
        let mut pools = self.pools.lock().unwrap();
        if let Some(first) = pools.first_mut() {
            first.absorb(pool);
        } else {
            pools.push(pool);
        }
    }

    /// Checks whether the root holds a tree
    pub fn is_empty(&self) -> bool {
        self.tree.is_none()
    }

    /// The root cell, if a tree was built
    pub fn tree(&self) -> Option<&Arc<XTree>> {
        self.tree.as_ref()
    }

    /// The (resolution-adjusted) region the tree was built over
    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub(crate) fn tape(&self) -> Option<&Tape> {
        self.tape.as_ref()
    }

    /// Total number of cells in the tree
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Tears the tree down, optionally in parallel
    ///
    /// Progress is reported one tick per released cell.
    pub fn reset(
        &mut self,
        workers: usize,
        progress: Option<&ProgressWatcher>,
    ) {
        self.pools.lock().unwrap().clear();
        let Some(tree) = self.tree.take() else {
            return;
        };
        let workers = workers.max(1);
        if workers == 1 {
            release(tree, progress);
            return;
        }

        let stack = Mutex::new(vec![tree]);
        let pending = AtomicUsize::new(1);
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    let next = stack.lock().unwrap().pop();
                    let Some(t) = next else {
                        if pending.load(Ordering::Acquire) == 0 {
                            break;
                        }
                        std::thread::yield_now();
                        continue;
                    };
                    match Arc::try_unwrap(t) {
                        Ok(XTree {
                            cell: crate::mesh::xtree::Cell::Branch(children),
                            ..
                        }) => {
                            pending.fetch_add(8, Ordering::AcqRel);
                            stack.lock().unwrap().extend(children);
                        }
                        _ => (),
                    }
                    pending.fetch_sub(1, Ordering::AcqRel);
                    if let Some(p) = progress {
                        p.tick(1);
                    }
                });
            }
        });
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        // Tear down iteratively; a deep tree would otherwise recurse once
        // per level, which is fine, but ticking keeps Drop and reset on the
        // same path.
        self.reset(1, None);
    }
}

/// Single-threaded teardown with an explicit stack
fn release(tree: Arc<XTree>, progress: Option<&ProgressWatcher>) {
    let mut todo = vec![tree];
    while let Some(t) = todo.pop() {
        if let Ok(XTree {
            cell: crate::mesh::xtree::Cell::Branch(children),
            ..
        }) = Arc::try_unwrap(t)
        {
            todo.extend(children);
        }
        if let Some(p) = progress {
            p.tick(1);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::Tree;

    #[test]
    fn pool_claims_unique_tapes() {
        let mut pool = ObjectPool::new();
        let tape = Tape::new(&(Tree::x() + 1.0));
        let shared = tape.clone();
        pool.claim(tape); // still shared; nothing reclaimed
        assert!(pool.tape_storage.is_empty());
        pool.claim(shared);
        assert_eq!(pool.tape_storage.len(), 1);
    }

    #[test]
    fn empty_root() {
        let mut root = Root::default();
        assert!(root.is_empty());
        assert_eq!(root.node_count(), 0);
        root.reset(4, None);
        assert!(root.is_empty());
    }
}
