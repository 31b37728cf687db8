//! Parallel octree construction
//!
//! Workers drain a bounded MPMC stack (overflowing onto per-worker local
//! stacks) of cell-evaluation tasks.  Ambiguous cells push eight child
//! tasks; terminal cells publish themselves into their parent's slot
//! table, and whichever worker completes a set of eight folds it and
//! continues publishing upward.  The worker that folds past the root sets
//! the `done` flag for everyone else.
use crate::{
    eval::Evaluator,
    mesh::{
        neighbors::Neighbors,
        pool::{ObjectPool, Root},
        progress::ProgressWatcher,
        stack::TaskStack,
        types::Corner,
        xtree::{self, CellResult, XTree},
        Settings,
    },
    region::Region,
    tape::Tape,
    tree::Tree,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc, OnceLock,
};

/// A cell waiting to be evaluated
struct Task {
    region: Region,
    tape: Tape,

    /// Slot table to publish into; `None` only for the root cell
    parent: Option<Arc<Wait>>,

    /// Our index within `parent`
    index: u8,

    /// Snapshot of the parent cell's own neighbor table
    neighbors: Neighbors,
}

/// Bookkeeping for a subdivided cell whose children are in flight
///
/// Children publish themselves into `slots` (release) and bump `pending`;
/// the worker whose increment completes the set of eight performs the
/// fold, so the fold is serialized without any locking.
struct Wait {
    region: Region,
    slots: [OnceLock<Arc<XTree>>; 8],
    pending: AtomicUsize,

    /// Chain toward the root
    up: Option<Arc<Wait>>,

    /// Our index within `up`
    index: u8,
}

/// Tick credit for a terminal (non-subdividing) cell at the given level
///
/// This matches the total budget established at the start of the build:
/// a cell classified empty or full is credited with every leaf its
/// subtree would have produced had it recursed all the way down.
pub(crate) fn tick_budget(level: u8) -> u64 {
    let mut t = 0u64;
    for _ in 0..=level {
        t = (t + 1) * 8;
    }
    t
}

struct Worker<'a> {
    eval: Evaluator,
    pool: ObjectPool,

    /// Local overflow stack, popped before the shared one (LIFO keeps the
    /// working set cache-hot)
    local: Vec<Task>,

    queue: &'a TaskStack<Task>,
    done: &'a AtomicBool,
    cancel: &'a AtomicBool,
    out: &'a OnceLock<Arc<XTree>>,
    node_count: &'a AtomicU64,
    progress: Option<&'a ProgressWatcher>,
    settings: &'a Settings<'a>,
}

impl Worker<'_> {
    fn run(mut self, root: &Root) {
        while !self.done.load(Ordering::Acquire)
            && !self.cancel.load(Ordering::Relaxed)
        {
            let task = self.local.pop().or_else(|| self.queue.pop());
            let Some(task) = task else {
                // Nothing to do; either another worker holds the remaining
                // work or we're about to observe a termination flag
                match self.settings.free_thread {
                    Some(h) => h.offer_wait(),
                    None => std::thread::yield_now(),
                }
                continue;
            };
            self.process(task);
        }
        root.claim(self.pool);
    }

    fn process(&mut self, task: Task) {
        // Resolve neighbors at the last minute, so that siblings published
        // by other workers since the task was created are observed
        let neighbors = match &task.parent {
            Some(wait) => {
                task.neighbors.push(Corner::new(task.index), &wait.slots)
            }
            None => Neighbors::default(),
        };

        let Task {
            region,
            mut tape,
            parent: mut link,
            mut index,
            neighbors: _,
        } = task;
        let node = if region.level > 0 {
            match xtree::eval_interval(
                &mut self.eval,
                &tape,
                &region,
                &mut self.pool,
            ) {
                CellResult::Recurse(sub) => {
                    let wait = Arc::new(Wait {
                        region,
                        slots: std::array::from_fn(|_| OnceLock::new()),
                        pending: AtomicUsize::new(0),
                        up: link,
                        index,
                    });
                    for (i, r) in region.subdivide().into_iter().enumerate()
                    {
                        let next = Task {
                            region: r,
                            tape: sub.clone(),
                            parent: Some(wait.clone()),
                            index: i as u8,
                            neighbors: neighbors.clone(),
                        };
                        // Hand the work to the shared stack if it has a
                        // free slot; otherwise keep it local
                        if let Err(next) = self.queue.bounded_push(next) {
                            self.local.push(next);
                        }
                    }
                    return;
                }
                CellResult::Done(node) => {
                    if let Some(p) = self.progress {
                        p.tick(tick_budget(region.level));
                    }
                    node
                }
            }
        } else {
            let node = xtree::eval_leaf(
                &mut self.eval,
                &tape,
                region,
                &neighbors,
                self.settings.min_feature,
            );
            if let Some(p) = self.progress {
                p.tick(1);
            }
            node
        };

        // Publish the finalized cell and fold upward for as long as we're
        // the worker completing each set of eight
        self.node_count.fetch_add(1, Ordering::Relaxed);
        let mut node = Arc::new(node);
        loop {
            let Some(wait) = link else {
                // We folded past the root; the build is complete
                let _ = self.out.set(node);
                self.done.store(true, Ordering::Release);
                break;
            };
            let published = wait.slots[index as usize].set(node);
            debug_assert!(published.is_ok(), "cell published twice");
            if wait.pending.fetch_add(1, Ordering::AcqRel) + 1 < 8 {
                break;
            }

            let children: [Arc<XTree>; 8] = std::array::from_fn(|i| {
                wait.slots[i].get().expect("missing child").clone()
            });
            // The working tape is specialized for a child region; walk the
            // specialization DAG back to one valid for the parent
            tape = Tape::get_base(tape, &wait.region);
            let folded = xtree::collect_children(
                &mut self.eval,
                &tape,
                wait.region,
                children,
                self.settings.max_err,
            );
            if let Some(p) = self.progress {
                p.tick(1);
            }
            self.node_count.fetch_add(1, Ordering::Relaxed);
            node = Arc::new(folded);
            index = wait.index;
            link = wait.up.clone();
        }

        // Reclaim the working tape's storage; this only succeeds once the
        // siblings that shared it are done with their copies too
        self.pool.claim(tape);
    }
}

/// Builds an octree over `region` using `settings.workers` threads
///
/// Returns an empty root if the cancel flag was raised.
pub(crate) fn build(
    tree: &Tree,
    region: Region,
    settings: &Settings,
    progress: Option<&ProgressWatcher>,
    cancel: &AtomicBool,
) -> Root {
    let workers = settings.workers.max(1);
    let tape = Tape::new(tree);
    let queue = TaskStack::new(workers);
    let pushed = queue.bounded_push(Task {
        region,
        tape: tape.clone(),
        parent: None,
        index: 0,
        neighbors: Neighbors::default(),
    });
    assert!(pushed.is_ok());

    let done = AtomicBool::new(false);
    let out = OnceLock::new();
    let node_count = AtomicU64::new(0);
    let root = Root::new(region, tape);

    log::debug!(
        "building octree at level {} with {workers} workers",
        region.level
    );
    std::thread::scope(|s| {
        for _ in 0..workers {
            let worker = Worker {
                eval: Evaluator::new(),
                pool: ObjectPool::new(),
                local: vec![],
                queue: &queue,
                done: &done,
                cancel,
                out: &out,
                node_count: &node_count,
                progress,
                settings,
            };
            s.spawn(|| worker.run(&root));
        }
    });

    if cancel.load(Ordering::Relaxed) {
        log::debug!("octree build cancelled");
        return Root::default();
    }
    debug_assert!(done.load(Ordering::Acquire));
    let count = node_count.load(Ordering::Relaxed);
    log::debug!("octree build complete: {count} cells");
    root.finish(out.into_inner(), count)
}
