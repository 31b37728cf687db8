//! Dual traversal of a built octree
//!
//! The walker enumerates every dual face and edge exactly once despite
//! non-uniform tree depth: recursion always descends into the cells that
//! are strictly shallower than their neighbors across the shared element,
//! so each element is handled by its deepest incident cell tuple.
//!
//! Traversal is expressed against a [`DualBuilder`], which either recurses
//! immediately (single-threaded meshing) or re-queues each dispatch as a
//! task for a worker crew.
use crate::mesh::{
    progress::ProgressWatcher,
    stack::TaskStack,
    types::{Corner, Frame, X, XYZ, Y, YZX, Z, ZXY},
    xtree::{Cell, XTree},
};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

/// Looks up the given child of a cell
///
/// If the cell is not a branch, returns the cell itself.
pub(crate) fn child<'a>(t: &'a Arc<XTree>, i: Corner) -> &'a Arc<XTree> {
    match &t.cell {
        Cell::Branch(children) => &children[i.index()],
        _ => t,
    }
}

/// Consumer of the dual traversal
pub(crate) trait DualBuilder {
    /// Dispatches recursion into a cell
    fn cell(&mut self, cell: &Arc<XTree>);

    /// Dispatches two cells sharing a face perpendicular to `F`'s first axis
    fn face<F: Frame>(&mut self, lo: &Arc<XTree>, hi: &Arc<XTree>);

    /// Dispatches four cells sharing an edge along `F`'s first axis
    ///
    /// Cells are in the order `[0, U, U | V, V]`, a right-handed winding
    /// about the positive edge axis.
    fn edge<F: Frame>(
        &mut self,
        a: &Arc<XTree>,
        b: &Arc<XTree>,
        c: &Arc<XTree>,
        d: &Arc<XTree>,
    );

    /// Called exactly once per terminal cell
    fn leaf(&mut self, cell: &Arc<XTree>);

    /// Called exactly once per terminal edge tuple
    fn load<F: Frame>(&mut self, cells: [&Arc<XTree>; 4]);
}

pub(crate) fn dual_cell<B: DualBuilder>(t: &Arc<XTree>, out: &mut B) {
    let Cell::Branch(_) = &t.cell else {
        out.leaf(t);
        return;
    };
    for i in Corner::iter() {
        out.cell(child(t, i));
    }

    fn dual_faces<T: Frame, B: DualBuilder>(t: &Arc<XTree>, out: &mut B) {
        let (a, u, v) = T::frame();
        for c in [Corner::new(0), u.into(), v.into(), u | v] {
            out.face::<T>(child(t, c), child(t, c | a));
        }
    }
    dual_faces::<XYZ, B>(t, out);
    dual_faces::<YZX, B>(t, out);
    dual_faces::<ZXY, B>(t, out);

    #[allow(unused_parens)]
    for i in [false, true] {
        out.edge::<XYZ>(
            child(t, (X * i).into()),
            child(t, (X * i) | Y),
            child(t, (X * i) | Y | Z),
            child(t, (X * i) | Z),
        );
        out.edge::<YZX>(
            child(t, (Y * i).into()),
            child(t, (Y * i) | Z),
            child(t, (Y * i) | X | Z),
            child(t, (Y * i) | X),
        );
        out.edge::<ZXY>(
            child(t, (Z * i).into()),
            child(t, (Z * i) | X),
            child(t, (Z * i) | X | Y),
            child(t, (Z * i) | Y),
        );
    }
}

/// Handles two cells which share a common face
///
/// `lo` is below `hi` on the `T` axis; the cells share a `UV` face where
/// `T-U-V` is a right-handed coordinate system.
pub(crate) fn dual_face<T: Frame, B: DualBuilder>(
    lo: &Arc<XTree>,
    hi: &Arc<XTree>,
    out: &mut B,
) {
    if lo.is_leaf() && hi.is_leaf() {
        return;
    }
    let (t, u, v) = T::frame();
    out.face::<T>(child(lo, t.into()), child(hi, Corner::new(0)));
    out.face::<T>(child(lo, t | u), child(hi, u.into()));
    out.face::<T>(child(lo, t | v), child(hi, v.into()));
    out.face::<T>(child(lo, t | u | v), child(hi, u | v));
    #[allow(unused_parens)]
    for i in [false, true] {
        out.edge::<T::Next>(
            child(lo, (u * i) | t),
            child(lo, (u * i) | v | t),
            child(hi, (u * i) | v),
            child(hi, (u * i).into()),
        );
        out.edge::<<T::Next as Frame>::Next>(
            child(lo, (v * i) | t),
            child(hi, (v * i).into()),
            child(hi, (v * i) | u),
            child(lo, (v * i) | u | t),
        );
    }
}

/// Handles four cells that share a common edge aligned on axis `T`
///
/// Cell positions are in the order `[0, U, U | V, V]`, i.e. a right-handed
/// winding about `+T` (where `T, U, V` is a right-handed coordinate frame)
pub(crate) fn dual_edge<T: Frame, B: DualBuilder>(
    a: &Arc<XTree>,
    b: &Arc<XTree>,
    c: &Arc<XTree>,
    d: &Arc<XTree>,
    out: &mut B,
) {
    if [a, b, c, d].iter().all(|v| v.is_leaf()) {
        out.load::<T>([a, b, c, d]);
        return;
    }
    let (t, u, v) = T::frame();
    #[allow(unused_parens)]
    for i in [false, true] {
        out.edge::<T>(
            child(a, (t * i) | u | v),
            child(b, (t * i) | v),
            child(c, (t * i).into()),
            child(d, (t * i) | u),
        )
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Mesh generator fed by the dual traversal
pub(crate) trait Mesher: Send {
    /// Called once per terminal cell
    fn leaf(&mut self, cell: &Arc<XTree>);

    /// Called once per terminal edge tuple, in `[0, U, U | V, V]` order
    fn load<F: Frame>(&mut self, cells: [&Arc<XTree>; 4]);
}

/// One unit of traversal, queued between workers
enum WalkTask {
    Cell(Arc<XTree>),
    FaceXYZ(Arc<XTree>, Arc<XTree>),
    FaceYZX(Arc<XTree>, Arc<XTree>),
    FaceZXY(Arc<XTree>, Arc<XTree>),
    EdgeXYZ(Arc<XTree>, Arc<XTree>, Arc<XTree>, Arc<XTree>),
    EdgeYZX(Arc<XTree>, Arc<XTree>, Arc<XTree>, Arc<XTree>),
    EdgeZXY(Arc<XTree>, Arc<XTree>, Arc<XTree>, Arc<XTree>),
}

/// Worker for the parallel dual walk
///
/// Dispatches become tasks on the shared bounded stack (overflowing to a
/// local stack, like octree construction); disjoint dual subtrees are
/// therefore walked concurrently.  Termination is detected with a counter
/// of in-flight tasks.
struct WalkWorker<'a, M> {
    mesher: M,
    queue: &'a TaskStack<WalkTask>,
    local: Vec<WalkTask>,
    pending: &'a AtomicUsize,
    cancel: &'a AtomicBool,
    progress: Option<&'a ProgressWatcher>,
}

impl<M: Mesher> WalkWorker<'_, M> {
    fn push(&mut self, task: WalkTask) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(task) = self.queue.bounded_push(task) {
            self.local.push(task);
        }
    }

    fn run(mut self) -> M {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            let task = self.local.pop().or_else(|| self.queue.pop());
            let Some(task) = task else {
                if self.pending.load(Ordering::Acquire) == 0 {
                    break;
                }
                std::thread::yield_now();
                continue;
            };
            match &task {
                WalkTask::Cell(t) => {
                    if let Some(p) = self.progress {
                        p.tick(1);
                    }
                    dual_cell(t, &mut self)
                }
                WalkTask::FaceXYZ(a, b) => dual_face::<XYZ, _>(a, b, &mut self),
                WalkTask::FaceYZX(a, b) => dual_face::<YZX, _>(a, b, &mut self),
                WalkTask::FaceZXY(a, b) => dual_face::<ZXY, _>(a, b, &mut self),
                WalkTask::EdgeXYZ(a, b, c, d) => {
                    dual_edge::<XYZ, _>(a, b, c, d, &mut self)
                }
                WalkTask::EdgeYZX(a, b, c, d) => {
                    dual_edge::<YZX, _>(a, b, c, d, &mut self)
                }
                WalkTask::EdgeZXY(a, b, c, d) => {
                    dual_edge::<ZXY, _>(a, b, c, d, &mut self)
                }
            }
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        self.mesher
    }
}

impl<M: Mesher> DualBuilder for WalkWorker<'_, M> {
    fn cell(&mut self, cell: &Arc<XTree>) {
        self.push(WalkTask::Cell(cell.clone()));
    }

    fn face<F: Frame>(&mut self, lo: &Arc<XTree>, hi: &Arc<XTree>) {
        let (lo, hi) = (lo.clone(), hi.clone());
        match F::frame().0 {
            X => self.push(WalkTask::FaceXYZ(lo, hi)),
            Y => self.push(WalkTask::FaceYZX(lo, hi)),
            Z => self.push(WalkTask::FaceZXY(lo, hi)),
            _ => unreachable!(),
        }
    }

    fn edge<F: Frame>(
        &mut self,
        a: &Arc<XTree>,
        b: &Arc<XTree>,
        c: &Arc<XTree>,
        d: &Arc<XTree>,
    ) {
        let (a, b, c, d) = (a.clone(), b.clone(), c.clone(), d.clone());
        match F::frame().0 {
            X => self.push(WalkTask::EdgeXYZ(a, b, c, d)),
            Y => self.push(WalkTask::EdgeYZX(a, b, c, d)),
            Z => self.push(WalkTask::EdgeZXY(a, b, c, d)),
            _ => unreachable!(),
        }
    }

    fn leaf(&mut self, cell: &Arc<XTree>) {
        self.mesher.leaf(cell);
    }

    fn load<F: Frame>(&mut self, cells: [&Arc<XTree>; 4]) {
        self.mesher.load::<F>(cells);
    }
}

/// Walks the dual of `tree` with one mesher per worker
///
/// Returns the meshers, whose per-thread buffers are merged by the caller.
pub(crate) fn walk<M: Mesher>(
    tree: &Arc<XTree>,
    meshers: Vec<M>,
    progress: Option<&ProgressWatcher>,
    cancel: &AtomicBool,
) -> Vec<M> {
    let workers = meshers.len().max(1);
    let queue = TaskStack::new(workers);
    let pending = AtomicUsize::new(1);
    let pushed = queue.bounded_push(WalkTask::Cell(tree.clone()));
    assert!(pushed.is_ok());

    std::thread::scope(|s| {
        let handles = meshers
            .into_iter()
            .map(|mesher| {
                let worker = WalkWorker {
                    mesher,
                    queue: &queue,
                    local: vec![],
                    pending: &pending,
                    cancel,
                    progress,
                };
                s.spawn(|| worker.run())
            })
            .collect::<Vec<_>>();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
