//! Dual-contouring mesh generation
use crate::mesh::{
    dual::Mesher,
    types::{Edge, Frame},
    xtree::{Cell, Leaf, XTree},
    Mesh,
};
use nalgebra::Vector3;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Tag marking a claimed vertex index (so 0 remains "unclaimed")
const VERT_TAG: u64 = 1 << 63;

/// Bit offset of the owning thread within a claimed index
const THREAD_SHIFT: u32 = 55;

const INDEX_MASK: u64 = (1 << THREAD_SHIFT) - 1;

/// Per-thread mesh buffers
///
/// Vertices claimed during the walk get provisional indices tagged with
/// the owning thread; [`merge`] offsets and compacts them into a single
/// [`Mesh`], reserving index 0 as a "no vertex" sentinel.
pub(crate) struct PerThreadBRep {
    thread: usize,
    pub(crate) verts: Vec<Vector3<f64>>,
    pub(crate) tris: Vec<[u64; 3]>,
}

impl PerThreadBRep {
    pub fn new(thread: usize) -> Self {
        assert!(thread < (1 << (63 - THREAD_SHIFT)));
        Self {
            thread,
            verts: vec![],
            tris: vec![],
        }
    }

    fn tagged(&self, i: usize) -> u64 {
        let i = i as u64;
        assert!(i < (1 << THREAD_SHIFT));
        i | VERT_TAG | ((self.thread as u64) << THREAD_SHIFT)
    }

    /// Records a vertex owned by this thread alone
    pub fn push_vertex(&mut self, pos: Vector3<f64>) -> u64 {
        let out = self.tagged(self.verts.len());
        self.verts.push(pos);
        out
    }

    /// Claims a shared vertex slot, or adopts another thread's claim
    ///
    /// The slot starts at 0; the winner of the compare-exchange stores the
    /// vertex in its own buffer, and everyone else reuses the winner's
    /// tagged index.
    pub fn claim(&mut self, slot: &AtomicU64, pos: Vector3<f64>) -> u64 {
        let next = self.tagged(self.verts.len());
        match slot.compare_exchange(
            0,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                self.verts.push(pos);
                next
            }
            Err(prev) => prev,
        }
    }

    /// Records a triangle of claimed indices
    pub fn triangle(&mut self, a: u64, b: u64, c: u64) {
        self.tris.push([a, b, c]);
    }
}

/// Merges per-thread buffers into a single indexed mesh
///
/// Per-thread vertex indices are offset and concatenated; index 0 of the
/// output is a reserved sentinel, so the first real vertex is at index 1.
pub(crate) fn merge(breps: Vec<PerThreadBRep>) -> Mesh {
    if breps.iter().all(|b| b.verts.is_empty() && b.tris.is_empty()) {
        return Mesh::default();
    }
    let mut offsets = vec![1usize]; // slot 0 is reserved
    for b in &breps {
        offsets.push(offsets.last().unwrap() + b.verts.len());
    }

    let mut mesh = Mesh {
        vertices: Vec::with_capacity(*offsets.last().unwrap()),
        triangles: Vec::with_capacity(
            breps.iter().map(|b| b.tris.len()).sum(),
        ),
    };
    mesh.vertices.push(Vector3::zeros());
    for b in &breps {
        mesh.vertices.extend_from_slice(&b.verts);
    }
    for b in &breps {
        for t in &b.tris {
            let t = t.map(|v| {
                debug_assert!(v & VERT_TAG != 0);
                let thread = ((v & !VERT_TAG) >> THREAD_SHIFT) as usize;
                let index = (v & INDEX_MASK) as usize;
                (offsets[thread] + index) as u32
            });
            mesh.triangles.push(Vector3::new(t[0], t[1], t[2]));
        }
    }
    mesh
}

////////////////////////////////////////////////////////////////////////////////

/// Dual-contouring mesher
///
/// For every shared edge with a sign change, emits a quad (two triangles)
/// connecting the four incident cell vertices; in fan mode, emits four
/// triangles through the edge's intersection point instead.
pub(crate) struct DcMesher {
    pub brep: PerThreadBRep,

    /// Emit triangle fans through edge intersections (hybrid meshing)
    fan: bool,

    /// Zero-area cutoff for degenerate triangles
    eps: f64,
}

impl DcMesher {
    pub fn new(thread: usize, fan: bool, eps: f64) -> Self {
        Self {
            brep: PerThreadBRep::new(thread),
            fan,
            eps,
        }
    }

    fn area(&self, a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> f64 {
        (b - a).cross(&(c - a)).norm() / 2.0
    }
}

impl Mesher for DcMesher {
    fn leaf(&mut self, _cell: &Arc<XTree>) {}

    fn load<F: Frame>(&mut self, cells: [&Arc<XTree>; 4]) {
        // An edge bordered by an empty or full cell has no sign change
        let mut leafs: [Option<&Leaf>; 4] = [None; 4];
        for (l, c) in leafs.iter_mut().zip(&cells) {
            match &c.cell {
                Cell::Leaf(leaf) => *l = Some(leaf),
                Cell::Empty | Cell::Full => return,
                Cell::Branch(..) => unreachable!("load() on a branch"),
            }
        }
        let leafs = leafs.map(Option::unwrap);

        // The deepest cell owns the shared edge; smaller levels are deeper
        let deepest = (0..4).min_by_key(|i| cells[*i].region.level).unwrap();

        // Each cell sees the shared line as one of its own edges
        let (t, _u, _v) = F::frame();
        #[allow(clippy::identity_op)]
        let edges = [
            Edge::new((t.index() * 4 + 3) as u8),
            Edge::new((t.index() * 4 + 2) as u8),
            Edge::new((t.index() * 4 + 0) as u8),
            Edge::new((t.index() * 4 + 1) as u8),
        ];

        // Sign change on the deepest cell's edge decides whether there's
        // anything to do, and which way the surface faces
        let (start, end) = edges[deepest].corners();
        let inside_start = start.set_in(leafs[deepest].mask);
        if inside_start == end.set_in(leafs[deepest].mask) {
            return;
        }

        let pos: [Vector3<f64>; 4] =
            std::array::from_fn(|i| leafs[i].vertex);

        if self.fan {
            // Fan through the intersection point, always taken from the
            // deepest cell so that every tuple along the edge agrees on it
            let Some(hit) = &leafs[deepest].intersections
                [edges[deepest].index()]
            else {
                return;
            };
            let winding = if inside_start { 1 } else { 3 };
            for j in 0..4 {
                let k = (j + winding) % 4;
                if Arc::ptr_eq(cells[j], cells[k])
                    || self.area(pos[j], pos[k], hit.pos) < self.eps
                {
                    continue;
                }
                let a = self.brep.claim(&leafs[j].index, pos[j]);
                let b = self.brep.claim(&leafs[k].index, pos[k]);
                let c = self.brep.claim(&hit.index, hit.pos);
                self.brep.triangle(a, b, c);
            }
        } else {
            // Plain quad, split into two triangles
            let order: [usize; 4] = if inside_start {
                [0, 1, 2, 3]
            } else {
                [0, 3, 2, 1]
            };
            for tri in [
                [order[0], order[1], order[2]],
                [order[0], order[2], order[3]],
            ] {
                let [a, b, c] = tri;
                if Arc::ptr_eq(cells[a], cells[b])
                    || Arc::ptr_eq(cells[b], cells[c])
                    || Arc::ptr_eq(cells[a], cells[c])
                    || self.area(pos[a], pos[b], pos[c]) < self.eps
                {
                    continue;
                }
                let a = self.brep.claim(&leafs[a].index, pos[a]);
                let b = self.brep.claim(&leafs[b].index, pos[b]);
                let c = self.brep.claim(&leafs[c].index, pos[c]);
                self.brep.triangle(a, b, c);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn brep_claim_and_merge() {
        let slot = AtomicU64::new(0);
        let mut a = PerThreadBRep::new(0);
        let mut b = PerThreadBRep::new(1);

        let p = Vector3::new(1.0, 2.0, 3.0);
        let ia = a.claim(&slot, p);
        let ib = b.claim(&slot, p);
        assert_eq!(ia, ib, "second claim must adopt the first");

        let q = b.push_vertex(Vector3::new(4.0, 5.0, 6.0));
        a.triangle(ia, q, ia);
        b.triangle(q, q, ib);

        let mesh = merge(vec![a, b]);
        // Reserved sentinel + one claimed + one pushed
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[0], Vector3::zeros());
        assert_eq!(mesh.vertices[1], p);
        assert_eq!(mesh.triangles.len(), 2);
        assert_eq!(mesh.triangles[0], Vector3::new(1, 2, 1));
        assert_eq!(mesh.triangles[1], Vector3::new(2, 2, 1));
    }
}
