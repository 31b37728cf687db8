//! Octree cells: classification, leaf sampling, and upward merging
use crate::{
    eval::Evaluator,
    mesh::{
        neighbors::Neighbors,
        pool::ObjectPool,
        qef::QuadraticErrorSolver,
        types::{Corner, Edge, Frame, XYZ, YZX, ZXY},
    },
    region::Region,
    tape::Tape,
};
use nalgebra::Vector3;
use std::sync::{atomic::AtomicU64, Arc};

/// A single octree cell
///
/// Cells are immutable once published: a cell is built (and mutated) by
/// exactly one worker, then shared behind an [`Arc`] when it is installed
/// into its parent.
#[derive(Debug)]
pub struct XTree {
    /// The region this cell covers
    pub region: Region,

    /// Cell state; exactly one of empty / full / leaf / branch
    pub cell: Cell,
}

/// State of an octree cell
#[derive(Debug)]
pub enum Cell {
    /// The field is strictly positive throughout the region
    Empty,
    /// The field is strictly negative throughout the region
    Full,
    /// The region contains (or may contain) a zero crossing
    Leaf(Leaf),
    /// The cell was subdivided; children are in corner order
    Branch([Arc<XTree>; 8]),
}

/// Data for a cell that intersects the surface
#[derive(Debug)]
pub struct Leaf {
    /// Bitmask of corners where the field is negative (inside)
    pub mask: u8,

    /// Dual vertex, clipped to the cell's region
    pub vertex: Vector3<f64>,

    /// QEF residual at the vertex; infinite if evaluation faulted
    pub err: f64,

    /// Accumulated QEF, kept so that parents can merge leafs upward
    pub qef: QuadraticErrorSolver,

    /// Per-edge surface crossings, indexed by [`Edge`]
    pub intersections: [Option<Intersection>; 12],

    /// Mesh vertex index claimed during the dual walk; 0 when unclaimed
    pub index: AtomicU64,
}

/// A surface crossing on a cell edge
#[derive(Debug)]
pub struct Intersection {
    /// Position of the crossing
    pub pos: Vector3<f64>,

    /// Unit surface gradient at the crossing
    pub deriv: Vector3<f64>,

    /// Mesh vertex index claimed during fan meshing; 0 when unclaimed
    pub index: AtomicU64,
}

impl Intersection {
    fn new(pos: Vector3<f64>, deriv: Vector3<f64>) -> Self {
        Self {
            pos,
            deriv,
            index: AtomicU64::new(0),
        }
    }

    /// Copies position and gradient, resetting the claimed index
    fn duplicate(&self) -> Self {
        Self::new(self.pos, self.deriv)
    }
}

impl XTree {
    /// Checks whether this cell terminates the tree (i.e. is not a branch)
    pub fn is_leaf(&self) -> bool {
        !matches!(self.cell, Cell::Branch(..))
    }

    /// Returns leaf data, if this cell has any
    pub fn leaf(&self) -> Option<&Leaf> {
        match &self.cell {
            Cell::Leaf(leaf) => Some(leaf),
            _ => None,
        }
    }

    /// Checks whether the given corner is inside the solid
    ///
    /// # Panics
    /// If the cell is a branch
    pub fn corner(&self, c: Corner) -> bool {
        match &self.cell {
            Cell::Leaf(leaf) => c.set_in(leaf.mask),
            Cell::Empty => false,
            Cell::Full => true,
            Cell::Branch(..) => panic!("corner() called on a branch"),
        }
    }
}

/// Result of classifying a cell by interval evaluation
pub(crate) enum CellResult {
    /// The cell is done (empty or full); no children are needed
    Done(XTree),

    /// The cell is ambiguous; recurse with the specialized tape
    Recurse(Tape),
}

/// Classifies a cell by interval arithmetic
///
/// Does **not** allocate children; the caller decides how to schedule the
/// recursion.  An evaluator fault (NaN interval) is treated as ambiguous,
/// since we can't prove the cell is empty or full.
pub(crate) fn eval_interval(
    eval: &mut Evaluator,
    tape: &Tape,
    region: &Region,
    pool: &mut ObjectPool,
) -> CellResult {
    let (i, next) = eval.interval.eval_and_simplify(
        tape,
        region,
        &mut pool.tape_storage,
    );
    if i.lower > 0.0 {
        CellResult::Done(XTree {
            region: *region,
            cell: Cell::Empty,
        })
    } else if i.upper < 0.0 {
        CellResult::Done(XTree {
            region: *region,
            cell: Cell::Full,
        })
    } else {
        CellResult::Recurse(next)
    }
}

/// Samples a leaf-sized cell
///
/// Corners are point-sampled to build the sign mask; each sign-changing
/// edge is bisected to locate the crossing (reusing a neighbor's crossing
/// when one has already sampled the shared edge), and the crossings are
/// accumulated into a QEF whose minimizer becomes the dual vertex.
pub(crate) fn eval_leaf(
    eval: &mut Evaluator,
    tape: &Tape,
    region: Region,
    neighbors: &Neighbors,
    min_feature: f64,
) -> XTree {
    let mut mask = 0u8;
    let mut fault = false;
    for i in Corner::iter() {
        let v = eval.point.eval(tape, region.corner(i));
        fault |= v.is_nan();
        if v < 0.0 {
            mask |= 1 << i.index();
        }
    }

    if !fault {
        if mask == 0 {
            return XTree {
                region,
                cell: Cell::Empty,
            };
        } else if mask == 255 {
            return XTree {
                region,
                cell: Cell::Full,
            };
        }
    }

    let mut qef = QuadraticErrorSolver::new();
    let mut intersections: [Option<Intersection>; 12] =
        std::array::from_fn(|_| None);
    let tol = min_feature * 1e-6;
    for e in Edge::iter() {
        let (start, end) = e.corners();
        let (s, t) = (start.set_in(mask), end.set_in(mask));
        if s == t {
            continue;
        }

        // A neighbor that has already sampled this edge saves us the search
        if let Some((pos, deriv)) = neighbors.intersection(e, region.level) {
            qef.add_intersection(pos, deriv);
            intersections[e.index()] = Some(Intersection::new(pos, deriv));
            continue;
        }

        let (inside, outside) = if s { (start, end) } else { (end, start) };
        let mut a = region.corner(inside);
        let mut b = region.corner(outside);
        for _ in 0..64 {
            if (b - a).norm() <= tol {
                break;
            }
            let mid = (a + b) / 2.0;
            if eval.point.eval(tape, mid) < 0.0 {
                a = mid;
            } else {
                b = mid;
            }
        }
        let pos = (a + b) / 2.0;
        let g = eval.grad.eval(tape, pos);
        if g.is_finite() && g.d().norm() > 0.0 {
            let deriv = g.d().normalize();
            qef.add_intersection(pos, deriv);
            intersections[e.index()] = Some(Intersection::new(pos, deriv));
        } else {
            fault = true;
        }
    }

    let (pos, err) = qef.solve();
    let vertex = if qef.is_empty() {
        region.center()
    } else {
        region.clamp(pos)
    };
    XTree {
        region,
        cell: Cell::Leaf(Leaf {
            mask,
            vertex,
            err: if fault { f64::INFINITY } else { err },
            qef,
            intersections,
            index: AtomicU64::new(0),
        }),
    }
}

/// Merges 8 finalized children into their parent cell
///
/// All-empty and all-full sets fold to a single empty / full cell.  A set
/// of terminal children whose topology is safe and whose merged QEF
/// residual is within `max_err` collapses into a single leaf, releasing
/// the children; anything else stays a branch.
///
/// `tape` must be valid for the parent's full region (see
/// [`Tape::get_base`]); it's used to arbitrate the collapsed vertex
/// position by actual field magnitude.
pub(crate) fn collect_children(
    eval: &mut Evaluator,
    tape: &Tape,
    region: Region,
    children: [Arc<XTree>; 8],
    max_err: f64,
) -> XTree {
    let mut empty = 0;
    let mut full = 0;
    let mut has_branch = false;
    for c in &children {
        match &c.cell {
            Cell::Empty => empty += 1,
            Cell::Full => full += 1,
            Cell::Branch(..) => has_branch = true,
            Cell::Leaf(..) => (),
        }
    }
    if empty == 8 {
        return XTree {
            region,
            cell: Cell::Empty,
        };
    }
    if full == 8 {
        return XTree {
            region,
            cell: Cell::Full,
        };
    }
    let branch = |children| XTree {
        region,
        cell: Cell::Branch(children),
    };
    if has_branch {
        return branch(children);
    }

    let masks: [u8; 8] = std::array::from_fn(|i| match &children[i].cell {
        Cell::Empty => 0,
        Cell::Full => 255,
        Cell::Leaf(leaf) => leaf.mask,
        Cell::Branch(..) => unreachable!(),
    });
    if !collapsible(&masks) {
        return branch(children);
    }

    let mut qef = QuadraticErrorSolver::new();
    let mut faulted = false;
    for c in &children {
        if let Cell::Leaf(leaf) = &c.cell {
            faulted |= !leaf.err.is_finite();
            qef += leaf.qef;
        }
    }
    if faulted || qef.is_empty() {
        return branch(children);
    }

    let (pos, err) = qef.solve();
    if err > max_err {
        return branch(children);
    }

    // Prefer whichever of the minimizer and the mass point actually sits
    // closer to the surface; near-degenerate QEFs can park the minimizer
    // well off it.  Clamp before evaluating, since the tape is only valid
    // within the region.
    let pos = region.clamp(pos);
    let center = region.clamp(qef.mass_point().xyz() / qef.mass_point().w);
    let v_pos = eval.point.eval(tape, pos).abs();
    let v_center = eval.point.eval(tape, center).abs();
    let vertex = if v_center < v_pos { center } else { pos };

    let mut mask = 0u8;
    for (i, m) in masks.iter().enumerate() {
        mask |= m & (1 << i);
    }

    // Each parent edge is covered by the two children at its endpoints; if
    // the merged corners show a sign change, exactly one of those children
    // holds the crossing for its half-edge.
    let mut intersections: [Option<Intersection>; 12] =
        std::array::from_fn(|_| None);
    for e in Edge::iter() {
        let (start, end) = e.corners();
        if start.set_in(mask) == end.set_in(mask) {
            continue;
        }
        let pick = |c: Corner| {
            children[c.index()]
                .leaf()
                .and_then(|l| l.intersections[e.index()].as_ref())
                .map(Intersection::duplicate)
        };
        intersections[e.index()] = pick(start).or_else(|| pick(end));
    }

    XTree {
        region,
        cell: Cell::Leaf(Leaf {
            mask,
            vertex,
            err,
            qef,
            intersections,
            index: AtomicU64::new(0),
        }),
    }
}

/// Checks whether a set of 8 children can be collapsed
///
/// Based on the three sign predicates from "Dual Contouring of Hermite
/// Data" (Ju et al, 2002), §4.1, applied to the children's corner masks
/// (empty and full cells contribute masks of 0 and 255).
fn collapsible(masks: &[u8; 8]) -> bool {
    // Corner mask of the coarse cell: corner i comes from child i
    let mut mask = 0u8;
    for (i, m) in masks.iter().enumerate() {
        mask |= m & (1 << i);
    }

    for (t, u, v) in [XYZ::frame(), YZX::frame(), ZXY::frame()] {
        // The sign in the middle of a coarse edge must agree with the sign
        // of at least one of the edge's two endpoints.
        for i in 0..4 {
            let a = (u * ((i & 1) != 0)) | (v * ((i & 2) != 0));
            let b = a | t;
            let center = b.set_in(masks[a.index()]);
            if [a, b].iter().all(|c| c.set_in(mask) != center) {
                return false;
            }
        }

        // The sign in the middle of a coarse face must agree with the sign
        // of at least one of the face's four corners.
        for i in 0..2 {
            let a: Corner = (t * (i == 1)).into();
            let b = a | u;
            let c = a | v;
            let d = a | u | v;
            let center = d.set_in(masks[a.index()]);
            if [a, b, c, d].iter().all(|k| k.set_in(mask) != center) {
                return false;
            }
        }
    }

    // The sign in the middle of the coarse cube must agree with the sign
    // of at least one of the cube's eight corners.
    let center = Corner::new(7).set_in(masks[0]);
    if Corner::iter().all(|c| c.set_in(mask) != center) {
        return false;
    }

    true
}
