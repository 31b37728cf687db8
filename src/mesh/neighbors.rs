//! Lazily-derived neighbor tables
//!
//! A [`Neighbors`] value maps each of the 26 axis-aligned neighbor
//! positions of a cell to the same-size-or-shallower cell on that side (or
//! nothing, when that part of the tree hasn't been built).  Tables are
//! derived child-from-parent just before a cell is evaluated, which is as
//! late as possible: siblings built concurrently by other workers become
//! visible exactly when their publication lands.
use crate::mesh::{
    types::{Corner, Edge},
    xtree::{Cell, XTree},
};
use nalgebra::Vector3;
use once_cell::sync::Lazy;
use std::sync::{Arc, OnceLock};

/// Neighbor directions are ternary-encoded: each axis contributes
/// `-1 | 0 | +1`, packed as `(dx+1) + 3*(dy+1) + 9*(dz+1)`.  Index 13 is
/// the cell itself and stays unused.
const CENTER: usize = 13;

fn encode(d: [i8; 3]) -> usize {
    ((d[0] + 1) + 3 * (d[1] + 1) + 9 * (d[2] + 1)) as usize
}

fn decode(i: usize) -> [i8; 3] {
    [
        (i % 3) as i8 - 1,
        ((i / 3) % 3) as i8 - 1,
        ((i / 9) % 3) as i8 - 1,
    ]
}

/// Where a child's neighbor in a given direction comes from
#[derive(Copy, Clone, Debug)]
enum Source {
    /// A sibling within the same parent, by corner index
    Sibling(u8),

    /// The child (by corner index) of the parent's neighbor in `dir`
    Cousin { dir: u8, child: u8 },
}

/// Per-(child, direction) derivation rules, computed once
static DERIVATION: Lazy<[[Source; 27]; 8]> = Lazy::new(|| {
    std::array::from_fn(|child| {
        std::array::from_fn(|dir| {
            let d = decode(dir);
            let mut within = true;
            let mut pos = [0i8; 3];
            for (a, p) in pos.iter_mut().enumerate() {
                *p = ((child >> a) & 1) as i8 + d[a];
                within &= (0..=1).contains(p);
            }
            if within {
                let s = pos[0] | (pos[1] << 1) | (pos[2] << 2);
                Source::Sibling(s as u8)
            } else {
                let dp = pos.map(|p| p >> 1); // -1, 0, or +1
                let q = pos
                    .iter()
                    .enumerate()
                    .map(|(a, p)| ((p & 1) as u8) << a)
                    .sum::<u8>();
                Source::Cousin {
                    dir: encode(dp) as u8,
                    child: q,
                }
            }
        })
    })
});

/// Table of neighbors for one cell
pub struct Neighbors {
    cells: [Option<Arc<XTree>>; 27],
}

impl Clone for Neighbors {
    fn clone(&self) -> Self {
        Self {
            cells: std::array::from_fn(|i| self.cells[i].clone()),
        }
    }
}

impl Default for Neighbors {
    fn default() -> Self {
        Self {
            cells: std::array::from_fn(|_| None),
        }
    }
}

impl Neighbors {
    /// Derives a child's neighbor table from its parent's
    ///
    /// `self` is the parent's table and `siblings` is the parent's slot
    /// array, which may be partially populated; unpublished siblings simply
    /// produce empty entries.  Outside-parent entries come from the
    /// parent's own neighbors, stepping down one level when that neighbor
    /// has children on the shared boundary.
    pub fn push(
        &self,
        child: Corner,
        siblings: &[OnceLock<Arc<XTree>>; 8],
    ) -> Neighbors {
        let rules = &DERIVATION[child.index()];
        let cells = std::array::from_fn(|dir| {
            if dir == CENTER {
                return None;
            }
            match rules[dir] {
                Source::Sibling(s) => {
                    siblings[s as usize].get().cloned()
                }
                Source::Cousin { dir, child } => {
                    let n = self.cells[dir as usize].as_ref()?;
                    match &n.cell {
                        Cell::Branch(children) => {
                            Some(children[child as usize].clone())
                        }
                        _ => Some(n.clone()),
                    }
                }
            }
        });
        Neighbors { cells }
    }

    /// Looks up an already-sampled crossing on the given edge
    ///
    /// Each cell edge is shared with three neighbors; if any of them is a
    /// same-size leaf that has sampled the shared edge, its crossing is
    /// returned as a `(position, gradient)` pair.  Shallower neighbors are
    /// skipped, since their edges don't coincide with ours.
    pub fn intersection(
        &self,
        edge: Edge,
        level: u8,
    ) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let t = edge.axis();
        let u = t.next();
        let v = u.next();
        let du = if edge.u() { 1 } else { -1 };
        let dv = if edge.v() { 1 } else { -1 };
        for (use_u, use_v) in [(true, false), (false, true), (true, true)] {
            let mut d = [0i8; 3];
            if use_u {
                d[u.index()] = du;
            }
            if use_v {
                d[v.index()] = dv;
            }
            let Some(n) = self.cells[encode(d)].as_ref() else {
                continue;
            };
            if n.region.level != level {
                continue;
            }
            let Cell::Leaf(leaf) = &n.cell else {
                continue;
            };
            let shared = Edge::of(t, edge.u() ^ use_u, edge.v() ^ use_v);
            if let Some(i) = &leaf.intersections[shared.index()] {
                return Some((i.pos, i.deriv));
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        eval::Evaluator, mesh::xtree::eval_leaf, region::Region, tape::Tape,
        tree::Tree,
    };

    #[test]
    fn derivation_counts() {
        // Every child has exactly 7 within-parent neighbors
        for child in 0..8 {
            let siblings = DERIVATION[child]
                .iter()
                .enumerate()
                .filter(|(dir, s)| {
                    *dir != CENTER && matches!(s, Source::Sibling(..))
                })
                .count();
            assert_eq!(siblings, 7, "child {child}");
        }
    }

    #[test]
    fn derivation_symmetry() {
        // Child 0's +X neighbor is sibling 1; its -X neighbor is the
        // +X-most child of the parent's -X neighbor.
        let d = DERIVATION[0][encode([1, 0, 0])];
        assert!(matches!(d, Source::Sibling(1)));
        let d = DERIVATION[0][encode([-1, 0, 0])];
        let Source::Cousin { dir, child } = d else {
            panic!("expected cousin, got {d:?}");
        };
        assert_eq!(decode(dir as usize), [-1, 0, 0]);
        assert_eq!(child, 1);
    }

    #[test]
    fn sibling_visibility() {
        let f = Tree::z();
        let tape = Tape::new(&f);
        let mut eval = Evaluator::new();
        let region = Region::with_level(
            nalgebra::Vector3::new(-1.0, -1.0, -1.0),
            nalgebra::Vector3::new(1.0, 1.0, 1.0),
            1,
        );
        let children = region.subdivide();

        let slots: [OnceLock<Arc<XTree>>; 8] =
            std::array::from_fn(|_| OnceLock::new());
        let c0 = eval_leaf(
            &mut eval,
            &tape,
            children[0],
            &Neighbors::default(),
            0.1,
        );
        slots[0].set(Arc::new(c0)).unwrap();

        // Child 1 sees child 0 across -X; child 2 sees it across -Y but
        // has no +X neighbor yet
        let n1 = Neighbors::default().push(Corner::new(1), &slots);
        assert!(n1.cells[encode([-1, 0, 0])].is_some());
        let n2 = Neighbors::default().push(Corner::new(2), &slots);
        assert!(n2.cells[encode([0, -1, 0])].is_some());
        assert!(n2.cells[encode([1, 0, 0])].is_none());
    }

    #[test]
    fn intersection_reuse() {
        // Two cells stacked on Y share an X-directed edge on the boundary;
        // the second cell reuses the first's crossing on it.
        let f = Tree::x() + 1.0;
        let tape = Tape::new(&f);
        let mut eval = Evaluator::new();
        let region = Region::with_level(
            nalgebra::Vector3::new(-2.0, -2.0, -2.0),
            nalgebra::Vector3::new(2.0, 2.0, 2.0),
            1,
        );
        let children = region.subdivide();

        let slots: [OnceLock<Arc<XTree>>; 8] =
            std::array::from_fn(|_| OnceLock::new());
        let c0 = eval_leaf(
            &mut eval,
            &tape,
            children[0],
            &Neighbors::default(),
            0.1,
        );
        let l0 = c0.leaf().expect("cell 0 crosses the plane");

        // Cell 0's X-directed edge on its upper-Y face coincides with cell
        // 2's edge on its lower-Y face.
        let e0 = Edge::of(crate::mesh::types::X, true, false);
        let expected = l0.intersections[e0.index()]
            .as_ref()
            .map(|i| i.pos);
        slots[0].set(Arc::new(c0)).unwrap();

        let n2 = Neighbors::default().push(Corner::new(2), &slots);
        let e2 = Edge::of(crate::mesh::types::X, false, false);
        let got = n2.intersection(e2, 0).map(|(pos, _deriv)| pos);
        assert_eq!(got, expected);
    }
}
