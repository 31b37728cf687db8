//! Flattened (SSA) form of an expression tree
//!
//! A [`Tape`] is an immutable list of clauses in single-assignment form,
//! where each clause refers to earlier clauses by index.  Interval
//! evaluation over a region can *specialize* a tape: `min` and `max`
//! clauses that are dominated by one side within the region are pruned,
//! producing a shorter child tape that is only valid within that region.
//!
//! Specialized tapes keep a handle to the tape they were derived from, so
//! they form a DAG with edges pointing from finer to coarser regions;
//! [`Tape::get_base`] walks those edges to recover a tape that is valid for
//! a larger region.
use crate::{
    region::Region,
    tree::{BinaryOpcode, Tree, TreeOp, UnaryOpcode},
};
use std::{collections::HashMap, sync::Arc};

/// A single clause in the flattened program
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Clause {
    /// The X coordinate
    X,
    /// The Y coordinate
    Y,
    /// The Z coordinate
    Z,
    /// A constant value
    Const(f64),
    /// A single-argument operation on an earlier clause
    Unary(UnaryOpcode, u32),
    /// A two-argument operation on earlier clauses
    Binary(BinaryOpcode, u32, u32),
}

/// Result of evaluating a `min` or `max` clause over an interval
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Choice {
    /// The left-hand argument always wins
    Left,
    /// The right-hand argument always wins
    Right,
    /// Either side may win
    Both,
}

/// Key used for hash-consing during flattening
#[derive(Eq, PartialEq, Hash)]
enum Key {
    X,
    Y,
    Z,
    Const(u64),
    Unary(UnaryOpcode, u32),
    Binary(BinaryOpcode, u32, u32),
}

#[derive(Debug)]
struct TapeData {
    clauses: Vec<Clause>,
    root: u32,

    /// Tape that this was specialized from, forming a DAG
    parent: Option<Tape>,

    /// Region in which this specialization is valid (`None` = everywhere)
    region: Option<Region>,
}

/// Immutable, shareable program over the clause set
#[derive(Clone, Debug)]
pub struct Tape(Arc<TapeData>);

impl Tape {
    /// Flattens an expression tree into a tape
    ///
    /// Shared subtrees and structurally identical clauses are emitted once.
    pub fn new(tree: &Tree) -> Self {
        let mut clauses = vec![];
        let mut seen: HashMap<*const TreeOp, u32> = HashMap::new();
        let mut dedup: HashMap<Key, u32> = HashMap::new();

        enum Visit {
            Down(Tree),
            Up(Tree),
        }
        // Nodes whose descent has already been scheduled; without this, a
        // shared subtree would be traversed once per reference
        let mut pending = std::collections::HashSet::new();
        let mut todo = vec![Visit::Down(tree.clone())];
        while let Some(v) = todo.pop() {
            match v {
                Visit::Down(t) => {
                    if !pending.insert(t.as_ptr()) {
                        continue;
                    }
                    match &*t {
                        TreeOp::X
                        | TreeOp::Y
                        | TreeOp::Z
                        | TreeOp::Const(..) => {
                            todo.push(Visit::Up(t));
                        }
                        TreeOp::Unary(_op, arg) => {
                            let arg = arg.clone();
                            todo.push(Visit::Up(t));
                            todo.push(Visit::Down(arg));
                        }
                        TreeOp::Binary(_op, lhs, rhs) => {
                            let (lhs, rhs) = (lhs.clone(), rhs.clone());
                            todo.push(Visit::Up(t));
                            todo.push(Visit::Down(lhs));
                            todo.push(Visit::Down(rhs));
                        }
                    }
                }
                Visit::Up(t) => {
                    let (key, clause) = match &*t {
                        TreeOp::X => (Key::X, Clause::X),
                        TreeOp::Y => (Key::Y, Clause::Y),
                        TreeOp::Z => (Key::Z, Clause::Z),
                        TreeOp::Const(f) => {
                            (Key::Const(f.to_bits()), Clause::Const(*f))
                        }
                        TreeOp::Unary(op, arg) => {
                            let a = seen[&arg.as_ptr()];
                            (Key::Unary(*op, a), Clause::Unary(*op, a))
                        }
                        TreeOp::Binary(op, lhs, rhs) => {
                            let a = seen[&lhs.as_ptr()];
                            let b = seen[&rhs.as_ptr()];
                            (
                                Key::Binary(*op, a, b),
                                Clause::Binary(*op, a, b),
                            )
                        }
                    };
                    let index = *dedup.entry(key).or_insert_with(|| {
                        clauses.push(clause);
                        (clauses.len() - 1) as u32
                    });
                    seen.insert(t.as_ptr(), index);
                }
            }
        }

        let root = seen[&tree.as_ptr()];
        Tape(Arc::new(TapeData {
            clauses,
            root,
            parent: None,
            region: None,
        }))
    }

    /// Number of clauses in the tape
    pub fn len(&self) -> usize {
        self.0.clauses.len()
    }

    /// Checks whether the tape contains no clauses
    pub fn is_empty(&self) -> bool {
        self.0.clauses.is_empty()
    }

    /// Clause slice, in evaluation order
    pub fn clauses(&self) -> &[Clause] {
        &self.0.clauses
    }

    /// Index of the clause holding the final result
    pub fn root(&self) -> u32 {
        self.0.root
    }

    /// Region in which this tape is valid, or `None` for the root tape
    pub fn region(&self) -> Option<&Region> {
        self.0.region.as_ref()
    }

    /// Attempts to reclaim the clause buffer for reuse
    ///
    /// Succeeds only if this is the last handle to the tape.
    pub(crate) fn take(self) -> Option<Vec<Clause>> {
        Arc::into_inner(self.0).map(|d| d.clauses)
    }

    /// Builds a specialized child tape from recorded min/max choices
    ///
    /// `choices` is indexed by clause and is only meaningful at `min`/`max`
    /// clauses.  The child keeps a handle to `self` and records `region` as
    /// its validity region.
    pub(crate) fn simplify(
        &self,
        choices: &[Choice],
        region: Region,
        storage: &mut Vec<Vec<Clause>>,
    ) -> Tape {
        debug_assert_eq!(choices.len(), self.len());
        let n = self.len();

        // Walk backwards from the root, marking live clauses; a narrowed
        // min/max keeps only the winning argument alive.
        let mut active = vec![false; n];
        active[self.0.root as usize] = true;
        for i in (0..n).rev() {
            if !active[i] {
                continue;
            }
            match self.0.clauses[i] {
                Clause::Unary(_op, a) => active[a as usize] = true,
                Clause::Binary(op, a, b)
                    if matches!(
                        op,
                        BinaryOpcode::Min | BinaryOpcode::Max
                    ) =>
                {
                    match choices[i] {
                        Choice::Left => active[a as usize] = true,
                        Choice::Right => active[b as usize] = true,
                        Choice::Both => {
                            active[a as usize] = true;
                            active[b as usize] = true;
                        }
                    }
                }
                Clause::Binary(_op, a, b) => {
                    active[a as usize] = true;
                    active[b as usize] = true;
                }
                _ => (),
            }
        }

        // Forward pass: emit live clauses with remapped arguments.  A
        // narrowed min/max is not emitted at all; it becomes an alias for
        // its winning argument.
        let mut out = storage.pop().unwrap_or_default();
        out.clear();
        let mut remap = vec![u32::MAX; n];
        for i in 0..n {
            if !active[i] {
                continue;
            }
            let c = match self.0.clauses[i] {
                Clause::Binary(op, a, b)
                    if matches!(
                        op,
                        BinaryOpcode::Min | BinaryOpcode::Max
                    ) =>
                {
                    match choices[i] {
                        Choice::Left => {
                            remap[i] = remap[a as usize];
                            continue;
                        }
                        Choice::Right => {
                            remap[i] = remap[b as usize];
                            continue;
                        }
                        Choice::Both => Clause::Binary(
                            op,
                            remap[a as usize],
                            remap[b as usize],
                        ),
                    }
                }
                Clause::Unary(op, a) => Clause::Unary(op, remap[a as usize]),
                Clause::Binary(op, a, b) => {
                    Clause::Binary(op, remap[a as usize], remap[b as usize])
                }
                c => c,
            };
            out.push(c);
            remap[i] = (out.len() - 1) as u32;
        }

        let root = remap[self.0.root as usize];
        debug_assert_ne!(root, u32::MAX);
        Tape(Arc::new(TapeData {
            clauses: out,
            root,
            parent: Some(self.clone()),
            region: Some(region),
        }))
    }

    /// Returns the nearest ancestor tape that is valid for `region`
    ///
    /// Used when folding back up the octree: a tape specialized for a child
    /// region must not be evaluated over the parent's larger region.
    pub fn get_base(mut tape: Tape, region: &Region) -> Tape {
        loop {
            match tape.0.region {
                Some(r) if !r.contains_region(region) => {
                    let Some(parent) = tape.0.parent.clone() else {
                        return tape;
                    };
                    tape = parent;
                }
                _ => return tape,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eval::interval::IntervalEval;
    use nalgebra::Vector3;

    #[test]
    fn tape_dedup() {
        let x = Tree::x();
        let f = x.square() + x.square();
        let tape = Tape::new(&f);
        // x, square, add
        assert_eq!(tape.len(), 3);
    }

    #[test]
    fn tape_simplify_min() {
        let (x, y, _z) = Tree::axes();
        let f = x.min(y);
        let tape = Tape::new(&f);
        assert_eq!(tape.len(), 3);

        // A region where x is always smaller than y
        let region = Region::with_level(
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(1.0, 11.0, 1.0),
            0,
        );
        let mut eval = IntervalEval::new();
        let mut storage = vec![];
        let (out, next) =
            eval.eval_and_simplify(&tape, &region, &mut storage);
        assert_eq!(out.lower, 0.0);
        assert_eq!(out.upper, 1.0);
        assert_eq!(next.len(), 1);
        assert_eq!(next.clauses()[0], Clause::X);
    }

    #[test]
    fn tape_get_base() {
        let (x, y, _z) = Tree::axes();
        let f = x.min(y);
        let tape = Tape::new(&f);

        let big = Region::with_level(
            Vector3::new(0.0, 10.0, 0.0),
            Vector3::new(2.0, 12.0, 2.0),
            1,
        );
        let small = big.subdivide()[0];

        let mut eval = IntervalEval::new();
        let mut storage = vec![];
        let (_out, sub) =
            eval.eval_and_simplify(&tape, &small, &mut storage);
        assert_eq!(sub.len(), 1);

        // The specialized tape is valid for `small` but not for `big`
        let base = Tape::get_base(sub.clone(), &small);
        assert_eq!(base.len(), 1);
        let base = Tape::get_base(sub, &big);
        assert_eq!(base.len(), 3);
    }
}
