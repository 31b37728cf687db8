//! Context-free expression trees
//!
//! A [`Tree`] is a handle to a node in a reference-counted expression DAG.
//! Trees are built with ordinary math operators, then flattened into a
//! [`Tape`](crate::tape::Tape) for evaluation.
use std::sync::Arc;

/// Single-argument opcodes
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum UnaryOpcode {
    Neg,
    Abs,
    Sqrt,
    Square,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
}

/// Two-argument opcodes
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOpcode {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Atan2,
    Mod,
    NanFill,
}

/// Opcode type for tree nodes
#[derive(Debug)]
pub enum TreeOp {
    /// The X coordinate
    X,
    /// The Y coordinate
    Y,
    /// The Z coordinate
    Z,
    /// A constant value
    Const(f64),
    /// A single-argument operation
    Unary(UnaryOpcode, Tree),
    /// A two-argument operation
    Binary(BinaryOpcode, Tree, Tree),
}

impl Drop for TreeOp {
    fn drop(&mut self) {
        // The normal recursive Drop can overflow the stack on deep trees, so
        // unhook children onto an explicit stack instead.
        if self.fast_drop() {
            return;
        }
        let mut todo = vec![std::mem::replace(self, TreeOp::Const(0.0))];
        let empty = Tree(Arc::new(TreeOp::Const(0.0)));
        while let Some(mut t) = todo.pop() {
            for c in t.iter_children() {
                let arg = std::mem::replace(c, empty.clone());
                todo.extend(Arc::into_inner(arg.0));
            }
            drop(t);
        }
    }
}

impl TreeOp {
    /// Checks whether this node can use the default (recursive) drop
    ///
    /// That's only safe if all of its children terminate immediately.
    fn fast_drop(&self) -> bool {
        fn leaf(t: &Tree) -> bool {
            matches!(
                *t.0,
                TreeOp::Const(..) | TreeOp::X | TreeOp::Y | TreeOp::Z
            )
        }
        match self {
            TreeOp::Const(..) | TreeOp::X | TreeOp::Y | TreeOp::Z => true,
            TreeOp::Unary(_op, arg) => leaf(arg),
            TreeOp::Binary(_op, lhs, rhs) => leaf(lhs) && leaf(rhs),
        }
    }

    fn iter_children(&mut self) -> impl Iterator<Item = &mut Tree> {
        match self {
            TreeOp::Const(..) | TreeOp::X | TreeOp::Y | TreeOp::Z => {
                [None, None]
            }
            TreeOp::Unary(_op, arg) => [Some(arg), None],
            TreeOp::Binary(_op, lhs, rhs) => [Some(lhs), Some(rhs)],
        }
        .into_iter()
        .flatten()
    }
}

/// Owned handle for a node in an expression DAG
#[derive(Clone, Debug)]
pub struct Tree(Arc<TreeOp>);

impl std::ops::Deref for Tree {
    type Target = TreeOp;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<f64> for Tree {
    fn from(v: f64) -> Tree {
        Tree::constant(v)
    }
}

impl From<f32> for Tree {
    fn from(v: f32) -> Tree {
        Tree::constant(v as f64)
    }
}

impl From<i32> for Tree {
    fn from(v: i32) -> Tree {
        Tree::constant(v as f64)
    }
}

impl From<TreeOp> for Tree {
    fn from(t: TreeOp) -> Tree {
        Tree(Arc::new(t))
    }
}

impl Tree {
    /// Returns the X coordinate
    pub fn x() -> Self {
        TreeOp::X.into()
    }
    /// Returns the Y coordinate
    pub fn y() -> Self {
        TreeOp::Y.into()
    }
    /// Returns the Z coordinate
    pub fn z() -> Self {
        TreeOp::Z.into()
    }
    /// Returns an `(x, y, z)` tuple
    pub fn axes() -> (Self, Self, Self) {
        (Self::x(), Self::y(), Self::z())
    }
    /// Returns a constant value
    pub fn constant(v: f64) -> Self {
        TreeOp::Const(v).into()
    }

    /// Returns a pointer to the inner [`TreeOp`]
    ///
    /// This can be used as a strong (but not unique) identity.
    pub fn as_ptr(&self) -> *const TreeOp {
        Arc::as_ptr(&self.0)
    }

    fn op_unary(&self, op: UnaryOpcode) -> Self {
        TreeOp::Unary(op, self.clone()).into()
    }
    fn op_binary<T: Into<Tree>>(&self, op: BinaryOpcode, rhs: T) -> Self {
        TreeOp::Binary(op, self.clone(), rhs.into()).into()
    }

    /// Absolute value
    pub fn abs(&self) -> Self {
        self.op_unary(UnaryOpcode::Abs)
    }
    /// Square root
    pub fn sqrt(&self) -> Self {
        self.op_unary(UnaryOpcode::Sqrt)
    }
    /// `self * self`, as a single clause
    pub fn square(&self) -> Self {
        self.op_unary(UnaryOpcode::Square)
    }
    /// Sine (radians)
    pub fn sin(&self) -> Self {
        self.op_unary(UnaryOpcode::Sin)
    }
    /// Cosine (radians)
    pub fn cos(&self) -> Self {
        self.op_unary(UnaryOpcode::Cos)
    }
    /// Tangent (radians)
    pub fn tan(&self) -> Self {
        self.op_unary(UnaryOpcode::Tan)
    }
    /// Inverse sine
    pub fn asin(&self) -> Self {
        self.op_unary(UnaryOpcode::Asin)
    }
    /// Inverse cosine
    pub fn acos(&self) -> Self {
        self.op_unary(UnaryOpcode::Acos)
    }
    /// Inverse tangent
    pub fn atan(&self) -> Self {
        self.op_unary(UnaryOpcode::Atan)
    }
    /// Exponential
    pub fn exp(&self) -> Self {
        self.op_unary(UnaryOpcode::Exp)
    }
    /// Minimum of two values
    pub fn min<T: Into<Tree>>(&self, rhs: T) -> Self {
        self.op_binary(BinaryOpcode::Min, rhs)
    }
    /// Maximum of two values
    pub fn max<T: Into<Tree>>(&self, rhs: T) -> Self {
        self.op_binary(BinaryOpcode::Max, rhs)
    }
    /// Two-argument inverse tangent, with `self` as the `y` value
    pub fn atan2<T: Into<Tree>>(&self, x: T) -> Self {
        self.op_binary(BinaryOpcode::Atan2, x)
    }
    /// Euclidean remainder
    pub fn modulo<T: Into<Tree>>(&self, rhs: T) -> Self {
        self.op_binary(BinaryOpcode::Mod, rhs)
    }
    /// Returns `self`, substituting `rhs` wherever `self` is NaN
    pub fn nan_fill<T: Into<Tree>>(&self, rhs: T) -> Self {
        self.op_binary(BinaryOpcode::NanFill, rhs)
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $fn:ident, $op:expr) => {
        impl<T: Into<Tree>> std::ops::$trait<T> for Tree {
            type Output = Tree;
            fn $fn(self, rhs: T) -> Tree {
                self.op_binary($op, rhs)
            }
        }
        impl std::ops::$trait<Tree> for f64 {
            type Output = Tree;
            fn $fn(self, rhs: Tree) -> Tree {
                Tree::constant(self).op_binary($op, rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOpcode::Add);
impl_binary_op!(Sub, sub, BinaryOpcode::Sub);
impl_binary_op!(Mul, mul, BinaryOpcode::Mul);
impl_binary_op!(Div, div, BinaryOpcode::Div);

impl std::ops::Neg for Tree {
    type Output = Tree;
    fn neg(self) -> Tree {
        self.op_unary(UnaryOpcode::Neg)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tree_build() {
        let (x, y, _z) = Tree::axes();
        let f = (x.square() + y.square()).sqrt() - 1.0;
        let TreeOp::Binary(BinaryOpcode::Sub, ..) = *f else {
            panic!("unexpected root {f:?}");
        };
    }

    #[test]
    fn deep_tree_drop() {
        // A chain this long would overflow the stack under recursive Drop
        let mut t = Tree::x();
        for _ in 0..1_000_000 {
            t = t + 1.0;
        }
        drop(t);
    }
}
