//! Single-point tape evaluation
use crate::{
    tape::{Clause, Tape},
    tree::{BinaryOpcode, UnaryOpcode},
};
use nalgebra::Vector3;

/// Tape evaluator for a single point, with reusable scratch storage
pub struct PointEval {
    slots: Vec<f64>,
}

impl Default for PointEval {
    fn default() -> Self {
        Self::new()
    }
}

impl PointEval {
    pub fn new() -> Self {
        Self { slots: vec![] }
    }

    /// Evaluates the tape at the given position
    pub fn eval(&mut self, tape: &Tape, p: Vector3<f64>) -> f64 {
        self.slots.clear();
        self.slots.resize(tape.len(), 0.0);
        for (i, c) in tape.clauses().iter().enumerate() {
            let value = match *c {
                Clause::X => p.x,
                Clause::Y => p.y,
                Clause::Z => p.z,
                Clause::Const(f) => f,
                Clause::Unary(op, a) => {
                    let a = self.slots[a as usize];
                    match op {
                        UnaryOpcode::Neg => -a,
                        UnaryOpcode::Abs => a.abs(),
                        UnaryOpcode::Sqrt => a.sqrt(),
                        UnaryOpcode::Square => a * a,
                        UnaryOpcode::Sin => a.sin(),
                        UnaryOpcode::Cos => a.cos(),
                        UnaryOpcode::Tan => a.tan(),
                        UnaryOpcode::Asin => a.asin(),
                        UnaryOpcode::Acos => a.acos(),
                        UnaryOpcode::Atan => a.atan(),
                        UnaryOpcode::Exp => a.exp(),
                    }
                }
                Clause::Binary(op, a, b) => {
                    let a = self.slots[a as usize];
                    let b = self.slots[b as usize];
                    match op {
                        BinaryOpcode::Add => a + b,
                        BinaryOpcode::Sub => a - b,
                        BinaryOpcode::Mul => a * b,
                        BinaryOpcode::Div => a / b,
                        BinaryOpcode::Min => {
                            if a.is_nan() || b.is_nan() {
                                f64::NAN
                            } else {
                                a.min(b)
                            }
                        }
                        BinaryOpcode::Max => {
                            if a.is_nan() || b.is_nan() {
                                f64::NAN
                            } else {
                                a.max(b)
                            }
                        }
                        BinaryOpcode::Atan2 => a.atan2(b),
                        BinaryOpcode::Mod => a.rem_euclid(b),
                        BinaryOpcode::NanFill => {
                            if a.is_nan() {
                                b
                            } else {
                                a
                            }
                        }
                    }
                }
            };
            self.slots[i] = value;
        }
        self.slots[tape.root() as usize]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tree::Tree;

    #[test]
    fn point_eval_sphere() {
        let (x, y, z) = Tree::axes();
        let f = (x.square() + y.square() + z.square()).sqrt() - 1.0;
        let tape = Tape::new(&f);
        let mut eval = PointEval::new();
        let v = eval.eval(&tape, Vector3::new(1.0, 0.0, 0.0));
        assert!(v.abs() < 1e-12);
        let v = eval.eval(&tape, Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(v, -1.0);
        let v = eval.eval(&tape, Vector3::new(0.0, 2.0, 0.0));
        assert_eq!(v, 1.0);
    }

    #[test]
    fn point_eval_nan_fill() {
        let x = Tree::x();
        let f = x.sqrt().nan_fill(-1.0);
        let tape = Tape::new(&f);
        let mut eval = PointEval::new();
        assert_eq!(eval.eval(&tape, Vector3::new(4.0, 0.0, 0.0)), 2.0);
        assert_eq!(eval.eval(&tape, Vector3::new(-4.0, 0.0, 0.0)), -1.0);
    }
}
