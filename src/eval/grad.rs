//! Forward-mode gradient evaluation
use crate::{
    tape::{Clause, Tape},
    tree::{BinaryOpcode, UnaryOpcode},
};
use nalgebra::Vector3;

/// Value and partial derivatives at a point
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Grad {
    /// Value of the function
    pub v: f64,
    /// Partial derivative with respect to X
    pub dx: f64,
    /// Partial derivative with respect to Y
    pub dy: f64,
    /// Partial derivative with respect to Z
    pub dz: f64,
}

impl Grad {
    fn new(v: f64, dx: f64, dy: f64, dz: f64) -> Self {
        Self { v, dx, dy, dz }
    }

    fn constant(v: f64) -> Self {
        Self::new(v, 0.0, 0.0, 0.0)
    }

    /// Returns the gradient as a vector
    pub fn d(&self) -> Vector3<f64> {
        Vector3::new(self.dx, self.dy, self.dz)
    }

    /// Checks that value and gradient are all finite
    pub fn is_finite(&self) -> bool {
        self.v.is_finite()
            && self.dx.is_finite()
            && self.dy.is_finite()
            && self.dz.is_finite()
    }

    fn map(self, v: f64, dv: f64) -> Self {
        Self::new(v, self.dx * dv, self.dy * dv, self.dz * dv)
    }
}

impl std::ops::Add for Grad {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.v + rhs.v,
            self.dx + rhs.dx,
            self.dy + rhs.dy,
            self.dz + rhs.dz,
        )
    }
}

impl std::ops::Sub for Grad {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.v - rhs.v,
            self.dx - rhs.dx,
            self.dy - rhs.dy,
            self.dz - rhs.dz,
        )
    }
}

impl std::ops::Mul for Grad {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.v * rhs.v,
            self.v * rhs.dx + rhs.v * self.dx,
            self.v * rhs.dy + rhs.v * self.dy,
            self.v * rhs.dz + rhs.v * self.dz,
        )
    }
}

impl std::ops::Div for Grad {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let d = rhs.v * rhs.v;
        Self::new(
            self.v / rhs.v,
            (rhs.v * self.dx - self.v * rhs.dx) / d,
            (rhs.v * self.dy - self.v * rhs.dy) / d,
            (rhs.v * self.dz - self.v * rhs.dz) / d,
        )
    }
}

impl std::ops::Neg for Grad {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.v, -self.dx, -self.dy, -self.dz)
    }
}

/// Tape evaluator producing values and gradients, with reusable scratch
pub struct GradEval {
    slots: Vec<Grad>,
}

impl Default for GradEval {
    fn default() -> Self {
        Self::new()
    }
}

impl GradEval {
    pub fn new() -> Self {
        Self { slots: vec![] }
    }

    /// Evaluates value and gradient at the given position
    pub fn eval(&mut self, tape: &Tape, p: Vector3<f64>) -> Grad {
        self.slots.clear();
        self.slots.resize(tape.len(), Grad::default());
        for (i, c) in tape.clauses().iter().enumerate() {
            let value = match *c {
                Clause::X => Grad::new(p.x, 1.0, 0.0, 0.0),
                Clause::Y => Grad::new(p.y, 0.0, 1.0, 0.0),
                Clause::Z => Grad::new(p.z, 0.0, 0.0, 1.0),
                Clause::Const(f) => Grad::constant(f),
                Clause::Unary(op, a) => {
                    let a = self.slots[a as usize];
                    match op {
                        UnaryOpcode::Neg => -a,
                        UnaryOpcode::Abs => {
                            if a.v < 0.0 {
                                -a
                            } else {
                                a
                            }
                        }
                        UnaryOpcode::Sqrt => {
                            let v = a.v.sqrt();
                            a.map(v, 0.5 / v)
                        }
                        UnaryOpcode::Square => a.map(a.v * a.v, 2.0 * a.v),
                        UnaryOpcode::Sin => a.map(a.v.sin(), a.v.cos()),
                        UnaryOpcode::Cos => a.map(a.v.cos(), -a.v.sin()),
                        UnaryOpcode::Tan => {
                            let c = a.v.cos();
                            a.map(a.v.tan(), 1.0 / (c * c))
                        }
                        UnaryOpcode::Asin => a.map(
                            a.v.asin(),
                            1.0 / (1.0 - a.v * a.v).sqrt(),
                        ),
                        UnaryOpcode::Acos => a.map(
                            a.v.acos(),
                            -1.0 / (1.0 - a.v * a.v).sqrt(),
                        ),
                        UnaryOpcode::Atan => {
                            a.map(a.v.atan(), 1.0 / (1.0 + a.v * a.v))
                        }
                        UnaryOpcode::Exp => {
                            let v = a.v.exp();
                            a.map(v, v)
                        }
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
                            if b.v < a.v {
                                b
                            } else {
                                a
                            }
                        }
                        BinaryOpcode::Max => {
                            if b.v > a.v {
                                b
                            } else {
                                a
                            }
                        }
                        BinaryOpcode::Atan2 => {
                            // d(atan2(y, x)) = (x dy - y dx) / (x² + y²)
                            let d = a.v * a.v + b.v * b.v;
                            Grad::new(
                                a.v.atan2(b.v),
                                (b.v * a.dx - a.v * b.dx) / d,
                                (b.v * a.dy - a.v * b.dy) / d,
                                (b.v * a.dz - a.v * b.dz) / d,
                            )
                        }
                        BinaryOpcode::Mod => {
                            // Locally, a mod b = a - k b with k constant
                            let k = (a.v / b.v).floor();
                            Grad::new(
                                a.v.rem_euclid(b.v),
                                a.dx - k * b.dx,
                                a.dy - k * b.dy,
                                a.dz - k * b.dz,
                            )
                        }
                        BinaryOpcode::NanFill => {
                            if a.v.is_nan() {
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
