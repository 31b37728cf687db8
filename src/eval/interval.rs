//! Interval arithmetic and the interval tape evaluator
use crate::{
    region::Region,
    tape::{Choice, Clause, Tape},
    tree::{BinaryOpcode, UnaryOpcode},
};

/// A closed interval `[lower, upper]` on the real line
///
/// Intervals are allowed to contain NaN bounds, which poison downstream
/// arithmetic; callers check with [`Interval::has_nan`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Interval {
    pub lower: f64,
    pub upper: f64,
}

impl From<f64> for Interval {
    fn from(f: f64) -> Self {
        Interval { lower: f, upper: f }
    }
}

impl Interval {
    /// Builds a new interval
    ///
    /// Inverted bounds are allowed here so that user-supplied regions can
    /// round-trip; they're rejected by [`Region::is_valid`].
    ///
    /// [`Region::is_valid`]: crate::region::Region::is_valid
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// The interval spanning every value (and NaN)
    pub fn everything() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// An interval with both bounds NaN
    pub fn nan() -> Self {
        Self {
            lower: f64::NAN,
            upper: f64::NAN,
        }
    }

    /// Checks whether either bound is NaN
    pub fn has_nan(&self) -> bool {
        self.lower.is_nan() || self.upper.is_nan()
    }

    /// Returns `upper - lower`
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Returns the midpoint of the interval
    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    /// Linear interpolation from `lower` (at 0) to `upper` (at 1)
    pub fn lerp(&self, frac: f64) -> f64 {
        self.lower * (1.0 - frac) + self.upper * frac
    }

    /// Checks whether the interval contains the given value (inclusive)
    pub fn contains(&self, v: f64) -> bool {
        v >= self.lower && v <= self.upper
    }

    /// Checks whether `other` is a (non-strict) subset of this interval
    pub fn contains_interval(&self, other: &Interval) -> bool {
        other.lower >= self.lower && other.upper <= self.upper
    }

    /// Absolute value
    pub fn abs(self) -> Self {
        if self.has_nan() {
            Self::nan()
        } else if self.lower < 0.0 {
            if self.upper > 0.0 {
                Interval::new(0.0, self.upper.max(-self.lower))
            } else {
                Interval::new(-self.upper, -self.lower)
            }
        } else {
            self
        }
    }

    /// Square root; negative inputs produce NaN bounds
    pub fn sqrt(self) -> Self {
        if self.has_nan() || self.upper < 0.0 {
            Self::nan()
        } else if self.lower < 0.0 {
            Interval::new(0.0, self.upper.sqrt())
        } else {
            Interval::new(self.lower.sqrt(), self.upper.sqrt())
        }
    }

    /// `self * self`, always non-negative
    pub fn square(self) -> Self {
        if self.has_nan() {
            Self::nan()
        } else if self.lower >= 0.0 {
            Interval::new(self.lower * self.lower, self.upper * self.upper)
        } else if self.upper <= 0.0 {
            Interval::new(self.upper * self.upper, self.lower * self.lower)
        } else {
            let m = (self.lower * self.lower).max(self.upper * self.upper);
            Interval::new(0.0, m)
        }
    }

    /// Sine over the interval
    pub fn sin(self) -> Self {
        use std::f64::consts::{FRAC_PI_2, TAU};
        if self.has_nan() {
            return Self::nan();
        }
        if !self.lower.is_finite()
            || !self.upper.is_finite()
            || self.width() >= TAU
        {
            return Interval::new(-1.0, 1.0);
        }
        // Check whether an extremum of sin falls within the interval
        let has_max = ((self.lower - FRAC_PI_2) / TAU).ceil() * TAU + FRAC_PI_2
            <= self.upper;
        let has_min = ((self.lower + FRAC_PI_2) / TAU).ceil() * TAU - FRAC_PI_2
            <= self.upper;
        let (a, b) = (self.lower.sin(), self.upper.sin());
        let upper = if has_max { 1.0 } else { a.max(b) };
        let lower = if has_min { -1.0 } else { a.min(b) };
        Interval::new(lower, upper)
    }

    /// Cosine over the interval
    pub fn cos(self) -> Self {
        use std::f64::consts::FRAC_PI_2;
        (self + Interval::from(FRAC_PI_2)).sin()
    }

    /// Tangent; intervals spanning an asymptote become unbounded
    pub fn tan(self) -> Self {
        use std::f64::consts::{FRAC_PI_2, PI};
        if self.has_nan() {
            return Self::nan();
        }
        if !self.lower.is_finite() || !self.upper.is_finite() {
            return Self::everything();
        }
        let has_asymptote =
            ((self.lower - FRAC_PI_2) / PI).ceil() * PI + FRAC_PI_2
                <= self.upper;
        if has_asymptote {
            Self::everything()
        } else {
            Interval::new(self.lower.tan(), self.upper.tan())
        }
    }

    /// Inverse sine; NaN outside `[-1, 1]`
    pub fn asin(self) -> Self {
        if self.has_nan() || self.upper < -1.0 || self.lower > 1.0 {
            Self::nan()
        } else {
            Interval::new(
                self.lower.clamp(-1.0, 1.0).asin(),
                self.upper.clamp(-1.0, 1.0).asin(),
            )
        }
    }

    /// Inverse cosine; NaN outside `[-1, 1]`
    pub fn acos(self) -> Self {
        if self.has_nan() || self.upper < -1.0 || self.lower > 1.0 {
            Self::nan()
        } else {
            Interval::new(
                self.upper.clamp(-1.0, 1.0).acos(),
                self.lower.clamp(-1.0, 1.0).acos(),
            )
        }
    }

    /// Inverse tangent (monotone)
    pub fn atan(self) -> Self {
        if self.has_nan() {
            Self::nan()
        } else {
            Interval::new(self.lower.atan(), self.upper.atan())
        }
    }

    /// Exponential (monotone)
    pub fn exp(self) -> Self {
        if self.has_nan() {
            Self::nan()
        } else {
            Interval::new(self.lower.exp(), self.upper.exp())
        }
    }

    /// Two-argument inverse tangent, with `self` as `y`
    ///
    /// Falls back to the full `[-π, π]` output range when the input region
    /// straddles the branch cut along the negative X axis.
    pub fn atan2(self, x: Interval) -> Self {
        use std::f64::consts::PI;
        if self.has_nan() || x.has_nan() {
            return Self::nan();
        }
        let continuous = x.lower > 0.0 || self.lower > 0.0 || self.upper < 0.0;
        if !continuous {
            return Interval::new(-PI, PI);
        }
        let mut lower = f64::INFINITY;
        let mut upper = f64::NEG_INFINITY;
        for y in [self.lower, self.upper] {
            for x in [x.lower, x.upper] {
                let v = y.atan2(x);
                lower = lower.min(v);
                upper = upper.max(v);
            }
        }
        Interval::new(lower, upper)
    }

    /// Euclidean remainder
    ///
    /// Exact when the divisor is a positive constant and the dividend stays
    /// within a single period; conservative otherwise.
    pub fn modulo(self, rhs: Interval) -> Self {
        if self.has_nan() || rhs.has_nan() {
            return Self::nan();
        }
        if rhs.lower == rhs.upper && rhs.lower > 0.0 {
            let b = rhs.lower;
            let ka = (self.lower / b).floor();
            let kb = (self.upper / b).floor();
            if ka == kb {
                return Interval::new(self.lower - ka * b, self.upper - ka * b);
            }
        }
        if rhs.lower > 0.0 {
            Interval::new(0.0, rhs.upper)
        } else {
            let m = rhs.lower.abs().max(rhs.upper.abs());
            Interval::new(-m, m)
        }
    }

    /// Substitutes `rhs` wherever `self` may be NaN
    pub fn nan_fill(self, rhs: Interval) -> Self {
        if self.has_nan() {
            let lower = if self.lower.is_nan() {
                rhs.lower
            } else {
                self.lower.min(rhs.lower)
            };
            let upper = if self.upper.is_nan() {
                rhs.upper
            } else {
                self.upper.max(rhs.upper)
            };
            Interval { lower, upper }
        } else {
            self
        }
    }

    /// Minimum, returning which side was chosen
    pub fn min_choice(self, rhs: Interval) -> (Self, Choice) {
        if self.has_nan() || rhs.has_nan() {
            return (Self::nan(), Choice::Both);
        }
        if self.upper < rhs.lower {
            (self, Choice::Left)
        } else if rhs.upper < self.lower {
            (rhs, Choice::Right)
        } else {
            (
                Interval::new(
                    self.lower.min(rhs.lower),
                    self.upper.min(rhs.upper),
                ),
                Choice::Both,
            )
        }
    }

    /// Maximum, returning which side was chosen
    pub fn max_choice(self, rhs: Interval) -> (Self, Choice) {
        if self.has_nan() || rhs.has_nan() {
            return (Self::nan(), Choice::Both);
        }
        if self.lower > rhs.upper {
            (self, Choice::Left)
        } else if rhs.lower > self.upper {
            (rhs, Choice::Right)
        } else {
            (
                Interval::new(
                    self.lower.max(rhs.lower),
                    self.upper.max(rhs.upper),
                ),
                Choice::Both,
            )
        }
    }
}

impl std::ops::Add<Interval> for Interval {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Interval {
            lower: self.lower + rhs.lower,
            upper: self.upper + rhs.upper,
        }
    }
}

impl std::ops::Sub<Interval> for Interval {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Interval {
            lower: self.lower - rhs.upper,
            upper: self.upper - rhs.lower,
        }
    }
}

impl std::ops::Mul<Interval> for Interval {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        if self.has_nan() || rhs.has_nan() {
            return Self::nan();
        }
        let mut lower = f64::INFINITY;
        let mut upper = f64::NEG_INFINITY;
        for i in [self.lower, self.upper] {
            for j in [rhs.lower, rhs.upper] {
                let v = i * j;
                if v.is_nan() {
                    // 0 * ±inf
                    return Self::everything();
                }
                lower = lower.min(v);
                upper = upper.max(v);
            }
        }
        Interval { lower, upper }
    }
}

impl std::ops::Div<Interval> for Interval {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        if self.has_nan() || rhs.has_nan() {
            return Self::nan();
        }
        if rhs.lower <= 0.0 && rhs.upper >= 0.0 {
            return Self::everything();
        }
        let mut lower = f64::INFINITY;
        let mut upper = f64::NEG_INFINITY;
        for i in [self.lower, self.upper] {
            for j in [rhs.lower, rhs.upper] {
                let v = i / j;
                lower = lower.min(v);
                upper = upper.max(v);
            }
        }
        Interval { lower, upper }
    }
}

impl std::ops::Neg for Interval {
    type Output = Self;
    fn neg(self) -> Self {
        Interval {
            lower: -self.upper,
            upper: -self.lower,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Tape evaluator over intervals, recording min/max choices
///
/// One lives per worker; scratch storage is reused across calls.
pub struct IntervalEval {
    slots: Vec<Interval>,
    choices: Vec<Choice>,
}

impl Default for IntervalEval {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalEval {
    pub fn new() -> Self {
        Self {
            slots: vec![],
            choices: vec![],
        }
    }

    /// Evaluates the tape over the given region, returning the outer interval
    pub fn eval(&mut self, tape: &Tape, region: &Region) -> Interval {
        self.eval_inner(tape, region)
    }

    /// Evaluates the tape over the region, then specializes it
    ///
    /// The returned tape has min/max clauses that were dominated by one side
    /// pruned away; it is valid for every point within `region`.  If nothing
    /// was pruned, the original tape is returned (cheaply).
    pub fn eval_and_simplify(
        &mut self,
        tape: &Tape,
        region: &Region,
        storage: &mut Vec<Vec<Clause>>,
    ) -> (Interval, Tape) {
        let out = self.eval_inner(tape, region);
        if out.has_nan() {
            // An evaluator fault means the choice data can't be trusted
            return (out, tape.clone());
        }
        if out.lower > 0.0 || out.upper < 0.0 {
            // The cell is unambiguous, so the specialization would never
            // be evaluated; don't bother building it
            return (out, tape.clone());
        }
        let any_narrowed = self
            .choices
            .iter()
            .any(|c| matches!(c, Choice::Left | Choice::Right));
        let next = if any_narrowed {
            tape.simplify(&self.choices, *region, storage)
        } else {
            tape.clone()
        };
        (out, next)
    }

    fn eval_inner(&mut self, tape: &Tape, region: &Region) -> Interval {
        let n = tape.len();
        self.slots.clear();
        self.slots.resize(n, Interval::from(0.0));
        self.choices.clear();
        self.choices.resize(n, Choice::Both);

        for (i, c) in tape.clauses().iter().enumerate() {
            let value = match *c {
                Clause::X => region.x,
                Clause::Y => region.y,
                Clause::Z => region.z,
                Clause::Const(f) => f.into(),
                Clause::Unary(op, a) => {
                    let a = self.slots[a as usize];
                    match op {
                        UnaryOpcode::Neg => -a,
                        UnaryOpcode::Abs => a.abs(),
                        UnaryOpcode::Sqrt => a.sqrt(),
                        UnaryOpcode::Square => a.square(),
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
                            let (out, choice) = a.min_choice(b);
                            self.choices[i] = choice;
                            out
                        }
                        BinaryOpcode::Max => {
                            let (out, choice) = a.max_choice(b);
                            self.choices[i] = choice;
                            out
                        }
                        BinaryOpcode::Atan2 => a.atan2(b),
                        BinaryOpcode::Mod => a.modulo(b),
                        BinaryOpcode::NanFill => a.nan_fill(b),
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

    fn i(lower: f64, upper: f64) -> Interval {
        Interval::new(lower, upper)
    }

    #[test]
    fn interval_mul() {
        let a = i(-1.0, 2.0) * i(3.0, 4.0);
        assert_eq!(a, i(-4.0, 8.0));
        let b = i(-2.0, -1.0) * i(-3.0, 5.0);
        assert_eq!(b, i(-10.0, 6.0));
    }

    #[test]
    fn interval_div_across_zero() {
        let a = i(1.0, 2.0) / i(-1.0, 1.0);
        assert_eq!(a.lower, f64::NEG_INFINITY);
        assert_eq!(a.upper, f64::INFINITY);
        let b = i(1.0, 2.0) / i(1.0, 2.0);
        assert_eq!(b, i(0.5, 2.0));
    }

    #[test]
    fn interval_sqrt() {
        assert_eq!(i(4.0, 9.0).sqrt(), i(2.0, 3.0));
        assert_eq!(i(-4.0, 9.0).sqrt(), i(0.0, 3.0));
        assert!(i(-9.0, -4.0).sqrt().has_nan());
    }

    #[test]
    fn interval_sin() {
        use std::f64::consts::PI;
        let a = i(0.0, PI).sin();
        assert!(a.lower.abs() < 1e-12);
        assert_eq!(a.upper, 1.0);
        let b = i(0.1, 0.2).sin();
        assert_eq!(b, i(0.1f64.sin(), 0.2f64.sin()));
        let c = i(-10.0, 10.0).sin();
        assert_eq!(c, i(-1.0, 1.0));
    }

    #[test]
    fn interval_min_choice() {
        let (v, c) = i(0.0, 1.0).min_choice(i(2.0, 3.0));
        assert_eq!(v, i(0.0, 1.0));
        assert_eq!(c, Choice::Left);
        let (v, c) = i(0.0, 1.0).min_choice(i(0.5, 3.0));
        assert_eq!(v, i(0.0, 1.0));
        assert_eq!(c, Choice::Both);
        let (v, c) = i(4.0, 5.0).min_choice(i(0.5, 3.0));
        assert_eq!(v, i(0.5, 3.0));
        assert_eq!(c, Choice::Right);
    }

    #[test]
    fn interval_square() {
        assert_eq!(i(-2.0, 1.0).square(), i(0.0, 4.0));
        assert_eq!(i(1.0, 2.0).square(), i(1.0, 4.0));
        assert_eq!(i(-3.0, -2.0).square(), i(4.0, 9.0));
    }
}
