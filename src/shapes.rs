//! Canonical shapes used in tests, benchmarks, and examples
use crate::tree::Tree;

/// A sphere, as the Euclidean distance to `center` minus `radius`
pub fn sphere(radius: f64, center: [f64; 3]) -> Tree {
    let (x, y, z) = Tree::axes();
    ((x - center[0]).square()
        + (y - center[1]).square()
        + (z - center[2]).square())
    .sqrt()
        - radius
}

/// An axis-aligned box with exact (max-combined) plane distances
pub fn box_exact(lower: [f64; 3], upper: [f64; 3]) -> Tree {
    let (x, y, z) = Tree::axes();
    let bound = |t: Tree, lo: f64, hi: f64| (lo - t.clone()).max(t - hi);
    bound(x, lower[0], upper[0])
        .max(bound(y, lower[1], upper[1]))
        .max(bound(z, lower[2], upper[2]))
}

/// A cube centered at the origin with the given half-width
pub fn cube(half: f64) -> Tree {
    box_exact([-half; 3], [half; 3])
}

/// A gyroid lattice with the given period and thickness
pub fn gyroid(period: f64, thickness: f64) -> Tree {
    let (x, y, z) = Tree::axes();
    let f = std::f64::consts::TAU / period;
    let surface = (x.clone() * f).sin() * (y.clone() * f).cos()
        + (y * f).sin() * (z.clone() * f).cos()
        + (z * f).sin() * (x * f).cos();
    surface.abs() - thickness
}
