//! Quadratic error functions for vertex placement
use nalgebra::{Matrix3, Vector3, Vector4};

/// Floor for reported residuals, so that ratio comparisons stay meaningful
const MIN_ERR: f64 = 1e-24;

/// Accumulator and solver for a quadratic error function
///
/// Accumulates `(n · (x - p))²` over surface samples; the minimizer is the
/// dual vertex.  Summing two solvers merges their sample sets.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct QuadraticErrorSolver {
    /// A^T A term
    ata: Matrix3<f64>,

    /// A^T B term
    atb: Vector3<f64>,

    /// B^T B term
    btb: f64,

    /// Mass point of intersections is stored as XYZ / W, so that summing works
    mass_point: Vector4<f64>,
}

impl std::ops::AddAssign for QuadraticErrorSolver {
    fn add_assign(&mut self, rhs: Self) {
        self.ata += rhs.ata;
        self.atb += rhs.atb;
        self.btb += rhs.btb;
        self.mass_point += rhs.mass_point;
    }
}

impl QuadraticErrorSolver {
    pub fn new() -> Self {
        Self {
            ata: Matrix3::zeros(),
            atb: Vector3::zeros(),
            btb: 0.0,
            mass_point: Vector4::zeros(),
        }
    }

    /// Returns the accumulated mass point (XYZ / W)
    pub fn mass_point(&self) -> Vector4<f64> {
        self.mass_point
    }

    /// Checks whether any samples have been accumulated
    pub fn is_empty(&self) -> bool {
        self.mass_point.w == 0.0
    }

    /// Adds a new intersection to the QEF
    ///
    /// `pos` is the position of the intersection and is accumulated in the
    /// mass point.  `grad` is the gradient at the surface, and is normalized
    /// here.  Non-finite samples are dropped.
    pub fn add_intersection(&mut self, pos: Vector3<f64>, grad: Vector3<f64>) {
        if !(pos.iter().all(|v| v.is_finite())
            && grad.iter().all(|v| v.is_finite()))
        {
            return;
        }
        let norm = grad.norm();
        if norm == 0.0 {
            return;
        }
        let n = grad / norm;
        self.mass_point += Vector4::new(pos.x, pos.y, pos.z, 1.0);
        self.ata += n * n.transpose();
        self.atb += n * n.dot(&pos);
        self.btb += n.dot(&pos).powi(2);
    }

    /// Solve the QEF, minimizing towards the mass point
    ///
    /// Returns the minimizer and the residual at that point.  An empty
    /// solver returns an infinite residual.
    pub fn solve(&self) -> (Vector3<f64>, f64) {
        if self.is_empty() {
            return (Vector3::zeros(), f64::INFINITY);
        }
        let center = self.mass_point.xyz() / self.mass_point.w;
        let atb = self.atb - self.ata * center;

        let svd = nalgebra::linalg::SVD::new(self.ata, true, true);

        // nalgebra doesn't always actually order singular values (?!?)
        // https://github.com/dimforge/nalgebra/issues/1215
        let mut singular_values =
            svd.singular_values.data.0[0].map(ordered_float::OrderedFloat);
        singular_values.sort();
        singular_values.reverse();
        let singular_values = singular_values.map(|o| o.0);

        // Skip any eigenvalues that are small relative to the maximum
        // eigenvalue; without this filter, near-planar cells produce wild
        // out-of-cell vertices.
        const EIGENVALUE_CUTOFF_RELATIVE: f64 = 1e-3;
        let cutoff = singular_values[0].abs() * EIGENVALUE_CUTOFF_RELATIVE;
        let first_invalid_eigenvalue = (0..3)
            .find(|i| singular_values[*i].abs() < cutoff)
            .unwrap_or(3);

        // Walk from the full-rank solve down to lower ranks, keeping the
        // last solution whose error is not dramatically worse than the next
        // more-constrained one.
        let mut prev: Option<(Vector3<f64>, f64)> = None;
        for i in 0..first_invalid_eigenvalue {
            let rank = first_invalid_eigenvalue - i;
            let epsilon = singular_values.get(rank).cloned().unwrap_or(0.0);
            let sol = svd.solve(&atb, epsilon);
            let pos = sol.map(|c| c + center).unwrap_or(center);
            // Clamp the error to a small positive value for ease of
            // comparison; the floor must stay far below any plausible
            // collapse tolerance.
            let err = ((pos.transpose() * self.ata * pos
                - 2.0 * pos.transpose() * self.atb)[0]
                + self.btb)
                .max(MIN_ERR);

            // If this epsilon dramatically increases the error, then assume
            // the previous (possibly out-of-cell) vertex was genuine
            if let Some(p) = prev.filter(|(_, prev_err)| err > prev_err * 2.0)
            {
                return p;
            }

            prev = Some((pos, err));
        }

        prev.unwrap_or((center, self.residual_at(center)))
    }

    /// Evaluates the residual at an arbitrary position
    pub fn residual_at(&self, pos: Vector3<f64>) -> f64 {
        ((pos.transpose() * self.ata * pos
            - 2.0 * pos.transpose() * self.atb)[0]
            + self.btb)
            .max(MIN_ERR)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn qef_planar() {
        // Three samples on the plane x = 0.5
        let mut q = QuadraticErrorSolver::new();
        let n = Vector3::new(1.0, 0.0, 0.0);
        q.add_intersection(Vector3::new(0.5, 0.0, 0.0), n);
        q.add_intersection(Vector3::new(0.5, 1.0, 0.0), n);
        q.add_intersection(Vector3::new(0.5, 0.0, 1.0), n);
        let (pos, err) = q.solve();
        assert!(err < 1e-12, "planar QEF has residual {err}");
        assert!((pos.x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn qef_corner() {
        // Three orthogonal planes meeting at (1, 2, 3)
        let mut q = QuadraticErrorSolver::new();
        q.add_intersection(
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        );
        q.add_intersection(
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        );
        q.add_intersection(
            Vector3::new(0.0, 0.0, 3.0),
            Vector3::new(0.0, 0.0, 1.0),
        );
        let (pos, err) = q.solve();
        assert!(err < 1e-9);
        assert!((pos - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-6);
    }

    #[test]
    fn qef_merge() {
        let mut a = QuadraticErrorSolver::new();
        let mut b = QuadraticErrorSolver::new();
        let n = Vector3::new(0.0, 0.0, 1.0);
        a.add_intersection(Vector3::new(0.0, 0.0, 0.5), n);
        b.add_intersection(Vector3::new(1.0, 0.0, 0.5), n);
        b.add_intersection(Vector3::new(0.0, 1.0, 0.5), n);
        a += b;
        assert_eq!(a.mass_point().w, 3.0);
        let (pos, err) = a.solve();
        assert!(err < 1e-12);
        assert!((pos.z - 0.5).abs() < 1e-9);
    }

    #[test]
    fn qef_dropped_samples() {
        let mut q = QuadraticErrorSolver::new();
        q.add_intersection(
            Vector3::new(f64::NAN, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
        );
        q.add_intersection(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(f64::INFINITY, 0.0, 0.0),
        );
        assert!(q.is_empty());
        let (_pos, err) = q.solve();
        assert_eq!(err, f64::INFINITY);
    }
}
