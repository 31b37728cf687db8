//! Axis-aligned evaluation regions
use crate::{
    eval::interval::Interval,
    mesh::types::{Axis, Corner, X, Y, Z},
};
use nalgebra::Vector3;

/// Axis-aligned box with a subdivision level
///
/// `level` counts remaining subdivisions: a region at level 0 is leaf-sized
/// and will not be split further.  Cells own their lower boundary and share
/// their upper boundary with the next cell over; the distinction only
/// matters at the outermost box, which owns both.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Region {
    pub x: Interval,
    pub y: Interval,
    pub z: Interval,
    pub level: u8,
}

impl std::ops::Index<Axis> for Region {
    type Output = Interval;
    fn index(&self, axis: Axis) -> &Self::Output {
        match axis {
            X => &self.x,
            Y => &self.y,
            Z => &self.z,
            _ => panic!("invalid axis {axis:?}"),
        }
    }
}

impl Region {
    /// Builds a region at level 0
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>) -> Self {
        Self::with_level(lower, upper, 0)
    }

    /// Builds a region at level 0, validating the bounds
    pub fn try_new(
        lower: Vector3<f64>,
        upper: Vector3<f64>,
    ) -> Result<Self, crate::Error> {
        if lower.iter().chain(upper.iter()).any(|v| !v.is_finite()) {
            return Err(crate::Error::NonFiniteRegion);
        }
        if (0..3).any(|i| lower[i] >= upper[i]) {
            return Err(crate::Error::InvalidRegion);
        }
        Ok(Self::with_level(lower, upper, 0))
    }

    /// Builds a region with an explicit subdivision level
    pub fn with_level(
        lower: Vector3<f64>,
        upper: Vector3<f64>,
        level: u8,
    ) -> Self {
        Self {
            x: Interval::new(lower.x, upper.x),
            y: Interval::new(lower.y, upper.y),
            z: Interval::new(lower.z, upper.z),
            level,
        }
    }

    /// Checks that all bounds are finite and non-inverted
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z].iter().all(|i| {
            i.lower.is_finite() && i.upper.is_finite() && i.lower < i.upper
        })
    }

    /// Lower corner
    pub fn lower(&self) -> Vector3<f64> {
        Vector3::new(self.x.lower, self.y.lower, self.z.lower)
    }

    /// Upper corner
    pub fn upper(&self) -> Vector3<f64> {
        Vector3::new(self.x.upper, self.y.upper, self.z.upper)
    }

    /// Center point
    pub fn center(&self) -> Vector3<f64> {
        Vector3::new(self.x.midpoint(), self.y.midpoint(), self.z.midpoint())
    }

    /// Sets the level so that a level-0 cell has every edge at most
    /// `min_feature` long
    ///
    /// The box itself is unchanged: each subdivision halves every axis, so
    /// cells keep the region's aspect ratio and the level is driven by the
    /// longest axis.
    pub fn with_resolution(&self, min_feature: f64) -> Self {
        let cells = [self.x, self.y, self.z]
            .iter()
            .map(|i| (i.width() / min_feature).max(1.0))
            .fold(1.0f64, f64::max);
        let level = cells.log2().ceil().max(0.0) as u8;
        Self { level, ..*self }
    }

    /// Returns the position of the given corner
    ///
    /// Corners are numbered by axis bits, matching the cell numbering:
    ///
    /// ```text
    ///         6 -------- 7
    ///        /          /       Z
    ///       / |        / |      ^  _ Y
    ///      4----------5  |      | /
    ///      |  |       |  |      |/
    ///      |  2-------|--3      ---> X
    ///      | /        | /
    ///      |/         |/
    ///      0----------1
    /// ```
    pub fn corner(&self, i: Corner) -> Vector3<f64> {
        let pick = |axis: Axis, v: Interval| {
            if i & axis {
                v.upper
            } else {
                v.lower
            }
        };
        Vector3::new(
            pick(X, self.x),
            pick(Y, self.y),
            pick(Z, self.z),
        )
    }

    /// Splits into 8 children at `level - 1`, in corner order
    ///
    /// Child `i` has its lower corner at `lower + bit(i) * half_extent`.
    ///
    /// # Panics
    /// If called on a level-0 region (in debug builds)
    pub fn subdivide(&self) -> [Region; 8] {
        debug_assert!(self.level > 0);
        let half = |i: Interval, upper: bool| {
            if upper {
                Interval::new(i.midpoint(), i.upper)
            } else {
                Interval::new(i.lower, i.midpoint())
            }
        };
        std::array::from_fn(|j| {
            let c = Corner::new(j as u8);
            Region {
                x: half(self.x, c & X),
                y: half(self.y, c & Y),
                z: half(self.z, c & Z),
                level: self.level - 1,
            }
        })
    }

    /// Recovers the enclosing region, given this region's child index
    pub fn parent(&self, i: Corner) -> Region {
        let grow = |v: Interval, upper: bool| {
            let w = v.width();
            if upper {
                Interval::new(v.lower - w, v.upper)
            } else {
                Interval::new(v.lower, v.upper + w)
            }
        };
        Region {
            x: grow(self.x, i & X),
            y: grow(self.y, i & Y),
            z: grow(self.z, i & Z),
            level: self.level + 1,
        }
    }

    /// Checks whether the point is inside the region (boundary inclusive)
    pub fn contains(&self, p: Vector3<f64>) -> bool {
        self.x.contains(p.x) && self.y.contains(p.y) && self.z.contains(p.z)
    }

    /// Checks whether `other` fits entirely within this region
    pub fn contains_region(&self, other: &Region) -> bool {
        self.x.contains_interval(&other.x)
            && self.y.contains_interval(&other.y)
            && self.z.contains_interval(&other.z)
    }

    /// Clamps a point into the region
    pub fn clamp(&self, p: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            p.x.clamp(self.x.lower, self.x.upper),
            p.y.clamp(self.y.lower, self.y.upper),
            p.z.clamp(self.z.lower, self.z.upper),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subdivide_parent_roundtrip() {
        let r = Region::with_level(
            Vector3::new(-1.0, -2.0, -3.0),
            Vector3::new(3.0, 2.0, 1.0),
            3,
        );
        for (j, child) in r.subdivide().iter().enumerate() {
            assert_eq!(child.level, 2);
            assert_eq!(child.parent(Corner::new(j as u8)), r);
        }
    }

    #[test]
    fn subdivide_morton_order() {
        let r = Region::with_level(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 2.0, 2.0),
            1,
        );
        let children = r.subdivide();
        assert_eq!(children[0].lower(), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(children[1].lower(), Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(children[2].lower(), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(children[4].lower(), Vector3::new(0.0, 0.0, 1.0));
        assert_eq!(children[7].lower(), Vector3::new(1.0, 1.0, 1.0));
        assert_eq!(children[7].upper(), Vector3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn with_resolution() {
        let r = Region::new(
            Vector3::new(-1.0, -1.0, -1.0),
            Vector3::new(3.0, 1.0, 1.0),
        );
        let r = r.with_resolution(0.1);
        // 40 cells along the longest axis rounds up to 64
        assert_eq!(r.level, 6);
        // The box itself is untouched
        assert_eq!(r.x.width(), 4.0);
        assert_eq!(r.y.width(), 2.0);

        // Each level-0 cell has every edge <= min_feature
        let mut cell = r;
        while cell.level > 0 {
            cell = cell.subdivide()[0];
        }
        assert!(cell.x.width() <= 0.1 + 1e-9);
        assert!(cell.y.width() <= 0.1 + 1e-9);
        assert!(cell.z.width() <= 0.1 + 1e-9);
    }

    #[test]
    fn region_validity() {
        let good = Region::new(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 1.0, 1.0),
        );
        assert!(good.is_valid());
        assert!(!Region {
            x: Interval { lower: 1.0, upper: 0.0 },
            ..good
        }
        .is_valid());
        assert!(!Region {
            y: Interval {
                lower: f64::NAN,
                upper: 1.0
            },
            ..good
        }
        .is_valid());

        assert!(Region::try_new(good.lower(), good.upper()).is_ok());
        assert!(Region::try_new(good.upper(), good.lower()).is_err());
        assert!(Region::try_new(
            Vector3::new(f64::NAN, 0.0, 0.0),
            good.upper()
        )
        .is_err());
    }
}
