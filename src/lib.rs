//! Parallel octree construction and dual contouring for implicit surfaces
//!
//! A solid is described as a scalar field `F: R³ → R` built from a
//! [`Tree`] of math operations; the surface is the zero isosurface
//! `{p : F(p) = 0}`.  [`mesh::render`] approximates that surface with a
//! triangle mesh inside an axis-aligned [`Region`]:
//!
//! ```
//! use isoform::{mesh, shapes, Region, Settings};
//! use nalgebra::Vector3;
//!
//! let shape = shapes::sphere(0.6, [0.0; 3]);
//! let region = Region::new(
//!     Vector3::new(-1.0, -1.0, -1.0),
//!     Vector3::new(1.0, 1.0, 1.0),
//! );
//! let mesh = mesh::render(&shape, region, &Settings::default());
//! assert!(!mesh.triangles.is_empty());
//! ```
//!
//! The interesting machinery is in three places:
//!
//! - Octree construction runs on a crew of workers coordinated through a
//!   bounded lock-free stack; cells are classified by interval arithmetic
//!   over a [`Tape`](tape::Tape), which is *specialized* (pruned) on the
//!   way down the tree.
//! - Finished cells publish themselves into their parent's slot table;
//!   whichever worker completes a set of eight folds it, optionally
//!   collapsing subtrees whose merged error is within tolerance.
//! - Mesh extraction walks the dual of the tree, visiting every shared
//!   face and edge exactly once across non-uniform depths.

mod error;
pub use error::Error;

pub mod eval;
pub mod mesh;
pub mod region;
pub mod shapes;
pub mod tape;
pub mod tree;

pub use mesh::{Algorithm, FreeThreadHandler, Mesh, Root, Settings};
pub use region::Region;
pub use tree::Tree;
