//! Octree construction and dual-contouring mesh extraction
//!
//! Given an expression [`Tree`](crate::tree::Tree) describing a scalar
//! field, [`render`] produces a triangle mesh approximating the field's
//! zero isosurface within a region:
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
//! The pipeline runs in four phases (octree build, intersection
//! alignment, mesh extraction, tree teardown), reported through the
//! optional progress callback as a monotone value in `[0, 3]`.
mod dc;
mod dual;
mod neighbors;
mod pool;
mod progress;
mod qef;
mod simplex;
mod stack;
mod worker;
mod xtree;

pub mod types;

pub use pool::{ObjectPool, Root};
pub use progress::ProgressWatcher;
pub use qef::QuadraticErrorSolver;
pub use xtree::{Cell, Intersection, Leaf, XTree};

use crate::{region::Region, tree::Tree};
use nalgebra::Vector3;
use std::sync::atomic::{AtomicBool, Ordering};

/// An indexed 3D mesh
///
/// Vertex index 0 is reserved as a "no vertex" sentinel: the first real
/// vertex is at index 1, and no triangle refers to index 0.  Triangles
/// wind counter-clockwise when viewed from outside the solid.
#[derive(Default, Debug)]
pub struct Mesh {
    /// Vertex positions
    pub vertices: Vec<Vector3<f64>>,
    /// Triangles, as indexes into [`Self::vertices`]
    pub triangles: Vec<Vector3<u32>>,
}

impl Mesh {
    /// Builds a new (empty) mesh
    pub fn new() -> Self {
        Self::default()
    }
}

/// Surface extraction algorithm
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Algorithm {
    /// One vertex per crossing cell, quads across sign-changing edges
    #[default]
    DualContouring,

    /// Marching tetrahedra per crossing cell; denser output
    IsoSimplex,

    /// Dual contouring with triangle fans through edge intersections
    Hybrid,
}

/// Hook for donating idle worker time
///
/// Workers call [`offer_wait`](FreeThreadHandler::offer_wait) when they
/// find no task; implementations may run a slice of unrelated work, but
/// must return promptly.
pub trait FreeThreadHandler: Sync {
    fn offer_wait(&self);
}

/// Settings for building an octree and extracting a mesh
#[derive(Copy, Clone)]
pub struct Settings<'a> {
    /// Maximum edge length of a leaf-sized cell
    pub min_feature: f64,

    /// QEF residual below which a subtree may collapse into one leaf
    pub max_err: f64,

    /// Number of worker threads (0 is treated as 1)
    pub workers: usize,

    /// Surface extraction algorithm
    pub algorithm: Algorithm,

    /// Progress callback, invoked from a single observer thread with
    /// strictly increasing values in `[0, 3]`
    pub progress: Option<&'a (dyn Fn(f32) + Send + Sync)>,

    /// Cooperative cancellation flag; raising it makes `render` return an
    /// empty mesh at the next per-worker task boundary
    pub cancel: Option<&'a AtomicBool>,

    /// Hook run by idle workers
    pub free_thread: Option<&'a dyn FreeThreadHandler>,
}

impl Default for Settings<'_> {
    fn default() -> Self {
        Self {
            min_feature: 0.1,
            max_err: 1e-8,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            algorithm: Algorithm::default(),
            progress: None,
            cancel: None,
            free_thread: None,
        }
    }
}

impl Root {
    /// Builds an octree for the given shape over `region`
    ///
    /// Returns an empty root if the settings' cancel flag was raised.
    pub fn build(tree: &Tree, region: Region, settings: &Settings) -> Root {
        if !region.is_valid() {
            return Root::default();
        }
        let region = region.with_resolution(settings.min_feature);
        let unused = AtomicBool::new(false);
        let cancel = settings.cancel.unwrap_or(&unused);
        worker::build(tree, region, settings, None, cancel)
    }

    /// Recursively walks the dual of the octree, building a mesh
    pub fn walk_dual(&self, settings: &Settings) -> Mesh {
        let unused = AtomicBool::new(false);
        let cancel = settings.cancel.unwrap_or(&unused);
        walk_mesh(self, settings, None, cancel)
    }
}

/// Builds a mesh of the zero isosurface of `tree` within `region`
///
/// This is the full pipeline: octree construction, dual walk, per-thread
/// buffer merge, and tree teardown, with progress and cancellation
/// handled throughout.  An invalid region or a cancellation yields an
/// empty mesh (with the progress callback still seeing `0.0` and `3.0`).
pub fn render(tree: &Tree, region: Region, settings: &Settings) -> Mesh {
    let unused = AtomicBool::new(false);
    let cancel = settings.cancel.unwrap_or(&unused);
    let watcher = ProgressWatcher::new();
    std::thread::scope(|s| {
        let observer = settings
            .progress
            .map(|cb| s.spawn(|| watcher.run(&|f| cb(f))));

        let mesh = render_inner(tree, region, settings, &watcher, cancel);

        watcher.stop();
        if let Some(h) = observer {
            h.join().unwrap();
        }
        mesh
    })
}

fn render_inner(
    tree: &Tree,
    region: Region,
    settings: &Settings,
    watcher: &ProgressWatcher,
    cancel: &AtomicBool,
) -> Mesh {
    if !region.is_valid() {
        log::warn!("refusing to render an invalid region");
        return Mesh::default();
    }
    let region = region.with_resolution(settings.min_feature);

    // Phase 0: build the octree
    watcher.start_phase(worker::tick_budget(region.level));
    let mut root = worker::build(tree, region, settings, Some(watcher), cancel);
    if root.is_empty() {
        return Mesh::default();
    }

    // Phase 1 is reserved for intersection alignment; fan meshing reads
    // every intersection from the deepest incident cell, so cells always
    // agree and the phase has no work
    watcher.start_phase(1);
    watcher.tick(1);

    // Phase 2: walk the dual and emit triangles
    watcher.start_phase(root.node_count());
    let mesh = walk_mesh(&root, settings, Some(watcher), cancel);

    // Phase 3: release the tree
    watcher.start_phase(root.node_count());
    root.reset(settings.workers, Some(watcher));

    if cancel.load(Ordering::Relaxed) {
        log::debug!("render cancelled; returning an empty mesh");
        return Mesh::default();
    }
    log::debug!(
        "rendered {} triangles / {} vertices",
        mesh.triangles.len(),
        mesh.vertices.len()
    );
    mesh
}

/// Walks the dual with the algorithm-appropriate mesher crew
fn walk_mesh(
    root: &Root,
    settings: &Settings,
    progress: Option<&ProgressWatcher>,
    cancel: &AtomicBool,
) -> Mesh {
    let Some(tree) = root.tree() else {
        return Mesh::default();
    };
    let workers = settings.workers.max(1);
    let eps = 1e-6 * settings.min_feature * settings.min_feature;
    let out = match settings.algorithm {
        Algorithm::DualContouring | Algorithm::Hybrid => {
            let fan = settings.algorithm == Algorithm::Hybrid;
            let meshers = (0..workers)
                .map(|i| dc::DcMesher::new(i, fan, eps))
                .collect();
            let meshers = dual::walk(tree, meshers, progress, cancel);
            meshers.into_iter().map(|m| m.brep).collect()
        }
        Algorithm::IsoSimplex => {
            let tape = root.tape().expect("root with a tree has a tape");
            let meshers = (0..workers)
                .map(|i| {
                    simplex::SimplexMesher::new(
                        i,
                        tape.clone(),
                        settings.min_feature,
                        eps,
                    )
                })
                .collect();
            let meshers = dual::walk(tree, meshers, progress, cancel);
            meshers.into_iter().map(|m| m.brep).collect()
        }
    };
    if cancel.load(Ordering::Relaxed) {
        return Mesh::default();
    }
    dc::merge(out)
}
