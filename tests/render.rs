//! End-to-end meshing tests
use isoform::{mesh, shapes, Algorithm, Mesh, Region, Settings};
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

fn region(lower: [f64; 3], upper: [f64; 3]) -> Region {
    let _ = env_logger::builder().is_test(true).try_init();
    Region::new(Vector3::from(lower), Vector3::from(upper))
}

/// Every directed edge must appear exactly once, and its reverse must
/// appear too (i.e. the mesh is closed and consistently oriented)
fn check_edge_pairs(mesh: &Mesh) {
    let mut edges: BTreeMap<(u32, u32), usize> = BTreeMap::new();
    for t in &mesh.triangles {
        assert!(t.x != t.y && t.y != t.z && t.x != t.z, "degenerate {t:?}");
        for edge in [(t.x, t.y), (t.y, t.z), (t.z, t.x)] {
            *edges.entry(edge).or_default() += 1;
        }
    }
    for (&(a, b), &n) in &edges {
        assert_eq!(n, 1, "duplicate directed edge ({a}, {b})");
        assert!(
            edges.contains_key(&(b, a)),
            "unpaired edge ({a}, {b}) between {:?} and {:?}",
            mesh.vertices[a as usize],
            mesh.vertices[b as usize],
        );
    }
}

fn triangle_normal(mesh: &Mesh, t: &Vector3<u32>) -> Vector3<f64> {
    let a = mesh.vertices[t.x as usize];
    let b = mesh.vertices[t.y as usize];
    let c = mesh.vertices[t.z as usize];
    (b - a).cross(&(c - a)).normalize()
}

#[test]
fn cube_face_count() {
    // Index 0 is unused, so a cube has 8 real corners in 9 slots
    let cube = shapes::cube(1.5);
    let settings = Settings {
        min_feature: 0.15,
        ..Settings::default()
    };
    let m = mesh::render(&cube, region([-3.0; 3], [3.0; 3]), &settings);
    assert_eq!(m.vertices.len(), 9);
    assert_eq!(m.triangles.len(), 12);
    check_edge_pairs(&m);
}

#[test]
fn rectangular_prism_face_count() {
    let prism = shapes::box_exact([0.0, 0.0, 0.0], [4.0, 1.0, 0.25]);
    let settings = Settings {
        min_feature: 0.125,
        ..Settings::default()
    };
    let m = mesh::render(
        &prism,
        region([-1.0, -1.0, -1.0], [5.0, 2.0, 1.25]),
        &settings,
    );
    assert_eq!(m.vertices.len(), 9);
    assert_eq!(m.triangles.len(), 12);
    check_edge_pairs(&m);
}

#[test]
fn sphere_normals() {
    let s = shapes::sphere(0.5, [0.0; 3]);
    let m = mesh::render(
        &s,
        region([-1.0; 3], [1.0; 3]),
        &Settings::default(),
    );
    assert!(!m.triangles.is_empty());

    let mut worst = 2.0;
    for t in &m.triangles {
        let norm = triangle_normal(&m, t);
        let center = ((m.vertices[t.x as usize]
            + m.vertices[t.y as usize]
            + m.vertices[t.z as usize])
            / 3.0)
            .normalize();
        worst = norm.dot(&center).min(worst);
    }
    assert!(worst > 0.9, "inward or skewed normal (dot = {worst})");
}

#[test]
fn sphere_coarse_edge_pairing() {
    let s = shapes::sphere(0.5, [0.0; 3]);
    let settings = Settings {
        min_feature: 1.1,
        ..Settings::default()
    };
    let m = mesh::render(&s, region([-1.0; 3], [1.0; 3]), &settings);
    assert!(!m.triangles.is_empty());
    check_edge_pairs(&m);
}

#[test]
fn union_top_face_is_flat() {
    // A dome: sphere unioned with a box whose top face cuts through it.
    // Top-face triangles are where flipped triangles historically appear.
    let b = shapes::sphere(0.7, [0.0, 0.0, 0.1])
        .min(shapes::box_exact([-1.0, -1.0, -1.0], [1.0, 1.0, 0.1]));
    let settings = Settings {
        min_feature: 0.25,
        ..Settings::default()
    };
    let m = mesh::render(&b, region([-10.0; 3], [10.0; 3]), &settings);
    assert!(!m.triangles.is_empty());

    for t in &m.triangles {
        assert!(t.x != t.y && t.y != t.z && t.x != t.z, "triangle is a line");

        let on_top = [t.x, t.y, t.z]
            .iter()
            .all(|&i| (m.vertices[i as usize].z - 0.1).abs() < 1e-3);
        if on_top {
            let norm = triangle_normal(&m, t);
            assert!(norm.x.abs() < 0.01, "flipped top triangle {norm:?}");
            assert!(norm.y.abs() < 0.01, "flipped top triangle {norm:?}");
            assert!(
                (norm.z - 1.0).abs() < 0.01,
                "flipped top triangle {norm:?}"
            );
        }
    }
}

#[test]
fn simplex_is_denser_than_dc() {
    let s = shapes::sphere(1.0, [0.0; 3]);
    let r = region([-1.6, -1.0, -8.0], [1.6, 1.0, 1.0]);
    let base = Settings {
        min_feature: 1.0 / 32.0,
        max_err: 1e-3,
        ..Settings::default()
    };
    let dc = mesh::render(&s, r, &base);
    let simplex = mesh::render(
        &s,
        r,
        &Settings {
            algorithm: Algorithm::IsoSimplex,
            ..base
        },
    );
    assert!(
        simplex.triangles.len() > dc.triangles.len(),
        "{} <= {}",
        simplex.triangles.len(),
        dc.triangles.len()
    );
    assert!(
        simplex.vertices.len() > dc.vertices.len(),
        "{} <= {}",
        simplex.vertices.len(),
        dc.vertices.len()
    );
}

#[test]
fn hybrid_fans_share_intersections() {
    let s = shapes::sphere(0.5, [0.0; 3]);
    let settings = Settings {
        algorithm: Algorithm::Hybrid,
        ..Settings::default()
    };
    let m = mesh::render(&s, region([-1.0; 3], [1.0; 3]), &settings);
    assert!(!m.triangles.is_empty());
    check_edge_pairs(&m);

    // Fans add one vertex per crossed edge on top of the cell vertices
    let dc = mesh::render(
        &s,
        region([-1.0; 3], [1.0; 3]),
        &Settings::default(),
    );
    assert!(m.vertices.len() > dc.vertices.len());
    assert!(m.triangles.len() > dc.triangles.len());
}

#[test]
fn progress_is_monotone() {
    let s = shapes::sphere(0.5, [0.0; 3]);
    let seen = Mutex::new(vec![]);
    let cb = |v: f32| seen.lock().unwrap().push(v);
    let settings = Settings {
        min_feature: 0.05,
        progress: Some(&cb),
        ..Settings::default()
    };
    let m = mesh::render(&s, region([-1.0; 3], [1.0; 3]), &settings);
    assert!(!m.triangles.is_empty());

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.first(), Some(&0.0));
    assert_eq!(seen.last(), Some(&3.0));
    for w in seen.windows(2) {
        assert!(w[1] > w[0], "progress went backwards: {seen:?}");
    }
}

#[test]
fn cancellation_yields_empty_mesh() {
    let s = shapes::sphere(0.5, [0.0; 3]);
    let cancel = AtomicBool::new(true);
    let seen = Mutex::new(vec![]);
    let cb = |v: f32| seen.lock().unwrap().push(v);
    let settings = Settings {
        cancel: Some(&cancel),
        progress: Some(&cb),
        ..Settings::default()
    };
    let m = mesh::render(&s, region([-1.0; 3], [1.0; 3]), &settings);
    assert!(m.vertices.is_empty());
    assert!(m.triangles.is_empty());

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.first(), Some(&0.0));
    assert_eq!(seen.last(), Some(&3.0));
}

#[test]
fn invalid_region_yields_empty_mesh() {
    let s = shapes::sphere(0.5, [0.0; 3]);
    let seen = Mutex::new(vec![]);
    let cb = |v: f32| seen.lock().unwrap().push(v);
    let settings = Settings {
        progress: Some(&cb),
        ..Settings::default()
    };

    // Inverted on X
    let m = mesh::render(&s, region([1.0, -1.0, -1.0], [-1.0, 1.0, 1.0]), &settings);
    assert!(m.triangles.is_empty());
    assert_eq!(*seen.lock().unwrap(), vec![0.0, 3.0]);
}

#[test]
fn worker_counts_agree() {
    let s = shapes::sphere(0.6, [0.1, 0.2, 0.3]);
    let r = region([-1.0; 3], [1.0; 3]);
    let single = mesh::render(
        &s,
        r,
        &Settings {
            workers: 1,
            ..Settings::default()
        },
    );
    let many = mesh::render(
        &s,
        r,
        &Settings {
            workers: 8,
            ..Settings::default()
        },
    );
    assert_eq!(single.triangles.len(), many.triangles.len());
    assert_eq!(single.vertices.len(), many.vertices.len());
    check_edge_pairs(&single);
    check_edge_pairs(&many);
}

#[test]
fn free_thread_handler_runs() {
    struct Count(std::sync::atomic::AtomicUsize);
    impl isoform::FreeThreadHandler for Count {
        fn offer_wait(&self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }
    let handler = Count(std::sync::atomic::AtomicUsize::new(0));
    let s = shapes::sphere(0.5, [0.0; 3]);
    let settings = Settings {
        workers: 8,
        min_feature: 0.02,
        free_thread: Some(&handler),
        ..Settings::default()
    };
    let m = mesh::render(&s, region([-1.0; 3], [1.0; 3]), &settings);
    assert!(!m.triangles.is_empty());
    // With more workers than early work, someone must have idled
    assert!(handler.0.load(std::sync::atomic::Ordering::Relaxed) > 0);
}

#[test]
fn gyroid_is_closed() {
    let g = shapes::gyroid(1.0, 0.2)
        .max(shapes::sphere(0.8, [0.0; 3]));
    let settings = Settings {
        min_feature: 0.1,
        ..Settings::default()
    };
    let m = mesh::render(&g, region([-1.0; 3], [1.0; 3]), &settings);
    assert!(!m.triangles.is_empty());
    for t in &m.triangles {
        assert!(t.x != t.y && t.y != t.z && t.x != t.z);
    }
}
