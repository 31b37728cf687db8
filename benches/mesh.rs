use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use isoform::{mesh, shapes, Region, Settings};
use nalgebra::Vector3;
use std::hint::black_box;

fn sphere_gyroid() -> isoform::Tree {
    shapes::gyroid(1.0, 0.15).max(shapes::sphere(1.8, [0.0; 3]))
}

pub fn gyroid_thread_sweep(c: &mut Criterion) {
    let shape = sphere_gyroid();
    let region = Region::new(
        Vector3::new(-2.0, -2.0, -2.0),
        Vector3::new(2.0, 2.0, 2.0),
    );

    let mut group = c.benchmark_group("speed vs threads (gyroid, octree)");
    for workers in [1, 4, 8] {
        let settings = Settings {
            min_feature: 0.05,
            workers,
            ..Settings::default()
        };
        group.bench_function(BenchmarkId::new("build", workers), |b| {
            b.iter(|| {
                black_box(isoform::Root::build(&shape, region, &settings))
            })
        });
    }
}

pub fn gyroid_mesh(c: &mut Criterion) {
    let shape = sphere_gyroid();
    let region = Region::new(
        Vector3::new(-2.0, -2.0, -2.0),
        Vector3::new(2.0, 2.0, 2.0),
    );
    let settings = Settings {
        min_feature: 0.05,
        ..Settings::default()
    };
    let root = isoform::Root::build(&shape, region, &settings);

    let mut group = c.benchmark_group("speed (gyroid, meshing)");
    group.bench_function(BenchmarkId::new("walk_dual", "gyroid"), |b| {
        b.iter(|| black_box(root.walk_dual(&settings)))
    });
    group.bench_function(BenchmarkId::new("render", "gyroid"), |b| {
        b.iter(|| black_box(mesh::render(&shape, region, &settings)))
    });
}

criterion_group!(benches, gyroid_thread_sweep, gyroid_mesh);
criterion_main!(benches);
