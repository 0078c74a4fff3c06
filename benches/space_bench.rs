//! Benchmarks for ALICE-Space
//!
//! Run with: `cargo bench` (add `--features parallel` for the island pool)

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use alice_space::space_state::RayParameters;
use alice_space::{Body, BodyMode, Fix128, Shape, Space, Transform, Vec3Fix};

fn at(x: i64, y: i64, z: i64) -> Transform {
    Transform::from_origin(Vec3Fix::from_int(x, y, z))
}

/// Static floor plus a `side` x `side` grid of boxes stacked `layers` high
fn box_field(side: i64, layers: i64) -> Space {
    let mut space = Space::new().unwrap();
    let floor = space.add_body(Body::new(BodyMode::Static), at(0, -1, 0)).unwrap();
    space
        .add_shape(floor, Arc::new(Shape::cuboid(Vec3Fix::from_int(100, 1, 100))), Transform::IDENTITY, false)
        .unwrap();
    let unit = Arc::new(Shape::cuboid(Vec3Fix::from_int(1, 1, 1)));
    for x in 0..side {
        for z in 0..side {
            for y in 0..layers {
                let rid = space
                    .add_body(Body::new(BodyMode::Dynamic), at(x * 3, 1 + y * 2, z * 3))
                    .unwrap();
                space.add_shape(rid, unit.clone(), Transform::IDENTITY, false).unwrap();
            }
        }
    }
    space
}

// ============================================================================
// Step benchmarks
// ============================================================================

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("space_step");
    let dt = Fix128::from_ratio(1, 60);

    group.bench_function("free_fall_100_bodies", |b| {
        b.iter(|| {
            let mut space = Space::new().unwrap();
            let sphere = Arc::new(Shape::sphere(Fix128::ONE));
            for i in 0..100 {
                let rid = space
                    .add_body(Body::new(BodyMode::Dynamic), at((i % 10) * 4, 50, (i / 10) * 4))
                    .unwrap();
                space.add_shape(rid, sphere.clone(), Transform::IDENTITY, false).unwrap();
            }
            for _ in 0..10 {
                space.step(black_box(dt)).unwrap();
            }
            space.active_objects()
        });
    });

    group.bench_function("stacks_5x5x2_settled", |b| {
        let mut space = box_field(5, 2);
        for _ in 0..30 {
            space.step(dt).unwrap();
        }
        b.iter(|| {
            space.step(black_box(dt)).unwrap();
            space.island_count()
        });
    });

    group.finish();
}

// ============================================================================
// Query benchmarks
// ============================================================================

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("space_queries");
    let space = box_field(8, 1);

    group.bench_function("intersect_ray_across_field", |b| {
        let params = RayParameters::new(Vec3Fix::from_int(-5, 1, 10), Vec3Fix::from_int(40, 1, 10));
        b.iter(|| space.direct_state().intersect_ray(black_box(&params)));
    });

    group.bench_function("cast_motion_sphere", |b| {
        let probe = Shape::sphere(Fix128::HALF);
        b.iter(|| {
            let params = alice_space::ShapeParameters::new(&probe, at(-5, 1, 9))
                .with_motion(black_box(Vec3Fix::from_int(40, 0, 0)));
            space.direct_state().cast_motion(&params)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_step, bench_queries);
criterion_main!(benches);
