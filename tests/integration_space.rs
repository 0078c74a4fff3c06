//! Integration tests for ALICE-Space
//!
//! End-to-end scenarios through the public `Space` API. All runs are
//! deterministic fixed-point simulations.

use std::sync::{Arc, Mutex};

use alice_space::{
    Area, Body, BodyMode, Fix128, MonitorEvent, MonitorStatus, Shape, Space, SpaceConfig,
    SpaceOverrideMode, Transform, Vec3Fix,
};

// ============================================================================
// Helpers
// ============================================================================

fn dt() -> Fix128 {
    Fix128::from_ratio(1, 60)
}

fn at(x: i64, y: i64, z: i64) -> Transform {
    Transform::from_origin(Vec3Fix::from_int(x, y, z))
}

fn unit_box() -> Arc<Shape> {
    Arc::new(Shape::cuboid(Vec3Fix::from_int(1, 1, 1)))
}

fn run(space: &mut Space, steps: usize) {
    for _ in 0..steps {
        space.step(dt()).unwrap();
        space.call_queries();
    }
}

fn weightless() -> SpaceConfig {
    SpaceConfig::default()
        .with_gravity(Vec3Fix::ZERO)
        .with_damping(Fix128::ZERO, Fix128::ZERO)
}

// ============================================================================
// Box stacking on a static box
// ============================================================================

/// A unit box dropped from y = 10 onto a static unit box settles at the
/// sum of the half extents.
#[test]
fn test_box_comes_to_rest_on_box() {
    let mut space = Space::new().unwrap();
    let ground = space.add_body(Body::new(BodyMode::Static), at(0, 0, 0)).unwrap();
    space.add_shape(ground, unit_box(), Transform::IDENTITY, false).unwrap();
    let falling = space.add_body(Body::new(BodyMode::Dynamic), at(0, 10, 0)).unwrap();
    space.add_shape(falling, unit_box(), Transform::IDENTITY, false).unwrap();

    run(&mut space, 240);

    let y = space.object(falling).unwrap().transform().origin.y;
    let error = (y - Fix128::from_int(2)).abs();
    assert!(error < Fix128::from_ratio(1, 10), "rest height = {}", y.to_f64());
    let v = space.body(falling).unwrap().linear_velocity();
    assert!(v.length() < Fix128::from_ratio(1, 10), "still moving: {:?}", v.y.to_f64());
}

/// Contacts are solved in creation order within an island. Building the
/// same stack bottom-up or top-down changes that order, not where the
/// boxes come to rest.
#[test]
fn test_stack_rest_heights_independent_of_creation_order() {
    fn settle(top_down: bool) -> Vec<Fix128> {
        let mut space = Space::new().unwrap();
        let ground = space.add_body(Body::new(BodyMode::Static), at(0, 0, 0)).unwrap();
        space.add_shape(ground, unit_box(), Transform::IDENTITY, false).unwrap();
        let mut levels: Vec<i64> = vec![3, 6, 9];
        if top_down {
            levels.reverse();
        }
        let mut boxes = Vec::new();
        for y in levels {
            let rid = space.add_body(Body::new(BodyMode::Dynamic), at(0, y, 0)).unwrap();
            space.add_shape(rid, unit_box(), Transform::IDENTITY, false).unwrap();
            boxes.push((y, rid));
        }
        run(&mut space, 360);
        boxes.sort_by_key(|(y, _)| *y);
        boxes
            .iter()
            .map(|(_, rid)| space.object(*rid).unwrap().transform().origin.y)
            .collect()
    }

    let bottom_up = settle(false);
    let top_down = settle(true);
    for (level, (a, b)) in bottom_up.iter().zip(&top_down).enumerate() {
        let expected = Fix128::from_int(2 * (level as i64 + 1));
        assert!((*a - expected).abs() < Fix128::from_ratio(2, 10), "level {} at {}", level, a.to_f64());
        assert!((*a - *b).abs() < Fix128::from_ratio(5, 100), "level {}: {} vs {}", level, a.to_f64(), b.to_f64());
    }
}

// ============================================================================
// Head-on collision
// ============================================================================

/// Equal masses, equal and opposite speeds, no bounce: both stop.
#[test]
fn test_head_on_collision_comes_to_rest() {
    let mut space = Space::with_config(weightless()).unwrap();
    let sphere = Arc::new(Shape::sphere(Fix128::ONE));
    let a = space.add_body(Body::new(BodyMode::Dynamic), at(-4, 0, 0)).unwrap();
    let b = space.add_body(Body::new(BodyMode::Dynamic), at(4, 0, 0)).unwrap();
    space.add_shape(a, sphere.clone(), Transform::IDENTITY, false).unwrap();
    space.add_shape(b, sphere, Transform::IDENTITY, false).unwrap();
    space.body_mut(a).unwrap().set_linear_velocity(Vec3Fix::from_int(3, 0, 0));
    space.body_mut(b).unwrap().set_linear_velocity(Vec3Fix::from_int(-3, 0, 0));

    run(&mut space, 120);

    let va = space.body(a).unwrap().linear_velocity();
    let vb = space.body(b).unwrap().linear_velocity();
    let tolerance = Fix128::from_ratio(5, 100);
    assert!(va.length() < tolerance, "a still moving: {:?}", va.x.to_f64());
    assert!(vb.length() < tolerance, "b still moving: {:?}", vb.x.to_f64());
    // Total momentum stays zero
    assert!((va + vb).length() < Fix128::from_ratio(1, 1000));
    let gap = space.object(b).unwrap().transform().origin.x - space.object(a).unwrap().transform().origin.x;
    assert!(gap > Fix128::from_ratio(19, 10), "spheres overlap: gap = {}", gap.to_f64());
}

// ============================================================================
// Sleep
// ============================================================================

#[test]
fn test_resting_body_sleeps_and_stays_asleep() {
    let mut space = Space::with_config(weightless()).unwrap();
    let rid = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
    space.add_shape(rid, unit_box(), Transform::IDENTITY, false).unwrap();

    // body_time_to_sleep is 0.5 s
    run(&mut space, 40);
    assert!(!space.body(rid).unwrap().is_active());
    assert_eq!(space.active_objects(), 0);

    let before = *space.object(rid).unwrap().transform();
    run(&mut space, 30);
    assert_eq!(*space.object(rid).unwrap().transform(), before);
    assert!(!space.body(rid).unwrap().is_active());

    space
        .body_state(rid)
        .unwrap()
        .apply_central_impulse(Vec3Fix::from_int(1, 0, 0));
    assert!(space.body(rid).unwrap().is_active());
    run(&mut space, 1);
    assert!(space.object(rid).unwrap().transform().origin.x > Fix128::ZERO);
}

#[test]
fn test_sleeping_body_wakes_when_hit() {
    let mut space = Space::with_config(weightless()).unwrap();
    let sleeper = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
    space.add_shape(sleeper, unit_box(), Transform::IDENTITY, false).unwrap();
    run(&mut space, 40);
    assert!(!space.body(sleeper).unwrap().is_active());

    let bullet = space.add_body(Body::new(BodyMode::Dynamic), at(-5, 0, 0)).unwrap();
    space.add_shape(bullet, unit_box(), Transform::IDENTITY, false).unwrap();
    space.body_mut(bullet).unwrap().set_linear_velocity(Vec3Fix::from_int(6, 0, 0));
    run(&mut space, 60);

    assert!(space.object(sleeper).unwrap().transform().origin.x > Fix128::ZERO);
}

// ============================================================================
// Contacts
// ============================================================================

#[test]
fn test_reported_contacts_never_exceed_capacity() {
    let mut space = Space::new().unwrap();
    let ground = space.add_body(Body::new(BodyMode::Static), at(0, -1, 0)).unwrap();
    space
        .add_shape(ground, Arc::new(Shape::cuboid(Vec3Fix::from_int(10, 1, 10))), Transform::IDENTITY, false)
        .unwrap();

    let rid = space.add_body(Body::new(BodyMode::Dynamic), at(0, 1, 0)).unwrap();
    space.add_shape(rid, unit_box(), Transform::IDENTITY, false).unwrap();
    space.add_shape(rid, unit_box(), at(2, 0, 0), false).unwrap();
    space.body_mut(rid).unwrap().set_max_contacts_reported(3);

    let mut seen_full = false;
    for _ in 0..60 {
        space.step(dt()).unwrap();
        let count = space.body(rid).unwrap().contact_count();
        assert!(count <= 3, "reported {} contacts", count);
        seen_full |= count == 3;
    }
    assert!(seen_full);
}

#[test]
fn test_debug_contacts_are_capped() {
    let mut space = Space::new().unwrap();
    space.set_debug_contacts(2);
    let ground = space.add_body(Body::new(BodyMode::Static), at(0, -1, 0)).unwrap();
    space
        .add_shape(ground, Arc::new(Shape::cuboid(Vec3Fix::from_int(10, 1, 10))), Transform::IDENTITY, false)
        .unwrap();
    let rid = space.add_body(Body::new(BodyMode::Dynamic), at(0, 1, 0)).unwrap();
    space.add_shape(rid, unit_box(), Transform::IDENTITY, false).unwrap();

    run(&mut space, 5);
    assert_eq!(space.debug_contacts().len(), 2);
}

// ============================================================================
// Areas
// ============================================================================

#[test]
fn test_replace_gravity_scoped_to_overlap() {
    let mut space = Space::new().unwrap();
    let mut area = Area::new();
    area.gravity_override_mode = SpaceOverrideMode::Replace;
    area.gravity = Fix128::from_int(5);
    area.gravity_vector = Vec3Fix::UNIT_Y;
    let area = space.add_area(area, at(0, 0, 0)).unwrap();
    space
        .add_shape(area, Arc::new(Shape::cuboid(Vec3Fix::from_int(5, 5, 5))), Transform::IDENTITY, false)
        .unwrap();

    let rid = space.add_body(Body::new(BodyMode::Dynamic), at(0, 0, 0)).unwrap();
    space
        .add_shape(rid, Arc::new(Shape::sphere(Fix128::HALF)), Transform::IDENTITY, false)
        .unwrap();

    // First step discovers the overlap, the second applies it
    run(&mut space, 2);
    assert_eq!(space.body(rid).unwrap().total_gravity(), Vec3Fix::from_int(0, 5, 0));
    run(&mut space, 2);
    assert_eq!(space.body(rid).unwrap().total_gravity(), Vec3Fix::from_int(0, 5, 0));

    space.set_transform(rid, at(50, 0, 0)).unwrap();
    run(&mut space, 1);
    assert_eq!(space.body(rid).unwrap().total_gravity(), Vec3Fix::from_int(0, 5, 0));
    run(&mut space, 1);
    assert_eq!(space.body(rid).unwrap().total_gravity(), SpaceConfig::default().default_gravity);
}

#[test]
fn test_monitor_reports_one_enter_one_exit() {
    let mut space = Space::with_config(weightless()).unwrap();
    let area = space.add_area(Area::new(), at(0, 0, 0)).unwrap();
    space.add_shape(area, unit_box(), Transform::IDENTITY, false).unwrap();

    let events: Arc<Mutex<Vec<MonitorEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    space
        .set_monitor_callback(area, Some(Box::new(move |e: MonitorEvent| sink.lock().unwrap().push(e))))
        .unwrap();

    let rid = space.add_body(Body::new(BodyMode::Dynamic), at(-6, 0, 0)).unwrap();
    space
        .add_shape(rid, Arc::new(Shape::sphere(Fix128::HALF)), Transform::IDENTITY, false)
        .unwrap();
    space.body_mut(rid).unwrap().set_linear_velocity(Vec3Fix::from_int(6, 0, 0));

    // Two seconds carries the body from x = -6 to x = 6
    run(&mut space, 120);

    let events = events.lock().unwrap();
    let statuses: Vec<MonitorStatus> = events.iter().map(|e| e.status).collect();
    assert_eq!(statuses, vec![MonitorStatus::Entered, MonitorStatus::Exited]);
    assert!(events.iter().all(|e| e.object == rid));
}

#[test]
fn test_monitorable_areas_see_each_other() {
    let mut space = Space::new().unwrap();
    let watcher = space.add_area(Area::new(), at(0, 0, 0)).unwrap();
    space.add_shape(watcher, unit_box(), Transform::IDENTITY, false).unwrap();
    let other = space.add_area(Area::new(), at(1, 0, 0)).unwrap();
    space.add_shape(other, unit_box(), Transform::IDENTITY, false).unwrap();
    space.area_set_monitorable(other, true).unwrap();

    let count = Arc::new(Mutex::new(0));
    let sink = count.clone();
    space
        .set_area_monitor_callback(watcher, Some(Box::new(move |_: MonitorEvent| *sink.lock().unwrap() += 1)))
        .unwrap();

    run(&mut space, 3);
    assert_eq!(*count.lock().unwrap(), 1);
}

// ============================================================================
// Structural edits
// ============================================================================

#[test]
fn test_removed_object_leaves_no_pairs() {
    let mut space = Space::new().unwrap();
    let ground = space.add_body(Body::new(BodyMode::Static), at(0, 0, 0)).unwrap();
    space.add_shape(ground, unit_box(), Transform::IDENTITY, false).unwrap();
    let mut bodies = Vec::new();
    for i in 0..4 {
        let rid = space.add_body(Body::new(BodyMode::Dynamic), at(i - 2, 2, 0)).unwrap();
        space.add_shape(rid, unit_box(), Transform::IDENTITY, false).unwrap();
        bodies.push(rid);
    }
    run(&mut space, 10);
    assert!(space.collision_pairs() > 0);

    for rid in bodies {
        space.remove_object(rid).unwrap();
    }
    assert_eq!(space.collision_pairs(), 0);
    assert!(space.constraints_of(ground).is_empty());
    run(&mut space, 5);
    assert_eq!(space.collision_pairs(), 0);
}

#[test]
fn test_jointed_bodies_hang_from_static_anchor() {
    let mut space = Space::new().unwrap();
    let anchor = space.add_body(Body::new(BodyMode::Static), at(0, 10, 0)).unwrap();
    let bob = space.add_body(Body::new(BodyMode::Dynamic), at(0, 8, 0)).unwrap();
    space
        .add_shape(bob, Arc::new(Shape::sphere(Fix128::HALF)), Transform::IDENTITY, false)
        .unwrap();
    space
        .create_pin_joint(anchor, Vec3Fix::ZERO, bob, Vec3Fix::from_int(0, 2, 0))
        .unwrap();

    run(&mut space, 120);

    let y = space.object(bob).unwrap().transform().origin.y;
    assert!((y - Fix128::from_int(8)).abs() < Fix128::from_ratio(1, 10), "bob at {}", y.to_f64());
}
