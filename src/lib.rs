//! # ALICE-Space
//!
//! **Deterministic 3D Physics Space Core**
//!
//! The per-world simulation core of a rigid-body physics server: collision
//! objects and their shapes, a BVH broad phase, a GJK/EPA based narrow
//! phase, pair constraints solved with sequential impulses, island based
//! stepping with optional rayon parallelism, and direct space queries.
//!
//! ## Features
//!
//! | Module | Description |
//! |--------|-------------|
//! | **space** | Object ownership, pair bookkeeping, step driver, deferred callbacks |
//! | **broad_phase** | Pluggable broad phase over a dynamic AABB tree |
//! | **collision_solver** | Contact generation for every shape combination |
//! | **body_pair / area_pair / joint** | Contact, overlap and joint constraints |
//! | **step** | Force integration, islands, solve, sleep |
//! | **space_state / body_state** | Ray, shape and motion queries; direct body access |
//!
//! ## Design Principles
//!
//! - **Deterministic**: all arithmetic is 128-bit fixed point (`Fix128`)
//! - **Arena owned**: objects and constraints live in slot maps, relations are ids
//! - **no_std Compatible**: builds on `core` + `alloc` without the `std` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use alice_space::prelude::*;
//! use std::sync::Arc;
//!
//! let mut space = Space::new().unwrap();
//! let unit = Arc::new(Shape::cuboid(Vec3Fix::from_int(1, 1, 1)));
//!
//! let ground = space.add_body(Body::new(BodyMode::Static), Transform::IDENTITY).unwrap();
//! space.add_shape(ground, unit.clone(), Transform::IDENTITY, false).unwrap();
//!
//! let start = Transform::from_origin(Vec3Fix::from_int(0, 10, 0));
//! let crate_box = space.add_body(Body::new(BodyMode::Dynamic), start).unwrap();
//! space.add_shape(crate_box, unit, Transform::IDENTITY, false).unwrap();
//!
//! for _ in 0..60 {
//!     space.step(Fix128::from_ratio(1, 60)).unwrap();
//!     space.call_queries();
//! }
//! assert!(space.object(crate_box).unwrap().transform().origin.y < Fix128::from_int(10));
//! ```
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod area;
pub mod area_pair;
pub mod body;
pub mod body_pair;
pub mod body_state;
pub mod broad_phase;
pub mod collision_object;
pub mod collision_solver;
pub mod config;
pub mod constraint;
pub mod dynamic_bvh;
pub mod error;
pub mod gjk;
pub mod joint;
pub mod math;
pub mod shape;
pub mod soft_body;
pub mod space;
pub mod space_state;
pub mod step;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::area::{Area, MonitorEvent, MonitorStatus, SpaceOverrideMode};
    pub use crate::body::{Body, BodyMode, BodyParameter, Contact};
    pub use crate::body_state::BodyState;
    pub use crate::broad_phase::{BroadPhase, BroadPhaseId, BvhBroadPhase, LeafOwner};
    pub use crate::collision_object::{CollisionObject, ObjectKind, Rid};
    pub use crate::config::{SpaceConfig, SpaceParameter};
    pub use crate::constraint::{Constraint, ConstraintKey};
    pub use crate::error::{PhysicsError, PhysicsResult};
    pub use crate::joint::{DampedSpringParam, Joint, JointType, PinParam};
    pub use crate::math::{Fix128, Mat3Fix, Transform, Vec3Fix, AABB};
    pub use crate::shape::{Shape, ShapeKind};
    pub use crate::soft_body::SoftBody;
    pub use crate::space::{BodySync, MonitorCallback, Space, StateSyncCallback};
    pub use crate::space_state::{
        MotionResult, QueryFilter, RayParameters, RayResult, RestInfo, ShapeParameters,
        ShapeResult, SpaceState,
    };
}

// Re-export main types at crate root
pub use prelude::*;

// ============================================================================
// Integration Tests
// ============================================================================
