//! Space Configuration
//!
//! Solver tunables and space-wide defaults. `SpaceConfig` is a plain value:
//! build it with `Default` and the `with_*` helpers, hand it to
//! [`Space::with_config`](crate::space::Space::with_config), and adjust
//! individual values later through [`SpaceParameter`].
//!
//! With the `serde` feature the struct (de)serializes field by field, so a
//! host can keep it next to its own project settings.

use crate::math::{Fix128, Vec3Fix};

/// Maximum number of results any direct space query may report.
pub const INTERSECTION_QUERY_MAX: usize = 2048;

/// Solver tunables shared by every constraint in a space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpaceConfig {
    /// Contacts closer than this to last step's contact inherit its impulses
    pub contact_recycle_radius: Fix128,
    /// Persistent contacts farther apart than this are dropped
    pub contact_max_separation: Fix128,
    /// Penetration tolerated before the bias pass pushes bodies apart
    pub contact_max_allowed_penetration: Fix128,
    /// Fraction of penetration corrected per step by contacts
    pub contact_default_bias: Fix128,
    /// Fraction of joint error corrected per step
    pub constraint_default_bias: Fix128,
    /// Linear speed below which a body counts as still
    pub body_linear_velocity_sleep_threshold: Fix128,
    /// Angular speed below which a body counts as still
    pub body_angular_velocity_sleep_threshold: Fix128,
    /// Seconds a whole island must stay still before it sleeps
    pub body_time_to_sleep: Fix128,
    /// Sequential impulse passes per island per step
    pub solver_iterations: u32,
    /// Gravity applied when no area overrides it
    pub default_gravity: Vec3Fix,
    /// Linear damping applied when no area overrides it
    pub default_linear_damp: Fix128,
    /// Angular damping applied when no area overrides it
    pub default_angular_damp: Fix128,
    /// Worker threads for island solving (0 = rayon default)
    pub worker_threads: usize,
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            contact_recycle_radius: Fix128::from_ratio(1, 100),
            contact_max_separation: Fix128::from_ratio(5, 100),
            contact_max_allowed_penetration: Fix128::from_ratio(1, 100),
            contact_default_bias: Fix128::from_ratio(8, 10),
            constraint_default_bias: Fix128::from_ratio(1, 100),
            body_linear_velocity_sleep_threshold: Fix128::from_ratio(1, 10),
            // 8 degrees
            body_angular_velocity_sleep_threshold: Fix128::PI * Fix128::from_ratio(8, 180),
            body_time_to_sleep: Fix128::HALF,
            solver_iterations: 16,
            default_gravity: Vec3Fix::new(Fix128::ZERO, Fix128::from_ratio(-98, 10), Fix128::ZERO),
            default_linear_damp: Fix128::from_ratio(1, 10),
            default_angular_damp: Fix128::from_ratio(1, 10),
            worker_threads: 0,
        }
    }
}

impl SpaceConfig {
    /// Set the solver iteration count
    pub fn with_solver_iterations(mut self, iterations: u32) -> Self {
        self.solver_iterations = iterations;
        self
    }

    /// Set the default gravity
    pub fn with_gravity(mut self, gravity: Vec3Fix) -> Self {
        self.default_gravity = gravity;
        self
    }

    /// Set default linear and angular damping
    pub fn with_damping(mut self, linear: Fix128, angular: Fix128) -> Self {
        self.default_linear_damp = linear;
        self.default_angular_damp = angular;
        self
    }

    /// Set the sleep thresholds and delay
    pub fn with_sleep(mut self, linear: Fix128, angular: Fix128, time_to_sleep: Fix128) -> Self {
        self.body_linear_velocity_sleep_threshold = linear;
        self.body_angular_velocity_sleep_threshold = angular;
        self.body_time_to_sleep = time_to_sleep;
        self
    }

    /// Set the worker thread count used by the `parallel` feature
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Read one parameter
    pub fn param(&self, param: SpaceParameter) -> Fix128 {
        match param {
            SpaceParameter::ContactRecycleRadius => self.contact_recycle_radius,
            SpaceParameter::ContactMaxSeparation => self.contact_max_separation,
            SpaceParameter::ContactMaxAllowedPenetration => self.contact_max_allowed_penetration,
            SpaceParameter::ContactDefaultBias => self.contact_default_bias,
            SpaceParameter::ConstraintDefaultBias => self.constraint_default_bias,
            SpaceParameter::BodyLinearVelocitySleepThreshold => {
                self.body_linear_velocity_sleep_threshold
            }
            SpaceParameter::BodyAngularVelocitySleepThreshold => {
                self.body_angular_velocity_sleep_threshold
            }
            SpaceParameter::BodyTimeToSleep => self.body_time_to_sleep,
            SpaceParameter::SolverIterations => Fix128::from_int(self.solver_iterations as i64),
        }
    }

    /// Write one parameter; negative distances and times are clamped to zero
    pub fn set_param(&mut self, param: SpaceParameter, value: Fix128) {
        let non_negative = if value.is_negative() {
            log::warn!("space parameter {:?} clamped to zero", param);
            Fix128::ZERO
        } else {
            value
        };
        match param {
            SpaceParameter::ContactRecycleRadius => self.contact_recycle_radius = non_negative,
            SpaceParameter::ContactMaxSeparation => self.contact_max_separation = non_negative,
            SpaceParameter::ContactMaxAllowedPenetration => {
                self.contact_max_allowed_penetration = non_negative
            }
            SpaceParameter::ContactDefaultBias => self.contact_default_bias = non_negative,
            SpaceParameter::ConstraintDefaultBias => self.constraint_default_bias = non_negative,
            SpaceParameter::BodyLinearVelocitySleepThreshold => {
                self.body_linear_velocity_sleep_threshold = non_negative
            }
            SpaceParameter::BodyAngularVelocitySleepThreshold => {
                self.body_angular_velocity_sleep_threshold = non_negative
            }
            SpaceParameter::BodyTimeToSleep => self.body_time_to_sleep = non_negative,
            SpaceParameter::SolverIterations => {
                let iterations = non_negative.hi.clamp(1, u32::MAX as i64) as u32;
                if non_negative.hi < 1 {
                    log::warn!("solver iterations must be at least 1");
                }
                self.solver_iterations = iterations;
            }
        }
    }
}

/// Individually addressable space parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SpaceParameter {
    ContactRecycleRadius,
    ContactMaxSeparation,
    ContactMaxAllowedPenetration,
    ContactDefaultBias,
    ConstraintDefaultBias,
    BodyLinearVelocitySleepThreshold,
    BodyAngularVelocitySleepThreshold,
    BodyTimeToSleep,
    SolverIterations,
}
