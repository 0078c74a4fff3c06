//! Collision Objects
//!
//! Common state of everything a space can hold: transform, layer/mask
//! filtering, the shape list with cached world AABBs, and the constraints
//! the object participates in.
//!
//! Objects never point at each other or at their space. Keys (`Rid`,
//! `ConstraintKey`) are resolved through the owning `Space`.
//!
//! Author: Moroya Sakamoto

use crate::area::Area;
use crate::body::Body;
use crate::broad_phase::BroadPhaseId;
use crate::constraint::ConstraintKey;
use crate::error::{PhysicsError, PhysicsResult};
use crate::math::{Fix128, Transform, AABB};
use crate::shape::Shape;
use crate::soft_body::SoftBody;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

slotmap::new_key_type! {
    /// Key of a collision object inside its space
    pub struct Rid;
}

/// Arena holding every object of a space
pub type ObjectArena = slotmap::SlotMap<Rid, CollisionObject>;

/// Objects farther than this from the origin are rejected
pub const MAX_OBJECT_DISTANCE: Fix128 = Fix128::from_int(1 << 20);

/// Which of the three object families an object belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Area,
    Body,
    SoftBody,
}

/// One shape attached to an object
#[derive(Clone, Debug)]
pub struct ShapeInstance {
    pub shape: Arc<Shape>,
    /// Shape placement relative to the object
    pub xform: Transform,
    pub xform_inv: Transform,
    /// Broad-phase leaf, invalid while detached or disabled
    pub bpid: BroadPhaseId,
    /// World AABB at the last broad-phase sync
    pub aabb_cache: AABB,
    /// Volume, used to split mass between shapes
    pub area_cache: Fix128,
    pub disabled: bool,
}

impl ShapeInstance {
    fn new(shape: Arc<Shape>, xform: Transform, disabled: bool) -> Self {
        let area_cache = shape.volume();
        Self {
            shape,
            xform,
            xform_inv: xform.affine_inverse(),
            bpid: BroadPhaseId::INVALID,
            aabb_cache: AABB::default(),
            area_cache,
            disabled,
        }
    }
}

/// Family-specific data
#[derive(Debug)]
pub enum ObjectData {
    Body(Body),
    Area(Area),
    SoftBody(SoftBody),
}

/// Base object stored in a space's arena
#[derive(Debug)]
pub struct CollisionObject {
    /// Host-side identifier handed back in query results
    pub instance_id: Option<u64>,
    transform: Transform,
    inv_transform: Transform,
    pub collision_layer: u32,
    pub collision_mask: u32,
    /// Higher priority wins depenetration in motion tests
    pub collision_priority: Fix128,
    pub(crate) shapes: Vec<ShapeInstance>,
    /// Static objects never pair with other static objects
    pub(crate) is_static: bool,
    pub ray_pickable: bool,
    /// Constraint key -> this object's slot in the constraint
    pub(crate) constraints: BTreeMap<ConstraintKey, usize>,
    pub(crate) in_space: bool,
    pub data: ObjectData,
}

impl CollisionObject {
    pub(crate) fn new(data: ObjectData) -> Self {
        let is_static = match &data {
            ObjectData::Body(b) => !b.mode().is_dynamic(),
            ObjectData::Area(a) => !a.monitorable && !a.has_monitor_callback && !a.has_area_monitor_callback,
            ObjectData::SoftBody(_) => false,
        };
        Self {
            instance_id: None,
            transform: Transform::IDENTITY,
            inv_transform: Transform::IDENTITY,
            collision_layer: 1,
            collision_mask: 1,
            collision_priority: Fix128::ONE,
            shapes: Vec::new(),
            is_static,
            ray_pickable: true,
            constraints: BTreeMap::new(),
            in_space: false,
            data,
        }
    }

    #[inline]
    pub fn kind(&self) -> ObjectKind {
        match self.data {
            ObjectData::Body(_) => ObjectKind::Body,
            ObjectData::Area(_) => ObjectKind::Area,
            ObjectData::SoftBody(_) => ObjectKind::SoftBody,
        }
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    pub fn inv_transform(&self) -> &Transform {
        &self.inv_transform
    }

    /// Move the object; origins beyond [`MAX_OBJECT_DISTANCE`] are refused
    pub fn set_transform(&mut self, transform: Transform) -> PhysicsResult<()> {
        let o = transform.origin;
        if o.x.abs() > MAX_OBJECT_DISTANCE
            || o.y.abs() > MAX_OBJECT_DISTANCE
            || o.z.abs() > MAX_OBJECT_DISTANCE
        {
            log::error!("object went too far away (more than {} units from origin)", 1 << 20);
            return Err(PhysicsError::ObjectTooFar);
        }
        self.transform = transform;
        self.inv_transform = transform.affine_inverse();
        Ok(())
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    #[inline]
    pub fn is_in_space(&self) -> bool {
        self.in_space
    }

    /// Our mask accepts the other's layer
    #[inline]
    pub fn collides_with(&self, other: &CollisionObject) -> bool {
        other.collision_layer & self.collision_mask != 0
    }

    /// Either side accepts the other
    #[inline]
    pub fn interacts_with(&self, other: &CollisionObject) -> bool {
        self.collides_with(other) || other.collides_with(self)
    }

    // ------------------------------------------------------------------
    // Shapes
    // ------------------------------------------------------------------

    pub fn add_shape(&mut self, shape: Arc<Shape>, xform: Transform, disabled: bool) -> usize {
        self.shapes.push(ShapeInstance::new(shape, xform, disabled));
        self.shapes.len() - 1
    }

    #[inline]
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn shapes(&self) -> &[ShapeInstance] {
        &self.shapes
    }

    pub fn shape(&self, index: usize) -> PhysicsResult<&ShapeInstance> {
        self.shapes.get(index).ok_or(PhysicsError::InvalidShapeIndex {
            index,
            count: self.shapes.len(),
        })
    }

    fn shape_mut(&mut self, index: usize) -> PhysicsResult<&mut ShapeInstance> {
        let count = self.shapes.len();
        self.shapes
            .get_mut(index)
            .ok_or(PhysicsError::InvalidShapeIndex { index, count })
    }

    /// Swap the shape at `index`; returns the old leaf so the caller can drop it
    pub fn set_shape(&mut self, index: usize, shape: Arc<Shape>) -> PhysicsResult<BroadPhaseId> {
        let inst = self.shape_mut(index)?;
        inst.area_cache = shape.volume();
        inst.shape = shape;
        Ok(core::mem::replace(&mut inst.bpid, BroadPhaseId::INVALID))
    }

    pub fn set_shape_transform(&mut self, index: usize, xform: Transform) -> PhysicsResult<()> {
        let inst = self.shape_mut(index)?;
        inst.xform = xform;
        inst.xform_inv = xform.affine_inverse();
        Ok(())
    }

    pub fn set_shape_disabled(&mut self, index: usize, disabled: bool) -> PhysicsResult<()> {
        self.shape_mut(index)?.disabled = disabled;
        Ok(())
    }

    /// Detach and return the shape instance
    pub fn remove_shape(&mut self, index: usize) -> PhysicsResult<ShapeInstance> {
        if index >= self.shapes.len() {
            return Err(PhysicsError::InvalidShapeIndex {
                index,
                count: self.shapes.len(),
            });
        }
        Ok(self.shapes.remove(index))
    }

    /// Detach the first instance sharing `shape`
    pub fn remove_shape_ref(&mut self, shape: &Arc<Shape>) -> Option<ShapeInstance> {
        let index = self.find_shape(shape)?;
        Some(self.shapes.remove(index))
    }

    /// Index of the first instance sharing `shape`
    pub fn find_shape(&self, shape: &Arc<Shape>) -> Option<usize> {
        self.shapes.iter().position(|s| Arc::ptr_eq(&s.shape, shape))
    }

    /// World transform of one shape
    #[inline]
    pub fn shape_transform(&self, index: usize) -> Transform {
        match self.shapes.get(index) {
            Some(s) => self.transform.mul(&s.xform),
            None => self.transform,
        }
    }

    // ------------------------------------------------------------------
    // Family accessors
    // ------------------------------------------------------------------

    pub fn as_body(&self) -> Option<&Body> {
        match &self.data {
            ObjectData::Body(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_body_mut(&mut self) -> Option<&mut Body> {
        match &mut self.data {
            ObjectData::Body(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_area(&self) -> Option<&Area> {
        match &self.data {
            ObjectData::Area(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_area_mut(&mut self) -> Option<&mut Area> {
        match &mut self.data {
            ObjectData::Area(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_soft_body(&self) -> Option<&SoftBody> {
        match &self.data {
            ObjectData::SoftBody(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_soft_body_mut(&mut self) -> Option<&mut SoftBody> {
        match &mut self.data {
            ObjectData::SoftBody(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn refresh_static_flag(&mut self) {
        self.is_static = match &self.data {
            ObjectData::Body(b) => !b.mode().is_dynamic(),
            ObjectData::Area(a) => !a.monitorable && !a.has_monitor_callback && !a.has_area_monitor_callback,
            ObjectData::SoftBody(_) => false,
        };
    }

    /// Recompute a body's mass properties from its current shapes
    pub(crate) fn update_mass_properties(&mut self) {
        if let ObjectData::Body(b) = &mut self.data {
            b.update_mass_properties(&self.shapes, &self.transform);
            b.mass_dirty = false;
        }
    }

    /// Body mode, static for anything that is not a body
    #[inline]
    pub(crate) fn body_mode(&self) -> crate::body::BodyMode {
        match &self.data {
            ObjectData::Body(b) => b.mode(),
            _ => crate::body::BodyMode::Static,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3Fix;

    fn body() -> CollisionObject {
        CollisionObject::new(ObjectData::Body(Body::new(crate::body::BodyMode::Dynamic)))
    }

    #[test]
    fn test_layer_mask_filtering() {
        let mut a = body();
        let mut b = body();
        a.collision_layer = 0b01;
        a.collision_mask = 0b10;
        b.collision_layer = 0b10;
        b.collision_mask = 0b00;
        assert!(a.collides_with(&b));
        assert!(!b.collides_with(&a));
        assert!(a.interacts_with(&b) && b.interacts_with(&a));
        b.collision_layer = 0b100;
        assert!(!a.interacts_with(&b));
    }

    #[test]
    fn test_too_far_transform_rejected() {
        let mut a = body();
        let far = Transform::from_origin(Vec3Fix::from_int(0, (1 << 20) + 1, 0));
        assert_eq!(a.set_transform(far), Err(PhysicsError::ObjectTooFar));
        assert_eq!(a.transform().origin, Vec3Fix::ZERO);
        let near = Transform::from_origin(Vec3Fix::from_int(3, 0, 0));
        assert!(a.set_transform(near).is_ok());
        assert_eq!(a.inv_transform().xform(Vec3Fix::from_int(3, 0, 0)), Vec3Fix::ZERO);
    }

    #[test]
    fn test_shape_edits() {
        let mut a = body();
        let s = Arc::new(Shape::sphere(Fix128::ONE));
        let idx = a.add_shape(s.clone(), Transform::IDENTITY, false);
        assert_eq!(idx, 0);
        assert_eq!(a.find_shape(&s), Some(0));
        assert!(a.set_shape_disabled(0, true).is_ok());
        assert!(a.shapes()[0].disabled);
        assert_eq!(
            a.set_shape_transform(4, Transform::IDENTITY),
            Err(PhysicsError::InvalidShapeIndex { index: 4, count: 1 })
        );
        assert!(a.remove_shape(0).is_ok());
        assert_eq!(a.shape_count(), 0);
    }

    #[test]
    fn test_static_flag_follows_kind() {
        assert!(!body().is_static());
        let s = CollisionObject::new(ObjectData::Body(Body::new(crate::body::BodyMode::Static)));
        assert!(s.is_static());
    }
}
