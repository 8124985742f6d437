use rapier3d::parry::shape::Shape as _;
use rapier3d::prelude::{HalfSpace, SharedShape, UnitVector, Vector};

use crate::constants::MIN_SHAPE_EXTENT;
use crate::types::{BBox, Vec3};

/// Explicit geometry an entity may declare. Dimensions always come from the (scaled)
/// bbox; the definition only picks the primitive fitted into it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShapeDef {
    /// Oriented cuboid filling the bbox.
    #[default]
    Box,

    /// Ball with a diameter equal to the smallest bbox side.
    Sphere,

    /// Y-aligned capsule. The radius is half the smaller horizontal side and the
    /// caps touch the bbox floor and ceiling.
    CapsuleY,

    /// Y-aligned cylinder spanning the bbox height.
    CylinderY,

    /// Y-aligned cone spanning the bbox height, apex up.
    ConeY,
}

/// A collision shape together with its offset from the entity origin.
///
/// The offset is the bbox centre expressed in the entity's local frame. Rigid bodies
/// are placed at the entity position; their collider sits at this offset.
#[derive(Clone)]
pub struct EntityShape {
    pub shape: SharedShape,
    pub offset: Vec3,
}

impl std::fmt::Debug for EntityShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityShape")
            .field("shape", &self.shape.shape_type())
            .field("offset", &self.offset)
            .finish()
    }
}

/// Fit `def` (or a box when `None`) into `bbox`.
///
/// Returns `None` when the bbox is invalid. Degenerate sides are widened to
/// [`MIN_SHAPE_EXTENT`] so that flat entities still get a usable shape.
pub fn shape_for_bbox(def: Option<ShapeDef>, bbox: &BBox) -> Option<EntityShape> {
    if !bbox.is_valid() {
        return None;
    }
    let size = bbox.size().map(|s| s.max(MIN_SHAPE_EXTENT));
    let half = size * 0.5;
    let horizontal_radius = half.x.min(half.z);

    let shape = match def.unwrap_or_default() {
        ShapeDef::Box => SharedShape::cuboid(half.x, half.y, half.z),
        ShapeDef::Sphere => SharedShape::ball(half.min()),
        ShapeDef::CapsuleY => {
            let radius = horizontal_radius.min(half.y);
            SharedShape::capsule_y((half.y - radius).max(0.0), radius)
        }
        ShapeDef::CylinderY => SharedShape::cylinder(half.y, horizontal_radius),
        ShapeDef::ConeY => SharedShape::cone(half.y, horizontal_radius),
    };

    Some(EntityShape {
        shape,
        offset: bbox.center().coords,
    })
}

/// Shape of a water body.
///
/// A bbox gives a box of water. Without one the body is an "ocean": the half-space
/// below the entity position.
pub fn water_shape(bbox: Option<&BBox>) -> EntityShape {
    match bbox.and_then(|b| shape_for_bbox(Some(ShapeDef::Box), b)) {
        Some(shape) => shape,
        None => EntityShape {
            shape: SharedShape::new(HalfSpace::new(UnitVector::new_normalize(Vector::y()))),
            offset: Vec3::zeros(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rapier3d::prelude::ShapeType;

    fn unit_box() -> BBox {
        BBox::from_corners([-0.5, 0.0, -0.5], [0.5, 2.0, 0.5])
    }

    #[test]
    fn default_shape_is_box_at_bbox_center() {
        let shape = shape_for_bbox(None, &unit_box()).unwrap();
        assert_eq!(shape.shape.shape_type(), ShapeType::Cuboid);
        assert!((shape.offset.y - 1.0).abs() < 1e-6);
        let cuboid = shape.shape.as_cuboid().unwrap();
        assert!((cuboid.half_extents.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn capsule_fits_inside_bbox_height() {
        let shape = shape_for_bbox(Some(ShapeDef::CapsuleY), &unit_box()).unwrap();
        let capsule = shape.shape.as_capsule().unwrap();
        assert!((capsule.radius - 0.5).abs() < 1e-6);
        assert!((capsule.half_height() + capsule.radius - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sphere_uses_smallest_side() {
        let shape = shape_for_bbox(Some(ShapeDef::Sphere), &unit_box()).unwrap();
        let ball = shape.shape.as_ball().unwrap();
        assert!((ball.radius - 0.5).abs() < 1e-6);
    }

    #[test]
    fn flat_bbox_is_widened() {
        let flat = BBox::from_corners([-1.0, 0.0, -1.0], [1.0, 0.0, 1.0]);
        let shape = shape_for_bbox(None, &flat).unwrap();
        let cuboid = shape.shape.as_cuboid().unwrap();
        assert!(cuboid.half_extents.y > 0.0);
    }

    #[test]
    fn invalid_bbox_has_no_shape() {
        let bad = BBox::from_corners([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]);
        assert!(shape_for_bbox(None, &bad).is_none());
    }

    #[test]
    fn water_without_bbox_is_halfspace() {
        let shape = water_shape(None);
        assert_eq!(shape.shape.shape_type(), ShapeType::HalfSpace);
    }
}
