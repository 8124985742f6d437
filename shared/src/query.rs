//! Thin wrappers over parry3d narrow-phase queries.
//!
//! These operate on explicit shapes and poses, not on a rapier collider set. The
//! domain uses them for queries that run outside the physics step (placement,
//! reach, collision queries) where the broad phase might not yet reflect poses
//! written since the last step.

use rapier3d::parry::query::{self, PointQuery, Ray, RayCast, ShapeCastOptions, ShapeCastStatus};
use rapier3d::parry::shape::Shape;

use crate::types::{Iso, Point3, Vec3};

/// Closest points between two shapes that are touching or within the prediction
/// distance. All values are in world space.
#[derive(Clone, Copy, Debug)]
pub struct ContactPoint {
    /// Point on the first shape.
    pub point1: Point3,
    /// Point on the second shape.
    pub point2: Point3,
    /// Outward normal of the first shape at `point1`.
    pub normal1: Vec3,
    /// Outward normal of the second shape at `point2`.
    pub normal2: Vec3,
    /// Signed separation; negative when penetrating.
    pub dist: f32,
}

/// First contact of a translated shape with a static target.
#[derive(Clone, Copy, Debug)]
pub struct SweepHit {
    /// Fraction (0..=1) of the translation travelled before contact.
    pub fraction: f32,
    /// World-space contact point on the target.
    pub point: Point3,
    /// World-space outward normal of the target at `point`.
    pub normal: Vec3,
    /// The shapes already overlapped at the start of the sweep.
    pub started_penetrating: bool,
}

/// Intersection of a ray with a shape.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    /// Distance along the (unit) ray direction.
    pub distance: f32,
    pub point: Point3,
    pub normal: Vec3,
}

/// Contact test between two posed shapes.
///
/// Returns `None` when the shapes are further apart than `prediction`, or when
/// parry has no algorithm for the pair.
pub fn contact(
    iso1: &Iso,
    shape1: &dyn Shape,
    iso2: &Iso,
    shape2: &dyn Shape,
    prediction: f32,
) -> Option<ContactPoint> {
    let c = query::contact(iso1, shape1, iso2, shape2, prediction).ok()??;
    Some(ContactPoint {
        point1: c.point1,
        point2: c.point2,
        normal1: c.normal1.into_inner(),
        normal2: c.normal2.into_inner(),
        dist: c.dist,
    })
}

/// Sweep `shape` from `iso` along `translation` against a non-moving target.
///
/// Starting in contact counts as a hit at fraction 0, so a body resting on a
/// surface finds that surface.
pub fn sweep(
    iso: &Iso,
    shape: &dyn Shape,
    translation: &Vec3,
    target_iso: &Iso,
    target: &dyn Shape,
) -> Option<SweepHit> {
    let mut opts = ShapeCastOptions::with_max_time_of_impact(1.0);
    opts.stop_at_penetration = true;
    let hit = query::cast_shapes(
        iso,
        translation,
        shape,
        target_iso,
        &Vec3::zeros(),
        target,
        opts,
    )
    .ok()??;

    Some(SweepHit {
        fraction: hit.time_of_impact,
        point: target_iso * hit.witness2,
        normal: target_iso * hit.normal2.into_inner(),
        started_penetrating: hit.status == ShapeCastStatus::PenetratingOrWithinTargetDist,
    })
}

/// Cast a ray against a single posed shape.
///
/// `direction` need not be normalized; the returned distance is in meters along it.
pub fn cast_ray(
    iso: &Iso,
    shape: &dyn Shape,
    origin: &Point3,
    direction: &Vec3,
    max_distance: f32,
) -> Option<RayHit> {
    let length = direction.norm();
    if length <= f32::EPSILON {
        return None;
    }
    let dir = direction / length;
    let ray = Ray::new(*origin, dir);
    let hit = shape.cast_ray_and_get_normal(iso, &ray, max_distance, true)?;
    Some(RayHit {
        distance: hit.time_of_impact,
        point: ray.point_at(hit.time_of_impact),
        normal: hit.normal,
    })
}

pub fn contains_point(iso: &Iso, shape: &dyn Shape, point: &Point3) -> bool {
    shape.contains_point(iso, point)
}

/// World-space bounds of a posed shape as `(mins, maxs)`.
pub fn bounds(iso: &Iso, shape: &dyn Shape) -> (Point3, Point3) {
    let aabb = shape.compute_aabb(iso);
    (aabb.mins, aabb.maxs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;
    use rapier3d::prelude::SharedShape;

    fn at(x: f32, y: f32, z: f32) -> Iso {
        Iso::translation(x, y, z)
    }

    #[test]
    fn touching_boxes_report_contact() {
        let a = SharedShape::cuboid(1.0, 0.5, 1.0);
        let b = SharedShape::cuboid(1.0, 0.5, 1.0);
        let c = contact(&at(0.0, 0.5, 0.0), &*a, &at(0.0, 1.49, 0.0), &*b, 0.0).unwrap();
        assert!(c.dist <= 0.0);
        assert!((c.point1.y - 1.0).abs() < 0.02);
        assert!(c.normal1.y > 0.9);
    }

    #[test]
    fn separated_boxes_have_no_contact() {
        let a = SharedShape::cuboid(0.5, 0.5, 0.5);
        assert!(contact(&at(0.0, 0.0, 0.0), &*a, &at(0.0, 3.0, 0.0), &*a, 0.0).is_none());
    }

    #[test]
    fn downward_sweep_finds_top_surface() {
        let falling = SharedShape::cuboid(0.5, 0.5, 0.5);
        let floor = SharedShape::cuboid(2.0, 0.5, 2.0);
        // Floor top at y = 1, falling box bottom starts at y = 4.
        let hit = sweep(
            &at(0.0, 4.5, 0.0),
            &*falling,
            &Vec3::new(0.0, -4.5, 0.0),
            &at(0.0, 0.5, 0.0),
            &*floor,
        )
        .unwrap();
        assert!((hit.point.y - 1.0).abs() < 1e-3);
        assert!((hit.fraction - 3.0 / 4.5).abs() < 1e-3);
        assert!(!hit.started_penetrating);
    }

    #[test]
    fn ray_hits_box_face() {
        let target = SharedShape::cuboid(1.0, 1.0, 1.0);
        let hit = cast_ray(
            &at(5.0, 0.0, 0.0),
            &*target,
            &Point3::origin(),
            &Vec3::new(2.0, 0.0, 0.0),
            10.0,
        )
        .unwrap();
        assert!((hit.distance - 4.0).abs() < 1e-4);
        assert!(hit.normal.x < -0.9);
    }

    #[test]
    fn rotated_box_contains_point() {
        let shape = SharedShape::cuboid(2.0, 0.5, 0.5);
        let iso = Iso::from_parts(
            na::Translation3::new(0.0, 0.0, 0.0),
            na::UnitQuaternion::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_2),
        );
        assert!(contains_point(&iso, &*shape, &Point3::new(0.0, 0.0, 1.5)));
        assert!(!contains_point(&iso, &*shape, &Point3::new(1.5, 0.0, 0.0)));
    }
}
