use nalgebra::Rotation2;
use shared::{Area2, Point3, Quat, Vec2, Vec3};

use crate::types::FootprintShape;

/// A footprint outline placed in the world: scaled, turned about +Y and moved to an
/// entity position. All coordinates are on the X/Z plane as `(x, z)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Footprint {
    pub shape: FootprintShape,
    pub centre: Vec2,
    pub scale: Vec2,
    /// Maps local `(x, z)` offsets to world offsets.
    pub rotation: Rotation2<f32>,
}

impl Footprint {
    pub fn new(shape: FootprintShape, position: &Point3, orientation: &Quat, scale: &Vec3) -> Self {
        Self {
            shape,
            centre: Vec2::new(position.x, position.z),
            scale: Vec2::new(scale.x, scale.z),
            rotation: Rotation2::new(-yaw(orientation)),
        }
    }

    fn to_local(&self, x: f32, z: f32) -> Vec2 {
        let local = self.rotation.inverse() * (Vec2::new(x, z) - self.centre);
        Vec2::new(
            local.x / self.scale.x.max(f32::EPSILON),
            local.y / self.scale.y.max(f32::EPSILON),
        )
    }

    /// Normalized distance from the centre: 0 at the centre, 1 on the outline and `None`
    /// outside of it.
    pub fn falloff(&self, x: f32, z: f32) -> Option<f32> {
        let local = self.to_local(x, z);
        let r = match self.shape {
            FootprintShape::Rect { half_x, half_z } => {
                (local.x.abs() / half_x.max(f32::EPSILON))
                    .max(local.y.abs() / half_z.max(f32::EPSILON))
            }
            FootprintShape::Circle { radius } => local.norm() / radius.max(f32::EPSILON),
        };
        (r <= 1.0).then_some(r)
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        self.falloff(x, z).is_some()
    }

    /// World-aligned bounds of the placed outline.
    pub fn bounds(&self) -> Area2 {
        let (hx, hz) = match self.shape {
            FootprintShape::Rect { half_x, half_z } => (half_x, half_z),
            FootprintShape::Circle { radius } => (radius, radius),
        };
        let corners = [(-hx, -hz), (hx, -hz), (hx, hz), (-hx, hz)].map(|(x, z)| {
            self.centre + self.rotation * Vec2::new(x * self.scale.x, z * self.scale.y)
        });
        Area2::from_points(corners).unwrap_or_else(|| Area2::new(self.centre, self.centre))
    }
}

/// Heading of `orientation` around +Y, in radians.
fn yaw(orientation: &Quat) -> f32 {
    let forward = orientation * Vec3::x();
    (-forward.z).atan2(forward.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn quarter_turn() -> Quat {
        Quat::from_axis_angle(&Vec3::y_axis(), FRAC_PI_2)
    }

    #[test]
    fn rect_follows_rotation() {
        let footprint = Footprint::new(
            FootprintShape::Rect {
                half_x: 2.0,
                half_z: 0.5,
            },
            &Point3::new(10.0, 3.0, 10.0),
            &quarter_turn(),
            &Vec3::repeat(1.0),
        );
        // The long local X side now runs along world Z.
        assert!(footprint.contains(10.0, 8.5));
        assert!(!footprint.contains(11.5, 10.0));

        let bounds = footprint.bounds();
        assert!((bounds.min.x - 9.5).abs() < 1e-4);
        assert!((bounds.max.y - 12.0).abs() < 1e-4);
    }

    #[test]
    fn circle_falloff_is_normalized() {
        let footprint = Footprint::new(
            FootprintShape::Circle { radius: 2.0 },
            &Point3::origin(),
            &Quat::identity(),
            &Vec3::new(2.0, 1.0, 2.0),
        );
        assert!((footprint.falloff(0.0, 0.0).unwrap()).abs() < 1e-6);
        assert!((footprint.falloff(2.0, 0.0).unwrap() - 0.5).abs() < 1e-6);
        assert!(footprint.falloff(4.5, 0.0).is_none());
    }
}
