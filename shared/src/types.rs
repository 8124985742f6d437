/*!
Math aliases and the two box types the domain passes around.

- [`BBox`]: an entity's local, axis-aligned bounding box. Entity origins sit on the
  bbox floor for most content (`low.y == 0`), so the collision shape is offset by
  [`BBox::center`] relative to the entity position.
- [`Area2`]: an axis-aligned rectangle on the horizontal X/Z plane, used for terrain
  footprints, dirty regions and paint areas.
*/

use nalgebra as na;

pub type Vec3 = na::Vector3<f32>;
pub type Vec2 = na::Vector2<f32>;
pub type Point3 = na::Point3<f32>;
pub type Quat = na::UnitQuaternion<f32>;
pub type Iso = na::Isometry3<f32>;

/// Builds an isometry from an entity position and orientation.
#[inline]
pub fn iso_from(position: &Point3, orientation: &Quat) -> Iso {
    Iso::from_parts(na::Translation3::from(position.coords), *orientation)
}

/// Local axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub low: Point3,
    pub high: Point3,
}

impl BBox {
    pub fn new(low: Point3, high: Point3) -> Self {
        Self { low, high }
    }

    /// Box from `[lx, ly, lz]` and `[hx, hy, hz]`.
    pub fn from_corners(low: [f32; 3], high: [f32; 3]) -> Self {
        Self {
            low: Point3::new(low[0], low[1], low[2]),
            high: Point3::new(high[0], high[1], high[2]),
        }
    }

    /// A box is valid when all coordinates are finite and `low <= high` on every axis.
    pub fn is_valid(&self) -> bool {
        self.low.iter().chain(self.high.iter()).all(|c| c.is_finite())
            && self.low.x <= self.high.x
            && self.low.y <= self.high.y
            && self.low.z <= self.high.z
    }

    pub fn size(&self) -> Vec3 {
        self.high - self.low
    }

    pub fn center(&self) -> Point3 {
        na::center(&self.low, &self.high)
    }

    pub fn height(&self) -> f32 {
        self.high.y - self.low.y
    }

    /// Radius of the sphere through all eight corners, centered on the box.
    pub fn bounding_radius(&self) -> f32 {
        self.size().norm() * 0.5
    }

    pub fn min_side(&self) -> f32 {
        self.size().min()
    }

    /// Component-wise scaling of both corners.
    pub fn scaled(&self, scale: &Vec3) -> Self {
        Self {
            low: Point3::from(self.low.coords.component_mul(scale)),
            high: Point3::from(self.high.coords.component_mul(scale)),
        }
    }
}

/// Axis-aligned rectangle on the X/Z plane. `min`/`max` hold `(x, z)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Area2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Area2 {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Smallest area containing all `(x, z)` points. `None` for an empty iterator.
    pub fn from_points<I: IntoIterator<Item = Vec2>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(Self::new(first, first), |area, p| Self {
            min: area.min.inf(&p),
            max: area.max.sup(&p),
        }))
    }

    /// Area centered on `(x, z)` with the given half extents.
    pub fn around(x: f32, z: f32, half_x: f32, half_z: f32) -> Self {
        Self {
            min: Vec2::new(x - half_x, z - half_z),
            max: Vec2::new(x + half_x, z + half_z),
        }
    }

    pub fn merged(&self, other: &Area2) -> Area2 {
        Area2 {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    pub fn intersects(&self, other: &Area2) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        x >= self.min.x && x <= self.max.x && z >= self.min.y && z <= self.max.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec2 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_metrics() {
        let bbox = BBox::from_corners([-2.0, 0.0, -2.0], [2.0, 1.0, 2.0]);
        assert!(bbox.is_valid());
        assert!((bbox.height() - 1.0).abs() < 1e-6);
        assert!((bbox.center().y - 0.5).abs() < 1e-6);
        assert!((bbox.min_side() - 1.0).abs() < 1e-6);
        assert!((bbox.bounding_radius() - 33.0_f32.sqrt() * 0.5).abs() < 1e-5);
    }

    #[test]
    fn inverted_bbox_is_invalid() {
        let bbox = BBox::from_corners([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]);
        assert!(!bbox.is_valid());
    }

    #[test]
    fn scaled_bbox_scales_both_corners() {
        let bbox = BBox::from_corners([-1.0, 0.0, -1.0], [1.0, 2.0, 1.0]);
        let scaled = bbox.scaled(&Vec3::new(2.0, 0.5, 1.0));
        assert!((scaled.low.x + 2.0).abs() < 1e-6);
        assert!((scaled.high.y - 1.0).abs() < 1e-6);
        assert!((scaled.high.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn area_from_points_and_merge() {
        let area = Area2::from_points([Vec2::new(1.0, 5.0), Vec2::new(-3.0, 2.0)]).unwrap();
        assert_eq!(area.min, Vec2::new(-3.0, 2.0));
        assert_eq!(area.max, Vec2::new(1.0, 5.0));

        let other = Area2::around(10.0, 10.0, 1.0, 1.0);
        assert!(!area.intersects(&other));
        let merged = area.merged(&other);
        assert!(merged.contains(10.5, 10.5));
        assert!(merged.contains(-3.0, 2.0));
    }

    #[test]
    fn empty_point_set_has_no_area() {
        assert!(Area2::from_points(std::iter::empty()).is_none());
    }
}
