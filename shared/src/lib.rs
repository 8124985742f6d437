pub mod bitmask_flags;
pub mod constants;
pub mod query;
pub mod shape;
pub mod types;

// Re-export rapier so the server resolves the exact same parry/nalgebra types.
pub use rapier3d;

pub use bitmask_flags::{BitmaskFlags, CollisionGroup, FlagBitmask, GroupMask, VisibilityGroup};
pub use shape::{EntityShape, ShapeDef, shape_for_bbox, water_shape};
pub use types::{Area2, BBox, Iso, Point3, Quat, Vec2, Vec3, iso_from};
