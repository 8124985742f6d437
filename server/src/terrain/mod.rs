//! Terrain seen through the eyes of the domain.
//!
//! The height field itself lives behind the [`Terrain`] trait; the domain only needs to
//! sample it, push modifiers and paint areas into it, and know which segments an edit
//! touched. [`TerrainBridge`] mirrors the loaded segments into the dynamics world as one
//! static ground mesh and batches its rebuilds.

mod bridge;
mod footprint;
mod height_map;

pub use bridge::{TerrainBridge, TerrainEntry, TerrainModEntry};
pub use footprint::Footprint;
pub use height_map::HeightMapTerrain;

use shared::Area2;

use crate::types::{AreaDef, EntityId, TerrainModDef};

/// Integer coordinates of a square terrain segment of `resolution` cells per side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentIndex {
    pub x: i32,
    pub z: i32,
}

impl SegmentIndex {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn containing(x: f32, z: f32, resolution: i32) -> Self {
        let res = resolution.max(1) as f32;
        Self {
            x: (x / res).floor() as i32,
            z: (z / res).floor() as i32,
        }
    }

    /// World `(x, z)` of the segment's low corner.
    pub fn origin(&self, resolution: i32) -> (f32, f32) {
        ((self.x * resolution) as f32, (self.z * resolution) as f32)
    }

    pub fn area(&self, resolution: i32) -> Area2 {
        let (x, z) = self.origin(resolution);
        let res = resolution as f32;
        Area2::new(shared::Vec2::new(x, z), shared::Vec2::new(x + res, z + res))
    }
}

/// A terrain modifier placed at an entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacedMod {
    pub def: TerrainModDef,
    pub footprint: Footprint,
    /// Unmodified ground height under the entity; levelling is relative to it.
    pub base_y: f32,
}

/// A surface paint area placed at an entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacedArea {
    pub def: AreaDef,
    pub footprint: Footprint,
}

/// Height-field terrain owned by the container.
pub trait Terrain {
    /// Cells per segment side; cells are one metre wide.
    fn resolution(&self) -> i32;

    /// Height including every applied modifier.
    fn height_at(&self, x: f32, z: f32) -> f32;

    /// Height of the generated terrain, ignoring modifiers.
    fn base_height_at(&self, x: f32, z: f32) -> f32;

    /// `(resolution + 1)²` heights of a segment, row-major with rows along Z, or `None`
    /// when the segment does not exist.
    fn segment_samples(&self, index: SegmentIndex) -> Option<Vec<f32>>;

    /// Segments overlapping `area`.
    fn segments_in(&self, area: &Area2) -> Vec<SegmentIndex> {
        let res = self.resolution();
        let low = SegmentIndex::containing(area.min.x, area.min.y, res);
        let high = SegmentIndex::containing(area.max.x, area.max.y, res);
        (low.z..=high.z)
            .flat_map(|z| (low.x..=high.x).map(move |x| SegmentIndex::new(x, z)))
            .collect()
    }

    /// Apply, move or (with `None`) remove the modifier owned by `owner`. Returns the
    /// area whose heights changed.
    fn update_mod(&mut self, owner: EntityId, placed: Option<PlacedMod>) -> Option<Area2>;

    /// Apply, move or remove the paint area owned by `owner`. Returns the affected area.
    fn update_area(&mut self, owner: EntityId, placed: Option<PlacedArea>) -> Option<Area2>;

    /// Regenerate the surface textures of `areas`.
    fn repaint(&mut self, areas: &[Area2]);
}
