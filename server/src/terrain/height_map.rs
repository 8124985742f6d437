use std::collections::BTreeMap;

use shared::Area2;
use shared::constants::TERRAIN_RESOLUTION;

use super::{PlacedArea, PlacedMod, SegmentIndex, Terrain};
use crate::types::{EntityId, TerrainModKind};

type HeightFn = Box<dyn Fn(f32, f32) -> f32>;

/// Unbounded in-memory terrain defined by a height function.
///
/// Modifiers are applied on top of the function in owner id order. Paint areas only
/// record a layer per point; `repaint` keeps a log of the areas it was asked to redo.
pub struct HeightMapTerrain {
    resolution: i32,
    base: HeightFn,
    mods: BTreeMap<EntityId, PlacedMod>,
    areas: BTreeMap<EntityId, PlacedArea>,
    repainted: Vec<Area2>,
}

impl HeightMapTerrain {
    pub fn new(resolution: i32, base: impl Fn(f32, f32) -> f32 + 'static) -> Self {
        Self {
            resolution: resolution.max(1),
            base: Box::new(base),
            mods: BTreeMap::new(),
            areas: BTreeMap::new(),
            repainted: Vec::new(),
        }
    }

    /// Terrain from a height function, in segments of the default size.
    pub fn from_fn(base: impl Fn(f32, f32) -> f32 + 'static) -> Self {
        Self::new(TERRAIN_RESOLUTION, base)
    }

    /// Level ground at `height` everywhere.
    pub fn flat(resolution: i32, height: f32) -> Self {
        Self::new(resolution, move |_, _| height)
    }

    /// Paint layer at a point: the layer of the last-applied area covering it.
    pub fn layer_at(&self, x: f32, z: f32) -> Option<u32> {
        self.areas
            .values()
            .filter(|area| area.footprint.contains(x, z))
            .last()
            .map(|area| area.def.layer)
    }

    pub fn repainted(&self) -> &[Area2] {
        &self.repainted
    }

    pub fn mod_count(&self) -> usize {
        self.mods.len()
    }
}

impl std::fmt::Debug for HeightMapTerrain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeightMapTerrain")
            .field("resolution", &self.resolution)
            .field("mods", &self.mods.len())
            .field("areas", &self.areas.len())
            .finish()
    }
}

fn apply(placed: &PlacedMod, x: f32, z: f32, height: f32) -> f32 {
    let Some(r) = placed.footprint.falloff(x, z) else {
        return height;
    };
    match placed.def.kind {
        TerrainModKind::Level => placed.base_y + placed.def.height,
        TerrainModKind::Adjust => height + placed.def.height,
        TerrainModKind::Crater => height - placed.def.height * (1.0 - r * r),
    }
}

fn replace<T, F>(map: &mut BTreeMap<EntityId, T>, owner: EntityId, placed: Option<T>, bounds: F) -> Option<Area2>
where
    F: Fn(&T) -> Area2,
{
    let old = map.remove(&owner).map(|p| bounds(&p));
    let new = placed.map(|p| {
        let area = bounds(&p);
        map.insert(owner, p);
        area
    });
    match (old, new) {
        (Some(a), Some(b)) => Some(a.merged(&b)),
        (a, b) => a.or(b),
    }
}

impl Terrain for HeightMapTerrain {
    fn resolution(&self) -> i32 {
        self.resolution
    }

    fn height_at(&self, x: f32, z: f32) -> f32 {
        self.mods
            .values()
            .fold(self.base_height_at(x, z), |h, placed| apply(placed, x, z, h))
    }

    fn base_height_at(&self, x: f32, z: f32) -> f32 {
        (self.base)(x, z)
    }

    fn segment_samples(&self, index: SegmentIndex) -> Option<Vec<f32>> {
        let (x0, z0) = index.origin(self.resolution);
        let n = self.resolution + 1;
        let mut samples = Vec::with_capacity((n * n) as usize);
        for iz in 0..n {
            for ix in 0..n {
                samples.push(self.height_at(x0 + ix as f32, z0 + iz as f32));
            }
        }
        Some(samples)
    }

    fn update_mod(&mut self, owner: EntityId, placed: Option<PlacedMod>) -> Option<Area2> {
        replace(&mut self.mods, owner, placed, |p| p.footprint.bounds())
    }

    fn update_area(&mut self, owner: EntityId, placed: Option<PlacedArea>) -> Option<Area2> {
        replace(&mut self.areas, owner, placed, |p| p.footprint.bounds())
    }

    fn repaint(&mut self, areas: &[Area2]) {
        self.repainted.extend_from_slice(areas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::Footprint;
    use crate::types::{AreaDef, FootprintShape, TerrainModDef};
    use shared::{Point3, Quat, Vec3};

    #[test]
    fn default_segments_cover_sixty_four_cells() {
        let terrain = HeightMapTerrain::from_fn(|x, z| x * 0.5 + z);
        assert_eq!(terrain.resolution(), 64);
        let samples = terrain.segment_samples(SegmentIndex::new(1, 0)).unwrap();
        assert_eq!(samples.len(), 65 * 65);
        // Row-major with rows along Z: the second row starts at (64, 1).
        assert!((samples[65] - 33.0).abs() < 1e-6);
    }

    fn placed(kind: TerrainModKind, height: f32, at: (f32, f32)) -> PlacedMod {
        PlacedMod {
            def: TerrainModDef {
                kind,
                shape: FootprintShape::Rect {
                    half_x: 2.0,
                    half_z: 2.0,
                },
                height,
            },
            footprint: Footprint::new(
                FootprintShape::Rect {
                    half_x: 2.0,
                    half_z: 2.0,
                },
                &Point3::new(at.0, 0.0, at.1),
                &Quat::identity(),
                &Vec3::repeat(1.0),
            ),
            base_y: 1.0,
        }
    }

    #[test]
    fn level_mod_sets_height_inside_footprint() {
        let mut terrain = HeightMapTerrain::flat(8, 1.0);
        let area = terrain
            .update_mod(EntityId(3), Some(placed(TerrainModKind::Level, 2.0, (0.0, 0.0))))
            .unwrap();
        assert!((terrain.height_at(0.0, 0.0) - 3.0).abs() < 1e-6);
        assert!((terrain.height_at(5.0, 0.0) - 1.0).abs() < 1e-6);
        assert!((terrain.base_height_at(0.0, 0.0) - 1.0).abs() < 1e-6);
        assert!(area.contains(1.9, -1.9));
    }

    #[test]
    fn moving_mod_reports_old_and_new_area() {
        let mut terrain = HeightMapTerrain::flat(8, 0.0);
        terrain.update_mod(EntityId(3), Some(placed(TerrainModKind::Adjust, 1.0, (0.0, 0.0))));
        let area = terrain
            .update_mod(EntityId(3), Some(placed(TerrainModKind::Adjust, 1.0, (10.0, 0.0))))
            .unwrap();
        assert!(area.contains(-1.0, 0.0));
        assert!(area.contains(11.0, 0.0));
        assert!(terrain.height_at(0.0, 0.0).abs() < 1e-6);
        assert!((terrain.height_at(10.0, 0.0) - 1.0).abs() < 1e-6);

        assert!(terrain.update_mod(EntityId(3), None).is_some());
        assert_eq!(terrain.mod_count(), 0);
        assert!(terrain.update_mod(EntityId(3), None).is_none());
    }

    #[test]
    fn crater_is_deepest_at_centre() {
        let mut terrain = HeightMapTerrain::flat(8, 5.0);
        terrain.update_mod(EntityId(1), Some(placed(TerrainModKind::Crater, 2.0, (0.0, 0.0))));
        assert!((terrain.height_at(0.0, 0.0) - 3.0).abs() < 1e-6);
        assert!(terrain.height_at(1.0, 0.0) > 3.0);
        assert!((terrain.height_at(2.0, 0.0) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn samples_cover_segment_corners() {
        let terrain = HeightMapTerrain::new(4, |x, z| x + 10.0 * z);
        let samples = terrain.segment_samples(SegmentIndex::new(1, 0)).unwrap();
        assert_eq!(samples.len(), 25);
        // First row starts at x = 4, z = 0; last row is z = 4.
        assert!((samples[0] - 4.0).abs() < 1e-6);
        assert!((samples[24] - 48.0).abs() < 1e-6);
    }

    #[test]
    fn paint_layer_follows_last_area() {
        let mut terrain = HeightMapTerrain::flat(8, 0.0);
        let placed = |layer| PlacedArea {
            def: AreaDef {
                layer,
                shape: FootprintShape::Circle { radius: 3.0 },
                scaled: false,
            },
            footprint: Footprint::new(
                FootprintShape::Circle { radius: 3.0 },
                &Point3::origin(),
                &Quat::identity(),
                &Vec3::repeat(1.0),
            ),
        };
        terrain.update_area(EntityId(1), Some(placed(4)));
        terrain.update_area(EntityId(2), Some(placed(7)));
        assert_eq!(terrain.layer_at(0.0, 0.0), Some(7));
        assert_eq!(terrain.layer_at(5.0, 0.0), None);
    }
}
