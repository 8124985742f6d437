use std::collections::{BTreeMap, BTreeSet};

use rapier3d::parry::shape::TriMeshFlags;
use rapier3d::prelude::{ColliderBuilder, ColliderHandle, SharedShape};
use shared::{Area2, CollisionGroup, GroupMask, Point3, Quat, Vec3};

use super::{Footprint, PlacedArea, PlacedMod, SegmentIndex, Terrain};
use crate::dynamics::{DynamicsWorld, interaction_groups};
use crate::types::{AreaDef, EntityId, TerrainModDef};

/// The heights of a built terrain segment.
#[derive(Debug)]
pub struct TerrainEntry {
    pub samples: Vec<f32>,
}

/// Where a modifier was last applied.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainModEntry {
    /// Entity position with `y` projected onto the unmodified terrain.
    pub position: Point3,
    pub orientation: Quat,
    pub area: Area2,
}

pub struct TerrainBridge {
    terrain: Option<Box<dyn Terrain>>,
    owner: EntityId,
    /// Ground height used when the container has no terrain.
    fallback_height: f32,
    friction: f32,
    segments: BTreeMap<SegmentIndex, TerrainEntry>,
    /// One mesh over every built segment, so bodies cross segment seams smoothly.
    collider: Option<ColliderHandle>,
    mods: BTreeMap<EntityId, TerrainModEntry>,
    /// Owners with a paint area applied.
    areas: BTreeSet<EntityId>,
    dirty_mods: Vec<Area2>,
    dirty_surfaces: Vec<Area2>,
}

impl TerrainBridge {
    pub fn new(
        terrain: Option<Box<dyn Terrain>>,
        owner: EntityId,
        fallback_height: f32,
        friction: f32,
    ) -> Self {
        Self {
            terrain,
            owner,
            fallback_height,
            friction,
            segments: BTreeMap::new(),
            collider: None,
            mods: BTreeMap::new(),
            areas: BTreeSet::new(),
            dirty_mods: Vec::new(),
            dirty_surfaces: Vec::new(),
        }
    }

    pub fn terrain(&self) -> Option<&dyn Terrain> {
        self.terrain.as_deref()
    }

    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        self.terrain
            .as_ref()
            .map_or(self.fallback_height, |t| t.height_at(x, z))
    }

    pub fn base_height_at(&self, x: f32, z: f32) -> f32 {
        self.terrain
            .as_ref()
            .map_or(self.fallback_height, |t| t.base_height_at(x, z))
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: SegmentIndex) -> Option<&TerrainEntry> {
        self.segments.get(&index)
    }

    pub fn mod_entry(&self, owner: EntityId) -> Option<&TerrainModEntry> {
        self.mods.get(&owner)
    }

    pub fn collider(&self) -> Option<ColliderHandle> {
        self.collider
    }

    /// Build the segments in the 3x3 neighbourhood of `(x, z)` that do not exist yet.
    pub fn ensure_segments_around(&mut self, world: &mut DynamicsWorld, x: f32, z: f32) {
        let Some(terrain) = self.terrain.as_deref() else {
            return;
        };
        let res = terrain.resolution();
        let n = (res + 1) as usize;
        let centre = SegmentIndex::containing(x, z, res);
        let mut added = 0;
        for dz in -1..=1 {
            for dx in -1..=1 {
                let index = SegmentIndex::new(centre.x + dx, centre.z + dz);
                if self.segments.contains_key(&index) {
                    continue;
                }
                let Some(samples) = terrain.segment_samples(index) else {
                    continue;
                };
                if samples.len() != n * n {
                    log::error!("terrain segment {index:?} has {} samples", samples.len());
                    continue;
                }
                log::trace!("built terrain segment {index:?}");
                self.segments.insert(index, TerrainEntry { samples });
                added += 1;
            }
        }
        if added > 0 {
            self.rebuild_collider(world, res);
        }
    }

    /// Replace the terrain collider with a mesh over every built segment. Samples on a
    /// shared segment border become one vertex.
    fn rebuild_collider(&mut self, world: &mut DynamicsWorld, res: i32) {
        let Some(shape) = ground_mesh(&self.segments, res) else {
            log::error!("cannot build a terrain mesh from {} segments", self.segments.len());
            return;
        };
        if let Some(collider) = self.collider.and_then(|h| world.collider_mut(h)) {
            // Friction and groups stay on the collider; only the shape changes.
            collider.set_shape(shape);
            return;
        }
        let collider = ColliderBuilder::new(shape)
            .friction(self.friction)
            .collision_groups(interaction_groups(
                GroupMask::of(&[CollisionGroup::Terrain]),
                GroupMask::of(&[CollisionGroup::Physical, CollisionGroup::NonPhysical]),
            ))
            .user_data(self.owner.0 as u128)
            .build();
        self.collider = Some(world.insert_static(collider));
    }

    /// Apply, move or (with `def == None`) remove the modifier owned by `owner`.
    pub fn update_mod(
        &mut self,
        owner: EntityId,
        def: Option<&TerrainModDef>,
        position: &Point3,
        orientation: &Quat,
        scale: &Vec3,
    ) {
        let Some(terrain) = self.terrain.as_deref_mut() else {
            return;
        };
        let placed = def.map(|def| {
            let base_y = terrain.base_height_at(position.x, position.z);
            let projected = Point3::new(position.x, base_y, position.z);
            let footprint = Footprint::new(def.shape, &projected, orientation, scale);
            self.mods.insert(
                owner,
                TerrainModEntry {
                    position: projected,
                    orientation: *orientation,
                    area: footprint.bounds(),
                },
            );
            PlacedMod {
                def: *def,
                footprint,
                base_y,
            }
        });
        if placed.is_none() && self.mods.remove(&owner).is_none() {
            return;
        }
        if let Some(area) = terrain.update_mod(owner, placed) {
            self.dirty_mods.push(area);
        }
    }

    pub fn remove_mod(&mut self, owner: EntityId) {
        self.update_mod(owner, None, &Point3::origin(), &Quat::identity(), &Vec3::zeros());
    }

    /// Apply, move or remove the paint area owned by `owner`.
    pub fn update_area(
        &mut self,
        owner: EntityId,
        def: Option<&AreaDef>,
        position: &Point3,
        orientation: &Quat,
        scale: &Vec3,
    ) {
        let Some(terrain) = self.terrain.as_deref_mut() else {
            return;
        };
        let placed = def.map(|def| {
            let scale = if def.scaled { *scale } else { Vec3::repeat(1.0) };
            let footprint = Footprint::new(def.shape, position, orientation, &scale);
            self.areas.insert(owner);
            PlacedArea {
                def: *def,
                footprint,
            }
        });
        if placed.is_none() && !self.areas.remove(&owner) {
            return;
        }
        if let Some(area) = terrain.update_area(owner, placed) {
            self.dirty_surfaces.push(area);
        }
    }

    pub fn remove_area(&mut self, owner: EntityId) {
        self.update_area(owner, None, &Point3::origin(), &Quat::identity(), &Vec3::zeros());
    }

    /// Schedule externally edited areas for a collision rebuild.
    pub fn refresh(&mut self, areas: &[Area2]) {
        self.dirty_mods.extend_from_slice(areas);
    }

    pub fn has_dirty_mods(&self) -> bool {
        !self.dirty_mods.is_empty()
    }

    /// Re-sample every built segment touched by a dirty area and swap in the new ground
    /// mesh. Returns the areas of the rebuilt segments.
    pub fn rebuild_dirty(&mut self, world: &mut DynamicsWorld) -> Vec<Area2> {
        let dirty = std::mem::take(&mut self.dirty_mods);
        let Some(terrain) = self.terrain.as_deref() else {
            return Vec::new();
        };
        let res = terrain.resolution();
        let mut touched: Vec<SegmentIndex> = dirty
            .iter()
            .flat_map(|area| terrain.segments_in(area))
            .filter(|index| self.segments.contains_key(index))
            .collect();
        touched.sort();
        touched.dedup();

        let mut rebuilt = Vec::with_capacity(touched.len());
        for index in touched {
            let Some(samples) = terrain.segment_samples(index) else {
                continue;
            };
            let Some(entry) = self.segments.get_mut(&index) else {
                continue;
            };
            entry.samples = samples;
            rebuilt.push(index.area(res));
        }
        if !rebuilt.is_empty() {
            self.rebuild_collider(world, res);
        }
        log::trace!("rebuilt {} terrain segments", rebuilt.len());
        rebuilt
    }

    /// Hand the accumulated paint areas to the terrain. Returns how many were sent.
    pub fn repaint_dirty(&mut self) -> usize {
        let dirty = std::mem::take(&mut self.dirty_surfaces);
        if dirty.is_empty() {
            return 0;
        }
        if let Some(terrain) = self.terrain.as_deref_mut() {
            terrain.repaint(&dirty);
        }
        dirty.len()
    }

    pub fn set_friction(&mut self, world: &mut DynamicsWorld, friction: f32) {
        self.friction = friction;
        if let Some(collider) = self.collider.and_then(|h| world.collider_mut(h)) {
            collider.set_friction(friction);
        }
    }
}

/// Two upward-facing triangles per cell of every segment, with internal edges fixed so
/// that nothing catches on cell or segment borders.
fn ground_mesh(segments: &BTreeMap<SegmentIndex, TerrainEntry>, res: i32) -> Option<SharedShape> {
    let n = res + 1;
    let mut vertex_ids: BTreeMap<(i32, i32), u32> = BTreeMap::new();
    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for (index, entry) in segments {
        let gx0 = index.x * res;
        let gz0 = index.z * res;
        let mut vertex = |ix: i32, iz: i32| -> u32 {
            *vertex_ids.entry((gx0 + ix, gz0 + iz)).or_insert_with(|| {
                let height = entry.samples[(iz * n + ix) as usize];
                vertices.push(Point3::new((gx0 + ix) as f32, height, (gz0 + iz) as f32));
                (vertices.len() - 1) as u32
            })
        };
        for iz in 0..res {
            for ix in 0..res {
                let a = vertex(ix, iz);
                let b = vertex(ix, iz + 1);
                let c = vertex(ix + 1, iz);
                let d = vertex(ix + 1, iz + 1);
                indices.push([a, b, c]);
                indices.push([c, b, d]);
            }
        }
    }
    if indices.is_empty() {
        return None;
    }
    SharedShape::trimesh_with_flags(vertices, indices, TriMeshFlags::FIX_INTERNAL_EDGES).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::HeightMapTerrain;
    use crate::types::{FootprintShape, TerrainModKind};
    use rapier3d::parry::query::{Ray, RayCast};

    fn bridge() -> (TerrainBridge, DynamicsWorld) {
        let terrain = HeightMapTerrain::flat(8, 2.0);
        let bridge = TerrainBridge::new(Some(Box::new(terrain)), EntityId(1), 0.0, 0.7);
        (bridge, DynamicsWorld::new(Vec3::new(0.0, -9.81, 0.0), 1.0 / 60.0))
    }

    fn surface_height(world: &DynamicsWorld, bridge: &TerrainBridge, x: f32, z: f32) -> f32 {
        let collider = world.colliders.get(bridge.collider().unwrap()).unwrap();
        let ray = Ray::new(Point3::new(x, 50.0, z), -Vec3::y());
        let toi = collider
            .shape()
            .cast_ray(collider.position(), &ray, 100.0, true)
            .unwrap();
        50.0 - toi
    }

    #[test]
    fn builds_neighbourhood_once() {
        let (mut bridge, mut world) = bridge();
        bridge.ensure_segments_around(&mut world, 1.0, 1.0);
        assert_eq!(bridge.segment_count(), 9);
        bridge.ensure_segments_around(&mut world, 2.0, 2.0);
        assert_eq!(bridge.segment_count(), 9);
        bridge.ensure_segments_around(&mut world, 9.0, 1.0);
        assert_eq!(bridge.segment_count(), 12);

        assert!(bridge.segment(SegmentIndex::new(0, 0)).is_some());
        assert!((surface_height(&world, &bridge, 3.0, 5.0) - 2.0).abs() < 1e-4);
        assert!((surface_height(&world, &bridge, 20.0, 1.0) - 2.0).abs() < 1e-4);
        let collider = world.colliders.get(bridge.collider().unwrap()).unwrap();
        assert!((collider.friction() - 0.7).abs() < 1e-6);
        assert_eq!(world.colliders.len(), 1);
    }

    #[test]
    fn mod_rebuilds_touched_segments() {
        let (mut bridge, mut world) = bridge();
        bridge.ensure_segments_around(&mut world, 4.0, 4.0);
        let def = TerrainModDef {
            kind: TerrainModKind::Adjust,
            shape: FootprintShape::Rect {
                half_x: 1.5,
                half_z: 1.5,
            },
            height: 3.0,
        };
        bridge.update_mod(
            EntityId(9),
            Some(&def),
            &Point3::new(4.0, 7.0, 4.0),
            &Quat::identity(),
            &Vec3::repeat(1.0),
        );
        let entry = bridge.mod_entry(EntityId(9)).unwrap();
        assert!((entry.position.y - 2.0).abs() < 1e-6);
        assert!(bridge.has_dirty_mods());

        let rebuilt = bridge.rebuild_dirty(&mut world);
        assert_eq!(rebuilt.len(), 1);
        assert!((surface_height(&world, &bridge, 4.0, 4.0) - 5.0).abs() < 1e-4);
        assert!((bridge.height_at(4.0, 4.0) - 5.0).abs() < 1e-6);

        bridge.remove_mod(EntityId(9));
        assert!(bridge.mod_entry(EntityId(9)).is_none());
        bridge.rebuild_dirty(&mut world);
        assert!((surface_height(&world, &bridge, 4.0, 4.0) - 2.0).abs() < 1e-4);
    }

    #[test]
    fn without_terrain_heights_fall_back() {
        let mut bridge = TerrainBridge::new(None, EntityId(1), -3.0, 1.0);
        let mut world = DynamicsWorld::new(Vec3::zeros(), 1.0 / 60.0);
        bridge.ensure_segments_around(&mut world, 0.0, 0.0);
        assert_eq!(bridge.segment_count(), 0);
        assert!(bridge.collider().is_none());
        assert!((bridge.height_at(10.0, 10.0) + 3.0).abs() < 1e-6);
        bridge.remove_mod(EntityId(4));
        assert!(!bridge.has_dirty_mods());
    }
}
