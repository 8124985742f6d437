//! Placement of entities and the graph of what rests on what.
//!
//! A planted entity remembers its support in its mode data, and the support keeps the
//! reverse edge in `attached`. Moving a support carries everything resting on it along;
//! removing one re-settles its dependents.

use std::collections::HashSet;

use shared::constants::ORIENTATION_EPSILON;
use shared::{CollisionGroup, Point3, Quat, Vec3, query};

use crate::domain::PhysicalDomain;
use crate::record::PhysicalEntry;
use crate::types::{EntityId, Mode, ModeData, PlantedOn, TransformData};

/// Clearance kept above a support before sweeping down onto it.
const SWEEP_CLEARANCE: f32 = 0.01;

/// Minimum upward component of a contact normal for a body to count as resting on top.
const RESTING_NORMAL_Y: f32 = 0.5;

impl PhysicalDomain {
    /// Where an entity wanting to be at `intended` ends up, and for planted entities the
    /// entity it rests on (the container stands for the ground).
    pub(crate) fn calculate_position(
        &self,
        id: EntityId,
        intended: &Point3,
        planted_on: Option<EntityId>,
    ) -> (Point3, Option<EntityId>) {
        let Some(entry) = self.entries.get(&id) else {
            return (*intended, None);
        };
        let ground = self.ground_height(intended.x, intended.z);
        let mut position = *intended;
        match entry.mode() {
            Mode::Planted => {
                let (y, support) = self.planted_height(entry, intended, planted_on, ground);
                position.y = y
                    + entry.state.planted_offset
                    + entry.state.planted_scaled_offset * entry.height();
                (position, Some(support))
            }
            Mode::Free | Mode::Submerged => {
                position.y = position.y.max(ground);
                (position, None)
            }
            Mode::Fixed | Mode::Projectile => (position, None),
        }
    }

    fn planted_height(
        &self,
        entry: &PhysicalEntry,
        intended: &Point3,
        planted_on: Option<EntityId>,
        ground: f32,
    ) -> (f32, EntityId) {
        let id = entry.id();
        if let Some(support) = planted_on {
            if support == id {
                log::warn!("{id} cannot be planted on itself; using the ground");
                return (ground, self.container_id);
            }
            if support == self.container_id {
                return (ground, self.container_id);
            }
            if let Some(target) = self.entries.get(&support) {
                if target.is_water() {
                    return match water_top(target) {
                        Some(top) if top > ground => (top, support),
                        _ => (ground, self.container_id),
                    };
                }
                if let Some(y) = self.sweep_onto(entry, intended, target, ground) {
                    return (y, support);
                }
            }
            log::trace!("{id} missed its support {support}; searching below");
        }
        self.sweep_down(entry, intended, ground)
            .unwrap_or((ground, self.container_id))
    }

    /// Landing height of `entry` when lowered onto `target` from above.
    fn sweep_onto(
        &self,
        entry: &PhysicalEntry,
        intended: &Point3,
        target: &PhysicalEntry,
        ground: f32,
    ) -> Option<f32> {
        let shape = entry.shape.as_ref()?;
        let target_shape = target.shape.as_ref()?;
        let target_iso = target.shape_iso()?;
        let (_, top) = query::bounds(&target_iso, &*target_shape.shape);

        let start_y = intended
            .y
            .max(top.y - entry.bottom_offset() + SWEEP_CLEARANCE);
        if start_y <= ground {
            return None;
        }
        let start = Point3::new(intended.x, start_y, intended.z);
        let iso = shape_iso_at(entry, &start);
        let translation = Vec3::new(0.0, ground - start_y, 0.0);
        let hit = query::sweep(&iso, &*shape.shape, &translation, &target_iso, &*target_shape.shape)?;
        Some((start_y + translation.y * hit.fraction).max(ground))
    }

    /// Highest static surface below `intended`, above the ground.
    fn sweep_down(
        &self,
        entry: &PhysicalEntry,
        intended: &Point3,
        ground: f32,
    ) -> Option<(f32, EntityId)> {
        let shape = entry.shape.as_ref()?;
        if intended.y <= ground {
            return None;
        }
        let iso = shape_iso_at(entry, intended);
        let translation = Vec3::new(0.0, ground - intended.y, 0.0);

        self.entries
            .values()
            .filter(|other| other.id() != entry.id() && !entry.attached.contains(&other.id()))
            .filter(|other| other.group.has(CollisionGroup::Static))
            .filter_map(|other| {
                let other_shape = other.shape.as_ref()?;
                let other_iso = other.shape_iso()?;
                let hit =
                    query::sweep(&iso, &*shape.shape, &translation, &other_iso, &*other_shape.shape)?;
                if hit.started_penetrating {
                    return None;
                }
                Some((intended.y + translation.y * hit.fraction, other.id()))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Move `id` from its current support onto `support`, updating both edges and the
    /// mode data. `None` detaches it.
    pub(crate) fn plant_on_entity(&mut self, id: EntityId, support: Option<EntityId>) {
        let support = match support {
            Some(s) if s == id => {
                log::warn!("{id} cannot be planted on itself; using the ground");
                Some(self.container_id)
            }
            other => other,
        };
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let previous = entry.state.mode_data.planted_on();

        if previous != support {
            if let Some(old) = previous.and_then(|p| self.entries.get_mut(&p)) {
                old.attached.remove(&id);
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.state.mode_data = match support {
                    Some(entity) => ModeData::Planted(PlantedOn { entity }),
                    None => ModeData::None,
                };
                entry.mode_data_changed = true;
            }
        }
        if let Some(new) = support.and_then(|s| self.entries.get_mut(&s)) {
            new.attached.insert(id);
        }
    }

    /// Records resting on `id`: the ones planted on it and dynamic bodies lying on top.
    fn resting_on(&self, id: EntityId) -> Vec<EntityId> {
        let Some(entry) = self.entries.get(&id) else {
            return Vec::new();
        };
        let mut resting: Vec<EntityId> = entry.attached.iter().copied().collect();
        let Some(handle) = entry.handle else {
            return resting;
        };
        for touch in self.world.touches(handle.collider(), 0.01) {
            // The normal points toward us; downward means the other body is above.
            if touch.normal.y > -RESTING_NORMAL_Y {
                continue;
            }
            let Some(other) = self
                .world
                .collider_owner(touch.other)
                .and_then(|owner| self.entries.get(&owner))
            else {
                continue;
            };
            if other.is_water() || other.mode().is_static() || !other.has_dynamic_body() {
                continue;
            }
            if !resting.contains(&other.id()) {
                resting.push(other.id());
            }
        }
        resting
    }

    /// Carry the records resting on `id` along a rigid move of `id` from `old` to `new`
    /// combined with `rotation`.
    pub(crate) fn transform_resting_entities(
        &mut self,
        id: EntityId,
        old: &Point3,
        new: &Point3,
        rotation: &Quat,
        transformed: &mut HashSet<EntityId>,
    ) {
        for dependent in self.resting_on(id) {
            if !transformed.insert(dependent) {
                continue;
            }
            let Some(entry) = self.entries.get_mut(&dependent) else {
                continue;
            };
            let Some(position) = entry.state.position else {
                continue;
            };
            let moved = new + rotation * (position - old);
            entry.state.position = Some(moved);
            if rotation.angle() > 0.0 {
                entry.state.orientation = Some(rotation * entry.state.orientation_or_identity());
            }
            self.sync_body_pose(dependent);
            self.mark_moving(dependent);
            self.queue_visibility(dependent);
            self.transform_resting_entities(dependent, &position, &moved, rotation, transformed);
        }
    }

    /// Teleport, turn, push or re-plant an entity.
    ///
    /// A new position goes through placement, so planted entities settle on whatever is
    /// below. Records resting on the entity follow it. `transformed` collects every
    /// record moved by the call and guards against cycles.
    pub fn apply_transform(
        &mut self,
        id: EntityId,
        data: TransformData,
        transformed: &mut HashSet<EntityId>,
    ) {
        if id == self.container_id {
            log::warn!("cannot transform the container {id}");
            return;
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            log::warn!("cannot transform {id}: not in domain");
            return;
        };
        transformed.insert(id);
        let old_position = entry.state.position;
        let old_orientation = entry.state.orientation_or_identity();
        if let Some(orientation) = data.orientation {
            let unset = entry.state.orientation.is_none();
            if unset || orientation.angle_to(&old_orientation) >= ORIENTATION_EPSILON {
                entry.state.orientation = Some(orientation);
            }
        }
        let current_support = entry.state.mode_data.planted_on();
        let mode = entry.mode();

        if data.position.is_some() || data.planted_on.is_some() {
            let Some(intended) = data.position.or(old_position) else {
                log::warn!("cannot place {id}: no valid position");
                return;
            };
            self.ensure_terrain_around(&intended);
            let hint = data.planted_on.or(current_support);
            let (position, support) = self.calculate_position(id, &intended, hint);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.state.position = Some(position);
            }
            if mode == Mode::Planted {
                self.plant_on_entity(id, support);
            }
        }
        self.sync_body_pose(id);

        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let new_position = entry.state.position;
        let rotation = entry.state.orientation_or_identity() * old_orientation.inverse();
        let admin = entry.is_admin();
        let water = entry.is_water();
        if let (Some(old), Some(new)) = (old_position, new_position) {
            if old != new || rotation.angle() > 0.0 {
                self.transform_resting_entities(id, &old, &new, &rotation, transformed);
            }
        }

        if let Some(impulse) = data.impulse_velocity {
            self.apply_impulse(id, &impulse);
        }
        self.mark_moving(id);
        self.queue_visibility(id);
        if admin {
            self.update_sphere_positions(id);
        }
        if water {
            self.recheck_near_water(id);
        }
        if let Some(position) = new_position {
            self.ensure_terrain_around(&position);
        }
    }
}

fn shape_iso_at(entry: &PhysicalEntry, position: &Point3) -> shared::Iso {
    let offset = entry.shape.as_ref().map(|s| s.offset).unwrap_or_else(Vec3::zeros);
    shared::iso_from(position, &entry.state.orientation_or_identity())
        * nalgebra::Translation3::from(offset)
}

/// Surface height of a water body: the plane of an ocean, the top of a box.
fn water_top(water: &PhysicalEntry) -> Option<f32> {
    let shape = water.shape.as_ref()?;
    let iso = water.shape_iso()?;
    if shape.shape.as_halfspace().is_some() {
        return Some(iso.translation.vector.y);
    }
    Some(query::bounds(&iso, &*shape.shape).1.y)
}
