//! The per-container simulator.
//!
//! [`PhysicalDomain`] owns every record of one container together with the two rapier
//! worlds and the terrain bridge. Its operations are split over several files, each
//! adding an `impl PhysicalDomain` block: attachment and placement, perception,
//! movement, closeness and the tick itself.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use rapier3d::parry::shape::Ball;
use rapier3d::prelude::*;
use shared::constants::{
    CCD_MAX_MOTION_THRESHOLD, CCD_MOTION_FACTOR, CCD_SPHERE_FACTOR, WATER_LINEAR_DAMPING,
};
use shared::{Area2, BBox, Iso, Point3, Quat, Vec3, query};

use crate::closeness::{ClosenessHandle, ClosenessObserverEntry};
use crate::config::DomainConfig;
use crate::dynamics::{CollectedEvent, DynamicsWorld, interaction_groups};
use crate::error::DomainError;
use crate::movement::{PropelEntry, SpeedModifiers};
use crate::notification::{NotificationKind, Outbox};
use crate::record::{PhysicalEntry, SentSnapshot};
use crate::terrain::{Terrain, TerrainBridge};
use crate::types::{
    ContainerDescriptor, EntityDescriptor, EntityId, EntityState, Mode, TransformData,
};
use crate::visibility::VisibilityWorld;

/// A record touched by a [`PhysicalDomain::query_collision`] query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionEntry {
    pub entity: EntityId,
    /// Deepest point of the record inside the query sphere.
    pub point: Point3,
    /// Signed separation; negative when penetrating.
    pub distance: f32,
}

pub struct PhysicalDomain {
    pub(crate) config: DomainConfig,
    pub(crate) container_id: EntityId,
    pub(crate) container_bbox: BBox,
    pub(crate) container_friction: f32,
    pub(crate) container_friction_roll: Option<f32>,
    pub(crate) container_friction_spin: Option<f32>,
    pub(crate) simulation_speed: f32,

    pub(crate) entries: BTreeMap<EntityId, PhysicalEntry>,
    pub(crate) world: DynamicsWorld,
    pub(crate) visibility: VisibilityWorld,
    pub(crate) terrain: TerrainBridge,

    pub(crate) closeness: BTreeMap<ClosenessHandle, ClosenessObserverEntry>,
    pub(crate) next_closeness: u64,

    pub(crate) propelling: BTreeMap<EntityId, PropelEntry>,
    pub(crate) propel_queue: Vec<(EntityId, Vec3)>,
    pub(crate) direction_queue: Vec<(EntityId, Quat)>,
    pub(crate) destinations: BTreeMap<EntityId, Point3>,
    pub(crate) stepping: BTreeSet<EntityId>,
    pub(crate) water_bodies: BTreeSet<EntityId>,
    /// Records to test for submersion at the end of the tick.
    pub(crate) water_recheck: BTreeSet<EntityId>,
    pub(crate) speed_modifiers: SpeedModifiers,

    pub(crate) moving: Vec<EntityId>,
    pub(crate) visibility_queue: VecDeque<EntityId>,
    /// Records holding visibility edges that have not been applied yet.
    pub(crate) pending_visibility: BTreeSet<EntityId>,
    pub(crate) hits: Vec<CollectedEvent>,

    pub(crate) accumulator: f32,
    /// Simulated time in seconds.
    pub(crate) clock: f64,
    pub(crate) outbox: Outbox,
}

impl PhysicalDomain {
    pub fn new(
        container: ContainerDescriptor,
        terrain: Option<Box<dyn Terrain>>,
        config: DomainConfig,
    ) -> Self {
        let friction = container.friction.unwrap_or(config.default_friction);
        let mut world = DynamicsWorld::new(config.gravity, config.substep());
        world.add_borders(&container.bbox, container.id, friction);
        let terrain = TerrainBridge::new(terrain, container.id, container.bbox.low.y, friction);

        let mut state = EntityState::new(container.id)
            .at(0.0, 0.0, 0.0)
            .with_mode(Mode::Fixed);
        state.solid = false;
        state.bbox = Some(container.bbox);
        state.perceptive = container.perceptive;
        state.friction = container.friction;
        let mut root = PhysicalEntry::new(state);
        // Sweeps and queries never hit the container itself; its borders and terrain
        // stand in for it.
        root.shape = None;
        root.group.clear();
        root.mask.clear();

        log::debug!("created domain for {}", container.id);
        Self {
            container_id: container.id,
            container_bbox: container.bbox,
            container_friction: friction,
            container_friction_roll: container.friction_roll,
            container_friction_spin: container.friction_spin,
            simulation_speed: container.simulation_speed,
            entries: BTreeMap::from([(container.id, root)]),
            world,
            visibility: VisibilityWorld::new(),
            terrain,
            closeness: BTreeMap::new(),
            next_closeness: 0,
            propelling: BTreeMap::new(),
            propel_queue: Vec::new(),
            direction_queue: Vec::new(),
            destinations: BTreeMap::new(),
            stepping: BTreeSet::new(),
            water_bodies: BTreeSet::new(),
            water_recheck: BTreeSet::new(),
            speed_modifiers: SpeedModifiers::default(),
            moving: Vec::new(),
            visibility_queue: VecDeque::new(),
            pending_visibility: BTreeSet::new(),
            hits: Vec::new(),
            accumulator: 0.0,
            clock: 0.0,
            outbox: Outbox::default(),
            config,
        }
    }

    pub fn container_id(&self) -> EntityId {
        self.container_id
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    /// Simulated time in seconds.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Current attributes of a contained entity (or of the container).
    pub fn entity(&self, id: EntityId) -> Option<&EntityState> {
        self.entries.get(&id).map(|entry| &entry.state)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Contained entities, the container excluded.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entries
            .keys()
            .copied()
            .filter(|id| *id != self.container_id)
            .collect()
    }

    pub(crate) fn record(&self, id: EntityId) -> Option<&PhysicalEntry> {
        self.entries.get(&id)
    }

    pub fn terrain(&self) -> &TerrainBridge {
        &self.terrain
    }

    /// Drain notifications produced since the last tick.
    pub fn take_notifications(&mut self) -> Vec<crate::Notification> {
        self.outbox.take()
    }

    pub fn set_environment_speed_modifiers(&mut self, modifiers: SpeedModifiers) {
        self.speed_modifiers = modifiers;
    }

    /// Schedule a collision rebuild of the terrain under `areas`, for edits made to the
    /// terrain outside of this domain.
    pub fn refresh_terrain(&mut self, areas: &[Area2]) {
        self.terrain.refresh(areas);
    }

    pub(crate) fn now_ms(&self) -> u64 {
        (self.clock * 1000.0).round() as u64
    }

    pub(crate) fn notify(&mut self, to: EntityId, kind: NotificationKind) {
        let stamp = self.now_ms();
        self.outbox.push(to, stamp, kind);
    }

    pub(crate) fn ground_height(&self, x: f32, z: f32) -> f32 {
        self.terrain.height_at(x, z)
    }

    /// Put a record on the moving list and flag it as moved during this frame.
    pub(crate) fn mark_moving(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.moved_this_frame = true;
        if !entry.in_moving_list {
            entry.in_moving_list = true;
            self.moving.push(id);
        }
    }

    pub(crate) fn queue_visibility(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if !entry.visibility_queued {
            entry.visibility_queued = true;
            self.visibility_queue.push_back(id);
        }
    }

    pub(crate) fn ensure_terrain_around(&mut self, position: &Point3) {
        self.terrain
            .ensure_segments_around(&mut self.world, position.x, position.z);
    }

    /// Admit an entity.
    ///
    /// The entity is placed, gets a body and its spheres, and is shown to the observers
    /// that can see it right away. Appearance notifications for the entity itself are
    /// buffered until the next tick.
    pub fn add_entity(&mut self, descriptor: EntityDescriptor) -> Result<(), DomainError> {
        let id = descriptor.id;
        let Some(intended) = descriptor.position else {
            log::warn!("refusing {id}: no valid position");
            return Err(DomainError::InvalidPosition(id));
        };
        if self.entries.contains_key(&id) {
            log::warn!("refusing {id}: already in domain");
            return Err(DomainError::DuplicateEntity(id));
        }

        let entry = PhysicalEntry::new(descriptor);
        if entry.shape.is_none() {
            log::warn!("{id} has no shape; it will not collide");
        }
        let water = entry.is_water();
        let mode = entry.mode();
        let planted_hint = entry.state.mode_data.planted_on();
        self.entries.insert(id, entry);
        if water {
            self.water_bodies.insert(id);
        }

        self.ensure_terrain_around(&intended);
        let (position, support) = self.calculate_position(id, &intended, planted_hint);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state.position = Some(position);
        }
        if mode == Mode::Planted {
            self.plant_on_entity(id, support);
        }

        self.create_body(id);
        self.update_terrain_mod(id);
        self.update_terrain_area(id);

        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(());
        };
        entry.mode_changed = false;
        entry.mode_data_changed = false;
        entry.last_sent = SentSnapshot::of(&entry.state, self.clock);
        let state = entry.state.clone();

        if state.step_factor > 0.0 {
            self.stepping.insert(id);
        }
        // The body starts with the initial velocity; get it reported.
        if state.velocity.is_some_and(|v| v != Vec3::zeros()) {
            self.mark_moving(id);
        }
        if state.propel != Vec3::zeros() {
            self.propel_queue.push((id, state.propel));
        }
        if let Some(destination) = state.destination {
            self.destinations.insert(id, destination);
        }
        if let Some(direction) = state.direction {
            self.direction_queue.push((id, direction));
        }

        self.admit_to_visibility(id);
        log::debug!("added {id} as {mode} at {position:?}");
        Ok(())
    }

    /// Remove an entity, returning its final attributes with the physical ones cleared.
    ///
    /// Records resting on it are re-settled; the container cannot be removed.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<EntityState> {
        if id == self.container_id {
            log::warn!("refusing to remove the container {id}");
            return None;
        }
        if !self.entries.contains_key(&id) {
            log::warn!("cannot remove {id}: not in domain");
            return None;
        }

        self.terrain.remove_mod(id);
        self.terrain.remove_area(id);
        if let Some(handle) = self.entries.get_mut(&id).and_then(|e| e.handle.take()) {
            self.world.remove(handle);
        }
        self.withdraw_from_visibility(id);
        self.plant_on_entity(id, None);
        self.drop_closeness_of(id);

        let attached: Vec<EntityId> = self
            .entries
            .get_mut(&id)
            .map(|entry| std::mem::take(&mut entry.attached).into_iter().collect())
            .unwrap_or_default();

        self.propelling.remove(&id);
        self.propel_queue.retain(|(queued, _)| *queued != id);
        self.direction_queue.retain(|(queued, _)| *queued != id);
        self.destinations.remove(&id);
        self.stepping.remove(&id);
        if self.water_bodies.remove(&id) {
            self.recheck_near_water(id);
        }
        self.water_recheck.remove(&id);
        self.moving.retain(|moving| *moving != id);
        self.visibility_queue.retain(|queued| *queued != id);
        self.pending_visibility.remove(&id);

        let mut state = self.entries.remove(&id)?.state;
        state.reset_physical();

        for dependent in attached {
            let Some(position) = self.entries.get(&dependent).and_then(|e| e.state.position)
            else {
                continue;
            };
            if let Some(entry) = self.entries.get_mut(&dependent) {
                entry.state.mode_data = crate::types::ModeData::None;
                entry.mode_data_changed = true;
            }
            self.apply_transform(
                dependent,
                TransformData {
                    position: Some(position),
                    ..TransformData::default()
                },
                &mut HashSet::new(),
            );
        }
        log::debug!("removed {id}");
        Some(state)
    }

    /// Build the rapier objects for a record from its current attributes.
    pub(crate) fn create_body(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let (Some(shape), Some(iso)) = (entry.shape.clone(), entry.iso()) else {
            log::trace!("{id} has no shape or position; no body");
            return;
        };
        let groups = interaction_groups(entry.group, entry.mask);
        let user_data = id.0 as u128;

        let handle = if entry.is_water() {
            let pose = iso * nalgebra::Translation3::from(shape.offset);
            let mut collider = ColliderBuilder::new(shape.shape)
                .sensor(true)
                .collision_groups(groups)
                .active_collision_types(ActiveCollisionTypes::all())
                .active_events(ActiveEvents::COLLISION_EVENTS)
                .user_data(user_data)
                .build();
            collider.set_translation(pose.translation.vector);
            collider.set_rotation(pose.rotation);
            self.world.insert_proxy(collider)
        } else {
            let state = &entry.state;
            let dynamic = !state.mode.is_static() && state.mass > 0.0;
            let body_type = if dynamic {
                RigidBodyType::Dynamic
            } else {
                RigidBodyType::Fixed
            };
            let factor = state.angular_factor;
            let mut builder = RigidBodyBuilder::new(body_type)
                .translation(iso.translation.vector)
                .enabled_rotations(factor.x != 0.0, factor.y != 0.0, factor.z != 0.0)
                .user_data(user_data);
            if state.mode == Mode::Submerged {
                builder = builder
                    .linear_damping(WATER_LINEAR_DAMPING)
                    .gravity_scale(0.0);
            }
            builder = builder.angular_damping(self.angular_damping(state));
            // CCD is for projectiles only; soft prediction snags walkers on ground edges.
            let min_side = entry.scaled_bbox.map(|b| b.min_side()).unwrap_or(0.0);
            if dynamic
                && state.mode == Mode::Projectile
                && min_side * CCD_MOTION_FACTOR < CCD_MAX_MOTION_THRESHOLD
            {
                builder = builder
                    .ccd_enabled(true)
                    .soft_ccd_prediction(min_side * CCD_SPHERE_FACTOR);
            }
            if dynamic {
                if let Some(velocity) = state.velocity {
                    builder = builder.linvel(velocity);
                }
                if let Some(angular) = state.angular_velocity {
                    builder = builder.angvel(angular);
                }
            }
            let mut body = builder.build();
            body.set_rotation(iso.rotation, false);

            let friction = if self.propelling.contains_key(&id) {
                self.config.propel_friction
            } else {
                state.friction.unwrap_or(self.config.default_friction)
            };
            let mut collider = ColliderBuilder::new(shape.shape)
                .translation(shape.offset)
                .friction(friction)
                .collision_groups(groups)
                .user_data(user_data);
            if dynamic {
                collider = collider.mass(state.mass);
            }
            if state.mode == Mode::Projectile {
                collider = collider.active_events(ActiveEvents::COLLISION_EVENTS);
            }
            self.world.insert_body(body, collider.build())
        };

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.handle = Some(handle);
        }
    }

    /// Rolling and spinning friction have no rapier counterpart; together they damp the
    /// body's rotation. The container's values apply where the entity has none.
    pub(crate) fn angular_damping(&self, state: &EntityState) -> f32 {
        let roll = state.friction_roll.or(self.container_friction_roll);
        let spin = state.friction_spin.or(self.container_friction_spin);
        roll.unwrap_or(0.0).max(0.0) + spin.unwrap_or(0.0).max(0.0)
    }

    /// Push the current rolling and spinning friction of `id` into its body.
    pub(crate) fn refresh_angular_damping(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let damping = self.angular_damping(&entry.state);
        let handle = entry.handle;
        if let Some(body) = handle.and_then(|h| self.world.body_mut(h)) {
            body.set_angular_damping(damping);
        }
    }

    /// Replace a record's rapier objects after a change to its shape, mass or mode.
    pub(crate) fn rebuild_body(&mut self, id: EntityId) {
        if let Some(handle) = self.entries.get_mut(&id).and_then(|e| e.handle.take()) {
            self.world.remove(handle);
        }
        self.create_body(id);
    }

    /// Add a velocity change to a dynamic body, mirroring it into the attributes.
    pub(crate) fn apply_impulse(&mut self, id: EntityId, velocity: &Vec3) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let Some(body) = entry.handle.and_then(|h| self.world.body_mut(h)) else {
            return;
        };
        if !body.is_dynamic() {
            return;
        }
        let linvel = *body.linvel() + velocity;
        body.set_linvel(linvel, true);
        entry.state.velocity = Some(linvel);
    }

    /// Move a record's body (or proxy) to the pose in its attributes.
    pub(crate) fn sync_body_pose(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let (Some(handle), Some(iso)) = (entry.handle, entry.iso()) else {
            return;
        };
        let offset = entry.shape.as_ref().map(|s| s.offset).unwrap_or_else(Vec3::zeros);
        self.world.set_pose(handle, &iso, &offset);
    }

    /// Re-apply a record's terrain modifier at its current pose, or remove it when the
    /// record is not planted or carries none.
    pub(crate) fn update_terrain_mod(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let state = &entry.state;
        match (state.mode, state.terrain_mod, state.position) {
            (Mode::Planted, Some(def), Some(position)) => {
                let orientation = state.orientation_or_identity();
                self.terrain
                    .update_mod(id, Some(&def), &position, &orientation, &state.scale);
            }
            _ => self.terrain.remove_mod(id),
        }
    }

    pub(crate) fn update_terrain_area(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let state = &entry.state;
        match (state.area, state.position) {
            (Some(def), Some(position)) => {
                let orientation = state.orientation_or_identity();
                self.terrain
                    .update_area(id, Some(&def), &position, &orientation, &state.scale);
            }
            _ => self.terrain.remove_area(id),
        }
    }

    /// Records whose shapes touch a sphere, plus the container when the sphere reaches
    /// the ground, nearest first.
    pub fn query_collision(&self, center: &Point3, radius: f32) -> Vec<CollisionEntry> {
        let sphere = Ball::new(radius);
        let sphere_iso = Iso::translation(center.x, center.y, center.z);
        let mut found: Vec<CollisionEntry> = self
            .entries
            .values()
            .filter(|entry| entry.id() != self.container_id)
            .filter_map(|entry| {
                let shape = entry.shape.as_ref()?;
                let iso = entry.shape_iso()?;
                let contact = query::contact(&sphere_iso, &sphere, &iso, &*shape.shape, 0.0)?;
                Some(CollisionEntry {
                    entity: entry.id(),
                    point: contact.point2,
                    distance: contact.dist,
                })
            })
            .collect();

        let ground = self.ground_height(center.x, center.z);
        if center.y - radius <= ground {
            found.push(CollisionEntry {
                entity: self.container_id,
                point: Point3::new(center.x, ground, center.z),
                distance: (center.y - ground) - radius,
            });
        }
        found.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        found
    }
}
