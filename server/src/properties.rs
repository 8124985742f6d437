//! Attribute changes on contained entities and on the container itself.

use std::collections::HashSet;

use crate::domain::PhysicalDomain;
use crate::error::DomainError;
use crate::types::{
    ContainerUpdate, EntityId, Mode, ModeData, PlantedOn, PropertyUpdate, TransformData,
};

impl PhysicalDomain {
    /// Apply one attribute change to a contained entity and everything derived from it.
    pub fn set_property(&mut self, id: EntityId, update: PropertyUpdate) -> Result<(), DomainError> {
        if id == self.container_id {
            log::warn!("container attributes go through set_container_property");
            return Err(DomainError::UnknownEntity(id));
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            log::warn!("cannot update {id}: not in domain");
            return Err(DomainError::UnknownEntity(id));
        };

        match update {
            PropertyUpdate::Mode(mode) => self.change_mode(id, mode),
            PropertyUpdate::ModeData(data) => return self.change_mode_data(id, data),
            PropertyUpdate::Bbox(bbox) => {
                entry.state.bbox = bbox;
                self.reshape(id);
            }
            PropertyUpdate::Scale(scale) => {
                entry.state.scale = scale;
                self.reshape(id);
            }
            PropertyUpdate::Geometry(geometry) => {
                entry.state.geometry = geometry;
                self.reshape(id);
            }
            PropertyUpdate::Mass(mass) => {
                entry.state.mass = mass.max(0.0);
                self.reshape(id);
            }
            PropertyUpdate::Solid(solid) => {
                entry.state.solid = solid;
                self.reshape(id);
            }
            PropertyUpdate::Friction(friction) => {
                entry.state.friction = friction;
                let handle = entry.handle;
                if !self.propelling.contains_key(&id) {
                    let friction = friction.unwrap_or(self.config.default_friction);
                    if let Some(collider) = handle.and_then(|h| self.world.collider_mut(h.collider())) {
                        collider.set_friction(friction);
                    }
                }
            }
            PropertyUpdate::FrictionRoll(friction) => {
                entry.state.friction_roll = friction;
                self.refresh_angular_damping(id);
            }
            PropertyUpdate::FrictionSpin(friction) => {
                entry.state.friction_spin = friction;
                self.refresh_angular_damping(id);
            }
            PropertyUpdate::SpeedGround(speed) => {
                entry.state.speed_ground = speed;
                self.refresh_propulsion(id);
            }
            PropertyUpdate::SpeedWater(speed) => {
                entry.state.speed_water = speed;
                self.refresh_propulsion(id);
            }
            PropertyUpdate::SpeedFlight(speed) => {
                entry.state.speed_flight = speed;
                self.refresh_propulsion(id);
            }
            PropertyUpdate::SpeedJump(speed) => entry.state.speed_jump = speed,
            PropertyUpdate::StepFactor(factor) => {
                entry.state.step_factor = factor;
                if factor > 0.0 {
                    self.stepping.insert(id);
                } else {
                    self.stepping.remove(&id);
                }
            }
            PropertyUpdate::AngularFactor(factor) => {
                entry.state.angular_factor = factor;
                let handle = entry.handle;
                if let Some(body) = handle.and_then(|h| self.world.body_mut(h)) {
                    body.set_enabled_rotations(factor.x != 0.0, factor.y != 0.0, factor.z != 0.0, true);
                }
            }
            PropertyUpdate::Propel(propel) => {
                if entry.shape.is_none() {
                    log::warn!("{id} has no shape to propel");
                    return Err(DomainError::MissingShape(id));
                }
                entry.state.propel = propel;
                self.propel_queue.push((id, propel));
            }
            PropertyUpdate::Destination(Some(destination)) => {
                if entry.shape.is_none() {
                    log::warn!("{id} has no shape to move to {destination:?}");
                    return Err(DomainError::MissingShape(id));
                }
                entry.state.destination = Some(destination);
                self.destinations.insert(id, destination);
            }
            PropertyUpdate::Destination(None) => {
                entry.state.destination = None;
                let propel = entry.state.propel;
                if self.destinations.remove(&id).is_some() {
                    self.stop_propelling(id);
                    if propel != shared::Vec3::zeros() {
                        self.propel_queue.push((id, propel));
                    }
                }
            }
            PropertyUpdate::Direction(direction) => {
                entry.state.direction = direction;
                if let Some(direction) = direction {
                    self.direction_queue.push((id, direction));
                }
            }
            PropertyUpdate::TerrainMod(terrain_mod) => {
                entry.state.terrain_mod = terrain_mod;
                self.update_terrain_mod(id);
            }
            PropertyUpdate::Area(area) => {
                entry.state.area = area;
                self.update_terrain_area(id);
            }
            PropertyUpdate::VisDist(distance) => {
                entry.state.vis_dist = distance;
                entry.refresh_derived();
                self.resize_visibility_sphere(id);
            }
            PropertyUpdate::PlantedOffset(offset) => {
                entry.state.planted_offset = offset;
                self.replant(id);
            }
            PropertyUpdate::PlantedScaledOffset(offset) => {
                entry.state.planted_scaled_offset = offset;
                self.replant(id);
            }
        }
        Ok(())
    }

    /// Apply one attribute change to the container.
    pub fn set_container_property(&mut self, update: ContainerUpdate) {
        match update {
            ContainerUpdate::Friction(friction) => {
                self.container_friction = friction;
                self.terrain.set_friction(&mut self.world, friction);
                for border in self.world.borders().to_vec() {
                    if let Some(collider) = self.world.collider_mut(border) {
                        collider.set_friction(friction);
                    }
                }
            }
            ContainerUpdate::FrictionRoll(friction) => {
                self.container_friction_roll = Some(friction);
                self.refresh_all_angular_damping();
            }
            ContainerUpdate::FrictionSpin(friction) => {
                self.container_friction_spin = Some(friction);
                self.refresh_all_angular_damping();
            }
            ContainerUpdate::SimulationSpeed(speed) => {
                if !speed.is_finite() || speed < 0.0 {
                    log::warn!("ignoring simulation speed {speed}");
                    return;
                }
                self.simulation_speed = speed;
            }
            ContainerUpdate::Perceptive(perceptive) => self.set_container_perceptive(perceptive),
        }
    }

    fn refresh_all_angular_damping(&mut self) {
        let ids: Vec<EntityId> = self.entries.keys().copied().collect();
        for id in ids {
            self.refresh_angular_damping(id);
        }
    }

    fn change_mode(&mut self, id: EntityId, mode: Mode) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let previous = entry.mode();
        if previous == mode {
            return;
        }

        let mut freed = Vec::new();
        if previous == Mode::Planted {
            freed.extend(std::mem::take(&mut entry.attached));
            self.plant_on_entity(id, None);
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.state.mode = mode;
        entry.mode_changed = true;
        entry.refresh_derived();
        log::debug!("{id} changed mode from {previous} to {mode}");

        if mode.is_static() && self.propelling.contains_key(&id) {
            self.stop_propelling(id);
        }
        self.rebuild_body(id);
        if mode == Mode::Planted {
            let position = self.entries.get(&id).and_then(|e| e.state.position);
            self.apply_transform(
                id,
                TransformData {
                    position,
                    ..TransformData::default()
                },
                &mut HashSet::new(),
            );
        }
        self.update_terrain_mod(id);
        self.mark_moving(id);
        self.queue_visibility(id);

        for dependent in freed {
            self.change_mode(dependent, Mode::Free);
        }
    }

    fn change_mode_data(&mut self, id: EntityId, data: ModeData) -> Result<(), DomainError> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Err(DomainError::UnknownEntity(id));
        };
        match data {
            ModeData::Planted(PlantedOn { entity }) if entity == id => {
                log::warn!("{id} cannot be planted on itself");
                Err(DomainError::SelfPlanting(id))
            }
            ModeData::Planted(PlantedOn { entity }) if entry.mode() == Mode::Planted => {
                self.apply_transform(
                    id,
                    TransformData {
                        planted_on: Some(entity),
                        ..TransformData::default()
                    },
                    &mut HashSet::new(),
                );
                Ok(())
            }
            data => {
                if entry.state.mode_data.planted_on().is_some() {
                    self.plant_on_entity(id, None);
                }
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.state.mode_data = data;
                    entry.mode_data_changed = true;
                }
                self.mark_moving(id);
                Ok(())
            }
        }
    }

    /// Rebuild shape, body and visibility radius after a geometric attribute changed.
    fn reshape(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.refresh_derived();
        self.rebuild_body(id);
        self.resize_visibility_sphere(id);
        self.mark_moving(id);
    }

    /// Re-derive the propel velocity after a speed changed.
    fn refresh_propulsion(&mut self, id: EntityId) {
        if !self.propelling.contains_key(&id) || self.destinations.contains_key(&id) {
            return;
        }
        if let Some(propel) = self.entries.get(&id).map(|e| e.state.propel) {
            self.propel_queue.push((id, propel));
        }
    }

    /// Settle a planted entity again, e.g. after its planted offsets changed.
    fn replant(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if entry.mode() != Mode::Planted {
            return;
        }
        let position = entry.state.position;
        self.apply_transform(
            id,
            TransformData {
                position,
                ..TransformData::default()
            },
            &mut HashSet::new(),
        );
    }
}
