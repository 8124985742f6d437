//! The per-tick pipeline.
//!
//! A tick runs, in this order: queued intents, the fixed physics substeps, projectile
//! hits, the visibility drain, water transitions, the moving list, then terrain
//! collision rebuilds and surface repaints.

use std::collections::BTreeSet;
use std::time::Duration;

use rapier3d::parry::shape::Cuboid;
use shared::{CollisionGroup, GroupMask, Iso, Point3, Vec3, query};

use crate::domain::PhysicalDomain;
use crate::notification::{MovementUpdate, Notification, NotificationKind};
use crate::record::SentSnapshot;
use crate::types::EntityId;

impl PhysicalDomain {
    /// Advance the container by `duration` of wall time, scaled by its simulation speed.
    /// Returns every notification produced since the previous tick.
    pub fn tick(&mut self, duration: Duration) -> Vec<Notification> {
        let dt = duration.as_secs_f32() * self.simulation_speed;
        if dt > 0.0 {
            self.clock += f64::from(dt);
        }

        self.apply_intents(dt);
        let stepped = self.step_physics(dt) > 0;
        self.process_hits();
        self.drain_visibility();
        self.check_water();
        self.process_moving(stepped);
        self.resync_terrain();
        self.terrain.repaint_dirty();

        self.outbox.take()
    }

    /// Run as many fixed substeps as fit in the accumulated time. Returns how many ran.
    fn step_physics(&mut self, dt: f32) -> usize {
        if dt <= 0.0 {
            return 0;
        }
        let substep = self.config.substep();
        let max_steps = ((dt / substep).ceil() as usize).max(1);
        self.accumulator += dt;

        let mut steps = 0;
        while self.accumulator + 1e-6 >= substep && steps < max_steps {
            self.pre_step();
            let events = self.world.step();
            for collected in &events {
                if !self.handle_water_event(collected) {
                    self.collect_projectile_event(collected);
                }
            }
            self.post_step();
            self.sync_awake_bodies();
            self.accumulator -= substep;
            steps += 1;
        }
        self.accumulator = self.accumulator.clamp(0.0, substep);
        log::trace!("{steps} substeps for {dt}s");
        steps
    }

    /// Copy the pose and velocities of every awake body into its record.
    fn sync_awake_bodies(&mut self) {
        for handle in self.world.awake_bodies() {
            let Some(body) = self.world.bodies.get(handle) else {
                continue;
            };
            let id = EntityId(body.user_data as u64);
            let Some(entry) = self.entries.get_mut(&id) else {
                log::error!("awake body without record {id}");
                continue;
            };
            let state = &mut entry.state;
            state.position = Some(Point3::from(*body.translation()));
            state.orientation = Some(*body.rotation());
            state.velocity = Some(*body.linvel());
            state.angular_velocity = Some(*body.angvel());
            self.mark_moving(id);
            self.queue_visibility(id);
        }
    }

    /// Walk the moving list once: report changes of the records that moved, and give the
    /// ones that stopped a final update before dropping them from the list. Without a
    /// physics step in between nothing can have stopped.
    fn process_moving(&mut self, stepped: bool) {
        let moving = std::mem::take(&mut self.moving);
        let mut still_moving = Vec::with_capacity(moving.len());
        for id in moving {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            if entry.moved_this_frame {
                entry.moved_this_frame = false;
                still_moving.push(id);
                self.process_moved_entity(id, true);
                continue;
            }
            if !stepped {
                still_moving.push(id);
                continue;
            }

            entry.in_moving_list = false;
            if entry.state.velocity.is_some() {
                entry.state.velocity = Some(Vec3::zeros());
            }
            if entry.state.angular_velocity.is_some() {
                entry.state.angular_velocity = Some(Vec3::zeros());
            }
            if let Some(body) = entry.handle.and_then(|h| self.world.body_mut(h)) {
                if body.is_dynamic() {
                    body.set_linvel(Vec3::zeros(), false);
                    body.set_angvel(Vec3::zeros(), false);
                }
            }
            self.process_moved_entity(id, false);
        }
        // Records queued while processing keep their place after the survivors.
        still_moving.append(&mut self.moving);
        self.moving = still_moving;
    }

    /// Send a record's changed movement attributes to its viewers. When `moved`, also
    /// run the position-dependent bookkeeping.
    fn process_moved_entity(&mut self, id: EntityId, moved: bool) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let config = &self.config;
        let state = &entry.state;
        let sent = entry.last_sent;
        let elapsed = (self.clock - sent.stamp) as f32;

        let velocity = state.velocity.unwrap_or_else(Vec3::zeros);
        let position_changed = match (state.position, sent.position) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(position), Some(last)) if velocity == Vec3::zeros() => position != last,
            (Some(position), Some(last)) => {
                let last_velocity = sent.velocity.unwrap_or_else(Vec3::zeros);
                let projected = last + last_velocity * elapsed;
                (position - projected).norm() > config.projected_position_tolerance
            }
        };
        let threshold = config.velocity_change_threshold;
        let velocity_changed = vector_changed(state.velocity, sent.velocity, threshold);
        let angular_changed =
            vector_changed(state.angular_velocity, sent.angular_velocity, threshold);
        let orientation_changed = match (state.orientation, sent.orientation) {
            (Some(current), Some(last)) => {
                current.angle_to(&last) > config.orientation_change_threshold
            }
            (current, last) => current.is_some() && last.is_none(),
        };

        let mut update = MovementUpdate::new(id);
        if position_changed || velocity_changed {
            update.position = state.position;
            update.velocity = Some(velocity);
        }
        if orientation_changed || angular_changed {
            update.orientation = state.orientation;
            update.angular_velocity = state.angular_velocity;
        }
        if entry.mode_changed {
            update.mode = Some(state.mode);
        }
        if entry.mode_data_changed {
            update.mode_data = Some(state.mode_data.clone());
        }
        let position = state.position;
        let viewers: Vec<EntityId> = entry.viewers.iter().copied().collect();

        if !update.is_empty() {
            let clock = self.clock;
            if let Some(entry) = self.entries.get_mut(&id) {
                let mut snapshot = SentSnapshot::of(&entry.state, clock);
                if update.position.is_none() {
                    snapshot.position = entry.last_sent.position;
                    snapshot.velocity = entry.last_sent.velocity;
                    snapshot.stamp = entry.last_sent.stamp;
                }
                if update.orientation.is_none() {
                    snapshot.orientation = entry.last_sent.orientation;
                    snapshot.angular_velocity = entry.last_sent.angular_velocity;
                }
                entry.last_sent = snapshot;
                entry.mode_changed = false;
                entry.mode_data_changed = false;
            }
            for viewer in viewers {
                self.notify(viewer, NotificationKind::Move(update.clone()));
            }
        }

        if moved {
            self.recheck_closeness(id);
            self.update_terrain_mod(id);
            self.update_terrain_area(id);
            if let Some(position) = position {
                self.ensure_terrain_around(&position);
            }
        }
    }

    /// Rebuild terrain collision under the modified areas and tell every record standing
    /// in them where it is, so that clients re-ground it.
    fn resync_terrain(&mut self) {
        if !self.terrain.has_dirty_mods() {
            return;
        }
        let areas = self.terrain.rebuild_dirty(&mut self.world);
        let bbox = self.container_bbox;
        let groups = GroupMask::of(&[
            CollisionGroup::Physical,
            CollisionGroup::NonPhysical,
            CollisionGroup::Static,
        ]);

        let mut affected = BTreeSet::new();
        for area in &areas {
            let extents = area.extents();
            let centre = area.center();
            let footprint = Cuboid::new(Vec3::new(
                extents.x * 0.5,
                bbox.height() * 0.5,
                extents.y * 0.5,
            ));
            let footprint_iso = Iso::translation(centre.x, bbox.center().y, centre.y);
            for entry in self.entries.values() {
                if entry.id() == self.container_id || !entry.group.intersects(groups) {
                    continue;
                }
                let (Some(shape), Some(iso)) = (entry.shape.as_ref(), entry.shape_iso()) else {
                    continue;
                };
                let touching = query::contact(&footprint_iso, &footprint, &iso, &*shape.shape, 0.0);
                if touching.is_some() {
                    affected.insert(entry.id());
                }
            }
        }

        for id in affected {
            let Some(position) = self.entries.get(&id).and_then(|e| e.state.position) else {
                continue;
            };
            let update = MovementUpdate {
                position: Some(position),
                ..MovementUpdate::new(id)
            };
            self.notify(id, NotificationKind::Move(update));
        }
    }
}

/// Whether a vector attribute changed enough to be reported: any axis by more than
/// `threshold`, or to or from zero.
fn vector_changed(current: Option<Vec3>, last: Option<Vec3>, threshold: f32) -> bool {
    let current = current.unwrap_or_else(Vec3::zeros);
    let last = last.unwrap_or_else(Vec3::zeros);
    if (current == Vec3::zeros()) != (last == Vec3::zeros()) {
        return true;
    }
    (current - last).iter().any(|d| d.abs() > threshold)
}
