use shared::{Point3, Quat, Vec3};

use super::PropelEntry;
use crate::domain::PhysicalDomain;
use crate::record::{BodyHandle, PhysicalEntry};
use crate::types::{EntityId, Mode};

/// How close a contact must be to count as standing on something (m).
pub(super) const GROUND_CONTACT_TOLERANCE: f32 = 0.01;

impl PhysicalDomain {
    /// Apply the intents queued since the last tick. `dt` is the coming tick length.
    pub(crate) fn apply_intents(&mut self, dt: f32) {
        for (id, propel) in std::mem::take(&mut self.propel_queue) {
            self.apply_propel(id, &propel);
        }
        for (id, direction) in std::mem::take(&mut self.direction_queue) {
            self.apply_direction(id, &direction);
        }
        let destinations: Vec<(EntityId, Point3)> =
            self.destinations.iter().map(|(id, p)| (*id, *p)).collect();
        for (id, destination) in destinations {
            self.steer_to_destination(id, &destination, dt);
        }
    }

    /// Speed an entity propels itself with in its current medium, and whether it moves
    /// freely in three dimensions there.
    fn propel_speed(&self, entry: &PhysicalEntry) -> (f32, bool) {
        let state = &entry.state;
        let modifiers = self.speed_modifiers;
        if entry.mode() == Mode::Submerged {
            (state.speed_water * modifiers.water, true)
        } else if state.speed_ground > 0.0 {
            (state.speed_ground * modifiers.ground, false)
        } else if state.speed_flight > 0.0 {
            (state.speed_flight * modifiers.air, true)
        } else {
            (0.0, false)
        }
    }

    pub(crate) fn apply_propel(&mut self, id: EntityId, propel: &Vec3) {
        if self.destinations.contains_key(&id) {
            // The destination steers; the propel magnitude only sets the pace.
            return;
        }
        let Some(handle) = self.dynamic_handle(id) else {
            log::trace!("{id} has no dynamic body to propel");
            return;
        };
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let (speed, vertical) = self.propel_speed(entry);
        let jump_speed = propel.y * entry.state.speed_jump;

        if !vertical && jump_speed > 0.0 && self.is_grounded(id) {
            if let Some(body) = self.world.body_mut(handle) {
                let mut velocity = *body.linvel();
                velocity.y = jump_speed;
                body.set_linvel(velocity, true);
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.jumping = true;
            }
            log::trace!("{id} jumps at {jump_speed} m/s");
        }

        let velocity = if vertical {
            propel * speed
        } else {
            Vec3::new(propel.x, 0.0, propel.z) * speed
        };
        if velocity.norm_squared() <= f32::EPSILON {
            self.stop_propelling(id);
        } else {
            self.start_propelling(id, PropelEntry { velocity, vertical });
        }
    }

    fn start_propelling(&mut self, id: EntityId, propel: PropelEntry) {
        self.propelling.insert(id, propel);
        if let Some(handle) = self.entries.get(&id).and_then(|e| e.handle) {
            if let Some(collider) = self.world.collider_mut(handle.collider()) {
                collider.set_friction(self.config.propel_friction);
            }
            if let Some(body) = self.world.body_mut(handle) {
                body.wake_up(true);
            }
        }
        self.mark_moving(id);
    }

    /// Stop propulsion: horizontal velocity is cleared and the resting friction restored.
    pub(crate) fn stop_propelling(&mut self, id: EntityId) {
        let previous = self.propelling.remove(&id);
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let friction = entry.state.friction.unwrap_or(self.config.default_friction);
        if let Some(handle) = entry.handle {
            if let Some(body) = self.world.body_mut(handle) {
                let mut velocity = *body.linvel();
                velocity.x = 0.0;
                velocity.z = 0.0;
                if previous.is_some_and(|p| p.vertical) {
                    velocity.y = 0.0;
                }
                body.set_linvel(velocity, true);
            }
            if let Some(collider) = self.world.collider_mut(handle.collider()) {
                collider.set_friction(friction);
            }
        }
        self.mark_moving(id);
    }

    fn apply_direction(&mut self, id: EntityId, direction: &Quat) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.state.orientation = Some(*direction);
        self.sync_body_pose(id);
        self.mark_moving(id);
    }

    /// Head for `destination` at the propel pace, slowing down so the last tick lands on
    /// it instead of overshooting.
    fn steer_to_destination(&mut self, id: EntityId, destination: &Point3, dt: f32) {
        let Some(entry) = self.entries.get(&id) else {
            self.destinations.remove(&id);
            return;
        };
        let Some(position) = entry.state.position else {
            return;
        };
        let offset = Vec3::new(destination.x - position.x, 0.0, destination.z - position.z);
        let distance = offset.norm();
        if distance <= self.config.destination_epsilon {
            self.destinations.remove(&id);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.state.destination = None;
            }
            self.stop_propelling(id);
            log::trace!("{id} reached its destination");
            return;
        }

        let (speed, _) = self.propel_speed(entry);
        if speed <= 0.0 || dt <= 0.0 || self.dynamic_handle(id).is_none() {
            return;
        }
        let requested = entry.state.propel.norm();
        let mut pace = if requested > 0.0 { requested } else { 1.0 };
        if pace * speed * dt > distance {
            pace = distance / (speed * dt);
        }
        let velocity = offset / distance * pace * speed;
        self.start_propelling(
            id,
            PropelEntry {
                velocity,
                vertical: false,
            },
        );
    }

    /// Handle of a record whose body the solver moves.
    pub(crate) fn dynamic_handle(&self, id: EntityId) -> Option<BodyHandle> {
        let handle = self.entries.get(&id)?.handle?;
        self.world
            .body(handle)
            .is_some_and(|body| body.is_dynamic())
            .then_some(handle)
    }

    /// Whether the lower half of the body touches something other than water.
    pub(crate) fn is_grounded(&self, id: EntityId) -> bool {
        let Some(handle) = self.entries.get(&id).and_then(|e| e.handle) else {
            return false;
        };
        self.world
            .touches(handle.collider(), GROUND_CONTACT_TOLERANCE)
            .iter()
            .filter(|touch| touch.local_point.y <= 0.0)
            .any(|touch| {
                !self
                    .world
                    .collider_owner(touch.other)
                    .and_then(|owner| self.entries.get(&owner))
                    .is_some_and(PhysicalEntry::is_water)
            })
    }

    /// Re-impose propulsion velocities before a substep. Walkers keep the vertical
    /// velocity the solver gave them.
    pub(crate) fn pre_step(&mut self) {
        for (id, propel) in &self.propelling {
            let Some(handle) = self.entries.get(id).and_then(|e| e.handle) else {
                continue;
            };
            let Some(body) = self.world.body_mut(handle) else {
                continue;
            };
            let current = *body.linvel();
            let velocity = if propel.vertical {
                propel.velocity
            } else {
                Vec3::new(propel.velocity.x, current.y, propel.velocity.z)
            };
            body.set_linvel(velocity, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::SpeedModifiers;
    use crate::testing::{TestDomain, boxed};
    use crate::types::PropertyUpdate;

    const WALKER: EntityId = EntityId(2);

    fn walker(x: f32) -> crate::types::EntityState {
        let mut state = boxed(2, Mode::Free, [x, 0.0, 0.0], 0.25, 1.0).with_mass(10.0);
        state.speed_ground = 2.0;
        state.speed_jump = 5.0;
        state.angular_factor = Vec3::zeros();
        state
    }

    fn x_of(t: &TestDomain, id: EntityId) -> f32 {
        t.domain.entity(id).unwrap().position.unwrap().x
    }

    #[test]
    fn propel_moves_at_ground_speed_and_stops() {
        let mut t = TestDomain::new();
        t.add(walker(0.0));
        t.tick_ms(100);

        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        t.tick_ms(1000);
        let x = x_of(&t, WALKER);
        assert!((x - 2.0).abs() < 0.2, "walked to {x}");
        assert!(t.domain.propelling.contains_key(&WALKER));

        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::zeros())).unwrap();
        t.tick_ms(1000);
        assert!(!t.domain.propelling.contains_key(&WALKER));
        assert!((x_of(&t, WALKER) - x).abs() < 0.1);
        let handle = t.domain.record(WALKER).unwrap().handle.unwrap();
        let collider = t.domain.world.colliders.get(handle.collider()).unwrap();
        assert!((collider.friction() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn speed_modifiers_scale_ground_speed() {
        let mut t = TestDomain::new();
        t.add(walker(0.0));
        t.domain.set_environment_speed_modifiers(SpeedModifiers {
            ground: 0.5,
            ..SpeedModifiers::default()
        });
        t.tick_ms(100);
        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        t.tick_ms(1000);
        assert!((x_of(&t, WALKER) - 1.0).abs() < 0.15);
    }

    #[test]
    fn destination_is_reached_without_overshoot() {
        let mut t = TestDomain::new();
        t.add(walker(0.0));
        t.tick_ms(100);
        t.domain.set_property(
            WALKER,
            PropertyUpdate::Destination(Some(Point3::new(3.0, 0.0, 0.0))),
        )
        .unwrap();
        for _ in 0..40 {
            t.tick_ms(100);
            assert!(x_of(&t, WALKER) < 3.1);
        }
        assert!((x_of(&t, WALKER) - 3.0).abs() < 0.15);
        assert!(t.domain.entity(WALKER).unwrap().destination.is_none());
        assert!(!t.domain.propelling.contains_key(&WALKER));
    }

    #[test]
    fn jump_needs_ground_contact() {
        let mut t = TestDomain::new();
        t.add(walker(0.0));
        t.tick_ms(200);
        assert!(t.domain.is_grounded(WALKER));

        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(0.0, 1.0, 0.0))).unwrap();
        t.tick_ms(100);
        assert!(t.y(2) > 0.2, "jumped to {}", t.y(2));
        assert!(!t.domain.is_grounded(WALKER));

        // Mid-air: no second jump.
        let before = t.domain.entity(WALKER).unwrap().velocity.unwrap().y;
        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(0.0, 1.0, 0.0))).unwrap();
        t.tick_ms(17);
        let after = t.domain.entity(WALKER).unwrap().velocity.unwrap().y;
        assert!(after < before);
    }

    #[test]
    fn obstacle_blocks_until_removed() {
        let mut t = TestDomain::new();
        let mut mover = walker(0.0);
        mover.friction = Some(0.0);
        t.add(mover);
        t.add(boxed(3, Mode::Planted, [3.0, 0.0, 0.0], 0.5, 2.0));
        t.tick_ms(100);

        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        t.tick_ms(3000);
        let blocked = x_of(&t, WALKER);
        assert!(blocked < 2.3 && blocked > 2.0, "blocked at {blocked}");

        t.domain.remove_entity(EntityId(3));
        t.tick_ms(2000);
        assert!(x_of(&t, WALKER) > 4.5);
        let position = t.domain.entity(WALKER).unwrap().position.unwrap();
        assert!(position.z.abs() < 0.05);
    }

    #[test]
    fn walks_across_terrain_segment_seams() {
        let mut t = TestDomain::new();
        t.add(walker(-2.0));
        t.tick_ms(100);

        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(1.0, 0.0, 0.0))).unwrap();
        for _ in 0..120 {
            t.tick_ms(100);
        }
        let x = x_of(&t, WALKER);
        assert!(x > 18.0, "stuck at {x}");
        assert!(t.y(2).abs() < 0.05);

        t.domain.set_property(WALKER, PropertyUpdate::Propel(Vec3::new(-1.0, 0.0, 0.0))).unwrap();
        for _ in 0..120 {
            t.tick_ms(100);
        }
        let back = x_of(&t, WALKER);
        assert!(back < -2.0, "stuck at {back}");
    }
}
