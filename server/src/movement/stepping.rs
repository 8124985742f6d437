use rapier3d::prelude::{QueryFilter, Ray};
use shared::{Point3, Vec3};

use super::propel::GROUND_CONTACT_TOLERANCE;
use crate::domain::PhysicalDomain;
use crate::dynamics::interaction_groups;
use crate::types::EntityId;

/// Bodies slower than this (squared, m^2/s^2) are not snapped.
const MIN_STEPPING_SPEED_SQ: f32 = 0.001;

impl PhysicalDomain {
    /// Snap stepping bodies down onto the surface below them after a substep, so they
    /// follow slopes and steps instead of launching off them.
    pub(crate) fn post_step(&mut self) {
        let stepping: Vec<EntityId> = self.stepping.iter().copied().collect();
        for id in stepping {
            let Some(handle) = self.dynamic_handle(id) else {
                continue;
            };
            let Some(velocity) = self.world.body(handle).map(|b| *b.linvel()) else {
                continue;
            };
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            if velocity.norm_squared() <= MIN_STEPPING_SPEED_SQ {
                continue;
            }
            if entry.jumping && velocity.y > 0.0 {
                continue;
            }

            let touches = self.world.touches(handle.collider(), GROUND_CONTACT_TOLERANCE);
            if touches.iter().any(|touch| touch.normal.y > 0.0) {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.jumping = false;
                }
                continue;
            }
            if entry.jumping {
                continue;
            }

            let Some(distance) = self.distance_below(id) else {
                continue;
            };
            if distance <= self.config.step_snap_min_distance {
                continue;
            }
            let damping = self.config.jump_velocity_damping;
            if let Some(body) = self.world.body_mut(handle) {
                let mut translation = *body.translation();
                translation.y -= distance;
                body.set_translation(translation, true);
                body.set_linvel(Vec3::new(velocity.x, velocity.y * damping, velocity.z), true);
            }
            log::trace!("{id} stepped down {distance}");
        }
    }

    /// Distance from the bottom of a stepping body to the first surface below it,
    /// within its step height.
    fn distance_below(&self, id: EntityId) -> Option<f32> {
        let entry = self.entries.get(&id)?;
        let handle = entry.handle?;
        let body = handle.body()?;
        let aabb = self.world.colliders.get(handle.collider())?.compute_aabb();
        let max_distance = entry.state.step_factor * entry.height();
        if max_distance <= 0.0 {
            return None;
        }
        let origin = Point3::new(
            (aabb.mins.x + aabb.maxs.x) * 0.5,
            aabb.mins.y,
            (aabb.mins.z + aabb.maxs.z) * 0.5,
        );
        let ray = Ray::new(origin, -Vec3::y());
        let filter = QueryFilter::new()
            .exclude_rigid_body(body)
            .exclude_sensors()
            .groups(interaction_groups(entry.group, entry.mask));
        let (_, distance) = self
            .world
            .query_pipeline(filter)
            .cast_ray(&ray, max_distance, true)?;
        Some(distance)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{TestDomain, boxed};
    use crate::types::Mode;
    use shared::Vec3;

    fn floating(id: u64, x: f32, step_factor: f32) -> crate::types::EntityState {
        let mut state = boxed(id, Mode::Free, [x, 0.5, 0.0], 0.25, 2.0).with_mass(10.0);
        state.step_factor = step_factor;
        state.velocity = Some(Vec3::new(1.0, 0.0, 0.0));
        state.angular_factor = Vec3::zeros();
        state
    }

    #[test]
    fn stepping_body_snaps_down_to_ground() {
        let mut t = TestDomain::new();
        t.add(floating(2, 0.0, 0.5));
        t.add(floating(3, 10.0, 0.0));
        t.tick_ms(17);

        assert!(t.y(2).abs() < 0.02, "stepper at {}", t.y(2));
        assert!(t.y(3) > 0.45, "faller at {}", t.y(3));
        let vy = t.domain.entity(crate::types::EntityId(2)).unwrap().velocity.unwrap().y;
        assert!(vy.abs() < 0.05);
    }

    #[test]
    fn drops_beyond_step_height_are_not_snapped() {
        let mut t = TestDomain::new();
        let mut high = floating(2, 0.0, 0.1);
        high.position = Some(shared::Point3::new(0.0, 1.0, 0.0));
        t.add(high);
        t.tick_ms(17);
        // A 0.2 m ray cannot reach ground 1 m below.
        assert!(t.y(2) > 0.9);
    }
}
