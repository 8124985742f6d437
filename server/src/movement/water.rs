use shared::constants::WATER_LINEAR_DAMPING;
use shared::query;

use crate::domain::PhysicalDomain;
use crate::dynamics::CollectedEvent;
use crate::record::{PhysicalEntry, WaterProximity};
use crate::types::{EntityId, Mode};

impl PhysicalDomain {
    /// Track sensor overlaps with water bodies. Returns whether the event involved one.
    pub(crate) fn handle_water_event(&mut self, collected: &CollectedEvent) -> bool {
        let event = collected.event;
        let owners = (
            self.world.collider_owner(event.collider1()),
            self.world.collider_owner(event.collider2()),
        );
        let (Some(first), Some(second)) = owners else {
            return false;
        };
        let (water, other) = if self.water_bodies.contains(&first) {
            (first, second)
        } else if self.water_bodies.contains(&second) {
            (second, first)
        } else {
            return false;
        };
        if water == other {
            return true;
        }
        let Some(entry) = self.entries.get_mut(&other) else {
            return true;
        };
        if event.started() {
            entry.water_nearby = WaterProximity::Near(water);
        } else if entry.water_nearby == WaterProximity::Near(water) {
            entry.water_nearby = WaterProximity::Left;
        }
        self.water_recheck.insert(other);
        true
    }

    /// Queue everything near `water` for a submersion test, after the water body itself
    /// moved or went away.
    pub(crate) fn recheck_near_water(&mut self, water: EntityId) {
        let near: Vec<EntityId> = self
            .entries
            .values()
            .filter(|entry| entry.water_nearby == WaterProximity::Near(water))
            .map(PhysicalEntry::id)
            .collect();
        self.water_recheck.extend(near);
    }

    /// Toggle Free and Submerged for records whose origin crossed a water surface.
    pub(crate) fn check_water(&mut self) {
        let mut candidates = std::mem::take(&mut self.water_recheck);
        candidates.extend(
            self.entries
                .values()
                .filter(|e| e.moved_this_frame && matches!(e.water_nearby, WaterProximity::Near(_)))
                .map(PhysicalEntry::id),
        );

        for id in candidates {
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let (inside, gone) = match entry.water_nearby {
                WaterProximity::Near(water) => (
                    self.is_in_water(entry, water),
                    !self.entries.contains_key(&water),
                ),
                _ => (false, false),
            };
            match (entry.mode(), inside) {
                (Mode::Free, true) => self.set_submerged(id, true),
                (Mode::Submerged, false) => self.set_submerged(id, false),
                _ => {}
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                if gone || entry.water_nearby == WaterProximity::Left {
                    entry.water_nearby = WaterProximity::None;
                }
            }
        }
    }

    fn is_in_water(&self, entry: &PhysicalEntry, water: EntityId) -> bool {
        if water == entry.id() {
            return false;
        }
        let Some(water) = self.entries.get(&water) else {
            return false;
        };
        let (Some(shape), Some(iso), Some(position)) =
            (water.shape.as_ref(), water.shape_iso(), entry.state.position)
        else {
            return false;
        };
        query::contains_point(&iso, &*shape.shape, &position)
    }

    fn set_submerged(&mut self, id: EntityId, submerged: bool) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let mode = if submerged { Mode::Submerged } else { Mode::Free };
        entry.state.mode = mode;
        entry.mode_changed = true;
        let propel = entry.state.propel;
        if let Some(body) = entry.handle.and_then(|h| self.world.body_mut(h)) {
            if submerged {
                body.set_gravity_scale(0.0, true);
                body.set_linear_damping(WATER_LINEAR_DAMPING);
            } else {
                body.set_gravity_scale(1.0, true);
                body.set_linear_damping(0.0);
            }
        }
        log::debug!("{id} is now {mode}");

        // The medium decides the propel speed.
        if self.propelling.contains_key(&id) && !self.destinations.contains_key(&id) {
            self.propel_queue.push((id, propel));
        }
        self.mark_moving(id);
    }
}
