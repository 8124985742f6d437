//! Reach checks and pairwise closeness watches.

use shared::constants::REACH_RAY_EXTENSION;
use shared::query;
use shared::{Point3, iso_from};

use crate::domain::PhysicalDomain;
use crate::types::EntityId;

/// Cancellation handle of a closeness observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClosenessHandle(pub(crate) u64);

/// A watch that fires its callback once `reacher` can no longer reach `target`.
pub(crate) struct ClosenessObserverEntry {
    pub reacher: EntityId,
    pub target: EntityId,
    pub reach: f32,
    pub callback: Box<dyn FnMut()>,
}

impl PhysicalDomain {
    /// Watch the reach between two contained entities.
    ///
    /// The callback runs once, when the pair falls out of reach or either entity leaves
    /// the domain. Returns `None` when either entity is unknown.
    pub fn observe_closeness(
        &mut self,
        reacher: EntityId,
        target: EntityId,
        reach: f32,
        callback: Box<dyn FnMut()>,
    ) -> Option<ClosenessHandle> {
        if !self.entries.contains_key(&reacher) || !self.entries.contains_key(&target) {
            log::warn!("closeness between {reacher} and {target}: entity not in domain");
            return None;
        }
        self.next_closeness += 1;
        let handle = ClosenessHandle(self.next_closeness);
        for id in [reacher, target] {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.closeness.insert(handle);
            }
        }
        self.closeness.insert(
            handle,
            ClosenessObserverEntry {
                reacher,
                target,
                reach,
                callback,
            },
        );
        Some(handle)
    }

    /// Drop an observation without running its callback.
    pub fn cancel_closeness(&mut self, handle: ClosenessHandle) {
        self.take_closeness(handle);
    }

    /// Remove an observation from the store and from both participants.
    fn take_closeness(&mut self, handle: ClosenessHandle) -> Option<ClosenessObserverEntry> {
        let observation = self.closeness.remove(&handle)?;
        for id in [observation.reacher, observation.target] {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.closeness.remove(&handle);
            }
        }
        Some(observation)
    }

    /// Re-evaluate the observations of a record that moved, firing the ones now out of
    /// reach.
    pub(crate) fn recheck_closeness(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let invalid: Vec<ClosenessHandle> = entry
            .closeness
            .iter()
            .copied()
            .filter(|handle| {
                self.closeness.get(handle).is_some_and(|o| {
                    !self.is_entity_reachable(o.reacher, o.reach, o.target, None)
                })
            })
            .collect();
        for handle in invalid {
            // A previous callback may already have removed it.
            if let Some(mut observation) = self.take_closeness(handle) {
                (observation.callback)();
            }
        }
    }

    /// Fire and drop every observation involving `id`.
    pub(crate) fn drop_closeness_of(&mut self, id: EntityId) {
        let handles: Vec<ClosenessHandle> = self
            .entries
            .get(&id)
            .map(|entry| entry.closeness.iter().copied().collect())
            .unwrap_or_default();
        for handle in handles {
            if let Some(mut observation) = self.take_closeness(handle) {
                (observation.callback)();
            }
        }
    }

    pub fn closeness_count(&self) -> usize {
        self.closeness.len()
    }

    /// Whether `reacher` can touch `target` with the given reach.
    ///
    /// `point` is a position on the target in the target's local frame; for the
    /// container it is a position in the domain.
    pub fn is_entity_reachable(
        &self,
        reacher: EntityId,
        reach: f32,
        target: EntityId,
        point: Option<Point3>,
    ) -> bool {
        if reacher == self.container_id {
            return true;
        }
        if reach <= 0.0 {
            return false;
        }
        let Some(reacher_entry) = self.entries.get(&reacher) else {
            return false;
        };
        let Some(reacher_centre) = reacher_entry.centre() else {
            return false;
        };
        let reacher_radius = reacher_entry.bounding_radius();

        if target == self.container_id {
            return point.is_some_and(|p| (p - reacher_centre).norm() - reacher_radius <= reach);
        }

        let Some(target_entry) = self.entries.get(&target) else {
            return false;
        };
        let target_centre = match point {
            Some(local) => match target_entry.state.position {
                Some(position) => {
                    iso_from(&position, &target_entry.state.orientation_or_identity()) * local
                }
                None => return false,
            },
            None => match target_entry.centre() {
                Some(centre) => centre,
                None => return false,
            },
        };

        let offset = target_centre - reacher_centre;
        let distance = offset.norm();
        if distance - reacher_radius - target_entry.bounding_radius() <= reach {
            return true;
        }

        let (Some(shape), Some(iso)) = (target_entry.shape.as_ref(), target_entry.shape_iso())
        else {
            return false;
        };
        query::cast_ray(
            &iso,
            &*shape.shape,
            &reacher_centre,
            &offset,
            distance * REACH_RAY_EXTENSION,
        )
        .is_some_and(|hit| hit.distance - reacher_radius <= reach)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::testing::{TestDomain, boxed};
    use crate::types::{Mode, TransformData};

    fn counter() -> (Rc<Cell<u32>>, Box<dyn FnMut()>) {
        let count = Rc::new(Cell::new(0));
        let inner = count.clone();
        (count, Box::new(move || inner.set(inner.get() + 1)))
    }

    #[test]
    fn container_always_reaches_and_zero_reach_never_does() {
        let mut t = TestDomain::new();
        t.add(boxed(2, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(3, Mode::Planted, [1.0, 0.0, 0.0], 0.5, 1.0));
        let d = &t.domain;
        assert!(d.is_entity_reachable(t.root, 0.0, EntityId(2), None));
        assert!(!d.is_entity_reachable(EntityId(2), 0.0, EntityId(3), None));
        assert!(d.is_entity_reachable(EntityId(2), 0.5, EntityId(3), None));
    }

    #[test]
    fn reaching_the_container_needs_a_point() {
        let mut t = TestDomain::new();
        t.add(boxed(2, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        let d = &t.domain;
        assert!(!d.is_entity_reachable(EntityId(2), 5.0, t.root, None));
        assert!(d.is_entity_reachable(EntityId(2), 1.0, t.root, Some(Point3::new(0.0, 0.0, 1.0))));
        assert!(!d.is_entity_reachable(EntityId(2), 1.0, t.root, Some(Point3::new(0.0, 0.0, 5.0))));
    }

    #[test]
    fn far_targets_are_out_of_reach() {
        let mut t = TestDomain::new();
        t.add(boxed(2, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(3, Mode::Planted, [10.0, 0.0, 0.0], 0.5, 1.0));
        assert!(!t.domain.is_entity_reachable(EntityId(2), 2.0, EntityId(3), None));
        assert!(t.domain.is_entity_reachable(EntityId(2), 9.0, EntityId(3), None));
    }

    #[test]
    fn moving_out_of_reach_fires_callback_once() {
        let mut t = TestDomain::new();
        t.add(boxed(2, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(3, Mode::Planted, [1.5, 0.0, 0.0], 0.5, 1.0));
        let (fired, callback) = counter();
        let handle = t
            .domain
            .observe_closeness(EntityId(2), EntityId(3), 1.0, callback)
            .unwrap();
        t.tick_ms(100);
        assert_eq!(fired.get(), 0);

        let mut transformed = std::collections::HashSet::new();
        t.domain.apply_transform(
            EntityId(3),
            TransformData {
                position: Some(Point3::new(20.0, 0.0, 0.0)),
                ..TransformData::default()
            },
            &mut transformed,
        );
        t.tick_ms(100);
        assert_eq!(fired.get(), 1);
        assert_eq!(t.domain.closeness_count(), 0);

        // Already gone; cancelling is a no-op.
        t.domain.cancel_closeness(handle);
        t.tick_ms(100);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn removal_cancels_observations() {
        let mut t = TestDomain::new();
        t.add(boxed(2, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(3, Mode::Planted, [1.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(4, Mode::Planted, [0.0, 0.0, 1.0], 0.5, 1.0));
        let (fired, callback) = counter();
        t.domain
            .observe_closeness(EntityId(2), EntityId(3), 2.0, callback)
            .unwrap();
        let (other_fired, other_callback) = counter();
        t.domain
            .observe_closeness(EntityId(4), EntityId(2), 2.0, other_callback)
            .unwrap();

        t.domain.remove_entity(EntityId(2));
        assert_eq!(fired.get(), 1);
        assert_eq!(other_fired.get(), 1);
        assert_eq!(t.domain.closeness_count(), 0);
        assert!(t.domain.record(EntityId(3)).unwrap().closeness.is_empty());
        assert!(t.domain.record(EntityId(4)).unwrap().closeness.is_empty());
    }

    #[test]
    fn cancelled_observation_never_fires() {
        let mut t = TestDomain::new();
        t.add(boxed(2, Mode::Planted, [0.0, 0.0, 0.0], 0.5, 1.0));
        t.add(boxed(3, Mode::Planted, [1.0, 0.0, 0.0], 0.5, 1.0));
        let (fired, callback) = counter();
        let handle = t
            .domain
            .observe_closeness(EntityId(2), EntityId(3), 2.0, callback)
            .unwrap();
        t.domain.cancel_closeness(handle);
        t.domain.remove_entity(EntityId(3));
        assert_eq!(fired.get(), 0);
    }
}
