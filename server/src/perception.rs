//! Who sees whom.
//!
//! Overlap changes reported by the [`VisibilityWorld`](crate::visibility::VisibilityWorld)
//! are not applied as they come. They are parked as edges on one side of the pair: on the
//! observer when the observer is the one that moved, otherwise on the observable. Draining
//! a record's edges updates both visibility sets and produces the notifications, batched
//! per observer on the observer side.

use std::collections::BTreeSet;

use crate::domain::PhysicalDomain;
use crate::notification::NotificationKind;
use crate::record::{EntityFlag, VisibilityEdge};
use crate::types::EntityId;
use crate::visibility::VisibilityChange;

impl PhysicalDomain {
    /// Give a freshly added record its spheres and resolve what it sees and who sees it.
    pub(crate) fn admit_to_visibility(&mut self, id: EntityId) {
        let container = self.container_id;
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let Some(position) = entry.state.position else {
            return;
        };
        let radius = entry.visibility_radius;
        let hidden = entry.is_hidden();
        let perceptive = entry.is_perceptive();
        let admin = entry.is_admin();

        let visibility_sphere = self
            .visibility
            .insert_visibility_sphere(id, &position, radius, hidden);
        let view_sphere =
            perceptive.then(|| self.visibility.insert_view_sphere(id, &position, admin));
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.visibility_sphere = Some(visibility_sphere);
            entry.view_sphere = view_sphere;
        }

        if perceptive {
            self.link(id, id);
            self.link(id, container);
        }
        if self.entries.get(&container).is_some_and(|c| c.is_perceptive()) {
            self.link(container, id);
        }

        let changes = self.visibility.step();
        self.attribute_visibility_changes(changes, &BTreeSet::from([id]));
        self.apply_viewed_changes(id, true);
        self.apply_viewer_changes(id, false);
        self.drain_pending_visibility();
    }

    /// Drop a record's spheres and sever all of its visibility links. Observers that saw
    /// it are told it disappeared.
    pub(crate) fn withdraw_from_visibility(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let spheres = [entry.view_sphere.take(), entry.visibility_sphere.take()];
        let viewed = std::mem::take(&mut entry.viewed);
        let viewers = std::mem::take(&mut entry.viewers);
        entry.viewed_changes.clear();
        entry.viewer_changes.clear();

        for sphere in spheres.into_iter().flatten() {
            self.visibility.remove(sphere);
        }
        for observable in viewed {
            if let Some(other) = self.entries.get_mut(&observable) {
                other.viewers.remove(&id);
            }
        }
        for observer in viewers.into_iter().filter(|o| *o != id) {
            if let Some(other) = self.entries.get_mut(&observer) {
                other.viewed.remove(&id);
            }
            self.notify(observer, NotificationKind::Disappearance(vec![id]));
        }
    }

    /// Move both spheres of a record to its current position.
    pub(crate) fn update_sphere_positions(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        let Some(position) = entry.state.position else {
            return;
        };
        for sphere in [entry.view_sphere, entry.visibility_sphere].into_iter().flatten() {
            self.visibility.set_position(sphere, &position);
        }
    }

    /// Resize the visibility sphere after the record's visibility radius changed.
    pub(crate) fn resize_visibility_sphere(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if let Some(sphere) = entry.visibility_sphere {
            self.visibility.set_radius(sphere, entry.visibility_radius);
            self.queue_visibility(id);
        }
    }

    /// Recompute visibility for up to `visibility_check_max_entries` queued records, then
    /// apply every pending edge.
    pub(crate) fn drain_visibility(&mut self) {
        let mut moved = BTreeSet::new();
        while moved.len() < self.config.visibility_check_max_entries {
            let Some(id) = self.visibility_queue.pop_front() else {
                break;
            };
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.visibility_queued = false;
            self.update_sphere_positions(id);
            moved.insert(id);
        }
        if !moved.is_empty() {
            let changes = self.visibility.step();
            log::trace!("{} visibility changes for {} records", changes.len(), moved.len());
            self.attribute_visibility_changes(changes, &moved);
        }
        self.drain_pending_visibility();
    }

    fn attribute_visibility_changes(
        &mut self,
        changes: Vec<VisibilityChange>,
        moved: &BTreeSet<EntityId>,
    ) {
        for change in changes {
            let observer_moved = moved.contains(&change.observer);
            let (owner, other) = if observer_moved {
                (change.observer, change.observable)
            } else {
                (change.observable, change.observer)
            };
            let edge = if change.visible {
                VisibilityEdge::Added(other)
            } else {
                VisibilityEdge::Removed(other)
            };
            let Some(entry) = self.entries.get_mut(&owner) else {
                continue;
            };
            if observer_moved {
                entry.viewed_changes.push(edge);
            } else {
                entry.viewer_changes.push(edge);
            }
            self.pending_visibility.insert(owner);
        }
    }

    fn drain_pending_visibility(&mut self) {
        for id in std::mem::take(&mut self.pending_visibility) {
            self.apply_viewed_changes(id, true);
            self.apply_viewer_changes(id, true);
        }
    }

    /// Apply the observer-side edges of `id`, telling it in one batch per direction.
    fn apply_viewed_changes(&mut self, id: EntityId, notify: bool) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let changes = std::mem::take(&mut entry.viewed_changes);
        let mut appeared = Vec::new();
        let mut disappeared = Vec::new();
        for edge in changes {
            match edge {
                VisibilityEdge::Added(observable) => {
                    if self.link(id, observable) {
                        appeared.push(observable);
                    }
                }
                VisibilityEdge::Removed(observable) => {
                    if self.unlink(id, observable) {
                        disappeared.push(observable);
                    }
                }
            }
        }
        if notify {
            if !appeared.is_empty() {
                self.notify(id, NotificationKind::Appearance(appeared));
            }
            if !disappeared.is_empty() {
                self.notify(id, NotificationKind::Disappearance(disappeared));
            }
        }
    }

    /// Apply the observable-side edges of `id`, telling each observer separately.
    fn apply_viewer_changes(&mut self, id: EntityId, notify: bool) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let changes = std::mem::take(&mut entry.viewer_changes);
        for edge in changes {
            match edge {
                VisibilityEdge::Added(observer) => {
                    if self.link(observer, id) && notify {
                        self.notify(observer, NotificationKind::Appearance(vec![id]));
                    }
                }
                VisibilityEdge::Removed(observer) => {
                    if self.unlink(observer, id) && notify {
                        self.notify(observer, NotificationKind::Disappearance(vec![id]));
                    }
                }
            }
        }
    }

    /// Record that `observer` sees `observable`. Returns whether this is new.
    fn link(&mut self, observer: EntityId, observable: EntityId) -> bool {
        if !self.entries.contains_key(&observable) {
            return false;
        }
        let Some(entry) = self.entries.get_mut(&observer) else {
            return false;
        };
        if !entry.is_perceptive() || !entry.viewed.insert(observable) {
            return false;
        }
        if let Some(other) = self.entries.get_mut(&observable) {
            other.viewers.insert(observer);
        }
        true
    }

    fn unlink(&mut self, observer: EntityId, observable: EntityId) -> bool {
        let Some(entry) = self.entries.get_mut(&observer) else {
            return false;
        };
        if !entry.viewed.remove(&observable) {
            return false;
        }
        if let Some(other) = self.entries.get_mut(&observable) {
            other.viewers.remove(&observer);
        }
        true
    }

    /// Turn an entity's perception on or off at runtime.
    ///
    /// Turning it off tells the entity that everything it saw disappeared.
    pub fn toggle_perception(&mut self, id: EntityId, perceptive: bool) {
        if id == self.container_id {
            self.set_container_perceptive(perceptive);
            return;
        }
        let Some(entry) = self.entries.get_mut(&id) else {
            log::warn!("cannot toggle perception of {id}: not in domain");
            return;
        };
        if entry.is_perceptive() == perceptive {
            return;
        }
        entry.state.perceptive = perceptive;
        entry.flags.set(EntityFlag::Perceptive, perceptive);

        if perceptive {
            let admin = entry.is_admin();
            let Some(position) = entry.state.position else {
                return;
            };
            let sphere = self.visibility.insert_view_sphere(id, &position, admin);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.view_sphere = Some(sphere);
            }
            self.link(id, id);
            self.link(id, self.container_id);
            self.queue_visibility(id);
            log::debug!("{id} became perceptive");
        } else {
            let sphere = entry.view_sphere.take();
            let viewed = std::mem::take(&mut entry.viewed);
            entry.viewed_changes.clear();
            if let Some(sphere) = sphere {
                self.visibility.remove(sphere);
            }
            for observable in &viewed {
                if let Some(other) = self.entries.get_mut(observable) {
                    other.viewers.remove(&id);
                }
            }
            let gone: Vec<EntityId> = viewed.into_iter().filter(|x| *x != id).collect();
            if !gone.is_empty() {
                self.notify(id, NotificationKind::Disappearance(gone));
            }
            log::debug!("{id} stopped perceiving");
        }
    }

    /// A perceptive container sees every record it holds.
    pub(crate) fn set_container_perceptive(&mut self, perceptive: bool) {
        let container = self.container_id;
        let Some(root) = self.entries.get_mut(&container) else {
            return;
        };
        root.state.perceptive = perceptive;
        root.flags.set(EntityFlag::Perceptive, perceptive);
        if perceptive {
            for id in self.entity_ids() {
                self.link(container, id);
            }
        } else {
            let viewed: Vec<EntityId> = root.viewed.iter().copied().collect();
            for id in viewed {
                self.unlink(container, id);
            }
        }
    }

    /// Whether `observer` currently sees `observed`.
    pub fn is_entity_visible_for(&self, observer: EntityId, observed: EntityId) -> bool {
        self.entries
            .get(&observer)
            .is_some_and(|entry| entry.viewed.contains(&observed))
    }

    /// Everything `observer` currently sees, itself and the container included.
    pub fn visible_entities_for(&self, observer: EntityId) -> Vec<EntityId> {
        self.entries
            .get(&observer)
            .map(|entry| entry.viewed.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every observer currently seeing `observed`.
    pub fn observing_entities_for(&self, observed: EntityId) -> Vec<EntityId> {
        self.entries
            .get(&observed)
            .map(|entry| entry.viewers.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use shared::Point3;

    use super::*;
    use crate::notification::Notification;
    use crate::testing::{TestDomain, boxed};
    use crate::types::{EntityState, Mode, TransformData};

    const OBSERVER: EntityId = EntityId(10);

    fn rock(id: u64, x: f32, z: f32) -> EntityState {
        EntityState::new(EntityId(id))
            .at(x, 0.0, z)
            .with_bbox([-0.2, 0.0, -0.2], [0.2, 0.4, 0.2])
            .with_mode(Mode::Planted)
    }

    fn observer_at(x: f32, z: f32) -> EntityState {
        let mut state = EntityState::new(OBSERVER)
            .at(x, 0.0, z)
            .with_bbox([-0.2, 0.0, -0.2], [0.2, 2.0, 0.2])
            .with_mass(60.0);
        state.perceptive = true;
        state
    }

    fn world() -> TestDomain {
        let mut t = TestDomain::with_root([-64.0, -64.0, -64.0], [64.0, 64.0, 64.0]);
        t.add(rock(2, 30.0, 30.0));
        t.add(rock(3, -31.0, -31.0));
        let mut far = rock(4, -63.0, -63.0);
        far.vis_dist = Some(1000.0);
        t.add(far);
        t.add(
            EntityState::new(EntityId(5))
                .at(0.0, 0.0, 0.0)
                .with_bbox([-10.0, 0.0, -10.0], [10.0, 20.0, 10.0])
                .with_mode(Mode::Planted),
        );
        t
    }

    fn disappearances_of(notifications: &[Notification], who: EntityId) -> Vec<Vec<EntityId>> {
        notifications
            .iter()
            .filter(|n| n.to == who)
            .filter_map(|n| match &n.kind {
                NotificationKind::Disappearance(ids) => Some(ids.clone()),
                _ => None,
            })
            .collect()
    }

    fn assert_sets_consistent(t: &TestDomain) {
        for entry in t.domain.entries.values() {
            for observable in &entry.viewed {
                let other = t.domain.record(*observable).unwrap();
                assert!(other.viewers.contains(&entry.id()));
            }
            for observer in &entry.viewers {
                let other = t.domain.record(*observer).unwrap();
                assert!(other.viewed.contains(&entry.id()));
            }
        }
    }

    #[test]
    fn observer_sees_what_is_within_visibility_radius() {
        let mut t = world();
        t.add(observer_at(-30.0, -30.0));
        t.tick_ms(100);

        let visible = t.domain.visible_entities_for(OBSERVER);
        assert_eq!(visible.len(), 5, "{visible:?}");
        assert!(visible.contains(&OBSERVER));
        assert!(visible.contains(&t.root));
        assert!(visible.contains(&EntityId(3)));
        assert!(visible.contains(&EntityId(4)));
        assert!(visible.contains(&EntityId(5)));
        assert!(!t.domain.is_entity_visible_for(OBSERVER, EntityId(2)));
        assert_sets_consistent(&t);
    }

    #[test]
    fn walking_away_produces_one_disappearance() {
        let mut t = world();
        t.add(observer_at(-30.0, -30.0));
        t.tick_ms(100);

        let mut transformed = HashSet::new();
        t.domain.apply_transform(
            OBSERVER,
            TransformData {
                position: Some(Point3::new(30.0, 0.0, 30.0)),
                ..TransformData::default()
            },
            &mut transformed,
        );
        let notifications = t.tick_ms(2000);

        let visible = t.domain.visible_entities_for(OBSERVER);
        assert_eq!(visible.len(), 5, "{visible:?}");
        assert!(visible.contains(&EntityId(2)));
        assert!(!visible.contains(&EntityId(3)));

        let gone = disappearances_of(&notifications, OBSERVER);
        assert_eq!(gone, vec![vec![EntityId(3)]]);
        assert!(t.domain.pending_visibility.is_empty());
        assert!(t.domain.entries.values().all(|e| e.viewed_changes.is_empty()));
        assert!(t.domain.observing_entities_for(EntityId(2)).contains(&OBSERVER));
        assert!(!t.domain.observing_entities_for(EntityId(3)).contains(&OBSERVER));
        assert_sets_consistent(&t);
    }

    #[test]
    fn removed_entity_disappears_for_its_observers() {
        let mut t = world();
        t.add(observer_at(-30.0, -30.0));
        t.tick_ms(100);

        t.domain.remove_entity(EntityId(3));
        let notifications = t.tick_ms(100);
        assert_eq!(disappearances_of(&notifications, OBSERVER), vec![vec![EntityId(3)]]);
        assert!(!t.domain.is_entity_visible_for(OBSERVER, EntityId(3)));
        assert_sets_consistent(&t);
    }

    #[test]
    fn perception_can_be_toggled() {
        let mut t = world();
        t.add(observer_at(-30.0, -30.0));
        t.tick_ms(100);
        t.domain.take_notifications();

        t.domain.toggle_perception(OBSERVER, false);
        let notifications = t.domain.take_notifications();
        let gone = disappearances_of(&notifications, OBSERVER);
        assert_eq!(gone.len(), 1);
        assert_eq!(gone[0].len(), 4);
        assert!(t.domain.visible_entities_for(OBSERVER).is_empty());
        assert!(t.domain.observing_entities_for(EntityId(5)).is_empty());

        t.domain.toggle_perception(OBSERVER, true);
        t.tick_ms(100);
        assert_eq!(t.domain.visible_entities_for(OBSERVER).len(), 5);
        assert_sets_consistent(&t);
    }

    #[test]
    fn perceptive_container_sees_everything() {
        let mut t = world();
        let root = t.root;
        t.domain.toggle_perception(root, true);
        assert_eq!(t.domain.visible_entities_for(root).len(), 4);
        t.add(boxed(7, Mode::Planted, [40.0, 0.0, 40.0], 0.5, 1.0));
        assert!(t.domain.is_entity_visible_for(root, EntityId(7)));
        assert!(t.domain.observing_entities_for(EntityId(7)).contains(&root));
        assert_sets_consistent(&t);
    }

    #[test]
    fn protected_entities_are_only_seen_by_admins() {
        let mut t = world();
        let mut secret = rock(6, -29.0, -29.0);
        secret.visibility_protected = true;
        t.add(secret);

        t.add(observer_at(-30.0, -30.0));
        let mut admin = observer_at(-30.0, -28.0);
        admin.id = EntityId(11);
        admin.admin = true;
        t.add(admin);
        t.tick_ms(100);

        assert!(!t.domain.is_entity_visible_for(OBSERVER, EntityId(6)));
        assert!(t.domain.is_entity_visible_for(EntityId(11), EntityId(6)));
        assert!(t.domain.is_entity_visible_for(EntityId(11), EntityId(3)));
    }
}
