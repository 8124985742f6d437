//! Collision-only world of perception spheres.
//!
//! Every observer owns a small sensor "view sphere" and every observable owns a
//! "visibility sphere" whose radius is its visibility distance. An overlap between the
//! two means the observer sees the observable. The whole world is shrunk by
//! [`VISIBILITY_SCALING_FACTOR`] so kilometre-sized spheres stay in the size range the
//! broad phase handles well.
//!
//! This module only detects overlap changes; turning them into visibility sets and
//! notifications is the domain's job.

use rapier3d::prelude::*;
use shared::constants::{VIEW_SPHERE_RADIUS, VISIBILITY_SCALING_FACTOR};
use shared::{GroupMask, Point3, VisibilityGroup};

use crate::dynamics::{EventCollector, interaction_groups};
use crate::types::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SphereKind {
    View,
    Visibility,
}

fn encode(id: EntityId, kind: SphereKind) -> u128 {
    let bit = match kind {
        SphereKind::View => 0,
        SphereKind::Visibility => 1,
    };
    ((id.0 as u128) << 1) | bit
}

fn decode(user_data: u128) -> (EntityId, SphereKind) {
    let kind = if user_data & 1 == 0 {
        SphereKind::View
    } else {
        SphereKind::Visibility
    };
    (EntityId((user_data >> 1) as u64), kind)
}

/// An overlap change between an observer's view sphere and an observable's
/// visibility sphere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibilityChange {
    pub observer: EntityId,
    pub observable: EntityId,
    pub visible: bool,
}

pub struct VisibilityWorld {
    bodies: RigidBodySet,
    colliders: ColliderSet,
    islands: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    pipeline: CollisionPipeline,
}

impl Default for VisibilityWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityWorld {
    pub fn new() -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            pipeline: CollisionPipeline::new(),
        }
    }

    /// Insert a view sphere for `id` at the unscaled `position`. Admin observers can
    /// also see private and protected observables.
    pub fn insert_view_sphere(
        &mut self,
        id: EntityId,
        position: &Point3,
        admin: bool,
    ) -> ColliderHandle {
        let mut group = GroupMask::of(&[VisibilityGroup::Observable]);
        group.set(VisibilityGroup::ObservablePrivate, admin);
        let mask = GroupMask::of(&[VisibilityGroup::Observer]);
        let collider = ColliderBuilder::ball(VIEW_SPHERE_RADIUS * VISIBILITY_SCALING_FACTOR)
            .sensor(true)
            .translation(scaled(position).coords)
            .collision_groups(interaction_groups(group, mask))
            .active_collision_types(ActiveCollisionTypes::all())
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(encode(id, SphereKind::View))
            .build();
        self.colliders.insert(collider)
    }

    /// Insert a visibility sphere of the already scaled `radius`.
    pub fn insert_visibility_sphere(
        &mut self,
        id: EntityId,
        position: &Point3,
        radius: f32,
        hidden: bool,
    ) -> ColliderHandle {
        let group = GroupMask::of(&[VisibilityGroup::Observer]);
        let mask = if hidden {
            GroupMask::of(&[VisibilityGroup::ObservablePrivate])
        } else {
            GroupMask::of(&[VisibilityGroup::Observable])
        };
        let collider = ColliderBuilder::ball(radius)
            .translation(scaled(position).coords)
            .collision_groups(interaction_groups(group, mask))
            .active_collision_types(ActiveCollisionTypes::all())
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .user_data(encode(id, SphereKind::Visibility))
            .build();
        self.colliders.insert(collider)
    }

    pub fn remove(&mut self, handle: ColliderHandle) {
        self.colliders
            .remove(handle, &mut self.islands, &mut self.bodies, false);
    }

    pub fn set_position(&mut self, handle: ColliderHandle, position: &Point3) {
        if let Some(co) = self.colliders.get_mut(handle) {
            co.set_translation(scaled(position).coords);
        }
    }

    pub fn set_radius(&mut self, handle: ColliderHandle, radius: f32) {
        if let Some(co) = self.colliders.get_mut(handle) {
            co.set_shape(SharedShape::ball(radius));
        }
    }

    /// Update the broad and narrow phases and report overlap changes.
    ///
    /// Changes caused by removed spheres are not reported: removal cleans up the
    /// visibility sets directly.
    pub fn step(&mut self) -> Vec<VisibilityChange> {
        let collector = EventCollector::default();
        self.pipeline.step(
            0.0,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &(),
            &collector,
        );

        collector
            .into_events()
            .into_iter()
            .filter(|collected| !collected.event.removed())
            .filter_map(|collected| {
                let event = collected.event;
                let a = decode(self.colliders.get(event.collider1())?.user_data);
                let b = decode(self.colliders.get(event.collider2())?.user_data);
                let (observer, observable) = match (a, b) {
                    ((o, SphereKind::View), (x, SphereKind::Visibility))
                    | ((x, SphereKind::Visibility), (o, SphereKind::View)) => (o, x),
                    _ => return None,
                };
                if observer == observable {
                    return None;
                }
                Some(VisibilityChange {
                    observer,
                    observable,
                    visible: event.started(),
                })
            })
            .collect()
    }
}

fn scaled(position: &Point3) -> Point3 {
    position * VISIBILITY_SCALING_FACTOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::constants::VISIBILITY_DISTANCE_THRESHOLDS;

    fn radius(meters: f32) -> f32 {
        meters * VISIBILITY_SCALING_FACTOR
    }

    #[test]
    fn user_data_round_trips_kind() {
        let (id, kind) = decode(encode(EntityId(42), SphereKind::Visibility));
        assert_eq!(id, EntityId(42));
        assert_eq!(kind, SphereKind::Visibility);
    }

    #[test]
    fn overlap_begin_and_end_are_reported() {
        let mut world = VisibilityWorld::new();
        let view = world.insert_view_sphere(EntityId(1), &Point3::new(0.0, 0.0, 0.0), false);
        world.insert_visibility_sphere(
            EntityId(2),
            &Point3::new(15.0, 0.0, 0.0),
            radius(VISIBILITY_DISTANCE_THRESHOLDS[1]),
            false,
        );

        let changes = world.step();
        assert_eq!(
            changes,
            vec![VisibilityChange {
                observer: EntityId(1),
                observable: EntityId(2),
                visible: true,
            }]
        );

        world.set_position(view, &Point3::new(-40.0, 0.0, 0.0));
        let changes = world.step();
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].visible);

        // Nothing moved: nothing to report.
        assert!(world.step().is_empty());
    }

    #[test]
    fn hidden_observables_need_admin_observers() {
        let mut world = VisibilityWorld::new();
        world.insert_view_sphere(EntityId(1), &Point3::origin(), false);
        world.insert_view_sphere(EntityId(3), &Point3::origin(), true);
        world.insert_visibility_sphere(EntityId(2), &Point3::origin(), radius(10.0), true);

        let changes = world.step();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].observer, EntityId(3));
    }

    #[test]
    fn own_spheres_do_not_see_each_other() {
        let mut world = VisibilityWorld::new();
        world.insert_view_sphere(EntityId(1), &Point3::origin(), false);
        world.insert_visibility_sphere(EntityId(1), &Point3::origin(), radius(10.0), false);
        assert!(world.step().is_empty());
    }
}
