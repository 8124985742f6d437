//! Rapier world owned by one domain.
//!
//! [`DynamicsWorld`] keeps the rapier sets, the physics pipeline and the six border
//! planes of the container. The domain drives it one fixed substep at a time and wraps
//! every [`DynamicsWorld::step`] with its own pre/post hooks; contact and intersection
//! events of a step are gathered by a fresh [`EventCollector`] and returned.

use std::sync::Mutex;

use rapier3d::prelude::*;
use shared::{BBox, GroupMask, Iso, Point3, Vec3};

use crate::record::BodyHandle;
use crate::types::EntityId;

/// A collision event together with the world-space contact point, when rapier
/// reported one.
#[derive(Clone, Copy, Debug)]
pub struct CollectedEvent {
    pub event: CollisionEvent,
    pub point: Option<Point3>,
}

/// Collects the collision events of a single step.
#[derive(Default)]
pub(crate) struct EventCollector {
    events: Mutex<Vec<CollectedEvent>>,
}

impl EventCollector {
    pub fn into_events(self) -> Vec<CollectedEvent> {
        self.events
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventHandler for EventCollector {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        colliders: &ColliderSet,
        event: CollisionEvent,
        contact_pair: Option<&ContactPair>,
    ) {
        let point = contact_pair.and_then(|pair| contact_point(colliders, pair));
        if let Ok(mut events) = self.events.lock() {
            events.push(CollectedEvent { event, point });
        }
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

fn contact_point(colliders: &ColliderSet, pair: &ContactPair) -> Option<Point3> {
    let manifold = pair.manifolds.iter().find(|m| !m.points.is_empty())?;
    if let Some(solver_contact) = manifold.data.solver_contacts.first() {
        return Some(solver_contact.point);
    }
    let collider = colliders.get(pair.collider1)?;
    let tracked = manifold.points.first()?;
    Some(collider.position() * tracked.local_p1)
}

/// One contact point of a collider, seen from that collider.
#[derive(Clone, Copy, Debug)]
pub struct Touch {
    pub other: ColliderHandle,
    /// Contact normal pointing from the other collider toward ours.
    pub normal: Vec3,
    /// Contact point in our collider's local frame.
    pub local_point: Point3,
}

/// Rapier group filter for a record's group and mask.
pub fn interaction_groups(group: GroupMask, mask: GroupMask) -> InteractionGroups {
    InteractionGroups {
        memberships: Group::from_bits_truncate(group.bits()),
        filter: Group::from_bits_truncate(mask.bits()),
        ..InteractionGroups::default()
    }
}

pub struct DynamicsWorld {
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub islands: IslandManager,
    pub broad_phase: BroadPhaseBvh,
    pub narrow_phase: NarrowPhase,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    pipeline: PhysicsPipeline,
    params: IntegrationParameters,
    gravity: Vector<Real>,
    borders: Vec<ColliderHandle>,
}

impl DynamicsWorld {
    /// Empty world stepping `substep` seconds at a time.
    pub fn new(gravity: Vec3, substep: f32) -> Self {
        Self {
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            pipeline: PhysicsPipeline::new(),
            params: IntegrationParameters {
                dt: substep,
                ..IntegrationParameters::default()
            },
            gravity,
            borders: Vec::new(),
        }
    }

    /// Close the world with six half-spaces on the faces of `bbox`, normals pointing
    /// inward. Border colliders report `owner` as their entity.
    pub fn add_borders(&mut self, bbox: &BBox, owner: EntityId, friction: f32) {
        let groups = interaction_groups(
            GroupMask::of(&[shared::CollisionGroup::Terrain]),
            GroupMask::of(&[
                shared::CollisionGroup::Physical,
                shared::CollisionGroup::NonPhysical,
            ]),
        );
        let faces = [
            (Vector::x(), bbox.low.coords),
            (-Vector::x(), bbox.high.coords),
            (Vector::y(), bbox.low.coords),
            (-Vector::y(), bbox.high.coords),
            (Vector::z(), bbox.low.coords),
            (-Vector::z(), bbox.high.coords),
        ];
        for (normal, point) in faces {
            let collider = ColliderBuilder::new(SharedShape::new(HalfSpace::new(
                UnitVector::new_normalize(normal),
            )))
            .translation(point)
            .friction(friction)
            .collision_groups(groups)
            .user_data(owner.0 as u128)
            .build();
            let handle = self.colliders.insert(collider);
            self.borders.push(handle);
        }
    }

    pub fn borders(&self) -> &[ColliderHandle] {
        &self.borders
    }

    pub fn insert_body(&mut self, body: RigidBody, collider: Collider) -> BodyHandle {
        let body = self.bodies.insert(body);
        let collider = self
            .colliders
            .insert_with_parent(collider, body, &mut self.bodies);
        BodyHandle::DynamicBody { body, collider }
    }

    pub fn insert_proxy(&mut self, collider: Collider) -> BodyHandle {
        BodyHandle::StaticProxy {
            collider: self.colliders.insert(collider),
        }
    }

    /// Parentless static collider, used for terrain segments.
    pub fn insert_static(&mut self, collider: Collider) -> ColliderHandle {
        self.colliders.insert(collider)
    }

    pub fn remove(&mut self, handle: BodyHandle) {
        match handle {
            BodyHandle::DynamicBody { body, .. } => {
                self.bodies.remove(
                    body,
                    &mut self.islands,
                    &mut self.colliders,
                    &mut self.impulse_joints,
                    &mut self.multibody_joints,
                    true,
                );
            }
            BodyHandle::StaticProxy { collider } => self.remove_collider(collider),
        }
    }

    pub fn remove_collider(&mut self, collider: ColliderHandle) {
        self.colliders
            .remove(collider, &mut self.islands, &mut self.bodies, true);
    }

    /// Teleport a record's body (or proxy) so the entity origin lands on `iso`.
    pub fn set_pose(&mut self, handle: BodyHandle, iso: &Iso, offset: &Vec3) {
        match handle {
            BodyHandle::DynamicBody { body, .. } => {
                if let Some(rb) = self.bodies.get_mut(body) {
                    rb.set_translation(iso.translation.vector, true);
                    rb.set_rotation(iso.rotation, true);
                }
            }
            BodyHandle::StaticProxy { collider } => {
                if let Some(co) = self.colliders.get_mut(collider) {
                    let pose = iso * nalgebra::Translation3::from(*offset);
                    co.set_translation(pose.translation.vector);
                    co.set_rotation(pose.rotation);
                }
            }
        }
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle.body()?)
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle.body()?)
    }

    pub fn collider_mut(&mut self, handle: ColliderHandle) -> Option<&mut Collider> {
        self.colliders.get_mut(handle)
    }

    /// Entity id stored in a collider's user data.
    pub fn collider_owner(&self, handle: ColliderHandle) -> Option<EntityId> {
        self.colliders
            .get(handle)
            .map(|co| EntityId(co.user_data as u64))
    }

    /// Advance the simulation by one substep.
    pub fn step(&mut self) -> Vec<CollectedEvent> {
        let collector = EventCollector::default();
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &collector,
        );
        collector.into_events()
    }

    /// Awake dynamic bodies, i.e. the ones the last step may have moved.
    pub fn awake_bodies(&self) -> Vec<RigidBodyHandle> {
        self.bodies
            .iter()
            .filter(|(_, rb)| rb.is_dynamic() && !rb.is_sleeping())
            .map(|(handle, _)| handle)
            .collect()
    }

    pub fn query_pipeline<'a>(&'a self, filter: QueryFilter<'a>) -> QueryPipeline<'a> {
        self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.bodies,
            &self.colliders,
            filter,
        )
    }

    /// Contact points of `collider` closer than `tolerance`, from its own point of view.
    pub fn touches(&self, collider: ColliderHandle, tolerance: f32) -> Vec<Touch> {
        if !self.colliders.contains(collider) {
            return Vec::new();
        }
        let mut touches = Vec::new();
        for pair in self.narrow_phase.contact_pairs_with(collider) {
            let first = pair.collider1 == collider;
            let other = if first { pair.collider2 } else { pair.collider1 };
            for manifold in &pair.manifolds {
                let normal = if first {
                    -manifold.data.normal
                } else {
                    manifold.data.normal
                };
                for point in manifold.points.iter().filter(|p| p.dist <= tolerance) {
                    let local_point = if first { point.local_p1 } else { point.local_p2 };
                    touches.push(Touch {
                        other,
                        normal,
                        local_point,
                    });
                }
            }
        }
        touches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::CollisionGroup;

    fn world() -> DynamicsWorld {
        let mut world = DynamicsWorld::new(Vec3::new(0.0, -9.81, 0.0), 1.0 / 60.0);
        world.add_borders(
            &BBox::from_corners([-10.0, 0.0, -10.0], [10.0, 10.0, 10.0]),
            EntityId(1),
            1.0,
        );
        world
    }

    fn dynamic_ball(world: &mut DynamicsWorld, y: f32, events: bool) -> BodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(Vector::new(0.0, y, 0.0))
            .user_data(7)
            .build();
        let mut collider = ColliderBuilder::ball(0.5)
            .collision_groups(interaction_groups(
                GroupMask::of(&[CollisionGroup::Physical]),
                GroupMask::of(&[CollisionGroup::Physical, CollisionGroup::Terrain]),
            ))
            .user_data(7);
        if events {
            collider = collider.active_events(ActiveEvents::COLLISION_EVENTS);
        }
        world.insert_body(body, collider.build())
    }

    #[test]
    fn ball_comes_to_rest_on_floor_border() {
        let mut world = world();
        let handle = dynamic_ball(&mut world, 3.0, false);
        for _ in 0..240 {
            world.step();
        }
        let y = world.body(handle).unwrap().translation().y;
        assert!((y - 0.5).abs() < 0.05, "ball rests at {y}");
        assert_eq!(world.borders().len(), 6);
    }

    #[test]
    fn landing_reports_started_event_with_owner() {
        let mut world = world();
        let handle = dynamic_ball(&mut world, 1.0, true);
        let mut started = Vec::new();
        for _ in 0..60 {
            for collected in world.step() {
                if collected.event.started() {
                    started.push(collected);
                }
            }
        }
        assert_eq!(started.len(), 1);
        let event = started[0].event;
        let owners = [
            world.collider_owner(event.collider1()).unwrap(),
            world.collider_owner(event.collider2()).unwrap(),
        ];
        assert!(owners.contains(&EntityId(1)));
        assert!(owners.contains(&EntityId(7)));
        assert!(started[0].point.unwrap().y.abs() < 0.1);

        let touches = world.touches(handle.collider(), 0.01);
        assert!(!touches.is_empty());
        assert!(touches.iter().all(|t| t.normal.y > 0.9));
        assert!(touches.iter().all(|t| t.local_point.y < 0.0));
    }

    #[test]
    fn removed_body_leaves_no_collider() {
        let mut world = world();
        let handle = dynamic_ball(&mut world, 2.0, false);
        world.remove(handle);
        assert!(world.colliders.get(handle.collider()).is_none());
        assert_eq!(world.colliders.len(), 6);
    }
}
