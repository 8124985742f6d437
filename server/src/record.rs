//! Per-entity physical record.
//!
//! A [`PhysicalEntry`] is the bridge between an entity's attributes and its rapier
//! objects. The attributes in `state` are authoritative; the body, the query shape and
//! the two visibility spheres are derived from them and rebuilt when they change.

use std::collections::BTreeSet;

use rapier3d::prelude::{ColliderHandle, RigidBodyHandle};
use shared::constants::{
    DEFAULT_VISIBILITY_RADIUS, VISIBILITY_DISTANCE_THRESHOLDS, VISIBILITY_RATIO,
    VISIBILITY_SCALING_FACTOR,
};
use shared::{
    BBox, BitmaskFlags, CollisionGroup, EntityShape, GroupMask, Iso, Point3, Quat, Vec3,
    iso_from, shape_for_bbox, water_shape,
};

use crate::closeness::ClosenessHandle;
use crate::types::{EntityId, EntityState, Mode};

shared::define_bitmask_flags!(EntityFlag, u8, {
    Perceptive,
    Admin,
    VisibilityPrivate,
    VisibilityProtected,
    WaterBody,
});

pub type EntityFlags = BitmaskFlags<u8>;

/// The rapier objects backing a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyHandle {
    /// A rigid body (fixed or dynamic) with a contact-responsive collider.
    DynamicBody {
        body: RigidBodyHandle,
        collider: ColliderHandle,
    },
    /// A parentless sensor collider; used by water bodies.
    StaticProxy { collider: ColliderHandle },
}

impl BodyHandle {
    pub fn collider(&self) -> ColliderHandle {
        match self {
            BodyHandle::DynamicBody { collider, .. } | BodyHandle::StaticProxy { collider } => {
                *collider
            }
        }
    }

    pub fn body(&self) -> Option<RigidBodyHandle> {
        match self {
            BodyHandle::DynamicBody { body, .. } => Some(*body),
            BodyHandle::StaticProxy { .. } => None,
        }
    }
}

/// Relationship of a record to the water body whose sensor it last touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaterProximity {
    #[default]
    None,
    Near(EntityId),
    /// The sensor reported the end of the overlap; checked once more, then cleared.
    Left,
}

/// A pending change to one of the visibility sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisibilityEdge {
    Added(EntityId),
    Removed(EntityId),
}

/// What was last sent to observers, used for delta move updates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SentSnapshot {
    pub position: Option<Point3>,
    pub orientation: Option<Quat>,
    pub velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
    /// Domain clock (seconds) at which `position` and `velocity` were sent.
    pub stamp: f64,
}

impl SentSnapshot {
    pub fn of(state: &EntityState, stamp: f64) -> Self {
        Self {
            position: state.position,
            orientation: state.orientation,
            velocity: state.velocity,
            angular_velocity: state.angular_velocity,
            stamp,
        }
    }
}

#[derive(Debug)]
pub struct PhysicalEntry {
    pub state: EntityState,
    pub scaled_bbox: Option<BBox>,
    pub flags: EntityFlags,
    pub handle: Option<BodyHandle>,
    pub shape: Option<EntityShape>,
    pub group: GroupMask,
    pub mask: GroupMask,

    pub view_sphere: Option<ColliderHandle>,
    pub visibility_sphere: Option<ColliderHandle>,
    /// Radius of the visibility sphere, already scaled into the visibility world.
    pub visibility_radius: f32,
    /// Records this one currently sees, as an observer.
    pub viewed: BTreeSet<EntityId>,
    /// Observers currently seeing this record.
    pub viewers: BTreeSet<EntityId>,
    pub viewed_changes: Vec<VisibilityEdge>,
    pub viewer_changes: Vec<VisibilityEdge>,
    pub visibility_queued: bool,

    /// Records planted on this one.
    pub attached: BTreeSet<EntityId>,
    pub closeness: BTreeSet<ClosenessHandle>,
    pub water_nearby: WaterProximity,

    pub last_sent: SentSnapshot,
    pub in_moving_list: bool,
    pub moved_this_frame: bool,
    pub mode_changed: bool,
    pub mode_data_changed: bool,
    pub jumping: bool,
}

impl PhysicalEntry {
    pub fn new(state: EntityState) -> Self {
        let mut entry = Self {
            state,
            scaled_bbox: None,
            flags: EntityFlags::empty(),
            handle: None,
            shape: None,
            group: GroupMask::empty(),
            mask: GroupMask::empty(),
            view_sphere: None,
            visibility_sphere: None,
            visibility_radius: 0.0,
            viewed: BTreeSet::new(),
            viewers: BTreeSet::new(),
            viewed_changes: Vec::new(),
            viewer_changes: Vec::new(),
            visibility_queued: false,
            attached: BTreeSet::new(),
            closeness: BTreeSet::new(),
            water_nearby: WaterProximity::None,
            last_sent: SentSnapshot::default(),
            in_moving_list: false,
            moved_this_frame: false,
            mode_changed: false,
            mode_data_changed: false,
            jumping: false,
        };
        entry.refresh_derived();
        entry
    }

    /// Recompute everything derived from the attributes: scaled bbox, flags, shape,
    /// collision groups and visibility radius.
    pub fn refresh_derived(&mut self) {
        let state = &self.state;
        self.scaled_bbox = state.scaled_bbox();

        let mut flags = EntityFlags::empty();
        flags.set(EntityFlag::Perceptive, state.perceptive);
        flags.set(EntityFlag::Admin, state.admin);
        flags.set(EntityFlag::VisibilityPrivate, state.visibility_private);
        flags.set(EntityFlag::VisibilityProtected, state.visibility_protected);
        flags.set(EntityFlag::WaterBody, state.water_body);
        self.flags = flags;

        self.shape = if state.water_body {
            Some(water_shape(self.scaled_bbox.as_ref()))
        } else {
            self.scaled_bbox
                .as_ref()
                .and_then(|bbox| shape_for_bbox(state.geometry, bbox))
        };

        let (group, mask) = collision_groups(state.mode, state.solid, state.water_body);
        self.group = group;
        self.mask = mask;
        self.visibility_radius = visibility_radius(state.vis_dist, self.scaled_bbox.as_ref());
    }

    pub fn id(&self) -> EntityId {
        self.state.id
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn is_water(&self) -> bool {
        self.flags.has(EntityFlag::WaterBody)
    }

    pub fn is_perceptive(&self) -> bool {
        self.flags.has(EntityFlag::Perceptive)
    }

    pub fn is_admin(&self) -> bool {
        self.flags.has(EntityFlag::Admin)
    }

    /// Private and protected records are only visible to admin observers.
    pub fn is_hidden(&self) -> bool {
        self.flags.has_any(&[
            EntityFlag::VisibilityPrivate,
            EntityFlag::VisibilityProtected,
        ])
    }

    pub fn has_dynamic_body(&self) -> bool {
        matches!(self.handle, Some(BodyHandle::DynamicBody { .. }))
    }

    /// Pose of the entity origin.
    pub fn iso(&self) -> Option<Iso> {
        let position = self.state.position?;
        Some(iso_from(&position, &self.state.orientation_or_identity()))
    }

    /// Pose of the collision shape: the entity pose shifted by the shape offset.
    pub fn shape_iso(&self) -> Option<Iso> {
        let iso = self.iso()?;
        let offset = self.shape.as_ref().map(|s| s.offset).unwrap_or_else(Vec3::zeros);
        Some(iso * nalgebra::Translation3::from(offset))
    }

    /// World-space centre of the shape, falling back to the entity origin.
    pub fn centre(&self) -> Option<Point3> {
        self.shape_iso().map(|iso| Point3::from(iso.translation.vector))
    }

    pub fn bounding_radius(&self) -> f32 {
        self.scaled_bbox
            .as_ref()
            .map(BBox::bounding_radius)
            .unwrap_or(0.0)
    }

    pub fn height(&self) -> f32 {
        self.scaled_bbox.as_ref().map(BBox::height).unwrap_or(0.0)
    }

    /// Lowest point of the scaled bbox relative to the entity origin.
    pub fn bottom_offset(&self) -> f32 {
        self.scaled_bbox.as_ref().map(|b| b.low.y).unwrap_or(0.0)
    }
}

/// Collision group and mask for a record.
pub fn collision_groups(mode: Mode, solid: bool, water_body: bool) -> (GroupMask, GroupMask) {
    use CollisionGroup::*;

    if water_body {
        return (GroupMask::of(&[Terrain]), GroupMask::of(&[Physical, NonPhysical]));
    }
    match (mode, solid) {
        (Mode::Fixed, true) => (GroupMask::of(&[Static]), GroupMask::of(&[Physical])),
        (Mode::Fixed, false) => (GroupMask::empty(), GroupMask::empty()),
        (Mode::Planted, true) => (GroupMask::of(&[Static]), GroupMask::of(&[Physical, Terrain])),
        (Mode::Planted, false) => (GroupMask::empty(), GroupMask::of(&[Terrain])),
        (_, true) => (
            GroupMask::of(&[Physical]),
            GroupMask::of(&[Physical, Terrain, Static]),
        ),
        (_, false) => (GroupMask::of(&[NonPhysical]), GroupMask::of(&[Terrain])),
    }
}

/// Visibility sphere radius, in visibility-world units.
///
/// The unscaled distance is snapped up to the next visibility threshold so that most
/// entities share a handful of radii.
pub fn visibility_radius(vis_dist: Option<f32>, scaled_bbox: Option<&BBox>) -> f32 {
    let distance = vis_dist.unwrap_or_else(|| {
        let radius = scaled_bbox
            .filter(|b| b.is_valid())
            .map(BBox::bounding_radius)
            .unwrap_or(DEFAULT_VISIBILITY_RADIUS);
        radius * VISIBILITY_RATIO
    });
    let last = VISIBILITY_DISTANCE_THRESHOLDS[VISIBILITY_DISTANCE_THRESHOLDS.len() - 1];
    let snapped = VISIBILITY_DISTANCE_THRESHOLDS
        .iter()
        .copied()
        .find(|threshold| *threshold >= distance)
        .unwrap_or(last);
    snapped * VISIBILITY_SCALING_FACTOR
}
