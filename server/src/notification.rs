use std::collections::BTreeMap;

use shared::{Point3, Quat, Vec3};

use crate::types::{EntityId, Mode, ModeData};

/// One outbound message produced by the domain.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Receiving entity: an observer or a participant of a hit.
    pub to: EntityId,
    /// Domain clock at emission, in milliseconds of simulated time.
    pub stamp_ms: u64,
    pub kind: NotificationKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NotificationKind {
    Move(MovementUpdate),
    /// Entities that became visible to the receiver.
    Appearance(Vec<EntityId>),
    /// Entities that are no longer visible to the receiver.
    Disappearance(Vec<EntityId>),
    Hit(HitInfo),
}

/// The changed movement attributes of one entity. Unchanged attributes are `None`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MovementUpdate {
    pub entity: EntityId,
    pub position: Option<Point3>,
    pub orientation: Option<Quat>,
    pub velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
    pub mode: Option<Mode>,
    pub mode_data: Option<ModeData>,
}

impl MovementUpdate {
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_none()
            && self.orientation.is_none()
            && self.velocity.is_none()
            && self.angular_velocity.is_none()
            && self.mode.is_none()
            && self.mode_data.is_none()
    }
}

/// A projectile contact, as reported to either participant.
#[derive(Clone, Debug, PartialEq)]
pub struct HitInfo {
    /// The other participant of the contact.
    pub from: EntityId,
    /// The attacker: the projectile's launcher, or the projectile itself.
    pub id: EntityId,
    pub pos: Point3,
    pub extra: BTreeMap<String, String>,
}

/// Buffer of notifications produced between two drains.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    buffered: Vec<Notification>,
}

impl Outbox {
    pub fn push(&mut self, to: EntityId, stamp_ms: u64, kind: NotificationKind) {
        self.buffered.push(Notification { to, stamp_ms, kind });
    }

    pub fn take(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.buffered)
    }

    pub fn len(&self) -> usize {
        self.buffered.len()
    }
}
