use std::collections::BTreeMap;
use std::fmt;

use super::EntityId;

/// Kinematic classification of an entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Simulated normally: gravity, collisions, propulsion.
    #[default]
    Free,
    /// Never moves; collides with physical bodies only.
    Fixed,
    /// Resting on terrain or on another entity; zero mass.
    Planted,
    /// Inside a water body: no gravity, heavy damping.
    Submerged,
    /// In flight; contacts produce hit notifications.
    Projectile,
}

impl Mode {
    /// Fixed and planted entities get a fixed (zero-mass) body.
    pub fn is_static(self) -> bool {
        matches!(self, Mode::Fixed | Mode::Planted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Free => "free",
            Mode::Fixed => "fixed",
            Mode::Planted => "planted",
            Mode::Submerged => "submerged",
            Mode::Projectile => "projectile",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which entity a planted entity rests on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlantedOn {
    pub entity: EntityId,
}

/// Extra data carried by a projectile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectileData {
    /// The entity that launched the projectile, reported as the attacker on hits.
    pub launcher: Option<EntityId>,
    /// Opaque payload copied into every hit.
    pub extra: BTreeMap<String, String>,
}

/// Mode-specific data attached to an entity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ModeData {
    #[default]
    None,
    Planted(PlantedOn),
    Projectile(ProjectileData),
}

impl ModeData {
    pub fn planted_on(&self) -> Option<EntityId> {
        match self {
            ModeData::Planted(p) => Some(p.entity),
            _ => None,
        }
    }

    pub fn projectile(&self) -> Option<&ProjectileData> {
        match self {
            ModeData::Projectile(p) => Some(p),
            _ => None,
        }
    }
}
