mod entity;
mod mode;
mod terrain_defs;

pub use entity::{
    ContainerDescriptor, ContainerUpdate, EntityDescriptor, EntityState, PropertyUpdate,
    TransformData,
};
pub use mode::{Mode, ModeData, PlantedOn, ProjectileData};
pub use terrain_defs::{AreaDef, FootprintShape, TerrainModDef, TerrainModKind};

use std::fmt;

/// Identifier of an entity, as assigned by the world server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
