//! Physics and perception for the contents of one container entity.
//!
//! A [`PhysicalDomain`] admits entities, places them on terrain or on each other,
//! simulates their bodies with rapier in fixed substeps and tracks which entities can
//! see which. Everything that other systems need to hear about is returned from
//! [`PhysicalDomain::tick`] as [`Notification`]s.

mod attachment;
mod closeness;
mod config;
mod domain;
mod dynamics;
mod error;
mod movement;
mod notification;
mod perception;
mod properties;
mod record;
pub mod terrain;
mod tick;
pub mod types;
mod visibility;

#[cfg(test)]
mod testing;

pub use closeness::ClosenessHandle;
pub use config::DomainConfig;
pub use domain::{CollisionEntry, PhysicalDomain};
pub use error::DomainError;
pub use movement::{PropelEntry, SpeedModifiers};
pub use notification::{HitInfo, MovementUpdate, Notification, NotificationKind};
pub use terrain::{HeightMapTerrain, Terrain};
pub use types::*;
