//! Turning intents into velocities, and the per-substep corrections around the solver.
//!
//! Intents (propel, destination, direction) are queued by property updates and applied
//! once at the start of a tick. Propelling bodies then get their target velocity
//! re-imposed before every substep, and stepping bodies are snapped down onto surfaces
//! after it.

mod projectile;
mod propel;
mod stepping;
mod water;

use shared::Vec3;

/// Active continuous propulsion of one record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PropelEntry {
    /// Target velocity re-applied before every substep.
    pub velocity: Vec3,
    /// Whether the vertical component is imposed as well; walkers leave it to gravity.
    pub vertical: bool,
}

/// Environment multipliers applied to entity speeds, e.g. from weather.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedModifiers {
    pub ground: f32,
    pub water: f32,
    pub air: f32,
}

impl Default for SpeedModifiers {
    fn default() -> Self {
        Self {
            ground: 1.0,
            water: 1.0,
            air: 1.0,
        }
    }
}
