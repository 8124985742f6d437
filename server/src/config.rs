use shared::Vec3;
use shared::constants::{GRAVITY_MPS2, SUBSTEP_HZ, VISIBILITY_CHECK_MAX_ENTRIES};

/// Tunables for one domain instance.
///
/// Defaults match what the world server runs with; tests override single fields
/// with struct update syntax.
#[derive(Clone, Debug, PartialEq)]
pub struct DomainConfig {
    /// World gravity (m/s^2).
    pub gravity: Vec3,
    /// Fixed physics substeps per simulated second.
    pub substep_hz: f32,
    /// Queued records whose visibility is recomputed per tick.
    pub visibility_check_max_entries: usize,
    /// Friction restored when an entity stops propelling and has no `friction` of its own.
    pub default_friction: f32,
    /// Friction applied while an entity is propelling itself.
    pub propel_friction: f32,
    /// Stepping bodies only snap down onto surfaces further away than this (m).
    pub step_snap_min_distance: f32,
    /// Vertical velocity multiplier applied when a stepping body snaps down.
    pub jump_velocity_damping: f32,
    /// Position drift from the last sent projection that triggers a move update (m).
    pub projected_position_tolerance: f32,
    /// Per-axis velocity change that triggers a move update (m/s).
    pub velocity_change_threshold: f32,
    /// Orientation change that triggers a move update.
    pub orientation_change_threshold: f32,
    /// Entities closer than this to their destination stop (m).
    pub destination_epsilon: f32,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, GRAVITY_MPS2, 0.0),
            substep_hz: SUBSTEP_HZ,
            visibility_check_max_entries: VISIBILITY_CHECK_MAX_ENTRIES,
            default_friction: 1.0,
            propel_friction: 0.5,
            step_snap_min_distance: 0.2,
            jump_velocity_damping: 0.1,
            projected_position_tolerance: 0.5,
            velocity_change_threshold: 0.01,
            orientation_change_threshold: 0.1,
            destination_epsilon: 0.1,
        }
    }
}

impl DomainConfig {
    /// Length of one physics substep in seconds.
    pub fn substep(&self) -> f32 {
        1.0 / self.substep_hz
    }
}
