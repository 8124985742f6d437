/// Fixed physics substep rate (steps per simulated second).
pub const SUBSTEP_HZ: f32 = 60.0;

/// Standard gravity along -Y (m/s^2).
pub const GRAVITY_MPS2: f32 = -9.81;

/// `1 / tan(1°)`: the multiplier from bounding radius to visibility distance.
///
/// An object stays visible while it subtends at least one degree.
pub const VISIBILITY_RATIO: f32 = 57.289_96;

/// Scale applied to every position and radius inserted in the visibility world.
///
/// Perception radii reach thousands of meters. Shrinking the whole visibility world
/// keeps those spheres in the size range the broad phase is tuned for.
pub const VISIBILITY_SCALING_FACTOR: f32 = 1.0 / VISIBILITY_RATIO;

/// Visibility distances are snapped up to one of these (meters).
///
/// Keeping the set of radii small means moving objects rarely need their visibility
/// sphere resized.
pub const VISIBILITY_DISTANCE_THRESHOLDS: [f32; 10] =
    [10.0, 20.0, 30.0, 50.0, 75.0, 100.0, 300.0, 500.0, 1000.0, 2000.0];

/// Radius of an observer's view sphere (meters, before scaling).
pub const VIEW_SPHERE_RADIUS: f32 = 0.5;

/// Bounding radius assumed for entities without a bbox (meters).
pub const DEFAULT_VISIBILITY_RADIUS: f32 = 0.25;

/// Maximum number of queued records whose visibility is recomputed per tick.
pub const VISIBILITY_CHECK_MAX_ENTRIES: usize = 20;

/// Motion threshold for CCD, as a fraction of the smallest bbox side.
///
/// Dynamic bodies whose threshold falls below [`CCD_MAX_MOTION_THRESHOLD`] are thin
/// enough to tunnel through other bodies in a single substep and get CCD enabled.
pub const CCD_MOTION_FACTOR: f32 = 0.2;

/// See [`CCD_MOTION_FACTOR`] (meters).
pub const CCD_MAX_MOTION_THRESHOLD: f32 = 0.2;

/// Fraction of the smallest bbox side used as the soft-CCD prediction distance.
pub const CCD_SPHERE_FACTOR: f32 = 0.2;

/// Default number of terrain cells per segment side.
pub const TERRAIN_RESOLUTION: i32 = 64;

/// Reach rays are extended past the target centre by this factor.
pub const REACH_RAY_EXTENSION: f32 = 1.1;

/// Linear damping applied to submerged bodies.
pub const WATER_LINEAR_DAMPING: f32 = 0.8;

/// Smallest bbox side used when fitting collision shapes (meters).
pub const MIN_SHAPE_EXTENT: f32 = 0.01;

/// Orientation changes smaller than this angle (radians) are ignored by transforms.
pub const ORIENTATION_EPSILON: f32 = 0.001;
