use shared::{BBox, Point3, Quat, ShapeDef, Vec3};

use super::{AreaDef, EntityId, Mode, ModeData, TerrainModDef};

/// The externally visible attributes of a contained entity.
///
/// The domain keeps one of these per record as the system of record: the rapier body
/// is derived from it and writes its simulated pose back into it.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityState {
    pub id: EntityId,
    /// `None` is an invalid position; such entities are not admitted.
    pub position: Option<Point3>,
    pub orientation: Option<Quat>,
    pub velocity: Option<Vec3>,
    pub angular_velocity: Option<Vec3>,
    /// Unscaled local bounding box.
    pub bbox: Option<BBox>,
    pub scale: Vec3,
    pub mass: f32,
    pub mode: Mode,
    pub mode_data: ModeData,
    pub solid: bool,
    pub geometry: Option<ShapeDef>,
    pub water_body: bool,
    pub friction: Option<f32>,
    pub friction_roll: Option<f32>,
    pub friction_spin: Option<f32>,
    pub speed_ground: f32,
    pub speed_water: f32,
    pub speed_flight: f32,
    pub speed_jump: f32,
    /// Fraction of the body height the entity can step up or down without jumping.
    pub step_factor: f32,
    /// Per-axis rotation freedom; an axis with factor 0 is locked.
    pub angular_factor: Vec3,
    /// Explicit visibility distance, overriding the one derived from the bbox.
    pub vis_dist: Option<f32>,
    pub perceptive: bool,
    pub admin: bool,
    pub visibility_private: bool,
    pub visibility_protected: bool,
    pub terrain_mod: Option<TerrainModDef>,
    pub area: Option<AreaDef>,
    /// Added to the settled height of a planted entity (m).
    pub planted_offset: f32,
    /// Added to the settled height of a planted entity, in multiples of its height.
    pub planted_scaled_offset: f32,
    pub propel: Vec3,
    pub destination: Option<Point3>,
    pub direction: Option<Quat>,
}

/// Input to `PhysicalDomain::add_entity`; same shape as the live state.
pub type EntityDescriptor = EntityState;

impl EntityState {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            position: None,
            orientation: None,
            velocity: None,
            angular_velocity: None,
            bbox: None,
            scale: Vec3::repeat(1.0),
            mass: 0.0,
            mode: Mode::Free,
            mode_data: ModeData::None,
            solid: true,
            geometry: None,
            water_body: false,
            friction: None,
            friction_roll: None,
            friction_spin: None,
            speed_ground: 0.0,
            speed_water: 0.0,
            speed_flight: 0.0,
            speed_jump: 0.0,
            step_factor: 0.0,
            angular_factor: Vec3::repeat(1.0),
            vis_dist: None,
            perceptive: false,
            admin: false,
            visibility_private: false,
            visibility_protected: false,
            terrain_mod: None,
            area: None,
            planted_offset: 0.0,
            planted_scaled_offset: 0.0,
            propel: Vec3::zeros(),
            destination: None,
            direction: None,
        }
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Some(Point3::new(x, y, z));
        self
    }

    pub fn with_bbox(mut self, low: [f32; 3], high: [f32; 3]) -> Self {
        self.bbox = Some(BBox::from_corners(low, high));
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// The bbox with the entity scale applied.
    pub fn scaled_bbox(&self) -> Option<BBox> {
        self.bbox.map(|b| b.scaled(&self.scale))
    }

    pub fn orientation_or_identity(&self) -> Quat {
        self.orientation.unwrap_or_else(Quat::identity)
    }

    /// Clears the attributes owned by the physics simulation.
    pub(crate) fn reset_physical(&mut self) {
        self.position = None;
        self.orientation = None;
        self.velocity = None;
        self.angular_velocity = None;
    }
}

/// A single attribute change on a contained entity.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyUpdate {
    Mode(Mode),
    ModeData(ModeData),
    Bbox(Option<BBox>),
    Scale(Vec3),
    Geometry(Option<ShapeDef>),
    Mass(f32),
    Solid(bool),
    Friction(Option<f32>),
    FrictionRoll(Option<f32>),
    FrictionSpin(Option<f32>),
    SpeedGround(f32),
    SpeedWater(f32),
    SpeedFlight(f32),
    SpeedJump(f32),
    StepFactor(f32),
    AngularFactor(Vec3),
    Propel(Vec3),
    Destination(Option<Point3>),
    Direction(Option<Quat>),
    TerrainMod(Option<TerrainModDef>),
    Area(Option<AreaDef>),
    VisDist(Option<f32>),
    PlantedOffset(f32),
    PlantedScaledOffset(f32),
}

/// The entity owning the domain.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerDescriptor {
    pub id: EntityId,
    /// Scaled bounding volume; its faces become the world borders.
    pub bbox: BBox,
    pub perceptive: bool,
    pub friction: Option<f32>,
    pub friction_roll: Option<f32>,
    pub friction_spin: Option<f32>,
    /// Multiplier applied to every tick duration.
    pub simulation_speed: f32,
}

impl ContainerDescriptor {
    pub fn new(id: EntityId, bbox: BBox) -> Self {
        Self {
            id,
            bbox,
            perceptive: false,
            friction: None,
            friction_roll: None,
            friction_spin: None,
            simulation_speed: 1.0,
        }
    }
}

/// An attribute change on the container entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContainerUpdate {
    Friction(f32),
    FrictionRoll(f32),
    FrictionSpin(f32),
    SimulationSpeed(f32),
    Perceptive(bool),
}

/// A requested change of pose for one entity.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransformData {
    pub orientation: Option<Quat>,
    pub position: Option<Point3>,
    /// Velocity change applied to dynamic bodies.
    pub impulse_velocity: Option<Vec3>,
    /// Support to plant on. `None` lets placement search for one.
    pub planted_on: Option<EntityId>,
}
