/// Horizontal outline of a terrain modifier or paint area, in the entity's local
/// X/Z frame (before scale and rotation).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FootprintShape {
    Rect { half_x: f32, half_z: f32 },
    Circle { radius: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerrainModKind {
    /// Flattens the footprint to the modifier height.
    Level,
    /// Raises (or lowers, when negative) the footprint by the modifier height.
    Adjust,
    /// Bowl-shaped depression, `height` deep at the centre.
    Crater,
}

/// Terrain modifier carried by a planted entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainModDef {
    pub kind: TerrainModKind,
    pub shape: FootprintShape,
    /// Meaning depends on `kind`; relative to the unmodified ground under the entity.
    pub height: f32,
}

/// Surface paint area carried by a planted entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AreaDef {
    pub layer: u32,
    pub shape: FootprintShape,
    /// Whether the outline follows the entity scale.
    pub scaled: bool,
}
