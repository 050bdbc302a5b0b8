//! # Scene model
//!
//! `ScenePlan` is the structured description a planning model returns in
//! structured mode. `layout` turns it into concrete `PlacedObject`s
//! (location, scale, rotation, material) without touching Blender, so the
//! whole placement pass is deterministic and testable.
//!
//! Blender primitives are created with size 2, so an object's scale is also
//! its half extent along each axis.

use crate::config::{CameraDefaults, MaterialPreset, RoomDimensions, SceneDefaults};
use crate::error::{self, Result};
use crate::response::extract_json_object;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    Cube,
    Sphere,
    Cylinder,
    Plane,
}

impl Primitive {
    /// `bpy.ops.mesh` operator creating this primitive
    pub fn operator(&self) -> &'static str {
        match self {
            Primitive::Cube => "primitive_cube_add",
            Primitive::Sphere => "primitive_uv_sphere_add",
            Primitive::Cylinder => "primitive_cylinder_add",
            Primitive::Plane => "primitive_plane_add",
        }
    }
}

/// A known object type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogEntry {
    pub kind: &'static str,
    pub primitive: Primitive,
    pub dimensions: Vec3,
    /// Key into `scene.placement`
    pub category: &'static str,
}

const fn entry(
    kind: &'static str,
    primitive: Primitive,
    dims: (f32, f32, f32),
    category: &'static str,
) -> CatalogEntry {
    CatalogEntry {
        kind,
        primitive,
        dimensions: Vec3::new(dims.0, dims.1, dims.2),
        category,
    }
}

pub static CATALOG: &[CatalogEntry] = &[
    entry("cube", Primitive::Cube, (1.0, 1.0, 1.0), "basic"),
    entry("sphere", Primitive::Sphere, (1.0, 1.0, 1.0), "basic"),
    entry("cylinder", Primitive::Cylinder, (1.0, 1.0, 1.0), "basic"),
    entry("plane", Primitive::Plane, (1.0, 1.0, 1.0), "basic"),
    entry("sofa", Primitive::Cube, (2.0, 0.8, 0.8), "furniture"),
    entry("table", Primitive::Cube, (1.2, 0.8, 0.5), "furniture"),
    entry("coffee_table", Primitive::Cube, (1.0, 0.6, 0.4), "furniture"),
    entry("chair", Primitive::Cube, (0.6, 0.6, 0.5), "furniture"),
    entry("tv", Primitive::Cube, (1.5, 0.1, 0.9), "furniture"),
    entry("bed", Primitive::Cube, (2.0, 1.6, 0.5), "furniture"),
    entry("bookshelf", Primitive::Cube, (1.0, 0.4, 2.0), "furniture"),
    entry("lamp", Primitive::Cylinder, (0.2, 0.2, 1.2), "decoration"),
    entry("vase", Primitive::Cylinder, (0.3, 0.3, 0.4), "decoration"),
    entry("picture", Primitive::Plane, (1.0, 0.1, 0.7), "decoration"),
    entry("rug", Primitive::Plane, (2.0, 3.0, 0.02), "decoration"),
    entry("computer", Primitive::Cube, (0.4, 0.3, 0.05), "electronics"),
    entry("speaker", Primitive::Cube, (0.3, 0.3, 0.4), "electronics"),
    entry("monitor", Primitive::Cube, (0.6, 0.1, 0.4), "electronics"),
];

/// Lowercase, spaces and dashes to underscores
pub fn normalize_kind(kind: &str) -> String {
    kind.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn lookup(kind: &str) -> Result<&'static CatalogEntry> {
    let normalized = normalize_kind(kind);
    CATALOG
        .iter()
        .find(|e| e.kind == normalized)
        .ok_or_else(|| error::unknown_object_type(kind))
}

// ============================================================================
// Plan
// ============================================================================

/// A structured scene description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenePlan {
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub lighting: Option<LightingPlan>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub room: Option<RoomPlan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub attributes: ObjectAttributes,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl SceneObject {
    pub fn new(kind: impl Into<String>, position: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            position: Position::Named(position.into()),
            attributes: ObjectAttributes::default(),
            relationships: Vec::new(),
        }
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }
}

/// Room-relative name (`"left wall"`) or explicit coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Coordinates(Vec3),
    Named(String),
}

impl Default for Position {
    fn default() -> Self {
        Position::Named("center".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectAttributes {
    #[serde(default)]
    pub color: Option<ColorSpec>,
    /// Name of a `scene.materials` preset
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub scale: Option<Vec3>,
    /// Degrees
    #[serde(default)]
    pub rotation: Option<Vec3>,
}

/// A color given as RGB, RGBA or a common name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorSpec {
    Rgb([f32; 3]),
    Rgba([f32; 4]),
    Named(String),
}

impl ColorSpec {
    pub fn to_rgb(&self) -> Option<[f32; 3]> {
        match self {
            ColorSpec::Rgb(rgb) => Some(*rgb),
            ColorSpec::Rgba([r, g, b, _]) => Some([*r, *g, *b]),
            ColorSpec::Named(name) => named_color(name),
        }
    }
}

fn named_color(name: &str) -> Option<[f32; 3]> {
    let rgb = match name.trim().to_lowercase().as_str() {
        "white" => [0.95, 0.95, 0.95],
        "black" => [0.05, 0.05, 0.05],
        "grey" | "gray" => [0.5, 0.5, 0.5],
        "light grey" | "light gray" => [0.8, 0.8, 0.8],
        "dark grey" | "dark gray" => [0.2, 0.2, 0.2],
        "red" => [0.8, 0.1, 0.1],
        "green" => [0.1, 0.6, 0.2],
        "blue" => [0.1, 0.3, 0.8],
        "yellow" => [0.9, 0.8, 0.1],
        "orange" => [0.9, 0.5, 0.1],
        "brown" => [0.45, 0.3, 0.15],
        "beige" => [0.85, 0.78, 0.65],
        _ => return None,
    };
    Some(rgb)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub kind: RelationKind,
    /// Name or type of an earlier object
    pub target: String,
    #[serde(default)]
    pub offset: Option<f32>,
    #[serde(default)]
    pub direction: Option<Direction>,
}

impl Relationship {
    pub fn new(kind: RelationKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            offset: None,
            direction: None,
        }
    }

    pub fn with_offset(mut self, offset: f32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    #[serde(alias = "next to", alias = "beside")]
    NextTo,
    #[serde(alias = "on top", alias = "on_top_of", alias = "on")]
    OnTop,
    #[serde(alias = "in")]
    Inside,
    #[serde(other)]
    Unknown,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::NextTo => "next_to",
            RelationKind::OnTop => "on_top",
            RelationKind::Inside => "inside",
            RelationKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Right,
    Left,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightKind {
    #[default]
    Sun,
    Point,
    Area,
    /// Shadowless sun
    #[serde(alias = "ambient_light")]
    Ambient,
}

impl LightKind {
    pub fn blender_type(&self) -> &'static str {
        match self {
            LightKind::Sun | LightKind::Ambient => "SUN",
            LightKind::Point => "POINT",
            LightKind::Area => "AREA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingPlan {
    #[serde(rename = "type", default)]
    pub kind: LightKind,
    #[serde(default)]
    pub position: Option<Vec3>,
    #[serde(default)]
    pub energy: Option<f32>,
    #[serde(default)]
    pub color: Option<ColorSpec>,
    #[serde(default)]
    pub fill_light: Option<Box<LightingPlan>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: serde_json::Value,
    /// Palette override for `color_scheme` constraints
    #[serde(default)]
    pub colors: Vec<ColorSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPlan {
    pub dimensions: RoomDimensions,
    #[serde(default)]
    pub wall_material: Option<SurfaceSpec>,
}

/// Loose material description as models tend to write it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSpec {
    #[serde(default, alias = "base_color")]
    pub color: Option<ColorSpec>,
    #[serde(default)]
    pub roughness: Option<f32>,
    #[serde(default)]
    pub metallic: Option<f32>,
}

impl SurfaceSpec {
    pub fn resolve(&self, fallback: &MaterialPreset) -> MaterialPreset {
        MaterialPreset {
            color: self.color.as_ref().and_then(ColorSpec::to_rgb).unwrap_or(fallback.color),
            roughness: self.roughness.unwrap_or(fallback.roughness),
            metallic: self.metallic.unwrap_or(fallback.metallic),
        }
    }
}

impl ScenePlan {
    /// Parse the JSON object embedded in a model answer and validate it.
    pub fn from_model_output(text: &str) -> Result<Self> {
        let json = extract_json_object(text)
            .ok_or_else(|| error::response_malformed("no JSON object in scene plan response"))?;
        let plan: ScenePlan = serde_json::from_str(json).map_err(|e| {
            error::response_malformed(format!("invalid scene plan: {}", e))
                .with_operation("scene::from_model_output")
                .set_source(e)
        })?;
        plan.validate()?;
        Ok(plan)
    }

    /// At least one object, every type known, room dimensions positive.
    pub fn validate(&self) -> Result<()> {
        if self.objects.is_empty() {
            return Err(error::Error::invalid_argument("scene plan has no objects"));
        }
        for object in &self.objects {
            lookup(&object.kind)?;
        }
        if let Some(room) = &self.room {
            let d = &room.dimensions;
            if d.width <= 0.0 || d.length <= 0.0 || d.height <= 0.0 {
                return Err(error::Error::invalid_argument("room dimensions must be positive"));
            }
        }
        Ok(())
    }

    pub fn room_dimensions<'a>(&'a self, defaults: &'a SceneDefaults) -> &'a RoomDimensions {
        self.room.as_ref().map_or(&defaults.room, |r| &r.dimensions)
    }

    fn color_scheme(&self) -> Vec<[f32; 3]> {
        self.constraints
            .iter()
            .filter(|c| c.kind.eq_ignore_ascii_case("color_scheme"))
            .flat_map(|c| c.colors.iter().filter_map(ColorSpec::to_rgb))
            .collect()
    }
}

// ============================================================================
// Layout
// ============================================================================

/// Material chosen for an object
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMaterial {
    pub name: String,
    pub preset: MaterialPreset,
}

/// An object with final transform and material
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedObject {
    /// Unique within the scene: `chair`, `chair_2`, ...
    pub name: String,
    pub kind: String,
    pub primitive: Primitive,
    pub category: &'static str,
    pub location: Vec3,
    pub scale: Vec3,
    /// Degrees
    pub rotation: Vec3,
    pub material: ResolvedMaterial,
}

impl PlacedObject {
    pub fn half_height(&self) -> f32 {
        self.scale.z
    }
}

/// Room-relative base position for a named position.
pub fn position_coordinates(name: &str, room: &RoomDimensions, wall_clearance: f32) -> Vec3 {
    let half_x = room.width / 2.0 - wall_clearance;
    let half_y = room.length / 2.0 - wall_clearance;
    match normalize_kind(name).as_str() {
        "left_wall" => Vec3::new(-half_x, 0.0, 0.0),
        "right_wall" => Vec3::new(half_x, 0.0, 0.0),
        "front_wall" => Vec3::new(0.0, half_y, 0.0),
        "back_wall" => Vec3::new(0.0, -half_y, 0.0),
        _ => Vec3::default(),
    }
}

/// Place every object of `plan` in order.
pub fn layout(plan: &ScenePlan, defaults: &SceneDefaults) -> Result<Vec<PlacedObject>> {
    let room = plan.room_dimensions(defaults);
    let scheme = plan.color_scheme();
    let mut placed: Vec<PlacedObject> = Vec::with_capacity(plan.objects.len());

    for (index, object) in plan.objects.iter().enumerate() {
        let entry = lookup(&object.kind)?;
        let rule = defaults.placement_for(entry.category);
        let scale = object.attributes.scale.unwrap_or(entry.dimensions);

        let mut location = match &object.position {
            Position::Coordinates(v) => *v,
            Position::Named(name) => {
                position_coordinates(name, room, rule.map_or(0.0, |r| r.wall_clearance))
            }
        };
        let staggered = location.y == 0.0;
        if staggered {
            location.y = index as f32 * 2.0;
        }
        if location.z == 0.0 {
            location.z = scale.z;
        }

        let mut related = Vec::new();
        for rel in &object.relationships {
            let Some(target) = find_target(&placed, &rel.target) else {
                tracing::debug!(object = %object.kind, target = %rel.target, "relationship target not found");
                continue;
            };
            let t = &placed[target];
            match rel.kind {
                RelationKind::NextTo => {
                    let offset = rel.offset.unwrap_or(1.0);
                    match rel.direction.unwrap_or_default() {
                        Direction::Right => location.x = t.location.x + offset,
                        Direction::Left => location.x = t.location.x - offset,
                        Direction::Front => location.y = t.location.y + offset,
                        Direction::Back => location.y = t.location.y - offset,
                    }
                }
                RelationKind::OnTop => {
                    location.z = t.location.z + t.half_height() + scale.z;
                }
                RelationKind::Inside => location = t.location,
                RelationKind::Unknown => continue,
            }
            related.push(target);
        }

        if let Some(rule) = rule {
            if let Some([low, high]) = rule.height_range {
                location.z = location.z.clamp(low, high);
            }
            if rule.min_spacing > 0.0 {
                let axis = if staggered { Axis::Y } else { Axis::X };
                enforce_spacing(&mut location, scale, entry.category, rule.min_spacing, &placed, &related, axis);
            }
        }

        let name = unique_name(&placed, entry.kind);
        let material = resolve_material(object, entry, index, plan.style.as_deref(), &scheme, defaults);

        tracing::debug!(
            name = %name,
            x = location.x, y = location.y, z = location.z,
            "placed object"
        );

        placed.push(PlacedObject {
            name,
            kind: entry.kind.to_string(),
            primitive: entry.primitive,
            category: entry.category,
            location,
            scale,
            rotation: object.attributes.rotation.unwrap_or_default(),
            material,
        });
    }

    Ok(placed)
}

/// Exact name first, then the first object of that type.
fn find_target(placed: &[PlacedObject], target: &str) -> Option<usize> {
    let normalized = normalize_kind(target);
    placed
        .iter()
        .position(|p| p.name == normalized)
        .or_else(|| placed.iter().position(|p| p.kind == normalized))
}

fn unique_name(placed: &[PlacedObject], kind: &str) -> String {
    let count = placed.iter().filter(|p| p.kind == kind).count();
    if count == 0 {
        kind.to_string()
    } else {
        format!("{}_{}", kind, count + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// Push `location` along +`axis` until its footprint keeps `spacing` from
/// every unrelated object of the same category. Staggered objects move
/// further down their row (+y); explicitly placed ones move sideways (+x).
/// Rotation is not considered.
fn enforce_spacing(
    location: &mut Vec3,
    scale: Vec3,
    category: &str,
    spacing: f32,
    placed: &[PlacedObject],
    related: &[usize],
    axis: Axis,
) {
    for _ in 0..=placed.len() {
        let conflict = placed.iter().enumerate().find(|(i, p)| {
            p.category == category
                && !related.contains(i)
                && (location.x - p.location.x).abs() < scale.x + p.scale.x + spacing
                && (location.y - p.location.y).abs() < scale.y + p.scale.y + spacing
        });
        match conflict {
            Some((_, p)) => match axis {
                Axis::X => location.x = p.location.x + p.scale.x + scale.x + spacing,
                Axis::Y => location.y = p.location.y + p.scale.y + scale.y + spacing,
            },
            None => return,
        }
    }
}

// ============================================================================
// Materials
// ============================================================================

pub const NEUTRAL_COLOR: [f32; 3] = [0.8, 0.8, 0.8];

pub const MODERN_PALETTE: [[f32; 3]; 3] = [[0.9, 0.9, 0.9], [0.2, 0.2, 0.2], [0.5, 0.5, 0.5]];
pub const SCANDINAVIAN_PALETTE: [[f32; 3]; 3] =
    [[0.95, 0.95, 0.95], [0.9, 0.85, 0.8], [0.8, 0.9, 0.95]];
pub const INDUSTRIAL_PALETTE: [[f32; 3]; 3] = [[0.2, 0.2, 0.2], [0.4, 0.4, 0.4], [0.6, 0.6, 0.6]];

/// Per-type colors applied when nothing else is specified
fn type_default_color(kind: &str) -> Option<[f32; 3]> {
    match kind {
        "sofa" => Some([0.5, 0.5, 0.5]),
        "coffee_table" => Some([0.9, 0.9, 0.9]),
        "tv" => Some([0.1, 0.1, 0.1]),
        _ => None,
    }
}

/// Palette entry for `style`, cycling by object index
pub fn style_material(style: &str, index: usize) -> Option<MaterialPreset> {
    let (palette, roughness, metallic) = match style.trim().to_lowercase().as_str() {
        "modern" => (&MODERN_PALETTE, 0.5, 0.0),
        "scandinavian" => (&SCANDINAVIAN_PALETTE, 0.5, 0.0),
        "industrial" => (&INDUSTRIAL_PALETTE, 0.2, 0.8),
        _ => return None,
    };
    Some(MaterialPreset::new(palette[index % palette.len()], roughness, metallic))
}

fn resolve_material(
    object: &SceneObject,
    entry: &CatalogEntry,
    index: usize,
    style: Option<&str>,
    scheme: &[[f32; 3]],
    defaults: &SceneDefaults,
) -> ResolvedMaterial {
    let name = format!("{}_material", entry.kind);

    if let Some(preset) = object
        .attributes
        .material
        .as_deref()
        .and_then(|m| defaults.material(m))
    {
        return ResolvedMaterial { name, preset: preset.clone() };
    }

    let color = object
        .attributes
        .color
        .as_ref()
        .and_then(ColorSpec::to_rgb)
        .or_else(|| type_default_color(entry.kind));
    if let Some(color) = color {
        return ResolvedMaterial { name, preset: MaterialPreset::new(color, 0.5, 0.0) };
    }

    if !scheme.is_empty() {
        let color = scheme[index % scheme.len()];
        return ResolvedMaterial { name, preset: MaterialPreset::new(color, 0.5, 0.0) };
    }

    if let Some(preset) = style.and_then(|s| style_material(s, index)) {
        return ResolvedMaterial { name, preset };
    }

    ResolvedMaterial { name, preset: MaterialPreset::new(NEUTRAL_COLOR, 0.5, 0.0) }
}

/// Frequency tables over a set of plans, descending by count then name
pub fn frequencies<'a, I>(items: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for item in items {
        *counts.entry(item.to_string()).or_default() += 1;
    }
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

// ============================================================================
// Camera
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub location: Vec3,
    pub target: Vec3,
    /// Degrees
    pub fov: f32,
}

impl CameraPose {
    pub const DEFAULT_TARGET: Vec3 = Vec3::new(0.0, 0.0, 1.0);

    /// In front of the room (-y) at the configured distance and height
    pub fn from_defaults(camera: &CameraDefaults) -> Self {
        Self {
            location: Vec3::new(0.0, -camera.distance, camera.height),
            target: Self::DEFAULT_TARGET,
            fov: camera.fov,
        }
    }

    /// XYZ Euler rotation in radians pointing the camera's -Z at the target
    pub fn rotation_euler(&self) -> Vec3 {
        let dx = self.target.x - self.location.x;
        let dy = self.target.y - self.location.y;
        let dz = self.target.z - self.location.z;
        let rx = dx.hypot(dy).atan2(-dz);
        let rz = dy.atan2(dx) - FRAC_PI_2;
        Vec3::new(rx, 0.0, rz)
    }
}
