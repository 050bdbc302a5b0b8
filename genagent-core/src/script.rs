//! Blender Python script generation
//!
//! `BlenderScript` appends `bpy` statements to a buffer. Scripts are
//! self-contained: they clear the default scene, build everything, and can
//! be run with `blender --background --python`.

use crate::config::{Config, MaterialPreset, RenderConfig, RenderEngine};
use crate::error::Result;
use crate::scene::{
    layout, CameraPose, ColorSpec, LightKind, LightingPlan, PlacedObject, Primitive,
    ResolvedMaterial, ScenePlan, Vec3,
};
use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

/// Calls to the still renderer inside model-written scripts
static RENDER_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bpy\.ops\.render\.render\([^)]*\)").expect("invalid render call regex")
});

const HEADER: &str = r#"import bpy
import math


def make_material(name, color, roughness=0.5, metallic=0.0):
    mat = bpy.data.materials.new(name=name)
    mat.diffuse_color = (color[0], color[1], color[2], 1.0)
    mat.use_nodes = True
    bsdf = mat.node_tree.nodes.get("Principled BSDF")
    if bsdf is not None:
        bsdf.inputs["Base Color"].default_value = (color[0], color[1], color[2], 1.0)
        bsdf.inputs["Roughness"].default_value = roughness
        bsdf.inputs["Metallic"].default_value = metallic
    return mat


def assign_material(obj, mat):
    obj.data.materials.clear()
    obj.data.materials.append(mat)

"#;

const WORLD_BACKGROUND: [f32; 3] = [0.1, 0.1, 0.1];
const GROUND_SIZE: f32 = 10.0;
const BASE_SUN: Vec3 = Vec3::new(0.0, 0.0, 5.0);
const MAIN_LIGHT_POSITION: Vec3 = Vec3::new(3.0, -3.0, 5.0);
const FILL_LIGHT_POSITION: Vec3 = Vec3::new(-3.0, -3.0, 3.0);

/// Python string literal with escapes
pub fn py_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Python float literal, rounded to 4 decimals
fn num(v: f32) -> String {
    if !v.is_finite() {
        return "0.0".to_string();
    }
    let rounded = (v * 10_000.0).round() / 10_000.0;
    if rounded == 0.0 {
        "0.0".to_string()
    } else if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

fn vec3(v: Vec3) -> String {
    format!("({}, {}, {})", num(v.x), num(v.y), num(v.z))
}

fn rgb(c: [f32; 3]) -> String {
    format!("({}, {}, {})", num(c[0]), num(c[1]), num(c[2]))
}

#[derive(Debug, Clone)]
pub struct BlenderScript {
    buf: String,
}

impl Default for BlenderScript {
    fn default() -> Self {
        Self::new()
    }
}

impl BlenderScript {
    pub fn new() -> Self {
        Self { buf: HEADER.to_string() }
    }

    fn line(&mut self, line: impl AsRef<str>) -> &mut Self {
        self.buf.push_str(line.as_ref());
        self.buf.push('\n');
        self
    }

    pub fn comment(&mut self, text: &str) -> &mut Self {
        self.buf.push('\n');
        for l in text.lines() {
            self.line(format!("# {}", l));
        }
        self
    }

    pub fn clear_scene(&mut self) -> &mut Self {
        self.comment("Clear scene")
            .line("bpy.ops.object.select_all(action='SELECT')")
            .line("bpy.ops.object.delete()")
    }

    pub fn world_background(&mut self, color: [f32; 3]) -> &mut Self {
        self.comment("World background")
            .line("world = bpy.context.scene.world")
            .line("if world is None:")
            .line("    world = bpy.data.worlds.new(\"World\")")
            .line("    bpy.context.scene.world = world")
            .line("world.use_nodes = True")
            .line("bg = world.node_tree.nodes.get(\"Background\")")
            .line("if bg is not None:")
            .line(format!(
                "    bg.inputs[0].default_value = ({}, {}, {}, 1.0)",
                num(color[0]),
                num(color[1]),
                num(color[2])
            ))
    }

    pub fn ground_plane(&mut self, size: f32) -> &mut Self {
        self.comment("Ground")
            .line(format!(
                "bpy.ops.mesh.primitive_plane_add(size={}, location=(0.0, 0.0, 0.0))",
                num(size)
            ))
            .line("ground = bpy.context.active_object")
            .line("ground.name = \"Ground\"")
    }

    /// Floor and back wall
    pub fn room(&mut self, width: f32, length: f32, height: f32, wall: &MaterialPreset) -> &mut Self {
        self.comment("Room")
            .line("bpy.ops.mesh.primitive_plane_add(location=(0.0, 0.0, 0.001))")
            .line("floor = bpy.context.active_object")
            .line("floor.name = \"Floor\"")
            .line(format!("floor.scale = ({}, {}, 1.0)", num(width / 2.0), num(length / 2.0)))
            .line(format!(
                "bpy.ops.mesh.primitive_cube_add(location=(0.0, {}, {}))",
                num(-length / 2.0),
                num(height / 2.0)
            ))
            .line("back_wall = bpy.context.active_object")
            .line("back_wall.name = \"BackWall\"")
            .line(format!("back_wall.scale = ({}, 0.05, {})", num(width / 2.0), num(height / 2.0)))
            .line(format!(
                "assign_material(back_wall, make_material(\"wall_material\", {}, {}, {}))",
                rgb(wall.color),
                num(wall.roughness),
                num(wall.metallic)
            ))
    }

    pub fn light(
        &mut self,
        name: &str,
        kind: LightKind,
        location: Vec3,
        energy: f32,
        color: [f32; 3],
    ) -> &mut Self {
        self.comment(&format!("Light: {}", name))
            .line(format!(
                "bpy.ops.object.light_add(type='{}', location={})",
                kind.blender_type(),
                vec3(location)
            ))
            .line("light = bpy.context.active_object")
            .line(format!("light.name = {}", py_str(name)))
            .line(format!("light.data.energy = {}", num(energy)))
            .line(format!("light.data.color = {}", rgb(color)));
        if kind == LightKind::Ambient {
            self.line("light.data.angle = 0.1")
                .line("light.data.use_shadow = False");
        }
        self
    }

    pub fn object(&mut self, object: &PlacedObject) -> &mut Self {
        let op = object.primitive.operator();
        self.comment(&format!("Object: {}", object.name))
            .line(format!("bpy.ops.mesh.{}(location={})", op, vec3(object.location)))
            .line("obj = bpy.context.active_object")
            .line(format!("obj.name = {}", py_str(&object.name)))
            .line(format!("obj.scale = {}", vec3(object.scale)));
        let r = object.rotation;
        if r != Vec3::default() {
            self.line(format!(
                "obj.rotation_euler = (math.radians({}), math.radians({}), math.radians({}))",
                num(r.x),
                num(r.y),
                num(r.z)
            ));
        }
        self.material(&object.material)
    }

    fn material(&mut self, material: &ResolvedMaterial) -> &mut Self {
        let p = &material.preset;
        self.line(format!(
            "assign_material(obj, make_material({}, {}, {}, {}))",
            py_str(&material.name),
            rgb(p.color),
            num(p.roughness),
            num(p.metallic)
        ))
    }

    pub fn camera(&mut self, pose: &CameraPose) -> &mut Self {
        let rot = pose.rotation_euler();
        self.comment("Camera")
            .line("cam_data = bpy.data.cameras.new(\"Camera\")")
            .line("camera = bpy.data.objects.new(\"Camera\", cam_data)")
            .line("bpy.context.scene.collection.objects.link(camera)")
            .line(format!("camera.location = {}", vec3(pose.location)))
            .line(format!("camera.rotation_euler = {}", vec3(rot)))
            .line(format!("camera.data.angle = math.radians({})", num(pose.fov)))
            .line("bpy.context.scene.camera = camera")
    }

    /// Camera only when the scene has none
    fn fallback_camera(&mut self, pose: &CameraPose) -> &mut Self {
        let rot = pose.rotation_euler();
        self.line("if scene.camera is None:")
            .line("    cameras = [o for o in scene.objects if o.type == 'CAMERA']")
            .line("    if cameras:")
            .line("        scene.camera = cameras[0]")
            .line("    else:")
            .line("        camera = bpy.data.objects.new(\"Camera\", bpy.data.cameras.new(\"Camera\"))")
            .line("        scene.collection.objects.link(camera)")
            .line(format!("        camera.location = {}", vec3(pose.location)))
            .line(format!("        camera.rotation_euler = {}", vec3(rot)))
            .line(format!("        camera.data.angle = math.radians({})", num(pose.fov)))
            .line("        scene.camera = camera")
    }

    pub fn render_settings(&mut self, render: &RenderConfig, output_path: &Path) -> &mut Self {
        let [w, h] = render.resolution;
        self.comment("Render settings")
            .line("scene = bpy.context.scene")
            .line(format!("scene.render.engine = '{}'", render.engine.blender_id()));
        match render.engine {
            RenderEngine::Cycles => {
                self.line(format!("scene.cycles.samples = {}", render.samples));
            }
            RenderEngine::Eevee => {
                self.line(format!("scene.eevee.taa_render_samples = {}", render.samples));
            }
            RenderEngine::Workbench => {}
        }
        self.line(format!("scene.render.resolution_x = {}", w))
            .line(format!("scene.render.resolution_y = {}", h))
            .line("scene.render.resolution_percentage = 100")
            .line(format!(
                "scene.render.image_settings.file_format = '{}'",
                render.output_format.blender_id()
            ))
            .line(format!(
                "scene.render.filepath = {}",
                py_str(&output_path.to_string_lossy())
            ))
    }

    pub fn render_still(&mut self) -> &mut Self {
        self.line("bpy.ops.render.render(write_still=True)")
            .line("print(\"Rendered\", scene.render.filepath)")
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

fn light_color(color: Option<&ColorSpec>, fallback: [f32; 3]) -> [f32; 3] {
    color.and_then(ColorSpec::to_rgb).unwrap_or(fallback)
}

fn planned_lights(script: &mut BlenderScript, lighting: &LightingPlan) {
    script.light(
        "MainLight",
        lighting.kind,
        lighting.position.unwrap_or(MAIN_LIGHT_POSITION),
        lighting.energy.unwrap_or(5.0),
        light_color(lighting.color.as_ref(), [1.0, 0.95, 0.8]),
    );
    if let Some(fill) = &lighting.fill_light {
        script.light(
            "FillLight",
            fill.kind,
            fill.position.unwrap_or(FILL_LIGHT_POSITION),
            fill.energy.unwrap_or(2.0),
            light_color(fill.color.as_ref(), [0.8, 0.8, 1.0]),
        );
    }
}

/// Compile a validated plan into a complete script rendering to `output_path`.
pub fn compile_plan(plan: &ScenePlan, config: &Config, output_path: &Path) -> Result<String> {
    plan.validate()?;
    let defaults = &config.scene;
    let placed = layout(plan, defaults)?;
    let room = plan.room_dimensions(defaults);
    let default_wall = MaterialPreset::new([1.0, 1.0, 1.0], 0.8, 0.0);
    let wall = plan
        .room
        .as_ref()
        .and_then(|r| r.wall_material.as_ref())
        .map_or_else(|| default_wall.clone(), |spec| spec.resolve(&default_wall));

    let mut script = BlenderScript::new();
    script
        .clear_scene()
        .world_background(WORLD_BACKGROUND)
        .ground_plane(GROUND_SIZE)
        .room(room.width, room.length, room.height, &wall)
        .light(
            "Sun",
            defaults.lighting.kind,
            BASE_SUN,
            defaults.lighting.intensity,
            defaults.lighting.color,
        );
    if let Some(lighting) = &plan.lighting {
        planned_lights(&mut script, lighting);
    }
    for object in &placed {
        script.object(object);
    }
    script
        .camera(&CameraPose::from_defaults(&defaults.camera))
        .render_settings(&config.render, output_path)
        .render_still();

    tracing::debug!(objects = placed.len(), "compiled scene plan");
    Ok(script.finish())
}

/// Minimal living room (sofa, coffee table, tv) used when no model output
/// is available.
pub fn fallback_template(task: &str, config: &Config, output_path: &Path) -> String {
    let grey = |name: &str, c: f32| ResolvedMaterial {
        name: name.to_string(),
        preset: MaterialPreset::new([c, c, c], 0.5, 0.0),
    };
    let objects = [
        PlacedObject {
            name: "Sofa".into(),
            kind: "sofa".into(),
            primitive: Primitive::Cube,
            category: "furniture",
            location: Vec3::new(0.0, -1.0, 1.0),
            scale: Vec3::new(2.0, 1.0, 1.0),
            rotation: Vec3::default(),
            material: grey("SofaMat", 0.5),
        },
        PlacedObject {
            name: "CoffeeTable".into(),
            kind: "coffee_table".into(),
            primitive: Primitive::Cube,
            category: "furniture",
            location: Vec3::new(0.0, 1.0, 0.25),
            scale: Vec3::new(0.5, 0.25, 0.25),
            rotation: Vec3::default(),
            material: grey("TableMat", 0.9),
        },
        PlacedObject {
            name: "TV".into(),
            kind: "tv".into(),
            primitive: Primitive::Cube,
            category: "furniture",
            location: Vec3::new(0.0, 3.0, 0.6),
            scale: Vec3::new(0.75, 0.05, 0.3),
            rotation: Vec3::default(),
            material: grey("TVMat", 0.1),
        },
    ];

    let room = &config.scene.room;
    let mut script = BlenderScript::new();
    script
        .comment(&format!("Fallback scene for: {}", task))
        .clear_scene()
        .ground_plane(GROUND_SIZE)
        .room(room.width, room.length, room.height, &MaterialPreset::new([1.0, 1.0, 1.0], 0.8, 0.0))
        .light("Sun", LightKind::Sun, BASE_SUN, 10.0, [1.0, 1.0, 1.0]);
    for object in &objects {
        script.object(object);
    }
    script
        .camera(&CameraPose::from_defaults(&config.scene.camera))
        .render_settings(&config.render, output_path)
        .render_still();
    script.finish()
}

/// Neutralize the script's own still renders and append ours, adding a
/// camera if the script never set one.
pub fn with_render_epilogue(script: &str, config: &Config, output_path: &Path) -> String {
    let body = RENDER_CALL.replace_all(script, "None");
    let mut epilogue = BlenderScript { buf: String::new() };
    epilogue
        .comment("Render output")
        .line("import bpy")
        .line("import math")
        .line("scene = bpy.context.scene")
        .fallback_camera(&CameraPose::from_defaults(&config.scene.camera))
        .render_settings(&config.render, output_path)
        .render_still();

    let mut out = body.trim_end().to_string();
    out.push('\n');
    out.push_str(&epilogue.finish());
    out
}
