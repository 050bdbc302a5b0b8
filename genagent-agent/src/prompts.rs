//! Prompt construction for the planning, repair and vision models.
//!
//! Every prompt asks for a fixed answer layout so the parsers in
//! `genagent_core::response` can pull the pieces back out.

use genagent_core::scene::CATALOG;

pub const PLANNER_SYSTEM: &str = "You are an expert in 3D scene reasoning and Blender Python scripting.";

pub const VERIFIER_SYSTEM: &str = "You are an expert in 3D scene review. You compare renders against \
                                   scene descriptions and suggest concrete script changes.";

fn push_reflection(out: &mut String, reflection: Option<&str>) {
    if let Some(reflection) = reflection.map(str::trim).filter(|r| !r.is_empty()) {
        out.push_str("\nTake the lessons from earlier attempts into account:\n");
        out.push_str(reflection);
        out.push('\n');
    }
}

/// Reasoning chain followed by a complete script
pub fn script_plan(task: &str, reflection: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("Solve the task in two steps:\n");
    out.push_str(
        "1. Reason about the request in detail: object count and types, relationships, \
         spatial layout, physical constraints.\n",
    );
    out.push_str("2. From that reasoning, write a Python script that runs as-is in Blender.\n\n");
    out.push_str("Answer in exactly this layout:\n");
    out.push_str("Reasoning:\n...\nBlender script:\n```python\n# complete code\n```\n\n");
    out.push_str(&format!("Request: {}\n", task));
    push_reflection(&mut out, reflection);
    out
}

/// JSON scene plan restricted to the object catalog
pub fn structured_plan(task: &str, reflection: Option<&str>) -> String {
    let kinds: Vec<&str> = CATALOG.iter().map(|e| e.kind).collect();

    let mut out = String::new();
    out.push_str("Describe the scene as a single JSON object with this shape:\n");
    out.push_str(
        r#"{
  "objects": [
    {
      "type": "sofa",
      "position": "center" | {"x": 0.0, "y": 0.0, "z": 0.0},
      "attributes": {
        "color": "gray" | [0.5, 0.5, 0.5],
        "material": "fabric",
        "scale": {"x": 1.0, "y": 1.0, "z": 1.0},
        "rotation": {"x": 0.0, "y": 0.0, "z": 0.0}
      },
      "relationships": [{"type": "next_to", "target": "coffee_table", "offset": 1.0, "direction": "right"}]
    }
  ],
  "lighting": {"type": "sun", "position": {"x": 3.0, "y": -3.0, "z": 5.0}, "energy": 5.0, "color": [1.0, 0.95, 0.8]},
  "style": "modern",
  "constraints": [{"type": "color_scheme", "value": "neutral", "colors": ["white", "gray"]}],
  "room": {"dimensions": {"width": 8.0, "length": 8.0, "height": 3.0}, "wall_material": {"color": [0.9, 0.9, 0.9]}}
}
"#,
    );
    out.push_str(&format!("\nAllowed object types: {}\n", kinds.join(", ")));
    out.push_str("Named positions: center, left wall, right wall, front wall, back wall.\n");
    out.push_str("Relationship types: next_to, on_top, inside.\n\n");
    out.push_str(&format!("Request: {}\n", task));
    push_reflection(&mut out, reflection);
    out.push_str("\nOutput ONLY the JSON object.\n");
    out
}

pub fn fix_script(script: &str, error: &str) -> String {
    format!(
        "The Blender Python script below fails with the error that follows. \
         Fix it so it runs in Blender without errors.\n\n\
         Script:\n```python\n{}\n```\n\n\
         Error:\n{}\n\n\
         Output the complete corrected script:\n```python\n# complete code\n```\n",
        script, error
    )
}

pub fn optimize(task: &str, last_script: &str, analysis: &str, reflection: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("Write an improved, complete Blender Python script from the following:\n");
    out.push_str(&format!("1. Request: {}\n", task));
    out.push_str(&format!("2. Previous script:\n```python\n{}\n```\n", last_script));
    out.push_str(&format!("3. Review of the previous render:\n{}\n", analysis));
    push_reflection(&mut out, reflection);
    out.push_str("\nThe script must run on its own. Output it as:\n```python\n# complete code\n```\n");
    out
}

pub fn verify(task: &str) -> String {
    format!(
        "Check whether the image matches this description and suggest improvements \
         (occlusion, layout, lighting, camera).\n\
         Description: {}\n\n\
         Answer with:\n\
         1. Match score (0-100)\n\
         2. Issues:\n- one per line\n\
         3. Suggestions: changes to the Python script, fragments allowed\n",
        task
    )
}
