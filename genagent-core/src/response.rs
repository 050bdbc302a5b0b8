//! Parsing of model output: fenced code, reasoning/script split, embedded
//! JSON and verification reports.
//!
//! Headings are matched in English and in the Chinese forms the Qwen prompts
//! produce (`推理链`, `Blender脚本`, `匹配度分数`, `存在的问题`, `优化建议`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```([\w+.-]*)[ \t]*\r?\n([\s\S]*?)```").expect("invalid code fence regex")
});

/// Opening fence with no closing fence (truncated output)
static OPEN_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```([\w+.-]*)[ \t]*\r?\n([\s\S]*)$").expect("invalid open fence regex")
});

static SCRIPT_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t#*>]*(?:blender[ \t]*script|blender脚本|script)[ \t*]*[:：]")
        .expect("invalid script heading regex")
});

static REASONING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t#*>]*(?:reasoning(?:[ \t]+chain)?|推理链)[ \t*]*[:：]")
        .expect("invalid reasoning label regex")
});

/// Score label, an optional parenthesised note such as "(0-100)" or
/// "（满分100）", a `:`/`：`/`=` or blank separator, then the number.
static SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:match[ \t]*score|score|匹配度分数|匹配度|分数)[ \t*]*(?:[(（][^)）\n]*[)）][ \t*]*)?(?:[:：=][ \t*]*|[ \t]*)(\d+)",
    )
    .expect("invalid score regex")
});

/// Heading lines only: optional markdown or list number, the word, then a
/// colon or end of line. Bullet items never match.
static ISSUES_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t#*>]*(?:\d+[.、)][ \t]*)?(?:issues(?:[ \t]+found)?|problems|missing[ \t]+elements|存在的问题|问题)[ \t*]*(?:[:：]|$)",
    )
    .expect("invalid issues heading regex")
});

static SUGGESTIONS_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^[ \t#*>]*(?:\d+[.、)][ \t]*)?(?:suggestions?|improvements?|优化建议)[ \t*]*(?:[:：]|$)",
    )
    .expect("invalid suggestions heading regex")
});

static BULLET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[-*•·]|\d+[.、)])\s*").expect("invalid bullet regex")
});

/// Outcome of one vision-model verification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    /// Match score 0..=100; `None` when the model gave none
    pub score: Option<u8>,
    pub issues: Vec<String>,
    /// Suggestion text, may contain script fragments
    pub suggestions: String,
    /// Full model answer
    pub analysis: String,
}

impl Verification {
    pub fn passed(&self, pass_score: u8) -> bool {
        self.score.is_some_and(|s| s >= pass_score)
    }
}

/// Contents of the last fenced block tagged `lang`, else the first untagged
/// fence, else the trimmed text.
pub fn extract_code_block(text: &str, lang: &str) -> String {
    let mut tagged = None;
    let mut untagged = None;

    for caps in CODE_FENCE.captures_iter(text) {
        let tag = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        if tag.eq_ignore_ascii_case(lang) {
            tagged = Some(body);
        } else if tag.is_empty() && untagged.is_none() {
            untagged = Some(body);
        }
    }

    if let Some(body) = tagged.or(untagged) {
        return body.trim().to_string();
    }

    if let Some(caps) = OPEN_FENCE.captures(text) {
        let tag = caps.get(1).map_or("", |m| m.as_str());
        if tag.is_empty() || tag.eq_ignore_ascii_case(lang) {
            return caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        }
    }

    text.trim().to_string()
}

/// Split a planner answer into `(reasoning, script)`.
pub fn split_reasoning_and_script(text: &str) -> (String, String) {
    match SCRIPT_HEADING.find(text) {
        Some(heading) => {
            let reasoning = REASONING_LABEL.replace(&text[..heading.start()], "");
            let script = extract_code_block(&text[heading.end()..], "python");
            (reasoning.trim().to_string(), script)
        }
        None => (String::new(), extract_code_block(text, "python")),
    }
}

/// The outermost balanced `{...}` span, preferring a fenced `json` block.
pub fn extract_json_object(text: &str) -> Option<&str> {
    for caps in CODE_FENCE.captures_iter(text) {
        if caps.get(1).is_some_and(|m| m.as_str().eq_ignore_ascii_case("json")) {
            if let Some(body) = caps.get(2) {
                if let Some(span) = balanced_object(body.as_str()) {
                    return Some(span);
                }
            }
        }
    }
    balanced_object(text)
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract score, issues and suggestions from a verifier answer.
pub fn parse_verification(text: &str) -> Verification {
    let mut verification = Verification {
        analysis: text.to_string(),
        ..Default::default()
    };

    if let Some(json) = extract_json_object(text) {
        if apply_json_report(&mut verification, json) {
            return verification;
        }
    }

    verification.score = SCORE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .map(|s| s.min(100) as u8);

    let issues_at = ISSUES_HEADING.find(text);
    let suggestions_from = issues_at.map_or(0, |h| h.end());
    let suggestions_at = SUGGESTIONS_HEADING
        .find_at(text, suggestions_from)
        .or_else(|| issues_at.and_then(|_| SUGGESTIONS_HEADING.find(&text[..suggestions_from])));

    if let Some(heading) = issues_at {
        let end = suggestions_at
            .filter(|s| s.start() >= heading.end())
            .map_or(text.len(), |s| s.start());
        verification.issues = bullet_items(&text[heading.end()..end]);
    }
    if let Some(heading) = suggestions_at {
        let body = &text[heading.end()..];
        let body = match issues_at {
            Some(issues) if issues.start() >= heading.end() => &body[..issues.start() - heading.end()],
            _ => body,
        };
        verification.suggestions = body.trim().to_string();
    }

    verification
}

fn bullet_items(section: &str) -> Vec<String> {
    section
        .lines()
        .map(|line| BULLET.replace(line.trim(), "").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Structured report: `{"match_score": 70, "missing_elements": [...], "suggestions": [...]}`.
/// Returns false when `json` carries no score.
fn apply_json_report(verification: &mut Verification, json: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json) else {
        return false;
    };

    let Some(score) = ["match_score", "score", "overall_score"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_f64()))
    else {
        return false;
    };
    verification.score = Some(score.clamp(0.0, 100.0).round() as u8);

    let strings = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut issues = strings("issues");
    issues.extend(strings("missing_elements"));
    if !issues.is_empty() {
        verification.issues = issues;
    }

    if let Some(text) = value.get("suggestions").and_then(|v| v.as_str()) {
        verification.suggestions = text.to_string();
    } else {
        let items = strings("suggestions");
        if !items.is_empty() {
            verification.suggestions = items
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_last_tagged_block() {
        let text = "first\n```python\nprint(1)\n```\nthen\n```python\nprint(2)\n```\n";
        assert_eq!(extract_code_block(text, "python"), "print(2)");
    }

    #[test]
    fn test_extract_untagged_and_plain() {
        assert_eq!(extract_code_block("```\nimport bpy\n```", "python"), "import bpy");
        assert_eq!(extract_code_block("  import bpy  \n", "python"), "import bpy");
    }

    #[test]
    fn test_extract_truncated_block() {
        let text = "Here:\n```python\nimport bpy\nbpy.ops.mesh.primitive_cube_add()";
        assert_eq!(
            extract_code_block(text, "python"),
            "import bpy\nbpy.ops.mesh.primitive_cube_add()"
        );
    }

    #[test]
    fn test_split_reasoning_and_script_english() {
        let text = "Reasoning:\nTwo chairs facing a table.\n\nScript:\n```python\nimport bpy\n```";
        let (reasoning, script) = split_reasoning_and_script(text);
        assert_eq!(reasoning, "Two chairs facing a table.");
        assert_eq!(script, "import bpy");
    }

    #[test]
    fn test_split_reasoning_and_script_chinese() {
        let text = "推理链:\n一张桌子，两把椅子。\nBlender脚本:\n```python\nimport bpy\n```";
        let (reasoning, script) = split_reasoning_and_script(text);
        assert_eq!(reasoning, "一张桌子，两把椅子。");
        assert_eq!(script, "import bpy");
    }

    #[test]
    fn test_split_without_marker() {
        let (reasoning, script) = split_reasoning_and_script("```python\nimport bpy\n```");
        assert!(reasoning.is_empty());
        assert_eq!(script, "import bpy");
    }

    #[test]
    fn test_extract_json_object() {
        let text = r#"Plan follows {"objects": [{"type": "sofa", "note": "has } brace"}]} done"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"objects": [{"type": "sofa", "note": "has } brace"}]}"#)
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{ unbalanced"), None);
    }

    #[test]
    fn test_extract_json_prefers_fenced_block() {
        let text = "Example {\"a\": 1}\n```json\n{\"b\": 2}\n```";
        assert_eq!(extract_json_object(text), Some("{\"b\": 2}"));
    }

    #[test]
    fn test_parse_verification_english() {
        let text = "1. Match score (0-100): 72\n\
                    2. Issues:\n- The lamp is missing\n- Camera too low\n\
                    3. Suggestions:\nAdd a lamp at (1, 2, 0).";
        let v = parse_verification(text);
        assert_eq!(v.score, Some(72));
        assert_eq!(v.issues, vec!["The lamp is missing", "Camera too low"]);
        assert_eq!(v.suggestions, "Add a lamp at (1, 2, 0).");
        assert!(!v.passed(85));
    }

    #[test]
    fn test_parse_verification_chinese() {
        let text = "1. 匹配度分数：90\n2. 存在的问题：\n无明显问题\n3. 优化建议：\n可以增加一盏台灯";
        let v = parse_verification(text);
        assert_eq!(v.score, Some(90));
        assert_eq!(v.issues, vec!["无明显问题"]);
        assert_eq!(v.suggestions, "可以增加一盏台灯");
        assert!(v.passed(85));
    }

    #[test]
    fn test_parse_verification_clamps_and_missing() {
        assert_eq!(parse_verification("Score: 250").score, Some(100));
        let v = parse_verification("Looks nice overall.");
        assert_eq!(v.score, None);
        assert!(!v.passed(0));
    }

    #[test]
    fn test_parse_verification_json() {
        let text = r#"{"match_score": 64.6, "matching_elements": ["sofa"], "missing_elements": ["tv"], "suggestions": ["add a tv"]}"#;
        let v = parse_verification(text);
        assert_eq!(v.score, Some(65));
        assert_eq!(v.issues, vec!["tv"]);
        assert_eq!(v.suggestions, "- add a tv");
    }

    #[test]
    fn test_score_after_parenthesised_note() {
        let v = parse_verification("Overall match score (out of 100): 62\nIssues:\n- no rug");
        assert_eq!(v.score, Some(62));
        assert!(!v.passed(85));

        let v = parse_verification("1. 匹配度分数（满分100）：62\n2. 存在的问题：\n缺少地毯");
        assert_eq!(v.score, Some(62));

        assert_eq!(parse_verification("匹配度分数 85分").score, Some(85));
        assert_eq!(parse_verification("Score: 72/100").score, Some(72));
    }

    #[test]
    fn test_score_needs_number_next_to_label() {
        let v = parse_verification("The score reflects 3 missing objects.");
        assert_eq!(v.score, None);
    }

    #[test]
    fn test_bullets_are_not_headings() {
        let text = "Match score: 60\nIssues:\n- Improvements to lighting are needed\n- Sofa missing\nSuggestions:\nAdd a sofa";
        let v = parse_verification(text);
        assert_eq!(v.issues, vec!["Improvements to lighting are needed", "Sofa missing"]);
        assert_eq!(v.suggestions, "Add a sofa");
    }

    #[test]
    fn test_suggestions_before_issues() {
        let v = parse_verification("Score: 50\nSuggestions:\nadd a lamp\nIssues:\n- dark room");
        assert_eq!(v.issues, vec!["dark room"]);
        assert_eq!(v.suggestions, "add a lamp");
    }
}
