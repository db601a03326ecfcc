//! Best-effort answer extraction from the loosely structured run-flow response.
//!
//! The response shape varies across Langflow versions, so extraction is an
//! ordered list of lookup rules applied against the untyped document,
//! short-circuiting on the first non-blank string. Nothing here raises: a
//! document with no recognizable text yields None and the caller falls back
//! to the empty-answer placeholder.

use serde_json::Value;

/// One step of a lookup path.
#[derive(Debug, Clone, Copy)]
enum Seg {
    Key(&'static str),
    Index(usize),
}

use Seg::{Index, Key};

/// Candidate paths inside one output entry, highest priority first:
/// nested message text, flat text, output text, nested data fields, raw content.
const ENTRY_RULES: &[&[Seg]] = &[
    &[Key("results"), Key("message"), Key("text")],
    &[Key("results"), Key("message"), Key("data"), Key("text")],
    &[Key("results"), Key("text")],
    &[Key("text")],
    &[Key("outputs"), Key("message"), Key("message")],
    &[Key("outputs"), Key("message"), Key("text")],
    &[Key("results"), Key("message"), Key("message")],
    &[Key("artifacts"), Key("message")],
    &[Key("messages"), Index(0), Key("message")],
];

fn lookup<'a>(value: &'a Value, path: &[Seg]) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path {
        cur = match seg {
            Key(k) => cur.get(k)?,
            Index(i) => cur.get(*i)?,
        };
    }
    Some(cur)
}

fn non_blank_str(value: &Value) -> Option<&str> {
    let s = value.as_str()?;
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Pick the outputs section to scan: the one whose component name matches the
/// expected output component, else the first.
fn pick_section<'a>(sections: &'a [Value], expected_component: Option<&str>) -> Option<&'a Value> {
    if let Some(name) = expected_component {
        if let Some(section) = sections
            .iter()
            .find(|s| s.get("component_name").and_then(Value::as_str) == Some(name))
        {
            return Some(section);
        }
    }
    sections.first()
}

/// Extract the answer text from a run-flow response document.
///
/// Search order:
/// 1. the top-level `outputs` list — preferred section by component name,
///    then its nested `outputs` entries scanned against the rule table;
/// 2. top-level flat `text` / `message` fields;
/// 3. None (the caller substitutes the empty-answer placeholder).
pub fn extract_answer(doc: &Value, expected_component: Option<&str>) -> Option<String> {
    if let Some(sections) = doc.get("outputs").and_then(Value::as_array) {
        if let Some(section) = pick_section(sections, expected_component) {
            if let Some(entries) = section.get("outputs").and_then(Value::as_array) {
                for entry in entries {
                    for rule in ENTRY_RULES {
                        if let Some(text) = lookup(entry, rule).and_then(non_blank_str) {
                            return Some(text.to_string());
                        }
                    }
                }
            }
        }
    }

    if let Some(text) = doc.get("text").and_then(non_blank_str) {
        return Some(text.to_string());
    }
    match doc.get("message") {
        Some(m) => {
            if let Some(text) = non_blank_str(m) {
                return Some(text.to_string());
            }
            m.get("text").and_then(non_blank_str).map(str::to_string)
        }
        None => None,
    }
}
