//! Best-effort YAML front-matter extraction.
//!
//! A front-matter block is a `---` delimited section at the very start of a
//! document, tolerating a UTF-8 BOM, leading whitespace, and CRLF line
//! endings. Parsing is never authoritative-or-nothing: malformed YAML (or a
//! block that is not a mapping) degrades to an empty metadata map and the
//! pipeline continues with the raw body.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub type FrontMatter = BTreeMap<String, Value>;

/// Split raw document text into (front matter, body).
///
/// If no front-matter block is found, the metadata map is empty and the body
/// is the full input.
pub fn parse_front_matter(text: &str) -> (FrontMatter, String) {
    match split_block(text) {
        Some((raw, body)) => (parse_yaml_map(raw), body.to_string()),
        None => (FrontMatter::new(), text.to_string()),
    }
}

/// Locate the delimited block. Returns (block content, remainder).
fn split_block(text: &str) -> Option<(&str, &str)> {
    let t = text.strip_prefix('\u{feff}').unwrap_or(text);
    let t = t.trim_start();
    let rest = t.strip_prefix("---")?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut line_start = 0;
    while line_start <= rest.len() {
        let (line, next) = match rest[line_start..].find('\n') {
            Some(i) => (&rest[line_start..line_start + i], line_start + i + 1),
            None => (&rest[line_start..], rest.len()),
        };
        let content = line.strip_suffix('\r').unwrap_or(line);
        if content.trim_end() == "---" {
            return Some((&rest[..line_start], &rest[next..]));
        }
        if next >= rest.len() {
            break;
        }
        line_start = next;
    }
    None
}

fn parse_yaml_map(raw: &str) -> FrontMatter {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => FrontMatter::new(),
    }
}

/// Normalize any front-matter field to a list of strings.
///
/// Accepts a native YAML list, a comma-separated string, or a bracketed
/// comma-separated string (`"[a, b]"`). Items are trimmed and empties
/// dropped; absent/null values normalize to an empty list, never null.
pub fn listify(value: Option<&Value>) -> Vec<String> {
    let value = match value {
        Some(Value::Null) | None => return Vec::new(),
        Some(v) => v,
    };

    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|v| scalar_to_string(v).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    let s = scalar_to_string(value);
    let mut s = s.trim();
    if s.starts_with('[') && s.ends_with(']') {
        s = &s[1..s.len() - 1];
    }
    s.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First value among `keys` that is present and non-empty.
pub fn first_present<'a>(fm: &'a FrontMatter, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| fm.get(*k))
        .find(|v| !is_empty_value(v))
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Resolve a document title: first `# ` heading, else a `title:` line, else
/// the filename stem.
pub fn guess_title(body: &str, path: &Path) -> String {
    for line in body.lines() {
        let t = line.trim();
        if let Some(rest) = t.strip_prefix("# ") {
            return rest.trim().to_string();
        }
        if let Some(prefix) = t.get(..6) {
            if prefix.eq_ignore_ascii_case("title:") {
                return t[6..].trim().to_string();
            }
        }
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_front_matter() {
        let (fm, body) = parse_front_matter("# Just a heading\n\nBody.");
        assert!(fm.is_empty());
        assert_eq!(body, "# Just a heading\n\nBody.");
    }

    #[test]
    fn test_basic_front_matter() {
        let text = "---\ncategory: sync-meeting\ntags:\n  - planning\n---\n# Notes\n";
        let (fm, body) = parse_front_matter(text);
        assert_eq!(fm.get("category"), Some(&json!("sync-meeting")));
        assert_eq!(fm.get("tags"), Some(&json!(["planning"])));
        assert_eq!(body, "# Notes\n");
    }

    #[test]
    fn test_bom_and_crlf_tolerated() {
        let text = "\u{feff}  ---\r\ntitle: hello\r\n---\r\nbody\r\n";
        let (fm, body) = parse_front_matter(text);
        assert_eq!(fm.get("title"), Some(&json!("hello")));
        assert_eq!(body, "body\r\n");
    }

    #[test]
    fn test_malformed_yaml_degrades_to_empty() {
        let text = "---\n: [ not yaml ::\n---\nbody";
        let (fm, body) = parse_front_matter(text);
        assert!(fm.is_empty());
        assert_eq!(body, "body");
    }

    #[test]
    fn test_non_mapping_block_degrades_to_empty() {
        let text = "---\n- just\n- a list\n---\nbody";
        let (fm, _) = parse_front_matter(text);
        assert!(fm.is_empty());
    }

    #[test]
    fn test_unterminated_block_is_not_front_matter() {
        let text = "---\nkey: value\nno closing delimiter";
        let (fm, body) = parse_front_matter(text);
        assert!(fm.is_empty());
        assert_eq!(body, text);
    }

    #[test]
    fn test_listify_null_and_absent() {
        assert_eq!(listify(None), Vec::<String>::new());
        assert_eq!(listify(Some(&Value::Null)), Vec::<String>::new());
    }

    #[test]
    fn test_listify_comma_string() {
        assert_eq!(listify(Some(&json!("a, b"))), vec!["a", "b"]);
    }

    #[test]
    fn test_listify_bracketed_string() {
        assert_eq!(listify(Some(&json!("[a, b]"))), vec!["a", "b"]);
    }

    #[test]
    fn test_listify_native_list() {
        assert_eq!(listify(Some(&json!(["a", "b"]))), vec!["a", "b"]);
    }

    #[test]
    fn test_listify_drops_empty_items() {
        assert_eq!(listify(Some(&json!("a, , b,"))), vec!["a", "b"]);
    }

    #[test]
    fn test_guess_title_heading() {
        let title = guess_title("intro\n# The Title\n", Path::new("/x/note.md"));
        assert_eq!(title, "The Title");
    }

    #[test]
    fn test_guess_title_title_line() {
        let title = guess_title("Title: From Line\nrest", Path::new("/x/note.md"));
        assert_eq!(title, "From Line");
    }

    #[test]
    fn test_guess_title_fallback_stem() {
        let title = guess_title("no headings here", Path::new("/x/2025-10-24 - AWS PM.md"));
        assert_eq!(title, "2025-10-24 - AWS PM");
    }
}
