//! Document classification: type, category, people, and tags.
//!
//! Resolution priority for every field: explicit caller override, then
//! front-matter fields (with synonyms), then keyword inference, then path
//! heuristics. The keyword tables are deliberately frozen — downstream
//! consumers filter on the current classification distribution.

use std::path::Path;

use crate::frontmatter::{first_present, listify, FrontMatter};

/// Resolved classification for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocMeta {
    pub doc_type: String,
    pub category: String,
    pub people: Vec<String>,
    pub tags: Vec<String>,
}

/// Caller-supplied overrides (CLI flags take precedence over everything).
#[derive(Debug, Clone, Default)]
pub struct MetaOverrides {
    pub doc_type: Option<String>,
    pub category: Option<String>,
}

pub fn resolve_meta(path: &Path, fm: &FrontMatter, overrides: &MetaOverrides) -> DocMeta {
    // People and tags come strictly from front matter (with synonyms).
    let people = listify(first_present(fm, &["attendees", "people", "participants"]));
    let tags = listify(first_present(fm, &["tags", "tag"]));

    let category = overrides
        .category
        .clone()
        .filter(|c| !c.is_empty())
        .or_else(|| fm_string(fm, "category"))
        .or_else(|| fm_string(fm, "project"))
        .unwrap_or_else(|| parent_dir_name(path));

    let doc_type = overrides
        .doc_type
        .clone()
        .filter(|t| !t.is_empty())
        .or_else(|| fm_string(fm, "type"))
        .or_else(|| infer_type_from_front_matter(fm, &tags))
        .unwrap_or_else(|| infer_type_from_path(path));

    DocMeta {
        doc_type,
        category,
        people,
        tags,
    }
}

fn fm_string(fm: &FrontMatter, key: &str) -> Option<String> {
    let value = first_present(fm, &[key])?;
    let s = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let s = s.trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Infer document type from the front-matter category and tags.
///
/// The category check treats anything outside the email/slack/calendar/note
/// family as a meeting (sync-meeting, standup, retro, ...).
fn infer_type_from_front_matter(fm: &FrontMatter, tags: &[String]) -> Option<String> {
    if let Some(category) = fm_string(fm, "category").or_else(|| fm_string(fm, "project")) {
        let cat = category.to_lowercase();
        let cat = cat.trim();
        if cat == "one-on-one" || cat == "one-on-ones" {
            return Some("one-on-one".to_string());
        }
        if !matches!(
            cat,
            "email" | "emails" | "slack" | "calendar" | "cal" | "note" | "notes"
        ) {
            return Some("meeting".to_string());
        }
    }

    let tags_lower: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
    let has = |candidates: &[&str]| tags_lower.iter().any(|t| candidates.contains(&t.as_str()));

    if has(&["one-on-one", "1-1", "one-on-ones"]) {
        return Some("one-on-one".to_string());
    }
    if has(&["meeting", "meetings"]) {
        return Some("meeting".to_string());
    }
    if has(&["email", "emails"]) {
        return Some("email".to_string());
    }
    if has(&["slack"]) {
        return Some("slack".to_string());
    }
    if has(&["calendar", "cal"]) {
        return Some("calendar".to_string());
    }

    None
}

/// Last resort: classify by folder-name substrings.
fn infer_type_from_path(path: &Path) -> String {
    let s = path.to_string_lossy().to_lowercase();
    if s.contains("/one-on-one") || s.contains("/1-1") || s.contains("/one_on_one") {
        return "one-on-one".to_string();
    }
    if s.contains("/meetings") || s.contains("/meeting") {
        return "meeting".to_string();
    }
    if s.contains("/email") {
        return "email".to_string();
    }
    if s.contains("/slack") {
        return "slack".to_string();
    }
    if s.contains("/calendar") || s.contains("/cal") {
        return "calendar".to_string();
    }
    "note".to_string()
}

fn parent_dir_name(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
