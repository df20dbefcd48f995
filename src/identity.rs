//! Stable logical identity for documents and points.
//!
//! Every id is a deterministic UUIDv5 in a single application namespace, so
//! the same document processed from different machines (or re-processed
//! after edits) resolves to the same `doc_id`, and the chunk at a given
//! index always maps to the same point id.
//!
//! This module performs no I/O: callers pass already-resolved paths.

use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

use crate::frontmatter::FrontMatter;

/// Fixed namespace seed for all UUIDv5 derivation in this application.
const APP_NAMESPACE: &str = "parallax-labs/vault-index";

fn namespace() -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, APP_NAMESPACE.as_bytes())
}

/// Stable UUIDv5 from concatenated parts.
pub fn stable_uuid(parts: &[&str]) -> Uuid {
    Uuid::new_v5(&namespace(), parts.join("|").as_bytes())
}

/// Resolve the identity key for a document, first match wins:
///
/// 1. `"fm:{key}:{value}"` — a configured front-matter key with a non-empty
///    value (survives file moves and renames).
/// 2. `"rel:{path}"` — path relative to the vault root (survives vault
///    relocation across machines).
/// 3. The resolved absolute path (least stable, always available).
pub fn resolve_doc_key(
    abs_path: &Path,
    fm: &FrontMatter,
    doc_id_key: Option<&str>,
    vault_root: Option<&Path>,
) -> String {
    if let Some(key) = doc_id_key {
        if let Some(value) = fm.get(key) {
            let value = scalar_string(value);
            let value = value.trim();
            if !value.is_empty() {
                return format!("fm:{}:{}", key, value);
            }
        }
    }

    if let Some(root) = vault_root {
        if let Ok(rel) = abs_path.strip_prefix(root) {
            return format!("rel:{}", rel.to_string_lossy());
        }
    }

    abs_path.to_string_lossy().to_string()
}

/// The logical document id: UUIDv5 of the identity key.
pub fn doc_id_from_key(doc_key: &str) -> String {
    stable_uuid(&[doc_key]).to_string()
}

/// Position-stable point id for the chunk at `index` of `doc_id`.
pub fn point_id(doc_id: &str, index: usize) -> String {
    stable_uuid(&[doc_id, &index.to_string()]).to_string()
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fm_with(key: &str, value: Value) -> FrontMatter {
        let mut fm = FrontMatter::new();
        fm.insert(key.to_string(), value);
        fm
    }

    #[test]
    fn test_stable_uuid_deterministic() {
        assert_eq!(stable_uuid(&["a", "b"]), stable_uuid(&["a", "b"]));
        assert_ne!(stable_uuid(&["a", "b"]), stable_uuid(&["a", "c"]));
    }

    #[test]
    fn test_front_matter_key_wins() {
        let fm = fm_with("uid", json!("note-42"));
        let key = resolve_doc_key(
            Path::new("/vault/meetings/a.md"),
            &fm,
            Some("uid"),
            Some(Path::new("/vault")),
        );
        assert_eq!(key, "fm:uid:note-42");
    }

    #[test]
    fn test_front_matter_value_trimmed() {
        let fm = fm_with("uid", json!("  note-42  "));
        let key = resolve_doc_key(Path::new("/vault/a.md"), &fm, Some("uid"), None);
        assert_eq!(key, "fm:uid:note-42");
    }

    #[test]
    fn test_empty_front_matter_value_falls_through() {
        let fm = fm_with("uid", json!("   "));
        let key = resolve_doc_key(
            Path::new("/vault/meetings/a.md"),
            &fm,
            Some("uid"),
            Some(Path::new("/vault")),
        );
        assert_eq!(key, "rel:meetings/a.md");
    }

    #[test]
    fn test_relative_path_under_root() {
        let key = resolve_doc_key(
            Path::new("/vault/meetings/2025-10-24.md"),
            &FrontMatter::new(),
            None,
            Some(Path::new("/vault")),
        );
        assert_eq!(key, "rel:meetings/2025-10-24.md");
    }

    #[test]
    fn test_outside_root_falls_back_to_absolute() {
        let key = resolve_doc_key(
            Path::new("/elsewhere/a.md"),
            &FrontMatter::new(),
            None,
            Some(Path::new("/vault")),
        );
        assert_eq!(key, "/elsewhere/a.md");
    }

    #[test]
    fn test_doc_id_stable_across_strategies_inputs() {
        let id1 = doc_id_from_key("rel:meetings/a.md");
        let id2 = doc_id_from_key("rel:meetings/a.md");
        let id3 = doc_id_from_key("rel:meetings/b.md");
        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_point_ids_differ_by_index() {
        let doc = doc_id_from_key("rel:a.md");
        assert_ne!(point_id(&doc, 0), point_id(&doc, 1));
        assert_eq!(point_id(&doc, 0), point_id(&doc, 0));
    }
}
