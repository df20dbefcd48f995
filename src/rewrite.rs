//! Meeting-note processing: LLM-generated summaries and front-matter
//! maintenance.
//!
//! Works on the raw front-matter text (not the parsed map) because every
//! step writes the document back and must preserve unrelated keys and
//! formatting byte-for-byte. Summary generation is fatal on failure; the
//! later maintenance passes degrade to warnings.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::generation::generate_text;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MeetingType {
    Group,
    OneOnOne,
}

const GROUP_MEETING_PROMPT: &str = "\
You are an expert executive assistant. Based on the meeting notes file content provided below,
perform the following tasks and output *only* the resulting Markdown content.
Do NOT include code block quotation \"```markdown\" or \"```yaml\"

## Executive Summary

[Write a concise 4-sentence executive summary in an informal, straightforward tone.
Focus on the most important outcomes, decisions, and next steps.]

## Topics Covered

[Create a bulleted list of main topics for the Summary & Analysis section.]

## Summary & Analysis

[For each major topic, provide:]
**[Topic Name]**
- **Key Findings**: [details]
- **Challenges**: [details]
- **Potential Solutions**: [details]
- **Recommendations**: [details]

## Action Items

[Extract all action items in this format:]
- [ ] @Owner \u{2014} [short task description]

--- BEGIN FILE CONTENT ---
";

const ONE_ON_ONE_PROMPT: &str = "\
You are an expert executive assistant. Based on the 1:1 meeting notes provided below,
perform the following tasks and output *only* the resulting Markdown content.
Do NOT include code block quotation \"```markdown\" or \"```yaml\"

## Executive Summary

[Write a concise 4-sentence summary focusing on key discussion points,
employee concerns, and agreed-upon next steps.]

## Topics Covered

[Create a bulleted list of main discussion topics.]

## Summary & Analysis

[For each major topic:]
**[Topic Name]**
- **Key Findings**: [details]
- **Challenges**: [details]
- **Potential Solutions**: [details]
- **Recommendations**: [details]

## Coaching & Growth

**Growth Witnessed**: [Specific examples of professional growth or positive changes
observed in the employee during this meeting]

**Growth Opportunities**: [2-3 specific coaching opportunities or areas for development
to discuss in future meetings]

## Action Items

[Extract all action items in this format:]
- [ ] @Owner \u{2014} [short task description]

--- BEGIN FILE CONTENT ---
";

const FRONTMATTER_PROMPT: &str = "\
You are a file processor. Read the meeting notes content and update the frontmatter.
Output the *complete document* with updated frontmatter.

Update these frontmatter fields:
- tags: [relevant tags in kebab-case]
- category: [meeting type - use \"one-on-one\" for 1:1s, or other appropriate category]
- title: [concise <20 word summary in double quotes]
- links: [people mentioned in format [\"[[@ First Last]]\"]]
- attendees: [list of first names]

Rules:
- Preserve all existing frontmatter not mentioned above
- Preserve entire body content exactly
- Do NOT wrap output in code fences
- Use exact format \"[[@ First Last]]\" with space after @ for links

--- BEGIN CONTENT ---
";

/// Process a meeting-notes file: normalize names, insert an LLM summary,
/// refresh front matter, and stamp year/quarter from the filename.
pub async fn run_process(
    config: &Config,
    path: &Path,
    meeting_type: Option<MeetingType>,
) -> Result<()> {
    if !path.is_file() {
        bail!("File not found: {}", path.display());
    }
    println!("Processing {}...", path.display());

    // Step 0: name normalization.
    if config.processing.name_replacements.is_empty() {
        println!("Step 0: No name replacements configured");
    } else {
        match normalize_names(path, config) {
            Ok(()) => println!("Step 0: Complete"),
            Err(e) => eprintln!("Warning: Name normalization failed: {}", e),
        }
    }

    // Step 1: generate summary and analysis.
    println!("Step 1: Generating summary and analysis...");
    let original = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (head, body, has_fm) = split_raw_front_matter(&original);

    let meeting_type = meeting_type.unwrap_or_else(|| {
        if head.to_lowercase().contains("category: one-on-one") {
            MeetingType::OneOnOne
        } else {
            MeetingType::Group
        }
    });
    let template = match meeting_type {
        MeetingType::OneOnOne => ONE_ON_ONE_PROMPT,
        MeetingType::Group => GROUP_MEETING_PROMPT,
    };

    let summary = generate_text(&config.generation, &format!("{}\n{}", template, original))
        .await
        .context("summary generation failed")?;
    let summary = unwrap_fence(&summary);

    let mut rewritten = String::new();
    if has_fm {
        rewritten.push_str(&format!("---\n{}---\n", head));
    }
    rewritten.push_str("\n\n");
    rewritten.push_str(summary.trim_end());
    rewritten.push_str("\n\n");
    rewritten.push_str(body);
    std::fs::write(path, &rewritten)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Step 1: Summary added");

    // Step 2: front-matter update (non-fatal).
    println!("Step 2: Updating frontmatter...");
    let current = std::fs::read_to_string(path)?;
    let prompt = format!("{}\n{}\n--- END CONTENT ---", FRONTMATTER_PROMPT, current);
    match generate_text(&config.generation, &prompt).await {
        Ok(output) => {
            std::fs::write(path, unwrap_fence(&output))?;
            println!("Step 2: Frontmatter updated");
        }
        Err(e) => eprintln!("Error during Step 2: {}", e),
    }

    // Step 3: year/quarter from filename (non-fatal).
    println!("Step 3: Ensuring year/quarter...");
    match ensure_year_quarter(path) {
        Ok(result) => println!("Step 3: {}", result),
        Err(e) => eprintln!("Warning during Step 3: {}", e),
    }

    Ok(())
}

/// Split raw content on literal `---` delimiters, keeping the head text
/// verbatim for reassembly. Returns (head, body, has_front_matter).
pub fn split_raw_front_matter(raw: &str) -> (&str, &str, bool) {
    if let Some(rest) = raw.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            return (&rest[..end + 1], &rest[end + 5..], true);
        }
    }
    ("", raw, false)
}

/// Whether a YAML key already exists in the raw head (case-insensitive).
fn has_yaml_key(head: &str, key: &str) -> bool {
    head.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed
            .get(..key.len())
            .map(|prefix| prefix.eq_ignore_ascii_case(key))
            .unwrap_or(false)
            && trimmed[key.len()..].trim_start().starts_with(':')
    })
}

/// Append a YAML key if absent (idempotent).
fn insert_or_append_yaml(head: &str, key: &str, value: &str) -> String {
    if has_yaml_key(head, key) {
        return head.to_string();
    }
    let sep = if head.is_empty() || head.ends_with('\n') {
        ""
    } else {
        "\n"
    };
    format!("{}{}{}: {}\n", head, sep, key, value)
}

/// Extract (year, quarter) from an `MM-DD-YY` filename prefix.
fn extract_date_from_filename(filename: &str) -> Option<(i32, String)> {
    let bytes = filename.as_bytes();
    if bytes.len() < 8 || bytes[2] != b'-' || bytes[5] != b'-' {
        return None;
    }
    let month: u32 = filename.get(0..2)?.parse().ok()?;
    let _day: u32 = filename.get(3..5)?.parse().ok()?;
    let year_short: i32 = filename.get(6..8)?.parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    let quarter = (month - 1) / 3 + 1;
    Some((2000 + year_short, format!("Q{}", quarter)))
}

/// Remove a code fence when the entire output is wrapped in one.
fn unwrap_fence(text: &str) -> &str {
    let trimmed_start = text.trim_start();
    let rest = match trimmed_start.strip_prefix("```") {
        Some(rest) => rest,
        None => return text,
    };
    let after_lang = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return text,
    };
    let trimmed = after_lang.trim_end();
    match trimmed.rfind("```") {
        Some(last) => trimmed[..last].trim_matches('\n'),
        None => text,
    }
}

fn normalize_names(path: &Path, config: &Config) -> Result<()> {
    let mut content = std::fs::read_to_string(path)?;
    for (find, replace) in &config.processing.name_replacements {
        content = content.replace(find.as_str(), replace.as_str());
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Ensure `year` and `quarter` front-matter keys derived from the filename.
fn ensure_year_quarter(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)?;
    let (head, body, _) = split_raw_front_matter(&raw);

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let (year, quarter) = match extract_date_from_filename(&filename) {
        Some(date) => date,
        None => return Ok("no date in filename".to_string()),
    };

    let mut actions = Vec::new();
    let mut new_head = head.to_string();
    if !has_yaml_key(&new_head, "year") {
        new_head = insert_or_append_yaml(&new_head, "year", &year.to_string());
        actions.push("added year");
    }
    if !has_yaml_key(&new_head, "quarter") {
        new_head = insert_or_append_yaml(&new_head, "quarter", &quarter);
        actions.push("added quarter");
    }

    if actions.is_empty() {
        return Ok("no changes".to_string());
    }

    std::fs::write(path, format!("---\n{}---\n{}", new_head, body))?;
    Ok(actions.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_raw_front_matter_roundtrip() {
        let raw = "---\ncategory: one-on-one\ntags: [a]\n---\nBody text here.\n";
        let (head, body, has_fm) = split_raw_front_matter(raw);
        assert!(has_fm);
        assert_eq!(head, "category: one-on-one\ntags: [a]\n");
        assert_eq!(body, "Body text here.\n");
        assert_eq!(format!("---\n{}---\n{}", head, body), raw);
    }

    #[test]
    fn test_split_without_front_matter() {
        let (head, body, has_fm) = split_raw_front_matter("just text");
        assert!(!has_fm);
        assert_eq!(head, "");
        assert_eq!(body, "just text");
    }

    #[test]
    fn test_has_yaml_key_case_insensitive() {
        let head = "Year: 2025\n  quarter: Q4\n";
        assert!(has_yaml_key(head, "year"));
        assert!(has_yaml_key(head, "quarter"));
        assert!(!has_yaml_key(head, "month"));
    }

    #[test]
    fn test_insert_or_append_is_idempotent() {
        let head = "year: 2025\n";
        assert_eq!(insert_or_append_yaml(head, "year", "2026"), head);
        let appended = insert_or_append_yaml(head, "quarter", "Q4");
        assert_eq!(appended, "year: 2025\nquarter: Q4\n");
    }

    #[test]
    fn test_extract_date_from_filename() {
        assert_eq!(
            extract_date_from_filename("10-24-25 - AWS PM.md"),
            Some((2025, "Q4".to_string()))
        );
        assert_eq!(
            extract_date_from_filename("01-15-24.md"),
            Some((2024, "Q1".to_string()))
        );
        assert_eq!(extract_date_from_filename("notes.md"), None);
        assert_eq!(extract_date_from_filename("13-01-24.md"), None);
    }

    #[test]
    fn test_unwrap_fence() {
        assert_eq!(unwrap_fence("```markdown\ncontent\n```"), "content");
        assert_eq!(unwrap_fence("```\nline one\nline two\n```\n"), "line one\nline two");
        assert_eq!(unwrap_fence("no fence here"), "no fence here");
        assert_eq!(unwrap_fence("```unterminated\ntext"), "```unterminated\ntext");
    }

    #[test]
    fn test_ensure_year_quarter_adds_and_then_no_changes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("10-24-25 - Sync.md");
        std::fs::write(&path, "---\ncategory: sync-meeting\n---\nBody.\n").unwrap();

        let result = ensure_year_quarter(&path).unwrap();
        assert_eq!(result, "added year, added quarter");
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("year: 2025"));
        assert!(content.contains("quarter: Q4"));
        assert!(content.contains("category: sync-meeting"));
        assert!(content.ends_with("Body.\n"));

        let again = ensure_year_quarter(&path).unwrap();
        assert_eq!(again, "no changes");
    }

    #[test]
    fn test_ensure_year_quarter_without_date() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("untitled.md");
        std::fs::write(&path, "Body only.\n").unwrap();
        assert_eq!(ensure_year_quarter(&path).unwrap(), "no date in filename");
    }
}
